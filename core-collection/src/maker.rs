//! # Query Maker Contract
//!
//! A polymorphic, per-backend contract turning a logical query
//! specification into result delivery. Each queryable collection produces a
//! fresh [`QueryMaker`] per query; results come back tagged with the owning
//! collection's identity so callers can distinguish provenance when
//! collections overlap.
//!
//! ## State machine
//!
//! `Reset → Configured → Running → {Done | Aborted}`. Builder calls after
//! the maker has started running are no-ops guarded by a used flag;
//! [`QueryMaker::reset`] is the only legal transition back to `Configured`.
//! Re-entrant use of one instance for two queries is unsupported — create a
//! fresh instance per query.
//!
//! ## Execution modes
//!
//! - **blocking**: [`QueryMaker::run_blocking`] awaits the backend
//!   round-trip inline; used for small interactive lookups.
//! - **asynchronous**: [`QueryMaker::run_async`] enqueues the query on a
//!   background task and returns a [`QueryHandle`] whose completion is
//!   signaled once. Abort is cooperative, checked between result rows; an
//!   accepted abort finishes in `Aborted` without emitting results.

use crate::error::{CollectionError, Result};
use crate::query_builder::FilterMode;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// The entity kind a logical query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Track,
    Artist,
    Album,
    Genre,
    Year,
    /// Returns track urls only.
    Custom,
}

/// Lifecycle state of a query maker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MakerState {
    Reset,
    Configured,
    Running,
    Done,
    Aborted,
}

/// Logical fields understood by every backend. SQL backends map these onto
/// (table, column) pairs, graph backends onto predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaField {
    Url,
    Title,
    Comment,
    TrackNumber,
    Artist,
    Album,
    Genre,
    Year,
    Directory,
    Length,
    Bitrate,
    Score,
    Rating,
    PlayCount,
}

/// One collection's results for a logical query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultSet {
    /// Identity of the collection that produced these rows.
    pub collection_id: String,
    pub query_type: QueryType,
    /// One entry per logical row, values in the query type's field order.
    pub rows: Vec<Vec<String>>,
}

/// Find the result set a given collection produced.
pub fn result_for<'a>(results: &'a [ResultSet], collection_id: &str) -> Option<&'a ResultSet> {
    results
        .iter()
        .find(|set| set.collection_id == collection_id)
}

/// Completion handle for an asynchronous query.
pub struct QueryHandle {
    receiver: oneshot::Receiver<Result<Vec<ResultSet>>>,
    token: CancellationToken,
}

impl QueryHandle {
    pub(crate) fn new(
        receiver: oneshot::Receiver<Result<Vec<ResultSet>>>,
        token: CancellationToken,
    ) -> Self {
        Self { receiver, token }
    }

    /// Request cooperative abort. The query finishes `Aborted` without
    /// emitting completion results.
    pub fn abort(&self) {
        self.token.cancel();
    }

    /// Await completion. Resolves to [`CollectionError::Aborted`] when the
    /// query was aborted before finishing.
    pub async fn wait(self) -> Result<Vec<ResultSet>> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(CollectionError::Aborted),
        }
    }
}

/// Per-backend, per-query specification and execution contract.
#[async_trait]
pub trait QueryMaker: Send {
    /// Return to `Configured`; the only legal transition out of a terminal
    /// state.
    fn reset(&mut self);

    fn state(&self) -> MakerState;

    fn set_query_type(&mut self, query_type: QueryType);

    fn add_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode);

    fn exclude_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode);

    /// Case-insensitive exact match.
    fn add_match(&mut self, field: MetaField, text: &str);

    fn begin_and(&mut self);

    fn begin_or(&mut self);

    fn end_group(&mut self);

    fn order_by(&mut self, field: MetaField, descending: bool);

    /// Restrict the result window.
    fn limit(&mut self, offset: u32, length: u32);

    /// Request cooperative abort of a running query.
    fn abort(&self);

    /// Execute on the caller's task and wait for the round-trip.
    async fn run_blocking(&mut self) -> Result<Vec<ResultSet>>;

    /// Enqueue on a background task; completion is signaled through the
    /// returned handle.
    fn run_async(&mut self) -> Result<QueryHandle>;
}

/// Fans a logical query out to one maker per queryable collection and
/// merges their labeled result sets.
///
/// Collections that fail are logged and contribute an empty result rather
/// than failing the whole request; an abort propagates.
pub struct MetaQueryMaker {
    makers: Vec<Box<dyn QueryMaker>>,
    state: MakerState,
    token: CancellationToken,
}

impl MetaQueryMaker {
    pub fn new(makers: Vec<Box<dyn QueryMaker>>) -> Self {
        Self {
            makers,
            state: MakerState::Reset,
            token: CancellationToken::new(),
        }
    }

    /// Number of collections this query fans out to.
    pub fn fan_out(&self) -> usize {
        self.makers.len()
    }

    fn forward(&mut self, f: impl Fn(&mut Box<dyn QueryMaker>)) {
        if !matches!(self.state, MakerState::Reset | MakerState::Configured) {
            warn!("query maker configured after run was started; ignoring");
            return;
        }
        for maker in &mut self.makers {
            f(maker);
        }
        self.state = MakerState::Configured;
    }

    async fn run_all(
        mut makers: Vec<Box<dyn QueryMaker>>,
        token: CancellationToken,
    ) -> Result<Vec<ResultSet>> {
        let mut results = Vec::with_capacity(makers.len());
        for maker in &mut makers {
            if token.is_cancelled() {
                return Err(CollectionError::Aborted);
            }
            match maker.run_blocking().await {
                Ok(sets) => results.extend(sets),
                Err(CollectionError::Aborted) => return Err(CollectionError::Aborted),
                Err(e) => {
                    // One misbehaving collection must not take down the
                    // others; its result set degrades to nothing.
                    warn!(error = %e, "collection query failed during fan-out");
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl QueryMaker for MetaQueryMaker {
    fn reset(&mut self) {
        for maker in &mut self.makers {
            maker.reset();
        }
        self.state = MakerState::Reset;
        self.token = CancellationToken::new();
    }

    fn state(&self) -> MakerState {
        self.state
    }

    fn set_query_type(&mut self, query_type: QueryType) {
        self.forward(|m| m.set_query_type(query_type));
    }

    fn add_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode) {
        self.forward(|m| m.add_filter(field, pattern, mode));
    }

    fn exclude_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode) {
        self.forward(|m| m.exclude_filter(field, pattern, mode));
    }

    fn add_match(&mut self, field: MetaField, text: &str) {
        self.forward(|m| m.add_match(field, text));
    }

    fn begin_and(&mut self) {
        self.forward(|m| m.begin_and());
    }

    fn begin_or(&mut self) {
        self.forward(|m| m.begin_or());
    }

    fn end_group(&mut self) {
        self.forward(|m| m.end_group());
    }

    fn order_by(&mut self, field: MetaField, descending: bool) {
        self.forward(|m| m.order_by(field, descending));
    }

    fn limit(&mut self, offset: u32, length: u32) {
        self.forward(|m| m.limit(offset, length));
    }

    fn abort(&self) {
        self.token.cancel();
        for maker in &self.makers {
            maker.abort();
        }
    }

    async fn run_blocking(&mut self) -> Result<Vec<ResultSet>> {
        if self.state == MakerState::Running {
            return Err(CollectionError::InvalidState(
                "query maker is already running".to_string(),
            ));
        }
        self.state = MakerState::Running;
        let makers = std::mem::take(&mut self.makers);
        let result = Self::run_all(makers, self.token.clone()).await;
        self.state = match &result {
            Ok(_) => MakerState::Done,
            Err(CollectionError::Aborted) => MakerState::Aborted,
            Err(_) => MakerState::Done,
        };
        result
    }

    fn run_async(&mut self) -> Result<QueryHandle> {
        if self.state == MakerState::Running {
            return Err(CollectionError::InvalidState(
                "query maker is already running".to_string(),
            ));
        }
        self.state = MakerState::Running;
        let makers = std::mem::take(&mut self.makers);
        let token = self.token.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = Self::run_all(makers, token.clone()).await;
            // Receiver may have been dropped; nothing to do then.
            tx.send(result).ok();
        });
        Ok(QueryHandle::new(rx, self.token.clone()))
    }
}
