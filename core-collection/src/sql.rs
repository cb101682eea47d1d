//! # SQL Collection
//!
//! The writable, SQL-backed collection: owns the schema manager and the
//! dimension resolver for its storage backend and exposes the engine
//! operations the IPC façade maps 1:1 onto (track upserts, directory
//! bookkeeping, statistics, lyrics, labels, totals, and the raw statement
//! escape hatch).
//!
//! Track rows are replaced url-wise with a delete-then-insert pair wrapped
//! in a transaction where the backend supports one, so a crash between the
//! two cannot lose a row.

use crate::dimensions::DimensionResolver;
use crate::error::{CollectionError, Result};
use crate::maker::{MakerState, MetaField, QueryHandle, QueryMaker, QueryType, ResultSet};
use crate::manager::Collection;
use crate::models::{Dimension, TrackBundle};
use crate::query_builder::{FilterMode, QueryBuilder, TableSet, ValueSet};
use crate::schema::SchemaManager;
use async_trait::async_trait;
use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
use core_storage::{SqlRow, SqlStorage, SqlValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded retry for read queries issued against a possibly
/// still-initializing database. Write failures are never retried.
const READ_RETRIES: u32 = 2;
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);

/// The local writable collection.
pub struct SqlCollection {
    id: String,
    pretty_name: String,
    storage: Arc<dyn SqlStorage>,
    schema: SchemaManager,
    resolver: DimensionResolver,
    events: EventBus,
    priority: i32,
}

impl SqlCollection {
    /// Open the collection: runs the schema version checks and creates any
    /// missing tables.
    pub async fn open(
        id: impl Into<String>,
        pretty_name: impl Into<String>,
        storage: Arc<dyn SqlStorage>,
        events: EventBus,
        priority: i32,
    ) -> Result<Arc<Self>> {
        let schema = SchemaManager::new(storage.clone(), events.clone());
        schema.initialize().await?;

        Ok(Arc::new(Self {
            id: id.into(),
            pretty_name: pretty_name.into(),
            resolver: DimensionResolver::new(storage.clone()),
            schema,
            storage,
            events,
            priority,
        }))
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub fn resolver(&self) -> &DimensionResolver {
        &self.resolver
    }

    pub fn storage(&self) -> Arc<dyn SqlStorage> {
        self.storage.clone()
    }

    /// Insert one track: resolves the four dimension ids (autocreating),
    /// deletes any stale row with the same url, inserts the fresh row. The
    /// delete and insert run in one transaction.
    pub async fn add_track(&self, bundle: &TrackBundle, temporary: bool) -> Result<()> {
        let artist = self
            .resolver
            .resolve(Dimension::Artist, &bundle.artist, true, temporary)
            .await?;
        let album = self
            .resolver
            .resolve(Dimension::Album, &bundle.album, true, temporary)
            .await?;
        let genre = self
            .resolver
            .resolve(Dimension::Genre, &bundle.genre, true, temporary)
            .await?;
        let year = self
            .resolver
            .resolve(Dimension::Year, &bundle.year, true, temporary)
            .await?;

        let suffix = if temporary { "_temp" } else { "" };
        let url = self.storage.escape(&bundle.url);
        let now = chrono::Utc::now().timestamp();

        let delete = format!("DELETE FROM tags{suffix} WHERE url = '{url}'");
        let insert = format!(
            "INSERT INTO tags{suffix} ( url, dir, createdate, album, artist, genre, year, \
             title, comment, track, bitrate, length, samplerate ) \
             VALUES ( '{url}', '{dir}', {now}, {album}, {artist}, {genre}, {year}, \
             '{title}', '{comment}', {track}, {bitrate}, {length}, {samplerate} )",
            dir = self.storage.escape(&bundle.directory),
            title = self.storage.escape(&bundle.title),
            comment = self.storage.escape(&bundle.comment),
            track = optional_number(bundle.track_number),
            bitrate = optional_number(bundle.bitrate),
            length = optional_number(bundle.length_secs),
            samplerate = optional_number(bundle.sample_rate),
        );

        self.storage
            .execute_transaction(&[delete, insert])
            .await?;
        Ok(())
    }

    /// Delete every track row whose directory matches. This is what keeps a
    /// directory rescan from producing duplicate urls.
    pub async fn remove_songs_in_dir(&self, dir: &str) -> Result<u64> {
        let affected = self
            .storage
            .execute(&format!(
                "DELETE FROM tags WHERE dir = '{}'",
                self.storage.escape(dir)
            ))
            .await?;
        debug!(dir = dir, removed = affected, "Removed directory rows");
        Ok(affected)
    }

    pub async fn is_dir_in_collection(&self, dir: &str) -> Result<bool> {
        let rows = self
            .storage
            .query(&format!(
                "SELECT dir FROM directories WHERE dir = '{}'",
                self.storage.escape(dir)
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    pub async fn is_file_in_collection(&self, url: &str) -> Result<bool> {
        let rows = self
            .storage
            .query(&format!(
                "SELECT url FROM tags WHERE url = '{}'",
                self.storage.escape(url)
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    /// Record the mtime observed for a directory at scan time.
    pub async fn update_dir_stamp(&self, dir: &str, changedate: i64, temporary: bool) -> Result<()> {
        let suffix = if temporary { "_temp" } else { "" };
        let dir = self.storage.escape(dir);
        self.storage
            .execute_transaction(&[
                format!("DELETE FROM directories{suffix} WHERE dir = '{dir}'"),
                format!(
                    "INSERT INTO directories{suffix} ( dir, changedate ) VALUES ( '{dir}', {changedate} )"
                ),
            ])
            .await?;
        Ok(())
    }

    /// Forget every directory stamp; the next comparison sees everything as
    /// dirty.
    pub async fn clear_dir_stamps(&self) -> Result<()> {
        self.storage.execute("DELETE FROM directories").await?;
        Ok(())
    }

    /// All recorded (directory, mtime) stamps.
    pub async fn dir_stamps(&self) -> Result<Vec<(String, i64)>> {
        let rows = self
            .query_with_retry("SELECT dir, changedate FROM directories")
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let dir = row.get("dir").and_then(SqlValue::as_str)?.to_string();
                let stamp = row.get("changedate").and_then(SqlValue::as_i64)?;
                Some((dir, stamp))
            })
            .collect())
    }

    // -- statistics ------------------------------------------------------

    async fn ensure_stats_row(&self, url: &str) -> Result<()> {
        let escaped = self.storage.escape(url);
        let rows = self
            .storage
            .query(&format!(
                "SELECT url FROM statistics WHERE url = '{escaped}'"
            ))
            .await?;
        if rows.is_empty() {
            let now = chrono::Utc::now().timestamp();
            self.storage
                .execute(&format!(
                    "INSERT INTO statistics ( url, createdate, accessdate, percentage, rating, playcounter ) \
                     VALUES ( '{escaped}', {now}, {now}, 0, 0, 0 )"
                ))
                .await?;
        }
        Ok(())
    }

    /// Record one play: bumps the play counter and access date.
    pub async fn add_play(&self, url: &str) -> Result<()> {
        self.ensure_stats_row(url).await?;
        let now = chrono::Utc::now().timestamp();
        self.storage
            .execute(&format!(
                "UPDATE statistics SET playcounter = playcounter + 1, accessdate = {now} \
                 WHERE url = '{}'",
                self.storage.escape(url)
            ))
            .await?;
        Ok(())
    }

    pub async fn set_score(&self, url: &str, percentage: i64) -> Result<()> {
        self.ensure_stats_row(url).await?;
        self.storage
            .execute(&format!(
                "UPDATE statistics SET percentage = {percentage} WHERE url = '{}'",
                self.storage.escape(url)
            ))
            .await?;
        self.events
            .emit(CoreEvent::Collection(CollectionEvent::ScoreChanged {
                url: url.to_string(),
                percentage,
            }));
        Ok(())
    }

    pub async fn score(&self, url: &str) -> Result<i64> {
        self.stats_value(url, "percentage").await
    }

    pub async fn set_rating(&self, url: &str, rating: i64) -> Result<()> {
        self.ensure_stats_row(url).await?;
        self.storage
            .execute(&format!(
                "UPDATE statistics SET rating = {rating} WHERE url = '{}'",
                self.storage.escape(url)
            ))
            .await?;
        self.events
            .emit(CoreEvent::Collection(CollectionEvent::RatingChanged {
                url: url.to_string(),
                rating,
            }));
        Ok(())
    }

    pub async fn rating(&self, url: &str) -> Result<i64> {
        self.stats_value(url, "rating").await
    }

    pub async fn play_count(&self, url: &str) -> Result<i64> {
        self.stats_value(url, "playcounter").await
    }

    async fn stats_value(&self, url: &str, column: &str) -> Result<i64> {
        let rows = self
            .query_with_retry(&format!(
                "SELECT {column} FROM statistics WHERE url = '{}'",
                self.storage.escape(url)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(column))
            .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)))
            .unwrap_or(0))
    }

    // -- lyrics and labels ----------------------------------------------

    pub async fn set_lyrics(&self, url: &str, lyrics: &str) -> Result<()> {
        let url = self.storage.escape(url);
        let lyrics = self.storage.escape(lyrics);
        self.storage
            .execute_transaction(&[
                format!("DELETE FROM lyrics WHERE url = '{url}'"),
                format!("INSERT INTO lyrics ( url, lyrics ) VALUES ( '{url}', '{lyrics}' )"),
            ])
            .await?;
        Ok(())
    }

    pub async fn lyrics(&self, url: &str) -> Result<Option<String>> {
        let rows = self
            .query_with_retry(&format!(
                "SELECT lyrics FROM lyrics WHERE url = '{}'",
                self.storage.escape(url)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("lyrics"))
            .and_then(SqlValue::as_str)
            .map(str::to_string))
    }

    pub async fn add_label(&self, url: &str, label: &str) -> Result<()> {
        let url_esc = self.storage.escape(url);
        let label_esc = self.storage.escape(label);
        // The unique index makes a duplicate label a no-op.
        let result = self
            .storage
            .execute(&format!(
                "INSERT INTO labels ( url, label ) VALUES ( '{url_esc}', '{label_esc}' )"
            ))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(core_storage::StorageError::Statement { message })
                if message.to_lowercase().contains("unique") =>
            {
                debug!(url = url, label = label, "Label already present");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_label(&self, url: &str, label: &str) -> Result<()> {
        self.storage
            .execute(&format!(
                "DELETE FROM labels WHERE url = '{}' AND label = '{}'",
                self.storage.escape(url),
                self.storage.escape(label)
            ))
            .await?;
        Ok(())
    }

    pub async fn labels_for(&self, url: &str) -> Result<Vec<String>> {
        let rows = self
            .query_with_retry(&format!(
                "SELECT label FROM labels WHERE url = '{}' ORDER BY label",
                self.storage.escape(url)
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("label").and_then(SqlValue::as_str))
            .map(str::to_string)
            .collect())
    }

    // -- totals for the façade ------------------------------------------

    pub async fn total_tracks(&self) -> Result<i64> {
        self.count("SELECT COUNT( url ) AS n FROM tags").await
    }

    pub async fn total_artists(&self) -> Result<i64> {
        self.count("SELECT COUNT( id ) AS n FROM artist").await
    }

    pub async fn total_albums(&self) -> Result<i64> {
        self.count("SELECT COUNT( id ) AS n FROM album").await
    }

    pub async fn total_genres(&self) -> Result<i64> {
        self.count("SELECT COUNT( id ) AS n FROM genre").await
    }

    async fn count(&self, statement: &str) -> Result<i64> {
        let rows = self.query_with_retry(statement).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0))
    }

    /// Raw statement escape hatch for the IPC façade. Returns flat string
    /// rows; callers must pre-escape values with the storage's `escape()`.
    pub async fn query_raw(&self, statement: &str) -> Result<Vec<Vec<String>>> {
        let rows = self.query_with_retry(statement).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                row.into_values()
                    .into_iter()
                    .map(|value| value.to_display_string())
                    .collect()
            })
            .collect())
    }

    async fn query_with_retry(&self, statement: &str) -> Result<Vec<SqlRow>> {
        let mut attempt = 0;
        loop {
            match self.storage.query(statement).await {
                Ok(rows) => return Ok(rows),
                Err(e) if attempt < READ_RETRIES => {
                    attempt += 1;
                    debug!(error = %e, attempt = attempt, "Read query failed, retrying");
                    tokio::time::sleep(READ_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn optional_number<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "NULL".to_string())
}

impl Collection for SqlCollection {
    fn collection_id(&self) -> &str {
        &self.id
    }

    fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    fn query_maker(&self) -> Box<dyn QueryMaker> {
        Box::new(SqlCollectionQueryMaker::new(
            self.storage.clone(),
            self.id.clone(),
        ))
    }

    fn sql_storage(&self) -> Option<Arc<dyn SqlStorage>> {
        Some(self.storage.clone())
    }

    fn sql_priority(&self) -> i32 {
        self.priority
    }
}

/// [`QueryMaker`] translating the logical field vocabulary onto a
/// [`QueryBuilder`] for one SQL backend.
pub struct SqlCollectionQueryMaker {
    storage: Arc<dyn SqlStorage>,
    collection_id: String,
    builder: QueryBuilder,
    query_type: Option<QueryType>,
    state: MakerState,
    token: CancellationToken,
}

impl SqlCollectionQueryMaker {
    pub fn new(storage: Arc<dyn SqlStorage>, collection_id: String) -> Self {
        let builder = QueryBuilder::new(storage.clone());
        Self {
            storage,
            collection_id,
            builder,
            query_type: None,
            state: MakerState::Reset,
            token: CancellationToken::new(),
        }
    }

    fn field_site(field: MetaField) -> (TableSet, ValueSet) {
        match field {
            MetaField::Url => (TableSet::SONG, ValueSet::URL),
            MetaField::Title => (TableSet::SONG, ValueSet::TITLE),
            MetaField::Comment => (TableSet::SONG, ValueSet::COMMENT),
            MetaField::TrackNumber => (TableSet::SONG, ValueSet::TRACK),
            MetaField::Artist => (TableSet::ARTIST, ValueSet::NAME),
            MetaField::Album => (TableSet::ALBUM, ValueSet::NAME),
            MetaField::Genre => (TableSet::GENRE, ValueSet::NAME),
            MetaField::Year => (TableSet::YEAR, ValueSet::NAME),
            MetaField::Directory => (TableSet::SONG, ValueSet::DIRECTORY),
            MetaField::Length => (TableSet::SONG, ValueSet::LENGTH),
            MetaField::Bitrate => (TableSet::SONG, ValueSet::BITRATE),
            MetaField::Score => (TableSet::STATS, ValueSet::PERCENTAGE),
            MetaField::Rating => (TableSet::STATS, ValueSet::RATING),
            MetaField::PlayCount => (TableSet::STATS, ValueSet::PLAYCOUNTER),
        }
    }

    /// Builder calls are no-ops once the maker has started running.
    fn configurable(&mut self) -> bool {
        match self.state {
            MakerState::Reset | MakerState::Configured => {
                self.state = MakerState::Configured;
                true
            }
            _ => {
                warn!("query maker configured after run was started; ignoring");
                false
            }
        }
    }

    fn run_checks(&mut self) -> Result<String> {
        if self.state == MakerState::Running {
            return Err(CollectionError::InvalidState(
                "query maker is already running".to_string(),
            ));
        }
        if self.query_type.is_none() {
            return Err(CollectionError::InvalidState(
                "query maker run without a query type".to_string(),
            ));
        }
        self.builder.query()
    }

    async fn execute(
        storage: Arc<dyn SqlStorage>,
        statement: String,
        collection_id: String,
        query_type: QueryType,
        token: CancellationToken,
    ) -> Result<Vec<ResultSet>> {
        if token.is_cancelled() {
            return Err(CollectionError::Aborted);
        }
        let rows = storage.query(&statement).await?;

        let mut result_rows = Vec::with_capacity(rows.len());
        for row in rows {
            // Cooperative abort, checked between result rows.
            if token.is_cancelled() {
                return Err(CollectionError::Aborted);
            }
            result_rows.push(
                row.into_values()
                    .into_iter()
                    .map(|value| value.to_display_string())
                    .collect(),
            );
        }

        Ok(vec![ResultSet {
            collection_id,
            query_type,
            rows: result_rows,
        }])
    }
}

#[async_trait]
impl QueryMaker for SqlCollectionQueryMaker {
    fn reset(&mut self) {
        self.builder.reset();
        self.query_type = None;
        self.state = MakerState::Reset;
        self.token = CancellationToken::new();
    }

    fn state(&self) -> MakerState {
        self.state
    }

    fn set_query_type(&mut self, query_type: QueryType) {
        if !self.configurable() {
            return;
        }
        self.query_type = Some(query_type);
        match query_type {
            QueryType::Track => {
                for (table, value) in [
                    (TableSet::SONG, ValueSet::URL),
                    (TableSet::SONG, ValueSet::TITLE),
                    (TableSet::ARTIST, ValueSet::NAME),
                    (TableSet::ALBUM, ValueSet::NAME),
                    (TableSet::GENRE, ValueSet::NAME),
                    (TableSet::YEAR, ValueSet::NAME),
                    (TableSet::SONG, ValueSet::TRACK),
                    (TableSet::SONG, ValueSet::COMMENT),
                ] {
                    self.builder.add_return_value(table, value);
                }
                // Browsing surfaces assume album order with track numbers
                // inside each album.
                self.builder.sort_by(TableSet::ALBUM, ValueSet::NAME, false);
                self.builder.sort_by(TableSet::SONG, ValueSet::TRACK, false);
            }
            QueryType::Artist => {
                // Grouping deduplicates across the tags join; sortname must
                // be grouped too since the sort references it.
                self.builder.add_return_value(TableSet::ARTIST, ValueSet::NAME);
                self.builder.require_table(TableSet::SONG);
                self.builder.group_by(TableSet::ARTIST, ValueSet::NAME);
                self.builder.group_by(TableSet::ARTIST, ValueSet::SORTNAME);
                self.builder
                    .sort_by(TableSet::ARTIST, ValueSet::SORTNAME, false);
            }
            QueryType::Album => {
                self.builder.add_return_value(TableSet::ALBUM, ValueSet::NAME);
                self.builder.require_table(TableSet::SONG);
                self.builder.group_by(TableSet::ALBUM, ValueSet::NAME);
                self.builder.sort_by(TableSet::ALBUM, ValueSet::NAME, false);
            }
            QueryType::Genre => {
                self.builder.add_return_value(TableSet::GENRE, ValueSet::NAME);
                self.builder.require_table(TableSet::SONG);
                self.builder.group_by(TableSet::GENRE, ValueSet::NAME);
                self.builder.sort_by(TableSet::GENRE, ValueSet::NAME, false);
            }
            QueryType::Year => {
                self.builder.add_return_value(TableSet::YEAR, ValueSet::NAME);
                self.builder.require_table(TableSet::SONG);
                self.builder.group_by(TableSet::YEAR, ValueSet::NAME);
                self.builder.sort_by(TableSet::YEAR, ValueSet::NAME, false);
            }
            QueryType::Custom => {
                self.builder.add_return_value(TableSet::SONG, ValueSet::URL);
            }
        }
    }

    fn add_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode) {
        if !self.configurable() {
            return;
        }
        let (table, value) = Self::field_site(field);
        self.builder.add_filter(table, value, pattern, mode);
    }

    fn exclude_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode) {
        if !self.configurable() {
            return;
        }
        let (table, value) = Self::field_site(field);
        self.builder.exclude_filter(table, value, pattern, mode);
    }

    fn add_match(&mut self, field: MetaField, text: &str) {
        if !self.configurable() {
            return;
        }
        let (table, value) = Self::field_site(field);
        self.builder.add_match(table, value, text);
    }

    fn begin_and(&mut self) {
        if self.configurable() {
            self.builder.begin_and();
        }
    }

    fn begin_or(&mut self) {
        if self.configurable() {
            self.builder.begin_or();
        }
    }

    fn end_group(&mut self) {
        if self.configurable() {
            self.builder.end_group();
        }
    }

    fn order_by(&mut self, field: MetaField, descending: bool) {
        if !self.configurable() {
            return;
        }
        let (table, value) = Self::field_site(field);
        self.builder.sort_by(table, value, descending);
    }

    fn limit(&mut self, offset: u32, length: u32) {
        if self.configurable() {
            self.builder.set_limit(offset, length);
        }
    }

    fn abort(&self) {
        self.token.cancel();
    }

    async fn run_blocking(&mut self) -> Result<Vec<ResultSet>> {
        let statement = self.run_checks()?;
        let query_type = self.query_type.expect("checked in run_checks");
        self.state = MakerState::Running;

        let result = Self::execute(
            self.storage.clone(),
            statement,
            self.collection_id.clone(),
            query_type,
            self.token.clone(),
        )
        .await;

        self.state = match &result {
            Err(CollectionError::Aborted) => MakerState::Aborted,
            _ => MakerState::Done,
        };
        result
    }

    fn run_async(&mut self) -> Result<QueryHandle> {
        let statement = self.run_checks()?;
        let query_type = self.query_type.expect("checked in run_checks");
        self.state = MakerState::Running;

        let storage = self.storage.clone();
        let collection_id = self.collection_id.clone();
        let token = self.token.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result =
                Self::execute(storage, statement, collection_id, query_type, token.clone()).await;
            tx.send(result).ok();
        });
        Ok(QueryHandle::new(rx, self.token.clone()))
    }
}
