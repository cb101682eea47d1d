//! # Semantic Graph Collection
//!
//! The alternative, graph-backed collection kind. Track metadata lives as
//! (subject, predicate, object) statements using the Xesam vocabulary, and
//! queries are rendered from a template per query type instead of SQL.
//!
//! ## Overview
//!
//! [`GraphQueryMaker`] accumulates the same logical specification as the
//! SQL maker but compiles it into a [`GraphQuery`]: a variable/predicate
//! binding list, a constraint tree, and ordering/limit, together with the
//! rendered SPARQL-style query text that is logged and shipped to networked
//! endpoints. [`MemoryGraphStore`] is the in-process backend; it evaluates
//! the structured form directly.

use crate::error::{CollectionError, Result};
use crate::maker::{MakerState, MetaField, QueryHandle, QueryMaker, QueryType, ResultSet};
use crate::manager::Collection;
use crate::models::TrackBundle;
use crate::query_builder::FilterMode;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One statement in a graph store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

/// A filter/match constraint tree. Groups mirror the AND/OR nesting of the
/// query specification.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphConstraint {
    Compare {
        predicate: String,
        text: String,
        mode: FilterMode,
        negated: bool,
    },
    Group {
        conjunctive: bool,
        children: Vec<GraphConstraint>,
    },
}

/// A compiled graph query: the structured form evaluated by in-process
/// stores plus the rendered text sent to remote endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQuery {
    pub text: String,
    /// (variable, predicate) bindings, one per variable used anywhere.
    pub bindings: Vec<(String, String)>,
    /// Variables projected per subject, in row order.
    pub projection: Vec<String>,
    pub constraint: GraphConstraint,
    pub distinct: bool,
    /// (variable, descending) sort keys.
    pub order_by: Vec<(String, bool)>,
    /// (offset, length) result window.
    pub limit: Option<(u32, u32)>,
}

/// Pluggable semantic store backend.
pub trait GraphStore: Send + Sync {
    /// Add one statement.
    fn add_statement(&self, subject: &str, predicate: &str, object: &str);

    /// Remove every statement with the given subject.
    fn remove_subject(&self, subject: &str);

    /// Evaluate a compiled query and return one row per matching subject.
    fn select(&self, query: &GraphQuery) -> Vec<Vec<String>>;
}

/// In-process triple store.
#[derive(Default)]
pub struct MemoryGraphStore {
    triples: RwLock<Vec<Triple>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.triples.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn values_of<'a>(triples: &'a [Triple], subject: &str, predicate: &str) -> Vec<&'a str> {
        triples
            .iter()
            .filter(|t| t.subject == subject && t.predicate == predicate)
            .map(|t| t.object.as_str())
            .collect()
    }

    fn matches(value: &str, text: &str, mode: FilterMode) -> bool {
        let value = value.to_lowercase();
        let text = text.to_lowercase();
        match mode {
            FilterMode::Contains => value.contains(&text),
            FilterMode::StartsWith => value.starts_with(&text),
            FilterMode::EndsWith => value.ends_with(&text),
            FilterMode::Equals => value == text,
            FilterMode::Less => compare_values(&value, &text) == std::cmp::Ordering::Less,
            FilterMode::Greater => compare_values(&value, &text) == std::cmp::Ordering::Greater,
        }
    }

    fn evaluate(constraint: &GraphConstraint, triples: &[Triple], subject: &str) -> bool {
        match constraint {
            GraphConstraint::Compare {
                predicate,
                text,
                mode,
                negated,
            } => {
                let hit = Self::values_of(triples, subject, predicate)
                    .iter()
                    .any(|value| Self::matches(value, text, *mode));
                hit != *negated
            }
            GraphConstraint::Group {
                conjunctive,
                children,
            } => {
                if *conjunctive {
                    children
                        .iter()
                        .all(|child| Self::evaluate(child, triples, subject))
                } else {
                    children
                        .iter()
                        .any(|child| Self::evaluate(child, triples, subject))
                }
            }
        }
    }
}

/// Numeric comparison when both sides parse as numbers, lexicographic
/// otherwise.
fn compare_values(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}

impl GraphStore for MemoryGraphStore {
    fn add_statement(&self, subject: &str, predicate: &str, object: &str) {
        self.triples.write().unwrap().push(Triple {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
        });
    }

    fn remove_subject(&self, subject: &str) {
        self.triples
            .write()
            .unwrap()
            .retain(|t| t.subject != subject);
    }

    fn select<'q>(&self, query: &'q GraphQuery) -> Vec<Vec<String>> {
        let triples = self.triples.read().unwrap();

        let mut subjects: Vec<&str> = Vec::new();
        for triple in triples.iter() {
            if !subjects.contains(&triple.subject.as_str()) {
                subjects.push(&triple.subject);
            }
        }

        let predicate_of = |var: &'q str| -> &'q str {
            query
                .bindings
                .iter()
                .find(|(v, _)| v == var)
                .map(|(_, p)| p.as_str())
                .unwrap_or(var)
        };

        let mut rows: Vec<Vec<String>> = Vec::new();
        for subject in subjects {
            if !Self::evaluate(&query.constraint, &triples, subject) {
                continue;
            }
            let row: Vec<String> = query
                .projection
                .iter()
                .map(|var| {
                    Self::values_of(&triples, subject, predicate_of(var))
                        .first()
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                })
                .collect();
            if query.distinct && rows.contains(&row) {
                continue;
            }
            rows.push(row);
        }

        for (var, descending) in query.order_by.iter().rev() {
            let index = query.projection.iter().position(|p| p == var);
            if let Some(index) = index {
                rows.sort_by(|a, b| {
                    let ordering = compare_values(&a[index].to_lowercase(), &b[index].to_lowercase());
                    if *descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
            }
        }

        if let Some((offset, length)) = query.limit {
            rows = rows
                .into_iter()
                .skip(offset as usize)
                .take(length as usize)
                .collect();
        }

        rows
    }
}

fn field_var(field: MetaField) -> &'static str {
    match field {
        MetaField::Url => "url",
        MetaField::Title => "title",
        MetaField::Comment => "comment",
        MetaField::TrackNumber => "trackNumber",
        MetaField::Artist => "artist",
        MetaField::Album => "album",
        MetaField::Genre => "genre",
        MetaField::Year => "year",
        MetaField::Directory => "dir",
        MetaField::Length => "length",
        MetaField::Bitrate => "bitrate",
        MetaField::Score => "score",
        MetaField::Rating => "rating",
        MetaField::PlayCount => "useCount",
    }
}

fn field_predicate(field: MetaField) -> &'static str {
    match field {
        MetaField::Url => "xesam:url",
        MetaField::Title => "xesam:title",
        MetaField::Comment => "xesam:comment",
        MetaField::TrackNumber => "xesam:trackNumber",
        MetaField::Artist => "xesam:artist",
        MetaField::Album => "xesam:album",
        MetaField::Genre => "xesam:genre",
        MetaField::Year => "xesam:contentCreated",
        MetaField::Directory => "xesam:storageLocation",
        MetaField::Length => "xesam:mediaDuration",
        MetaField::Bitrate => "xesam:audioBitrate",
        MetaField::Score => "xesam:autoRating",
        MetaField::Rating => "xesam:userRating",
        MetaField::PlayCount => "xesam:useCount",
    }
}

/// A named collection backed by a semantic store.
pub struct GraphCollection {
    id: String,
    pretty_name: String,
    store: Arc<dyn GraphStore>,
}

impl GraphCollection {
    pub fn new(
        id: impl Into<String>,
        pretty_name: impl Into<String>,
        store: Arc<dyn GraphStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            pretty_name: pretty_name.into(),
            store,
        })
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        self.store.clone()
    }

    /// Replace the statements describing one track.
    pub fn add_track(&self, bundle: &TrackBundle) {
        self.store.remove_subject(&bundle.url);
        let mut statements = vec![
            (MetaField::Url, bundle.url.clone()),
            (MetaField::Directory, bundle.directory.clone()),
            (MetaField::Title, bundle.title.clone()),
            (MetaField::Artist, bundle.artist.clone()),
            (MetaField::Album, bundle.album.clone()),
            (MetaField::Genre, bundle.genre.clone()),
            (MetaField::Year, bundle.year.clone()),
            (MetaField::Comment, bundle.comment.clone()),
        ];
        if let Some(track) = bundle.track_number {
            statements.push((MetaField::TrackNumber, track.to_string()));
        }
        for (field, object) in statements {
            if !object.is_empty() {
                self.store
                    .add_statement(&bundle.url, field_predicate(field), &object);
            }
        }
    }
}

impl Collection for GraphCollection {
    fn collection_id(&self) -> &str {
        &self.id
    }

    fn pretty_name(&self) -> &str {
        &self.pretty_name
    }

    fn query_maker(&self) -> Box<dyn QueryMaker> {
        Box::new(GraphQueryMaker::new(self.store.clone(), self.id.clone()))
    }
}

/// [`QueryMaker`] compiling the logical specification into a graph-pattern
/// query template.
pub struct GraphQueryMaker {
    store: Arc<dyn GraphStore>,
    collection_id: String,
    query_type: Option<QueryType>,
    // Stack of open groups; the root group is index 0 and always AND.
    group_stack: Vec<(bool, Vec<GraphConstraint>)>,
    order_by: Vec<(MetaField, bool)>,
    limit: Option<(u32, u32)>,
    unbalanced: bool,
    state: MakerState,
    token: CancellationToken,
}

impl GraphQueryMaker {
    pub fn new(store: Arc<dyn GraphStore>, collection_id: String) -> Self {
        Self {
            store,
            collection_id,
            query_type: None,
            group_stack: vec![(true, Vec::new())],
            order_by: Vec::new(),
            limit: None,
            unbalanced: false,
            state: MakerState::Reset,
            token: CancellationToken::new(),
        }
    }

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

    fn push_constraint(&mut self, constraint: GraphConstraint) {
        self.group_stack
            .last_mut()
            .expect("root group always present")
            .1
            .push(constraint);
    }

    fn projection_fields(query_type: QueryType) -> Vec<MetaField> {
        match query_type {
            QueryType::Track => vec![
                MetaField::Url,
                MetaField::Title,
                MetaField::Artist,
                MetaField::Album,
                MetaField::Genre,
                MetaField::Year,
                MetaField::TrackNumber,
                MetaField::Comment,
            ],
            QueryType::Artist => vec![MetaField::Artist],
            QueryType::Album => vec![MetaField::Album],
            QueryType::Genre => vec![MetaField::Genre],
            QueryType::Year => vec![MetaField::Year],
            QueryType::Custom => vec![MetaField::Url],
        }
    }

    fn render_constraint(constraint: &GraphConstraint, bindings: &[(String, String)]) -> String {
        match constraint {
            GraphConstraint::Compare {
                predicate,
                text,
                mode,
                negated,
            } => {
                let var = bindings
                    .iter()
                    .find(|(_, p)| p == predicate)
                    .map(|(v, _)| v.as_str())
                    .unwrap_or("x");
                let escaped = text.replace('"', "\\\"");
                let expr = match mode {
                    FilterMode::Contains => format!("regex(?{var}, \"{escaped}\", \"i\")"),
                    FilterMode::StartsWith => format!("regex(?{var}, \"^{escaped}\", \"i\")"),
                    FilterMode::EndsWith => format!("regex(?{var}, \"{escaped}$\", \"i\")"),
                    FilterMode::Equals => format!("lcase(?{var}) = \"{}\"", escaped.to_lowercase()),
                    FilterMode::Less => format!("?{var} < \"{escaped}\""),
                    FilterMode::Greater => format!("?{var} > \"{escaped}\""),
                };
                if *negated {
                    format!("!( {expr} )")
                } else {
                    expr
                }
            }
            GraphConstraint::Group {
                conjunctive,
                children,
            } => {
                if children.is_empty() {
                    return if *conjunctive { "true" } else { "false" }.to_string();
                }
                let op = if *conjunctive { " && " } else { " || " };
                let parts: Vec<String> = children
                    .iter()
                    .map(|child| Self::render_constraint(child, bindings))
                    .collect();
                format!("( {} )", parts.join(op))
            }
        }
    }

    fn collect_predicates(constraint: &GraphConstraint, out: &mut Vec<String>) {
        match constraint {
            GraphConstraint::Compare { predicate, .. } => {
                if !out.contains(predicate) {
                    out.push(predicate.clone());
                }
            }
            GraphConstraint::Group { children, .. } => {
                for child in children {
                    Self::collect_predicates(child, out);
                }
            }
        }
    }

    /// Compile the accumulated specification. Fails fast on unbalanced
    /// AND/OR nesting or a missing query type.
    fn build(&self) -> Result<GraphQuery> {
        if self.unbalanced || self.group_stack.len() != 1 {
            return Err(CollectionError::UnbalancedGroup);
        }
        let query_type = self.query_type.ok_or_else(|| {
            CollectionError::InvalidState("query maker run without a query type".to_string())
        })?;

        let fields = Self::projection_fields(query_type);
        let projection: Vec<String> = fields.iter().map(|f| field_var(*f).to_string()).collect();

        let constraint = GraphConstraint::Group {
            conjunctive: true,
            children: self.group_stack[0].1.clone(),
        };

        // Every variable used anywhere needs a triple-pattern binding.
        let mut bindings: Vec<(String, String)> = fields
            .iter()
            .map(|f| (field_var(*f).to_string(), field_predicate(*f).to_string()))
            .collect();
        let mut constrained = Vec::new();
        Self::collect_predicates(&constraint, &mut constrained);
        for predicate in constrained {
            if !bindings.iter().any(|(_, p)| *p == predicate) {
                let var = predicate
                    .rsplit(':')
                    .next()
                    .unwrap_or("value")
                    .to_string();
                bindings.push((var, predicate));
            }
        }
        for (field, _) in &self.order_by {
            let var = field_var(*field);
            if !bindings.iter().any(|(v, _)| v == var) {
                bindings.push((var.to_string(), field_predicate(*field).to_string()));
            }
        }

        let distinct = !matches!(query_type, QueryType::Track | QueryType::Custom);

        let mut order_by: Vec<(String, bool)> = self
            .order_by
            .iter()
            .map(|(field, descending)| (field_var(*field).to_string(), *descending))
            .collect();
        if order_by.is_empty() {
            order_by = match query_type {
                QueryType::Track => vec![
                    (field_var(MetaField::Album).to_string(), false),
                    (field_var(MetaField::TrackNumber).to_string(), false),
                ],
                QueryType::Custom => Vec::new(),
                _ => vec![(projection[0].clone(), false)],
            };
        }

        let mut text = String::from("SELECT ");
        if distinct {
            text.push_str("DISTINCT ");
        }
        text.push_str(
            &projection
                .iter()
                .map(|var| format!("?{var}"))
                .collect::<Vec<_>>()
                .join(" "),
        );
        text.push_str(" WHERE { ");
        for (var, predicate) in &bindings {
            text.push_str(&format!("?track {predicate} ?{var} . "));
        }
        let filter = Self::render_constraint(&constraint, &bindings);
        if filter != "true" {
            text.push_str(&format!("FILTER{filter} "));
        }
        text.push('}');
        for (var, descending) in &order_by {
            text.push_str(&format!(
                " ORDER BY {}(?{var})",
                if *descending { "DESC" } else { "ASC" }
            ));
        }
        if let Some((offset, length)) = self.limit {
            text.push_str(&format!(" LIMIT {length} OFFSET {offset}"));
        }

        Ok(GraphQuery {
            text,
            bindings,
            projection,
            constraint,
            distinct,
            order_by,
            limit: self.limit,
        })
    }

    async fn execute(
        store: Arc<dyn GraphStore>,
        query: GraphQuery,
        collection_id: String,
        query_type: QueryType,
        token: CancellationToken,
    ) -> Result<Vec<ResultSet>> {
        if token.is_cancelled() {
            return Err(CollectionError::Aborted);
        }
        debug!(query = %query.text, "Executing graph query");
        let selected = store.select(&query);

        let mut rows = Vec::with_capacity(selected.len());
        for row in selected {
            if token.is_cancelled() {
                return Err(CollectionError::Aborted);
            }
            rows.push(row);
        }

        Ok(vec![ResultSet {
            collection_id,
            query_type,
            rows,
        }])
    }
}

#[async_trait]
impl QueryMaker for GraphQueryMaker {
    fn reset(&mut self) {
        self.query_type = None;
        self.group_stack = vec![(true, Vec::new())];
        self.order_by.clear();
        self.limit = None;
        self.unbalanced = false;
        self.state = MakerState::Reset;
        self.token = CancellationToken::new();
    }

    fn state(&self) -> MakerState {
        self.state
    }

    fn set_query_type(&mut self, query_type: QueryType) {
        if self.configurable() {
            self.query_type = Some(query_type);
        }
    }

    fn add_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode) {
        if !self.configurable() {
            return;
        }
        self.push_constraint(GraphConstraint::Compare {
            predicate: field_predicate(field).to_string(),
            text: pattern.to_string(),
            mode,
            negated: false,
        });
    }

    fn exclude_filter(&mut self, field: MetaField, pattern: &str, mode: FilterMode) {
        if !self.configurable() {
            return;
        }
        self.push_constraint(GraphConstraint::Compare {
            predicate: field_predicate(field).to_string(),
            text: pattern.to_string(),
            mode,
            negated: true,
        });
    }

    fn add_match(&mut self, field: MetaField, text: &str) {
        self.add_filter(field, text, FilterMode::Equals);
    }

    fn begin_and(&mut self) {
        if self.configurable() {
            self.group_stack.push((true, Vec::new()));
        }
    }

    fn begin_or(&mut self) {
        if self.configurable() {
            self.group_stack.push((false, Vec::new()));
        }
    }

    fn end_group(&mut self) {
        if !self.configurable() {
            return;
        }
        if self.group_stack.len() <= 1 {
            warn!("end_group called without a matching begin_and/begin_or");
            self.unbalanced = true;
            return;
        }
        let (conjunctive, children) = self.group_stack.pop().expect("checked length");
        self.push_constraint(GraphConstraint::Group {
            conjunctive,
            children,
        });
    }

    fn order_by(&mut self, field: MetaField, descending: bool) {
        if self.configurable() {
            self.order_by.push((field, descending));
        }
    }

    fn limit(&mut self, offset: u32, length: u32) {
        if self.configurable() {
            self.limit = Some((offset, length));
        }
    }

    fn abort(&self) {
        self.token.cancel();
    }

    async fn run_blocking(&mut self) -> Result<Vec<ResultSet>> {
        if self.state == MakerState::Running {
            return Err(CollectionError::InvalidState(
                "query maker is already running".to_string(),
            ));
        }
        let query = self.build()?;
        let query_type = self.query_type.expect("checked in build");
        self.state = MakerState::Running;

        let result = Self::execute(
            self.store.clone(),
            query,
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
        if self.state == MakerState::Running {
            return Err(CollectionError::InvalidState(
                "query maker is already running".to_string(),
            ));
        }
        let query = self.build()?;
        let query_type = self.query_type.expect("checked in build");
        self.state = MakerState::Running;

        let store = self.store.clone();
        let collection_id = self.collection_id.clone();
        let token = self.token.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result =
                Self::execute(store, query, collection_id, query_type, token.clone()).await;
            tx.send(result).ok();
        });
        Ok(QueryHandle::new(rx, self.token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_collection() -> Arc<GraphCollection> {
        let store = Arc::new(MemoryGraphStore::new());
        let collection = GraphCollection::new("semantic", "Semantic Collection", store);

        for (url, title, artist, album, genre, year, track) in [
            ("/g/beatles/01.mp3", "Come Together", "The Beatles", "Abbey Road", "Rock", "1969", 1),
            ("/g/beatles/02.mp3", "Something", "The Beatles", "Abbey Road", "Rock", "1969", 2),
            ("/g/davis/01.mp3", "So What", "Miles Davis", "Kind of Blue", "Jazz", "1959", 1),
        ] {
            let mut bundle = TrackBundle::new(url);
            bundle.title = title.to_string();
            bundle.artist = artist.to_string();
            bundle.album = album.to_string();
            bundle.genre = genre.to_string();
            bundle.year = year.to_string();
            bundle.track_number = Some(track);
            collection.add_track(&bundle);
        }
        collection
    }

    #[tokio::test]
    async fn artist_query_returns_distinct_names() {
        let collection = seeded_collection();
        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Artist);

        let results = maker.run_blocking().await.unwrap();
        assert_eq!(results[0].collection_id, "semantic");
        let names: Vec<&str> = results[0].rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(names, vec!["Miles Davis", "The Beatles"]);
    }

    #[tokio::test]
    async fn track_query_filters_by_genre() {
        let collection = seeded_collection();
        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Track);
        maker.add_filter(MetaField::Genre, "jazz", FilterMode::Equals);

        let results = maker.run_blocking().await.unwrap();
        assert_eq!(results[0].rows.len(), 1);
        assert_eq!(results[0].rows[0][0], "/g/davis/01.mp3");
        assert_eq!(results[0].rows[0][1], "So What");
    }

    #[tokio::test]
    async fn rendered_template_uses_graph_vocabulary() {
        let collection = seeded_collection();
        let mut maker = match_maker(&collection);

        let query = maker.build().unwrap();
        assert!(query.text.starts_with("SELECT DISTINCT ?artist WHERE {"));
        assert!(query.text.contains("?track xesam:artist ?artist ."));
        assert!(query.text.contains("regex(?genre, \"rock\", \"i\")"));
        assert!(query.text.contains("ORDER BY ASC(?artist)"));
    }

    fn match_maker(collection: &Arc<GraphCollection>) -> GraphQueryMaker {
        let mut maker =
            GraphQueryMaker::new(collection.store(), collection.collection_id().to_string());
        maker.set_query_type(QueryType::Artist);
        maker.add_filter(MetaField::Genre, "rock", FilterMode::Contains);
        maker
    }

    #[tokio::test]
    async fn or_group_unions_constraints() {
        let collection = seeded_collection();
        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Custom);
        maker.begin_or();
        maker.add_filter(MetaField::Genre, "jazz", FilterMode::Equals);
        maker.add_filter(MetaField::Title, "something", FilterMode::Equals);
        maker.end_group();

        let results = maker.run_blocking().await.unwrap();
        assert_eq!(results[0].rows.len(), 2);
    }

    #[tokio::test]
    async fn unbalanced_group_fails_fast() {
        let collection = seeded_collection();
        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Custom);
        maker.begin_or();
        maker.add_filter(MetaField::Genre, "jazz", FilterMode::Equals);

        assert!(matches!(
            maker.run_blocking().await,
            Err(CollectionError::UnbalancedGroup)
        ));
    }

    #[tokio::test]
    async fn rescanning_a_track_does_not_duplicate_statements() {
        let collection = seeded_collection();
        let mut bundle = TrackBundle::new("/g/davis/01.mp3");
        bundle.title = "So What (Remaster)".to_string();
        bundle.artist = "Miles Davis".to_string();
        bundle.album = "Kind of Blue".to_string();
        bundle.genre = "Jazz".to_string();
        bundle.year = "1959".to_string();
        collection.add_track(&bundle);

        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Track);
        maker.add_match(MetaField::Artist, "Miles Davis");
        let results = maker.run_blocking().await.unwrap();
        assert_eq!(results[0].rows.len(), 1);
        assert_eq!(results[0].rows[0][1], "So What (Remaster)");
    }

    #[tokio::test]
    async fn limit_window_applies_after_ordering() {
        let collection = seeded_collection();
        let mut maker = collection.query_maker();
        maker.set_query_type(QueryType::Track);
        maker.limit(1, 1);

        let results = maker.run_blocking().await.unwrap();
        // Tracks order by album then track number; the window starts at the
        // second row of Abbey Road.
        assert_eq!(results[0].rows.len(), 1);
        assert_eq!(results[0].rows[0][1], "Something");
    }
}
