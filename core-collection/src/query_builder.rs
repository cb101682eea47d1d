//! # Query Builder
//!
//! Accumulates a bitmask-described query specification (tables to join,
//! values to return, filters, AND/OR grouping, sort, group-by, limit window)
//! and renders it into a statement for the active backend's dialect.
//!
//! ## Overview
//!
//! Table and value selections are typed bit-flag sets so a single integer
//! still carries a combinable set, which is what keeps the join-closure
//! logic composable. [`QueryBuilder::build_query`] computes the transitive
//! join closure from every table referenced anywhere in the specification:
//! filtering on an album name joins the album table even if no album value
//! is returned. Boolean literals and random ordering come from the backend's
//! [`SqlDialect`], never hard-coded.
//!
//! AND/OR grouping is an explicit stack: [`QueryBuilder::begin_and`] /
//! [`QueryBuilder::begin_or`] push a connector, [`QueryBuilder::end_group`]
//! pops it, and every filter appended in between uses the top of the stack.
//! Unbalanced nesting makes `build_query` fail fast instead of emitting a
//! truncated statement.

use crate::error::{CollectionError, Result};
use core_storage::{SqlDialect, SqlStorage};
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use tracing::error;

/// Bit-flag set of tables participating in a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TableSet(u32);

impl TableSet {
    pub const NONE: Self = Self(0);
    pub const ALBUM: Self = Self(1);
    pub const ARTIST: Self = Self(1 << 1);
    pub const GENRE: Self = Self(1 << 2);
    pub const YEAR: Self = Self(1 << 3);
    pub const SONG: Self = Self(1 << 4);
    pub const STATS: Self = Self(1 << 5);
    pub const LYRICS: Self = Self(1 << 6);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate the individual tables in the set.
    pub fn iter(self) -> impl Iterator<Item = TableSet> {
        (0..u32::BITS)
            .map(move |bit| TableSet(self.0 & (1 << bit)))
            .filter(|table| !table.is_empty())
    }
}

impl BitOr for TableSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TableSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Bit-flag set of return values / filterable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ValueSet(u32);

impl ValueSet {
    pub const ID: Self = Self(1);
    pub const NAME: Self = Self(1 << 1);
    pub const URL: Self = Self(1 << 2);
    pub const TITLE: Self = Self(1 << 3);
    pub const TRACK: Self = Self(1 << 4);
    pub const COMMENT: Self = Self(1 << 5);
    pub const BITRATE: Self = Self(1 << 6);
    pub const LENGTH: Self = Self(1 << 7);
    pub const SAMPLERATE: Self = Self(1 << 8);
    pub const PLAYCOUNTER: Self = Self(1 << 9);
    pub const CREATEDATE: Self = Self(1 << 10);
    pub const ACCESSDATE: Self = Self(1 << 11);
    pub const PERCENTAGE: Self = Self(1 << 12);
    pub const RATING: Self = Self(1 << 13);
    pub const ARTIST_ID: Self = Self(1 << 14);
    pub const ALBUM_ID: Self = Self(1 << 15);
    pub const YEAR_ID: Self = Self(1 << 16);
    pub const GENRE_ID: Self = Self(1 << 17);
    pub const DIRECTORY: Self = Self(1 << 18);
    pub const LYRICS_TEXT: Self = Self(1 << 19);
    pub const SORTNAME: Self = Self(1 << 20);

    pub fn bits(self) -> u32 {
        self.0
    }

    fn is_text(self) -> bool {
        matches!(
            self,
            ValueSet::NAME
                | ValueSet::URL
                | ValueSet::TITLE
                | ValueSet::COMMENT
                | ValueSet::DIRECTORY
                | ValueSet::LYRICS_TEXT
                | ValueSet::SORTNAME
        )
    }
}

impl BitOr for ValueSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Aggregate functions that may wrap a return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Max,
    Min,
    Avg,
    Sum,
}

impl AggregateFunction {
    fn sql_name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Sum => "SUM",
        }
    }
}

/// Comparison mode for filter predicates. Text modes match
/// case-insensitively; `Less`/`Greater` compare numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Contains,
    StartsWith,
    EndsWith,
    Equals,
    Less,
    Greater,
}

/// Option bit-set applied to the rendered statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions(u32);

impl QueryOptions {
    pub const REMOVE_DUPLICATES: Self = Self(1);
    pub const RANDOMIZE: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for QueryOptions {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

fn table_name(table: TableSet) -> &'static str {
    match table {
        TableSet::ALBUM => "album",
        TableSet::ARTIST => "artist",
        TableSet::GENRE => "genre",
        TableSet::YEAR => "year",
        TableSet::SONG => "tags",
        TableSet::STATS => "statistics",
        TableSet::LYRICS => "lyrics",
        _ => "tags",
    }
}

fn value_name(value: ValueSet) -> &'static str {
    match value {
        ValueSet::ID => "id",
        ValueSet::NAME => "name",
        ValueSet::URL => "url",
        ValueSet::TITLE => "title",
        ValueSet::TRACK => "track",
        ValueSet::COMMENT => "comment",
        ValueSet::BITRATE => "bitrate",
        ValueSet::LENGTH => "length",
        ValueSet::SAMPLERATE => "samplerate",
        ValueSet::PLAYCOUNTER => "playcounter",
        ValueSet::CREATEDATE => "createdate",
        ValueSet::ACCESSDATE => "accessdate",
        ValueSet::PERCENTAGE => "percentage",
        ValueSet::RATING => "rating",
        ValueSet::ARTIST_ID => "artist",
        ValueSet::ALBUM_ID => "album",
        ValueSet::YEAR_ID => "year",
        ValueSet::GENRE_ID => "genre",
        ValueSet::DIRECTORY => "dir",
        ValueSet::LYRICS_TEXT => "lyrics",
        ValueSet::SORTNAME => "sortname",
        _ => "id",
    }
}

/// The display column searched by [`QueryBuilder::add_filter_all`] for each
/// table kind. Statistics rows have no display text.
fn default_text_value(table: TableSet) -> Option<ValueSet> {
    match table {
        TableSet::ALBUM | TableSet::ARTIST | TableSet::GENRE | TableSet::YEAR => {
            Some(ValueSet::NAME)
        }
        TableSet::SONG => Some(ValueSet::TITLE),
        TableSet::LYRICS => Some(ValueSet::LYRICS_TEXT),
        _ => None,
    }
}

/// Accumulates one query specification and renders/executes it.
///
/// Created per logical query; [`QueryBuilder::reset`] returns a used builder
/// to its initial state for reuse.
pub struct QueryBuilder {
    storage: Arc<dyn SqlStorage>,
    dialect: SqlDialect,
    values: String,
    where_clause: String,
    sort: String,
    group: String,
    limit: String,
    linked: TableSet,
    options: QueryOptions,
    and_stack: Vec<bool>,
    unbalanced: bool,
    return_count: u32,
    query: String,
}

impl QueryBuilder {
    pub fn new(storage: Arc<dyn SqlStorage>) -> Self {
        let dialect = storage.dialect();
        let mut builder = Self {
            storage,
            dialect,
            values: String::new(),
            where_clause: String::new(),
            sort: String::new(),
            group: String::new(),
            limit: String::new(),
            linked: TableSet::NONE,
            options: QueryOptions::default(),
            and_stack: Vec::new(),
            unbalanced: false,
            return_count: 0,
            query: String::new(),
        };
        builder.reset();
        builder
    }

    /// Return the builder to its initial state, keeping the storage handle.
    pub fn reset(&mut self) {
        self.values.clear();
        self.where_clause = format!("WHERE {}", self.dialect.bool_true());
        self.sort.clear();
        self.group.clear();
        self.limit.clear();
        self.linked = TableSet::NONE;
        self.options = QueryOptions::default();
        self.and_stack = vec![true];
        self.unbalanced = false;
        self.return_count = 0;
        self.query.clear();
    }

    fn column(table: TableSet, value: ValueSet) -> String {
        format!("{}.{}", table_name(table), value_name(value))
    }

    fn connector(&self) -> &'static str {
        if self.and_stack.last().copied().unwrap_or(true) {
            "AND"
        } else {
            "OR"
        }
    }

    /// Add a plain return value.
    pub fn add_return_value(&mut self, table: TableSet, value: ValueSet) {
        if !self.values.is_empty() {
            self.values.push_str(", ");
        }
        self.values.push_str(&Self::column(table, value));
        self.linked |= table;
        self.return_count += 1;
    }

    /// Add a return value wrapped in an aggregate function.
    pub fn add_return_function_value(
        &mut self,
        function: AggregateFunction,
        table: TableSet,
        value: ValueSet,
    ) {
        if !self.values.is_empty() {
            self.values.push_str(", ");
        }
        self.values.push_str(&format!(
            "{}( {} )",
            function.sql_name(),
            Self::column(table, value)
        ));
        self.linked |= table;
        self.return_count += 1;
    }

    /// Number of values each logical result row carries.
    pub fn count_return_values(&self) -> u32 {
        self.return_count
    }

    /// Open a group whose members are joined with AND.
    pub fn begin_and(&mut self) {
        self.begin_group(true);
    }

    /// Open a group whose members are joined with OR. Must be closed with
    /// [`QueryBuilder::end_group`].
    pub fn begin_or(&mut self) {
        self.begin_group(false);
    }

    fn begin_group(&mut self, conjunctive: bool) {
        let seed = if conjunctive {
            self.dialect.bool_true()
        } else {
            self.dialect.bool_false()
        };
        let connector = self.connector();
        self.where_clause
            .push_str(&format!(" {connector} ( {seed}"));
        self.and_stack.push(conjunctive);
    }

    /// Close the innermost AND/OR group.
    pub fn end_group(&mut self) {
        if self.and_stack.len() <= 1 {
            error!("end_group called without a matching begin_and/begin_or");
            self.unbalanced = true;
            return;
        }
        self.and_stack.pop();
        self.where_clause.push_str(" )");
    }

    fn render_predicate(
        &self,
        table: TableSet,
        value: ValueSet,
        text: &str,
        mode: FilterMode,
    ) -> String {
        let column = Self::column(table, value);
        match mode {
            FilterMode::Contains => format!(
                "lower({column}) LIKE '%{}%'",
                self.dialect.escape(&text.to_lowercase())
            ),
            FilterMode::StartsWith => format!(
                "lower({column}) LIKE '{}%'",
                self.dialect.escape(&text.to_lowercase())
            ),
            FilterMode::EndsWith => format!(
                "lower({column}) LIKE '%{}'",
                self.dialect.escape(&text.to_lowercase())
            ),
            FilterMode::Equals => format!(
                "lower({column}) = '{}'",
                self.dialect.escape(&text.to_lowercase())
            ),
            FilterMode::Less => format!("{column} < '{}'", self.dialect.escape(text)),
            FilterMode::Greater => format!("{column} > '{}'", self.dialect.escape(text)),
        }
    }

    fn append_condition(&mut self, tables: TableSet, condition: String, negated: bool) {
        if condition.is_empty() {
            return;
        }
        let connector = self.connector();
        let not = if negated { "NOT " } else { "" };
        self.where_clause
            .push_str(&format!(" {connector} {not}( {condition} )"));
        self.linked |= tables;
    }

    /// Append a filter predicate on `value`, OR-ed over every table in
    /// `tables`, connected with the top of the AND/OR stack.
    pub fn add_filter(&mut self, tables: TableSet, value: ValueSet, text: &str, mode: FilterMode) {
        let condition = tables
            .iter()
            .map(|table| self.render_predicate(table, value, text, mode))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.append_condition(tables, condition, false);
    }

    /// Append a substring filter over the display column of every table in
    /// `tables` (artist/album/genre/year names, track titles, lyrics).
    pub fn add_filter_all(&mut self, tables: TableSet, text: &str) {
        let condition = tables
            .iter()
            .filter_map(|table| {
                default_text_value(table)
                    .map(|value| self.render_predicate(table, value, text, FilterMode::Contains))
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        self.append_condition(tables, condition, false);
    }

    /// Append a negated filter predicate.
    pub fn exclude_filter(
        &mut self,
        tables: TableSet,
        value: ValueSet,
        text: &str,
        mode: FilterMode,
    ) {
        let condition = tables
            .iter()
            .map(|table| self.render_predicate(table, value, text, mode))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.append_condition(tables, condition, true);
    }

    /// Append a case-insensitive exact match on `value`.
    pub fn add_match(&mut self, tables: TableSet, value: ValueSet, text: &str) {
        self.add_filter(tables, value, text, FilterMode::Equals);
    }

    /// Append an id match against a dimension table's primary key.
    pub fn add_match_id(&mut self, table: TableSet, id: i64) {
        let connector = self.connector();
        self.where_clause
            .push_str(&format!(" {connector} {}.id = {id}", table_name(table)));
        self.linked |= table;
    }

    /// Force a table into the join closure without returning a value from
    /// it. Used to restrict dimension listings to entries referenced by at
    /// least one track.
    pub fn require_table(&mut self, tables: TableSet) {
        self.linked |= tables;
    }

    /// Apply statement options.
    pub fn set_options(&mut self, options: QueryOptions) {
        self.options |= options;
    }

    /// Append a sort key. Text values sort case-insensitively.
    pub fn sort_by(&mut self, table: TableSet, value: ValueSet, descending: bool) {
        if !self.sort.is_empty() {
            self.sort.push_str(", ");
        }
        let column = Self::column(table, value);
        if value.is_text() {
            self.sort.push_str(&format!("lower({column})"));
        } else {
            self.sort.push_str(&column);
        }
        if descending {
            self.sort.push_str(" DESC");
        }
        self.linked |= table;
    }

    /// Append a sort key wrapped in an aggregate function.
    pub fn sort_by_function(
        &mut self,
        function: AggregateFunction,
        table: TableSet,
        value: ValueSet,
        descending: bool,
    ) {
        if !self.sort.is_empty() {
            self.sort.push_str(", ");
        }
        self.sort.push_str(&format!(
            "{}( {} )",
            function.sql_name(),
            Self::column(table, value)
        ));
        if descending {
            self.sort.push_str(" DESC");
        }
        self.linked |= table;
    }

    /// Append a group-by key.
    pub fn group_by(&mut self, table: TableSet, value: ValueSet) {
        if !self.group.is_empty() {
            self.group.push_str(", ");
        }
        self.group.push_str(&Self::column(table, value));
        self.linked |= table;
    }

    /// Restrict the result window.
    pub fn set_limit(&mut self, offset: u32, length: u32) {
        self.limit = format!("LIMIT {length} OFFSET {offset}");
    }

    /// Compute the transitive join closure over every referenced table and
    /// return the FROM table plus the join clause.
    fn link_tables(&self) -> (String, String) {
        let mut linked = self.linked;
        if linked.is_empty() {
            // Even an empty specification queries the song table.
            linked |= TableSet::SONG;
        }
        if linked.intersects(TableSet::STATS | TableSet::LYRICS) || linked.count() > 1 {
            linked |= TableSet::SONG;
        }

        if !linked.contains(TableSet::SONG) {
            // A single dimension table stands alone.
            return (table_name(linked).to_string(), String::new());
        }

        let mut join = String::new();
        for (table, fk) in [
            (TableSet::ALBUM, "album"),
            (TableSet::ARTIST, "artist"),
            (TableSet::GENRE, "genre"),
            (TableSet::YEAR, "year"),
        ] {
            if linked.contains(table) {
                let name = table_name(table);
                join.push_str(&format!(" INNER JOIN {name} ON {name}.id = tags.{fk}"));
            }
        }
        if linked.contains(TableSet::STATS) {
            join.push_str(" LEFT JOIN statistics ON statistics.url = tags.url");
        }
        if linked.contains(TableSet::LYRICS) {
            join.push_str(" LEFT JOIN lyrics ON lyrics.url = tags.url");
        }
        ("tags".to_string(), join)
    }

    /// Render the accumulated specification into a statement. Idempotent;
    /// fails fast on unbalanced AND/OR nesting or an empty return list.
    pub fn build_query(&mut self) -> Result<()> {
        if self.unbalanced || self.and_stack.len() != 1 {
            error!("query specification has unbalanced AND/OR groups");
            return Err(CollectionError::UnbalancedGroup);
        }
        if self.values.is_empty() {
            return Err(CollectionError::InvalidState(
                "query specification has no return values".to_string(),
            ));
        }

        let (from, join) = self.link_tables();
        let distinct = if self.options.contains(QueryOptions::REMOVE_DUPLICATES) {
            "DISTINCT "
        } else {
            ""
        };

        let mut query = format!(
            "SELECT {distinct}{} FROM {from}{join} {}",
            self.values, self.where_clause
        );
        if !self.group.is_empty() {
            query.push_str(&format!(" GROUP BY {}", self.group));
        }
        let sort = if self.options.contains(QueryOptions::RANDOMIZE) {
            self.dialect.random_func().to_string()
        } else {
            self.sort.clone()
        };
        if !sort.is_empty() {
            query.push_str(&format!(" ORDER BY {sort}"));
        }
        if !self.limit.is_empty() {
            query.push(' ');
            query.push_str(&self.limit);
        }
        query.push(';');

        self.query = query;
        Ok(())
    }

    /// The rendered statement.
    pub fn query(&mut self) -> Result<String> {
        self.build_query()?;
        Ok(self.query.clone())
    }

    /// Execute the specification and return the results as a flat value
    /// sequence, one logical row per [`QueryBuilder::count_return_values`]
    /// values.
    pub async fn run(&mut self) -> Result<Vec<String>> {
        self.build_query()?;
        let rows = self.storage.query(&self.query).await?;
        Ok(rows
            .into_iter()
            .flat_map(|row| {
                row.into_values()
                    .into_iter()
                    .map(|value| value.to_display_string())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::DimensionResolver;
    use crate::models::{Dimension, TrackBundle};
    use crate::schema::SchemaManager;
    use core_runtime::events::EventBus;
    use core_storage::create_test_storage;

    async fn seeded_storage() -> Arc<dyn SqlStorage> {
        let storage: Arc<dyn SqlStorage> = Arc::new(create_test_storage().await.unwrap());
        let schema = SchemaManager::new(storage.clone(), EventBus::default());
        schema.initialize().await.unwrap();

        let resolver = DimensionResolver::new(storage.clone());
        for (url, title, artist, album, genre, year, track) in [
            ("/m/beatles/ar/01.mp3", "Come Together", "The Beatles", "Abbey Road", "Rock", "1969", 1),
            ("/m/beatles/ar/02.mp3", "Something", "The Beatles", "Abbey Road", "Rock", "1969", 2),
            ("/m/davis/kob/01.mp3", "So What", "Miles Davis", "Kind of Blue", "Jazz", "1959", 1),
        ] {
            let mut bundle = TrackBundle::new(url);
            bundle.title = title.to_string();
            bundle.artist = artist.to_string();
            bundle.album = album.to_string();
            bundle.genre = genre.to_string();
            bundle.year = year.to_string();
            bundle.track_number = Some(track);

            let artist_id = resolver
                .resolve(Dimension::Artist, &bundle.artist, true, false)
                .await
                .unwrap();
            let album_id = resolver
                .resolve(Dimension::Album, &bundle.album, true, false)
                .await
                .unwrap();
            let genre_id = resolver
                .resolve(Dimension::Genre, &bundle.genre, true, false)
                .await
                .unwrap();
            let year_id = resolver
                .resolve(Dimension::Year, &bundle.year, true, false)
                .await
                .unwrap();

            storage
                .execute(&format!(
                    "INSERT INTO tags ( url, dir, createdate, album, artist, genre, year, title, comment, track ) \
                     VALUES ( '{}', '{}', 0, {album_id}, {artist_id}, {genre_id}, {year_id}, '{}', '', {} )",
                    bundle.url, bundle.directory, bundle.title, track
                ))
                .await
                .unwrap();
        }
        storage
    }

    #[tokio::test]
    async fn filter_on_dimension_joins_it_transitively() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.add_filter(
            TableSet::ARTIST,
            ValueSet::NAME,
            "beatles",
            FilterMode::Contains,
        );

        let statement = qb.query().unwrap();
        assert!(
            statement.contains("INNER JOIN artist ON artist.id = tags.artist"),
            "filtered table must be joined: {statement}"
        );

        let results = qb.run().await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|url| url.contains("/beatles/")));
    }

    #[tokio::test]
    async fn unbalanced_group_fails_fast() {
        let storage = seeded_storage().await;

        let mut qb = QueryBuilder::new(storage.clone());
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.begin_or();
        qb.add_filter(TableSet::GENRE, ValueSet::NAME, "jazz", FilterMode::Equals);
        assert!(matches!(
            qb.build_query(),
            Err(CollectionError::UnbalancedGroup)
        ));

        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.end_group();
        assert!(matches!(
            qb.build_query(),
            Err(CollectionError::UnbalancedGroup)
        ));
    }

    #[tokio::test]
    async fn or_group_unions_filters() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.begin_or();
        qb.add_filter(TableSet::GENRE, ValueSet::NAME, "Jazz", FilterMode::Equals);
        qb.add_filter(TableSet::GENRE, ValueSet::NAME, "Rock", FilterMode::Equals);
        qb.end_group();

        let results = qb.run().await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn run_returns_flat_value_sequence() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::TITLE);
        qb.add_return_value(TableSet::ARTIST, ValueSet::NAME);
        qb.add_match(TableSet::ALBUM, ValueSet::NAME, "Kind of Blue");

        assert_eq!(qb.count_return_values(), 2);
        let flat = qb.run().await.unwrap();
        assert_eq!(flat, vec!["So What".to_string(), "Miles Davis".to_string()]);
    }

    #[tokio::test]
    async fn empty_specification_still_queries_song_table() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);

        let statement = qb.query().unwrap();
        assert!(statement.contains("FROM tags"));
        assert!(!statement.contains("JOIN"));
        assert_eq!(qb.run().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn single_dimension_listing_needs_no_hub_join() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::GENRE, ValueSet::NAME);
        qb.sort_by(TableSet::GENRE, ValueSet::NAME, false);

        let statement = qb.query().unwrap();
        assert!(statement.contains("FROM genre"));
        assert!(!statement.contains("JOIN"));
        assert_eq!(qb.run().await.unwrap(), vec!["Jazz", "Rock"]);
    }

    #[tokio::test]
    async fn randomize_uses_dialect_random_function() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.set_options(QueryOptions::RANDOMIZE);

        let statement = qb.query().unwrap();
        assert!(statement.contains("ORDER BY RANDOM()"), "{statement}");
    }

    #[tokio::test]
    async fn limit_window_slices_sorted_results() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::TITLE);
        qb.sort_by(TableSet::SONG, ValueSet::TITLE, false);
        qb.set_limit(1, 2);

        let statement = qb.query().unwrap();
        assert!(statement.contains("LIMIT 2 OFFSET 1"));

        // Titles sorted: Come Together, So What, Something.
        assert_eq!(qb.run().await.unwrap(), vec!["So What", "Something"]);
    }

    #[tokio::test]
    async fn aggregate_function_counts_tracks_per_genre() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::GENRE, ValueSet::NAME);
        qb.add_return_function_value(AggregateFunction::Count, TableSet::SONG, ValueSet::URL);
        qb.group_by(TableSet::GENRE, ValueSet::NAME);
        qb.sort_by(TableSet::GENRE, ValueSet::NAME, false);

        let flat = qb.run().await.unwrap();
        assert_eq!(flat, vec!["Jazz", "1", "Rock", "2"]);
    }

    #[tokio::test]
    async fn id_match_restricts_by_foreign_key() {
        let storage = seeded_storage().await;

        let mut lookup = QueryBuilder::new(storage.clone());
        lookup.add_return_value(TableSet::ARTIST, ValueSet::ID);
        lookup.add_match(TableSet::ARTIST, ValueSet::NAME, "Miles Davis");
        let id: i64 = lookup.run().await.unwrap()[0].parse().unwrap();

        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.add_match_id(TableSet::ARTIST, id);
        assert_eq!(qb.run().await.unwrap(), vec!["/m/davis/kob/01.mp3"]);
    }

    #[tokio::test]
    async fn remove_duplicates_renders_distinct() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::ARTIST, ValueSet::NAME);
        qb.require_table(TableSet::SONG);
        qb.set_options(QueryOptions::REMOVE_DUPLICATES);

        let statement = qb.query().unwrap();
        assert!(statement.starts_with("SELECT DISTINCT"));

        // Two Beatles tracks collapse into one artist row.
        assert_eq!(qb.run().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn exclude_filter_negates() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.exclude_filter(
            TableSet::ARTIST,
            ValueSet::NAME,
            "beatles",
            FilterMode::Contains,
        );

        let results = qb.run().await.unwrap();
        assert_eq!(results, vec!["/m/davis/kob/01.mp3"]);
    }

    #[tokio::test]
    async fn reset_allows_reuse() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.add_filter(TableSet::GENRE, ValueSet::NAME, "jazz", FilterMode::Equals);
        assert_eq!(qb.run().await.unwrap().len(), 1);

        qb.reset();
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        assert_eq!(qb.run().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn filter_all_searches_display_columns() {
        let storage = seeded_storage().await;
        let mut qb = QueryBuilder::new(storage);
        qb.add_return_value(TableSet::SONG, ValueSet::URL);
        qb.add_filter_all(
            TableSet::ARTIST | TableSet::ALBUM | TableSet::SONG,
            "blue",
        );

        // Matches "Kind of Blue" through the album display column.
        assert_eq!(qb.run().await.unwrap(), vec!["/m/davis/kob/01.mp3"]);
    }
}
