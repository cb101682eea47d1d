//! # Collection Storage & Query Engine
//!
//! Owns the dimensional collection schema and answers structured browsing
//! queries against one or more heterogeneous backing collections.
//!
//! ## Overview
//!
//! - **Schema management** (`schema`): versioned table set with destructive
//!   migration-by-version-bump and the shadow/temp table swap used by full
//!   rescans.
//! - **Dimension resolution** (`dimensions`): lookup-or-insert of
//!   artist/album/genre/year names to stable integer ids.
//! - **Query building** (`query_builder`): a composable filter/sort/group
//!   specification rendered into backend-appropriate statements, with
//!   transitive join closure.
//! - **Query makers** (`maker`, `sql`, `graph`): one polymorphic contract
//!   per backend turning a logical query into tagged result delivery,
//!   blocking or asynchronous, with cooperative abort.
//! - **Collection registry** (`manager`): status-flagged collections and
//!   the priority-elected primary writable SQL collection.

pub mod dimensions;
pub mod error;
pub mod graph;
pub mod maker;
pub mod manager;
pub mod models;
pub mod query_builder;
pub mod schema;
pub mod sql;

pub use dimensions::DimensionResolver;
pub use error::{CollectionError, Result};
pub use graph::{GraphCollection, GraphQueryMaker, GraphStore, MemoryGraphStore};
pub use maker::{
    result_for, MakerState, MetaField, MetaQueryMaker, QueryHandle, QueryMaker, QueryType,
    ResultSet,
};
pub use manager::{Collection, CollectionManager, CollectionStatus};
pub use models::{sortable_name, Dimension, TrackBundle};
pub use query_builder::{
    AggregateFunction, FilterMode, QueryBuilder, QueryOptions, TableSet, ValueSet,
};
pub use schema::{
    SchemaManager, DATABASE_PERSISTENT_TABLES_VERSION, DATABASE_STATS_VERSION, DATABASE_VERSION,
};
pub use sql::{SqlCollection, SqlCollectionQueryMaker};
