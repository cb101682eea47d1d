//! # Schema Manager
//!
//! Creates and migrates the versioned table set of the collection database.
//!
//! ## Overview
//!
//! Three table families are managed independently, each guarded by its own
//! version stamp in the `admin` table:
//!
//! - **index tables** (`tags`, the four dimension tables, `directories`) —
//!   rebuilt destructively when [`DATABASE_VERSION`] changes; their content
//!   is reproducible by a rescan.
//! - **persistent tables** (`lyrics`, `labels`) — hold data the user typed
//!   in, guarded by [`DATABASE_PERSISTENT_TABLES_VERSION`].
//! - **statistics** (`statistics`) — ratings, scores and play counts,
//!   guarded by [`DATABASE_STATS_VERSION`].
//!
//! A full rescan populates `_temp`-suffixed shadow copies of the index
//! tables; [`SchemaManager::move_temp_tables`] swaps them into place
//! atomically so the live index is inconsistent only for the duration of the
//! swap, not the whole scan.

use crate::error::{CollectionError, Result};
use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
use core_storage::{SqlStorage, SqlValue};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bump whenever the structure of the index tables changes. Mismatch erases
/// tags, artist, album, genre, year and directories.
pub const DATABASE_VERSION: i64 = 1;

/// Persistent tables hold data that is valuable to the user and must not be
/// erased by a rescan. When bumping this, write code to convert the data.
pub const DATABASE_PERSISTENT_TABLES_VERSION: i64 = 1;

/// Bumping this erases the statistics table. If you ever need to, write code
/// to convert the data.
pub const DATABASE_STATS_VERSION: i64 = 1;

const ADMIN_KEY_VERSION: &str = "Database Version";
const ADMIN_KEY_PERSISTENT_VERSION: &str = "Database Persistent Tables Version";
const ADMIN_KEY_STATS_VERSION: &str = "Database Stats Version";

/// Index tables, in creation order.
const INDEX_TABLES: [&str; 6] = ["tags", "artist", "album", "genre", "year", "directories"];

/// Manages DDL, version stamps and the shadow-table swap for one storage
/// backend.
pub struct SchemaManager {
    storage: Arc<dyn SqlStorage>,
    events: EventBus,
}

impl SchemaManager {
    pub fn new(storage: Arc<dyn SqlStorage>, events: EventBus) -> Self {
        Self { storage, events }
    }

    /// Startup check: create missing tables and destructively rebuild any
    /// table family whose persisted version stamp does not match the
    /// compiled-in constant. Rebuilds are surfaced as a one-time warning and
    /// a [`CollectionEvent::SchemaRebuilt`] event, never retried silently.
    pub async fn initialize(&self) -> Result<()> {
        self.create_admin_table().await?;

        self.check_family(
            ADMIN_KEY_VERSION,
            DATABASE_VERSION,
            "index",
            |s| Box::pin(async move { s.drop_tables(false).await }),
            |s| Box::pin(async move { s.create_tables(false).await }),
        )
        .await?;

        self.check_family(
            ADMIN_KEY_PERSISTENT_VERSION,
            DATABASE_PERSISTENT_TABLES_VERSION,
            "persistent",
            |s| Box::pin(async move { s.drop_persistent_tables().await }),
            |s| Box::pin(async move { s.create_persistent_tables().await }),
        )
        .await?;

        self.check_family(
            ADMIN_KEY_STATS_VERSION,
            DATABASE_STATS_VERSION,
            "statistics",
            |s| Box::pin(async move { s.drop_stats_table().await }),
            |s| Box::pin(async move { s.create_stats_table().await }),
        )
        .await?;

        Ok(())
    }

    async fn check_family<'a>(
        &'a self,
        key: &str,
        expected: i64,
        family: &str,
        drop: impl FnOnce(&'a Self) -> futures::future::BoxFuture<'a, Result<()>>,
        create: impl FnOnce(&'a Self) -> futures::future::BoxFuture<'a, Result<()>>,
    ) -> Result<()> {
        let stamp = self
            .admin_value(key)
            .await?
            .and_then(|v| v.parse::<i64>().ok());

        match stamp {
            Some(found) if found == expected => Ok(()),
            found => {
                if let Some(found) = found {
                    warn!(
                        family = family,
                        found = found,
                        expected = expected,
                        "Schema version mismatch, dropping and recreating tables"
                    );
                    self.events
                        .emit(CoreEvent::Collection(CollectionEvent::SchemaRebuilt {
                            family: family.to_string(),
                        }));
                    drop(self).await?;
                } else {
                    debug!(family = family, "Creating tables for the first time");
                }
                create(self).await.map_err(|e| CollectionError::Migration {
                    family: family.to_string(),
                    message: e.to_string(),
                })?;
                self.set_admin_value(key, &expected.to_string()).await?;
                Ok(())
            }
        }
    }

    /// Emit the DDL for the index tables. With `temporary` set, the tables
    /// are created with a `_temp` suffix and the secondary indexes on the
    /// tags foreign keys are skipped, since those tables are bulk-rebuilt
    /// and then swapped.
    pub async fn create_tables(&self, temporary: bool) -> Result<()> {
        let suffix = table_suffix(temporary);
        let dialect = self.storage.dialect();
        let text = dialect.text_column_type();
        let id = dialect.auto_increment_primary_key();

        info!(temporary = temporary, "Creating index tables");

        let statements = vec![
            format!(
                "CREATE TABLE tags{suffix} ( \
                 url {text}, \
                 dir {text}, \
                 createdate INTEGER, \
                 album INTEGER, \
                 artist INTEGER, \
                 genre INTEGER, \
                 year INTEGER, \
                 title {text}, \
                 comment {longtext}, \
                 track NUMERIC(4), \
                 bitrate INTEGER, \
                 length INTEGER, \
                 samplerate INTEGER )",
                suffix = suffix,
                text = text,
                longtext = dialect.long_text_column_type(),
            ),
            format!("CREATE TABLE artist{suffix} ( id {id}, name {text}, sortname {text} )"),
            format!("CREATE TABLE album{suffix} ( id {id}, name {text} )"),
            format!("CREATE TABLE genre{suffix} ( id {id}, name {text} )"),
            format!("CREATE TABLE year{suffix} ( id {id}, name {text} )"),
            format!("CREATE TABLE directories{suffix} ( dir {text}, changedate INTEGER )"),
            // Name indexes are needed by lookup-or-insert even during a
            // temp-table rebuild.
            format!("CREATE INDEX artist_name_idx{suffix} ON artist{suffix} ( name )"),
            format!("CREATE INDEX album_name_idx{suffix} ON album{suffix} ( name )"),
            format!("CREATE INDEX genre_name_idx{suffix} ON genre{suffix} ( name )"),
            format!("CREATE INDEX year_name_idx{suffix} ON year{suffix} ( name )"),
        ];

        for statement in statements {
            self.storage.execute(&statement).await?;
        }

        if !temporary {
            self.create_tags_indexes().await?;
        }

        Ok(())
    }

    async fn create_tags_indexes(&self) -> Result<()> {
        for statement in [
            "CREATE INDEX url_tag ON tags ( url )",
            "CREATE INDEX dir_tag ON tags ( dir )",
            "CREATE INDEX album_tag ON tags ( album )",
            "CREATE INDEX artist_tag ON tags ( artist )",
            "CREATE INDEX genre_tag ON tags ( genre )",
            "CREATE INDEX year_tag ON tags ( year )",
        ] {
            self.storage.execute(statement).await?;
        }
        Ok(())
    }

    /// Drop the index tables. Indexes go down with their tables.
    pub async fn drop_tables(&self, temporary: bool) -> Result<()> {
        let suffix = table_suffix(temporary);
        info!(temporary = temporary, "Dropping index tables");
        for table in INDEX_TABLES {
            self.storage
                .execute(&format!("DROP TABLE IF EXISTS {table}{suffix}"))
                .await?;
        }
        Ok(())
    }

    /// Delete all rows from the index tables, keeping their structure.
    pub async fn clear_tables(&self, temporary: bool) -> Result<()> {
        let suffix = table_suffix(temporary);
        for table in INDEX_TABLES {
            self.storage
                .execute(&format!("DELETE FROM {table}{suffix}"))
                .await?;
        }
        Ok(())
    }

    /// Atomically replace the live index tables with the `_temp` set built
    /// by a full rescan. The live index is inconsistent only while this
    /// transaction runs.
    pub async fn move_temp_tables(&self) -> Result<()> {
        info!("Swapping temp tables into place");

        let mut statements = Vec::new();
        // The temp name indexes would collide with the next rebuild once
        // their tables are renamed, so they are dropped before the swap.
        for index in [
            "artist_name_idx_temp",
            "album_name_idx_temp",
            "genre_name_idx_temp",
            "year_name_idx_temp",
        ] {
            statements.push(format!("DROP INDEX IF EXISTS {index}"));
        }
        for table in INDEX_TABLES {
            statements.push(format!("DROP TABLE IF EXISTS {table}"));
            statements.push(format!("ALTER TABLE {table}_temp RENAME TO {table}"));
        }
        self.storage.execute_transaction(&statements).await?;

        // Live indexes are rebuilt outside the swap window; queries work
        // without them, only slower.
        for (index, table) in [
            ("artist_name_idx", "artist"),
            ("album_name_idx", "album"),
            ("genre_name_idx", "genre"),
            ("year_name_idx", "year"),
        ] {
            self.storage
                .execute(&format!("CREATE INDEX {index} ON {table} ( name )"))
                .await?;
        }
        self.create_tags_indexes().await?;

        Ok(())
    }

    /// Create the statistics table. Survives index-table rebuilds.
    pub async fn create_stats_table(&self) -> Result<()> {
        let dialect = self.storage.dialect();
        let text = dialect.text_column_type();
        self.storage
            .execute(&format!(
                "CREATE TABLE statistics ( \
                 url {text} UNIQUE, \
                 createdate INTEGER, \
                 accessdate INTEGER, \
                 percentage FLOAT, \
                 rating INTEGER DEFAULT 0, \
                 playcounter INTEGER )"
            ))
            .await?;
        self.storage
            .execute("CREATE INDEX url_stats ON statistics ( url )")
            .await?;
        Ok(())
    }

    pub async fn drop_stats_table(&self) -> Result<()> {
        warn!("Dropping statistics table");
        self.storage
            .execute("DROP TABLE IF EXISTS statistics")
            .await?;
        Ok(())
    }

    /// Create the persistent tables (lyrics, labels).
    pub async fn create_persistent_tables(&self) -> Result<()> {
        let dialect = self.storage.dialect();
        let text = dialect.text_column_type();
        let statements = [
            format!(
                "CREATE TABLE lyrics ( url {text} UNIQUE, lyrics {longtext} )",
                longtext = dialect.long_text_column_type()
            ),
            format!("CREATE TABLE labels ( url {text}, label {text} )"),
            "CREATE UNIQUE INDEX labels_url_label_idx ON labels ( url, label )".to_string(),
        ];
        for statement in statements {
            self.storage.execute(&statement).await?;
        }
        Ok(())
    }

    pub async fn drop_persistent_tables(&self) -> Result<()> {
        warn!("Dropping persistent tables");
        for table in ["lyrics", "labels"] {
            self.storage
                .execute(&format!("DROP TABLE IF EXISTS {table}"))
                .await?;
        }
        Ok(())
    }

    async fn create_admin_table(&self) -> Result<()> {
        let text = self.storage.dialect().text_column_type();
        // "option" is reserved in MySQL.
        self.storage
            .execute(&format!(
                "CREATE TABLE IF NOT EXISTS admin ( noption {text}, value {text} )"
            ))
            .await?;
        Ok(())
    }

    /// Read a value from the admin key-value table.
    pub async fn admin_value(&self, key: &str) -> Result<Option<String>> {
        let rows = self
            .storage
            .query(&format!(
                "SELECT value FROM admin WHERE noption = '{}'",
                self.storage.escape(key)
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("value"))
            .and_then(SqlValue::as_str)
            .map(str::to_string))
    }

    /// Write a value into the admin key-value table.
    pub async fn set_admin_value(&self, key: &str, value: &str) -> Result<()> {
        let key = self.storage.escape(key);
        let value = self.storage.escape(value);
        self.storage
            .execute_transaction(&[
                format!("DELETE FROM admin WHERE noption = '{key}'"),
                format!("INSERT INTO admin ( noption, value ) VALUES ( '{key}', '{value}' )"),
            ])
            .await?;
        Ok(())
    }

    /// Whether the index holds no tracks.
    pub async fn is_empty(&self) -> Result<bool> {
        let rows = self.storage.query("SELECT COUNT( url ) AS n FROM tags").await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("n"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0)
            == 0)
    }

    /// Whether the expected table set is present and queryable.
    pub async fn is_valid(&self) -> bool {
        let tags = self.storage.query("SELECT COUNT( url ) FROM tags").await;
        let stats = self
            .storage
            .query("SELECT COUNT( url ) FROM statistics")
            .await;
        tags.is_ok() && stats.is_ok()
    }
}

fn table_suffix(temporary: bool) -> &'static str {
    if temporary {
        "_temp"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_storage::create_test_storage;

    async fn manager() -> SchemaManager {
        let storage = Arc::new(create_test_storage().await.unwrap());
        SchemaManager::new(storage, EventBus::default())
    }

    #[tokio::test]
    async fn initialize_creates_all_tables() {
        let schema = manager().await;
        schema.initialize().await.unwrap();
        assert!(schema.is_valid().await);
        assert!(schema.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let schema = manager().await;
        schema.initialize().await.unwrap();
        schema.initialize().await.unwrap();
        assert!(schema.is_valid().await);
    }

    #[tokio::test]
    async fn admin_values_round_trip() {
        let schema = manager().await;
        schema.initialize().await.unwrap();

        schema.set_admin_value("Scan Count", "3").await.unwrap();
        assert_eq!(
            schema.admin_value("Scan Count").await.unwrap().as_deref(),
            Some("3")
        );

        schema.set_admin_value("Scan Count", "4").await.unwrap();
        assert_eq!(
            schema.admin_value("Scan Count").await.unwrap().as_deref(),
            Some("4")
        );

        assert_eq!(schema.admin_value("Missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn version_bump_rebuilds_index_but_keeps_statistics() {
        let storage = Arc::new(create_test_storage().await.unwrap());
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let schema = SchemaManager::new(storage.clone(), bus);
        schema.initialize().await.unwrap();

        // A track row and a user rating created before the "upgrade".
        storage
            .execute("INSERT INTO tags ( url, dir, title ) VALUES ( '/a.mp3', '/', 'A' )")
            .await
            .unwrap();
        storage
            .execute(
                "INSERT INTO statistics ( url, createdate, accessdate, percentage, rating, playcounter ) \
                 VALUES ( '/a.mp3', 0, 0, 50.0, 8, 3 )",
            )
            .await
            .unwrap();

        // Simulate a binary compiled with a newer index schema version.
        schema
            .set_admin_value(ADMIN_KEY_VERSION, "0")
            .await
            .unwrap();
        schema.initialize().await.unwrap();

        assert!(schema.is_empty().await.unwrap(), "index tables were rebuilt");
        let rows = storage
            .query("SELECT rating FROM statistics WHERE url = '/a.mp3'")
            .await
            .unwrap();
        assert_eq!(rows[0].get("rating").and_then(SqlValue::as_i64), Some(8));

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            CoreEvent::Collection(CollectionEvent::SchemaRebuilt {
                family: "index".to_string()
            })
        );
    }

    #[tokio::test]
    async fn temp_tables_swap_into_place() {
        let schema = manager().await;
        schema.initialize().await.unwrap();

        let storage = &schema.storage;
        storage
            .execute("INSERT INTO tags ( url, dir, title ) VALUES ( '/old.mp3', '/', 'Old' )")
            .await
            .unwrap();

        schema.create_tables(true).await.unwrap();
        storage
            .execute("INSERT INTO tags_temp ( url, dir, title ) VALUES ( '/new.mp3', '/', 'New' )")
            .await
            .unwrap();

        // Live index untouched while the shadow rebuild runs.
        let rows = storage.query("SELECT url FROM tags").await.unwrap();
        assert_eq!(rows[0].get("url").and_then(SqlValue::as_str), Some("/old.mp3"));

        schema.move_temp_tables().await.unwrap();

        let rows = storage.query("SELECT url FROM tags").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("url").and_then(SqlValue::as_str), Some("/new.mp3"));

        // A second full rebuild must not collide with leftover temp state.
        schema.create_tables(true).await.unwrap();
        schema.move_temp_tables().await.unwrap();
    }

    #[tokio::test]
    async fn clear_tables_keeps_structure() {
        let schema = manager().await;
        schema.initialize().await.unwrap();

        schema
            .storage
            .execute("INSERT INTO tags ( url, dir, title ) VALUES ( '/a.mp3', '/', 'A' )")
            .await
            .unwrap();
        schema.clear_tables(false).await.unwrap();
        assert!(schema.is_empty().await.unwrap());
        assert!(schema.is_valid().await);
    }
}
