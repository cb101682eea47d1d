//! # Dimension Resolver
//!
//! Maps free-text artist/album/genre/year names to stable integer ids,
//! creating rows on demand (lookup-or-insert).
//!
//! Matching is case-insensitive SQL pattern matching, not byte equality:
//! two names differing only by case resolve to the same id, and the casing
//! stored first wins. Two single-entry caches shortcut the common case of
//! consecutive tracks from the same album during a scan.

use crate::error::{CollectionError, Result};
use crate::models::{sortable_name, Dimension};
use core_storage::{SqlStorage, SqlValue};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Resolves dimension names to ids against one storage backend.
pub struct DimensionResolver {
    storage: Arc<dyn SqlStorage>,
    // Most-recently-resolved entries; not shared across call paths that use
    // temporary tables.
    artist_cache: Mutex<Option<(String, i64)>>,
    album_cache: Mutex<Option<(String, i64)>>,
}

impl DimensionResolver {
    pub fn new(storage: Arc<dyn SqlStorage>) -> Self {
        Self {
            storage,
            artist_cache: Mutex::new(None),
            album_cache: Mutex::new(None),
        }
    }

    /// Resolve `name` within `dimension` to its id.
    ///
    /// With `autocreate`, a missing name is inserted and its fresh id
    /// returned; without it, a miss is a [`CollectionError::DimensionNotFound`].
    /// With `temporary`, the `_temp` shadow tables are used and the caches
    /// are bypassed.
    pub async fn resolve(
        &self,
        dimension: Dimension,
        name: &str,
        autocreate: bool,
        temporary: bool,
    ) -> Result<i64> {
        if !temporary {
            if let Some(id) = self.cached(dimension, name) {
                return Ok(id);
            }
        }

        let table = format!(
            "{}{}",
            dimension.table_name(),
            if temporary { "_temp" } else { "" }
        );
        let escaped = self.storage.escape(name);

        let rows = self
            .storage
            .query(&format!(
                "SELECT id FROM {table} WHERE name LIKE '{escaped}'"
            ))
            .await?;

        let id = match rows.first().and_then(|row| row.get("id")).and_then(SqlValue::as_i64) {
            Some(id) => id,
            None => {
                if !autocreate {
                    return Err(CollectionError::DimensionNotFound {
                        dimension: dimension.to_string(),
                        name: name.to_string(),
                    });
                }
                debug!(dimension = %dimension, name = name, "Creating dimension entry");
                let statement = match dimension {
                    Dimension::Artist => format!(
                        "INSERT INTO {table} ( name, sortname ) VALUES ( '{escaped}', '{}' )",
                        self.storage.escape(&sortable_name(name))
                    ),
                    _ => format!("INSERT INTO {table} ( name ) VALUES ( '{escaped}' )"),
                };
                self.storage.insert(&statement).await?
            }
        };

        if !temporary {
            self.store_cached(dimension, name, id);
        }
        Ok(id)
    }

    /// Display name for an id, `None` when the row is gone.
    pub async fn value_of(&self, dimension: Dimension, id: i64) -> Result<Option<String>> {
        let rows = self
            .storage
            .query(&format!(
                "SELECT name FROM {} WHERE id = {id}",
                dimension.table_name()
            ))
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("name"))
            .and_then(SqlValue::as_str)
            .map(str::to_string))
    }

    /// Drop both caches. Required after a schema rebuild or temp-table swap,
    /// which can reassign ids.
    pub fn invalidate_caches(&self) {
        *self.artist_cache.lock().unwrap() = None;
        *self.album_cache.lock().unwrap() = None;
    }

    fn cached(&self, dimension: Dimension, name: &str) -> Option<i64> {
        let cache = match dimension {
            Dimension::Artist => &self.artist_cache,
            Dimension::Album => &self.album_cache,
            _ => return None,
        };
        let guard = cache.lock().unwrap();
        guard
            .as_ref()
            .filter(|(cached, _)| cached.eq_ignore_ascii_case(name))
            .map(|(_, id)| *id)
    }

    fn store_cached(&self, dimension: Dimension, name: &str, id: i64) {
        let cache = match dimension {
            Dimension::Artist => &self.artist_cache,
            Dimension::Album => &self.album_cache,
            _ => return,
        };
        *cache.lock().unwrap() = Some((name.to_string(), id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaManager;
    use core_runtime::events::EventBus;
    use core_storage::create_test_storage;

    async fn resolver() -> DimensionResolver {
        let storage: Arc<dyn SqlStorage> = Arc::new(create_test_storage().await.unwrap());
        let schema = SchemaManager::new(storage.clone(), EventBus::default());
        schema.initialize().await.unwrap();
        DimensionResolver::new(storage)
    }

    #[tokio::test]
    async fn resolve_twice_returns_same_id_without_second_insert() {
        let resolver = resolver().await;

        let first = resolver
            .resolve(Dimension::Artist, "Miles Davis", true, false)
            .await
            .unwrap();
        let second = resolver
            .resolve(Dimension::Artist, "Miles Davis", true, false)
            .await
            .unwrap();
        assert_eq!(first, second);

        let rows = resolver
            .storage
            .query("SELECT COUNT(*) AS n FROM artist")
            .await
            .unwrap();
        assert_eq!(rows[0].get("n").and_then(SqlValue::as_i64), Some(1));
    }

    #[tokio::test]
    async fn names_differing_only_by_case_share_an_id() {
        let resolver = resolver().await;

        let first = resolver
            .resolve(Dimension::Genre, "Jazz", true, false)
            .await
            .unwrap();
        let second = resolver
            .resolve(Dimension::Genre, "JAZZ", true, false)
            .await
            .unwrap();
        assert_eq!(first, second);

        // First-writer-wins on the stored casing.
        assert_eq!(
            resolver.value_of(Dimension::Genre, first).await.unwrap(),
            Some("Jazz".to_string())
        );
    }

    #[tokio::test]
    async fn miss_without_autocreate_is_not_found() {
        let resolver = resolver().await;
        let result = resolver
            .resolve(Dimension::Album, "Kind of Blue", false, false)
            .await;
        assert!(matches!(
            result,
            Err(CollectionError::DimensionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_ids() {
        let resolver = resolver().await;
        let a = resolver
            .resolve(Dimension::Year, "1959", true, false)
            .await
            .unwrap();
        let b = resolver
            .resolve(Dimension::Year, "1969", true, false)
            .await
            .unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn artist_rows_store_a_sortable_name() {
        let resolver = resolver().await;
        resolver
            .resolve(Dimension::Artist, "The Beatles", true, false)
            .await
            .unwrap();

        let rows = resolver
            .storage
            .query("SELECT name, sortname FROM artist")
            .await
            .unwrap();
        assert_eq!(
            rows[0].get("name").and_then(SqlValue::as_str),
            Some("The Beatles")
        );
        assert_eq!(
            rows[0].get("sortname").and_then(SqlValue::as_str),
            Some("Beatles, The")
        );
    }

    #[tokio::test]
    async fn temporary_resolution_targets_shadow_tables() {
        let storage: Arc<dyn SqlStorage> = Arc::new(create_test_storage().await.unwrap());
        let schema = SchemaManager::new(storage.clone(), EventBus::default());
        schema.initialize().await.unwrap();
        schema.create_tables(true).await.unwrap();

        let resolver = DimensionResolver::new(storage.clone());
        resolver
            .resolve(Dimension::Artist, "Shadow Artist", true, true)
            .await
            .unwrap();

        let live = storage.query("SELECT COUNT(*) AS n FROM artist").await.unwrap();
        assert_eq!(live[0].get("n").and_then(SqlValue::as_i64), Some(0));

        let temp = storage
            .query("SELECT COUNT(*) AS n FROM artist_temp")
            .await
            .unwrap();
        assert_eq!(temp[0].get("n").and_then(SqlValue::as_i64), Some(1));
    }
}
