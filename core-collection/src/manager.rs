//! # Collection Manager
//!
//! Owns the list of registered collections, their status flags and the
//! priority-derived primary collection.
//!
//! ## Overview
//!
//! A [`Collection`] is a named, independently registered source of tracks —
//! the local SQL-backed store, a semantic-graph store, or anything else that
//! can produce a [`QueryMaker`]. Status is a bit-set: a collection can be
//! queryable without being shown, or vice versa. The *primary* collection is
//! the highest-priority registrant that also offers direct writable SQL
//! storage; administrative writes (ratings, lyrics) go there.
//!
//! Backends are independently loadable, so the manager holds trait objects,
//! not a closed enum. Status overrides are seeded from the settings store at
//! startup and handed back for persistence at shutdown.

use crate::maker::{MetaQueryMaker, QueryMaker};
use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
use core_storage::SqlStorage;
use std::collections::HashMap;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Status bit-set of a registered collection. The empty set means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionStatus(u32);

impl CollectionStatus {
    pub const DISABLED: Self = Self(0);
    pub const ENABLED: Self = Self(1);
    pub const VIEWABLE: Self = Self(1 << 1);
    pub const QUERYABLE: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    pub fn is_queryable(self) -> bool {
        self.contains(Self::ENABLED) && self.contains(Self::QUERYABLE)
    }

    pub fn is_viewable(self) -> bool {
        self.contains(Self::ENABLED) && self.contains(Self::VIEWABLE)
    }
}

impl Default for CollectionStatus {
    /// A freshly registered collection is fully on unless overridden.
    fn default() -> Self {
        Self::ENABLED | Self::VIEWABLE | Self::QUERYABLE
    }
}

impl BitOr for CollectionStatus {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CollectionStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A named, independently registered source of tracks.
pub trait Collection: Send + Sync {
    /// Stable identity string, used to tag result sets and to key status
    /// overrides.
    fn collection_id(&self) -> &str;

    /// Human-readable name for browsing surfaces.
    fn pretty_name(&self) -> &str;

    /// A fresh query maker. One maker serves exactly one query; makers are
    /// never cached or shared.
    fn query_maker(&self) -> Box<dyn QueryMaker>;

    /// Direct writable SQL storage, for collections that have one.
    fn sql_storage(&self) -> Option<Arc<dyn SqlStorage>> {
        None
    }

    /// Priority when electing the primary SQL-backed collection.
    fn sql_priority(&self) -> i32 {
        0
    }
}

struct Inner {
    collections: Vec<(Arc<dyn Collection>, CollectionStatus)>,
    primary: Option<Arc<dyn Collection>>,
    status_overrides: HashMap<String, u32>,
}

/// Registry of collections; constructed once at the composition root and
/// shared by handle.
pub struct CollectionManager {
    inner: RwLock<Inner>,
    events: EventBus,
}

impl CollectionManager {
    /// Create a manager. `status_overrides` comes from the settings store
    /// (collection id → status bits).
    pub fn new(events: EventBus, status_overrides: HashMap<String, u32>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                collections: Vec::new(),
                primary: None,
                status_overrides,
            }),
            events,
        }
    }

    /// Register a collection. Its status comes from the persisted override
    /// when one exists, otherwise it is fully enabled.
    pub fn register(&self, collection: Arc<dyn Collection>) {
        let id = collection.collection_id().to_string();
        let mut inner = self.inner.write().unwrap();

        let status = inner
            .status_overrides
            .get(&id)
            .map(|bits| CollectionStatus::from_bits(*bits))
            .unwrap_or_default();

        info!(collection_id = %id, status = status.bits(), "Registering collection");
        inner.collections.push((collection, status));
        Self::elect_primary(&mut inner);

        if status.is_viewable() {
            self.events
                .emit(CoreEvent::Collection(CollectionEvent::Added {
                    collection_id: id,
                }));
        }
    }

    /// Remove a collection at runtime. The primary pointer is re-elected
    /// immediately; no restart needed.
    pub fn remove(&self, collection_id: &str) {
        let mut inner = self.inner.write().unwrap();
        let before = inner.collections.len();
        inner
            .collections
            .retain(|(collection, _)| collection.collection_id() != collection_id);
        if inner.collections.len() == before {
            return;
        }
        Self::elect_primary(&mut inner);
        drop(inner);

        self.events
            .emit(CoreEvent::Collection(CollectionEvent::Removed {
                collection_id: collection_id.to_string(),
            }));
    }

    /// Change a collection's status bits. Persisted into the override map
    /// handed back by [`CollectionManager::status_overrides`].
    pub fn set_status(&self, collection_id: &str, status: CollectionStatus) {
        let mut inner = self.inner.write().unwrap();
        let mut was_viewable = false;
        let mut found = false;
        for (collection, current) in &mut inner.collections {
            if collection.collection_id() == collection_id {
                was_viewable = current.is_viewable();
                *current = status;
                found = true;
                break;
            }
        }
        if !found {
            return;
        }
        inner
            .status_overrides
            .insert(collection_id.to_string(), status.bits());
        drop(inner);

        debug!(collection_id = %collection_id, status = status.bits(), "Collection status changed");
        self.events
            .emit(CoreEvent::Collection(CollectionEvent::StatusChanged {
                collection_id: collection_id.to_string(),
            }));
        // Mirror visibility transitions the way browsing surfaces expect.
        if was_viewable && !status.is_viewable() {
            self.events
                .emit(CoreEvent::Collection(CollectionEvent::Removed {
                    collection_id: collection_id.to_string(),
                }));
        } else if !was_viewable && status.is_viewable() {
            self.events
                .emit(CoreEvent::Collection(CollectionEvent::Added {
                    collection_id: collection_id.to_string(),
                }));
        }
    }

    /// A collection's current status; `DISABLED` when unknown.
    pub fn status(&self, collection_id: &str) -> CollectionStatus {
        let inner = self.inner.read().unwrap();
        inner
            .collections
            .iter()
            .find(|(collection, _)| collection.collection_id() == collection_id)
            .map(|(_, status)| *status)
            .unwrap_or(CollectionStatus::DISABLED)
    }

    /// Collections participating in query fan-out.
    pub fn queryable_collections(&self) -> Vec<Arc<dyn Collection>> {
        let inner = self.inner.read().unwrap();
        inner
            .collections
            .iter()
            .filter(|(_, status)| status.is_queryable())
            .map(|(collection, _)| collection.clone())
            .collect()
    }

    /// Collections shown by browsing surfaces.
    pub fn viewable_collections(&self) -> Vec<Arc<dyn Collection>> {
        let inner = self.inner.read().unwrap();
        inner
            .collections
            .iter()
            .filter(|(_, status)| status.is_viewable())
            .map(|(collection, _)| collection.clone())
            .collect()
    }

    /// The highest-priority SQL-backed collection; administrative writes go
    /// here.
    pub fn primary_collection(&self) -> Option<Arc<dyn Collection>> {
        self.inner.read().unwrap().primary.clone()
    }

    /// A meta maker fanning out to every queryable collection.
    pub fn query_maker(&self) -> MetaQueryMaker {
        let makers = self
            .queryable_collections()
            .iter()
            .map(|collection| collection.query_maker())
            .collect();
        MetaQueryMaker::new(makers)
    }

    /// The override map to persist into the settings store at shutdown.
    pub fn status_overrides(&self) -> HashMap<String, u32> {
        self.inner.read().unwrap().status_overrides.clone()
    }

    fn elect_primary(inner: &mut Inner) {
        inner.primary = inner
            .collections
            .iter()
            .filter(|(collection, _)| collection.sql_storage().is_some())
            .max_by_key(|(collection, _)| collection.sql_priority())
            .map(|(collection, _)| collection.clone());
    }
}
