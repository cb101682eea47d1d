//! Registry and fan-out behavior across heterogeneous collections.

use core_collection::{
    result_for, Collection, CollectionManager, CollectionStatus, FilterMode, GraphCollection,
    MemoryGraphStore, MetaField, QueryMaker, QueryType, SqlCollection, TrackBundle,
};
use core_runtime::events::{CollectionEvent, CoreEvent, EventBus};
use core_storage::{create_test_storage, SqlStorage};
use std::collections::HashMap;
use std::sync::Arc;

async fn sql_collection(id: &str, priority: i32) -> Arc<SqlCollection> {
    let storage: Arc<dyn SqlStorage> = Arc::new(create_test_storage().await.unwrap());
    SqlCollection::open(id, id, storage, EventBus::default(), priority)
        .await
        .unwrap()
}

fn bundle(url: &str, title: &str, artist: &str, genre: &str) -> TrackBundle {
    let mut bundle = TrackBundle::new(url);
    bundle.title = title.to_string();
    bundle.artist = artist.to_string();
    bundle.album = "Album".to_string();
    bundle.genre = genre.to_string();
    bundle.year = "2001".to_string();
    bundle
}

#[tokio::test]
async fn primary_collection_follows_priority_and_survives_removal() {
    let manager = CollectionManager::new(EventBus::default(), HashMap::new());

    let a = sql_collection("collection-a", 10).await;
    let b = sql_collection("collection-b", 5).await;
    manager.register(a);
    manager.register(b);

    assert_eq!(
        manager.primary_collection().unwrap().collection_id(),
        "collection-a"
    );

    // Removing the primary at runtime re-elects without a restart.
    manager.remove("collection-a");
    assert_eq!(
        manager.primary_collection().unwrap().collection_id(),
        "collection-b"
    );

    manager.remove("collection-b");
    assert!(manager.primary_collection().is_none());
}

#[tokio::test]
async fn status_bits_filter_queryable_and_viewable_sets() {
    let manager = CollectionManager::new(EventBus::default(), HashMap::new());
    manager.register(sql_collection("local", 1).await);
    manager.register(GraphCollection::new(
        "semantic",
        "Semantic",
        Arc::new(MemoryGraphStore::new()),
    ));

    assert_eq!(manager.queryable_collections().len(), 2);
    assert_eq!(manager.viewable_collections().len(), 2);

    // Queryable without being shown.
    manager.set_status(
        "semantic",
        CollectionStatus::ENABLED | CollectionStatus::QUERYABLE,
    );
    assert_eq!(manager.queryable_collections().len(), 2);
    assert_eq!(manager.viewable_collections().len(), 1);

    // Disabled entirely.
    manager.set_status("semantic", CollectionStatus::DISABLED);
    assert_eq!(manager.queryable_collections().len(), 1);

    // Overrides are handed back for persistence.
    let overrides = manager.status_overrides();
    assert_eq!(
        overrides.get("semantic"),
        Some(&CollectionStatus::DISABLED.bits())
    );
}

#[tokio::test]
async fn persisted_status_overrides_apply_at_registration() {
    let mut seeded = HashMap::new();
    seeded.insert(
        "semantic".to_string(),
        (CollectionStatus::ENABLED | CollectionStatus::QUERYABLE).bits(),
    );
    let manager = CollectionManager::new(EventBus::default(), seeded);

    manager.register(GraphCollection::new(
        "semantic",
        "Semantic",
        Arc::new(MemoryGraphStore::new()),
    ));

    assert!(manager.status("semantic").is_queryable());
    assert!(!manager.status("semantic").is_viewable());
}

#[tokio::test]
async fn fan_out_tags_results_per_collection() {
    let manager = CollectionManager::new(EventBus::default(), HashMap::new());

    let local = sql_collection("local", 10).await;
    local
        .add_track(&bundle("/sql/1.mp3", "Blue in Green", "Miles Davis", "Jazz"), false)
        .await
        .unwrap();
    manager.register(local);

    let store = Arc::new(MemoryGraphStore::new());
    let semantic = GraphCollection::new("semantic", "Semantic", store);
    semantic.add_track(&bundle("/graph/1.mp3", "Freddie Freeloader", "Miles Davis", "Jazz"));
    manager.register(semantic);

    let mut maker = manager.query_maker();
    assert_eq!(maker.fan_out(), 2);
    maker.set_query_type(QueryType::Track);
    maker.add_filter(MetaField::Genre, "jazz", FilterMode::Equals);

    let results = maker.run_blocking().await.unwrap();
    assert_eq!(results.len(), 2);

    let sql_rows = &result_for(&results, "local").unwrap().rows;
    assert_eq!(sql_rows.len(), 1);
    assert_eq!(sql_rows[0][0], "/sql/1.mp3");

    let graph_rows = &result_for(&results, "semantic").unwrap().rows;
    assert_eq!(graph_rows.len(), 1);
    assert_eq!(graph_rows[0][0], "/graph/1.mp3");
}

#[tokio::test]
async fn async_fan_out_signals_completion_once() {
    let manager = CollectionManager::new(EventBus::default(), HashMap::new());
    let local = sql_collection("local", 10).await;
    local
        .add_track(&bundle("/sql/1.mp3", "So What", "Miles Davis", "Jazz"), false)
        .await
        .unwrap();
    manager.register(local);

    let mut maker = manager.query_maker();
    maker.set_query_type(QueryType::Custom);
    let handle = maker.run_async().unwrap();

    let results = handle.wait().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].collection_id, "local");
    assert_eq!(results[0].rows, vec![vec!["/sql/1.mp3".to_string()]]);
}

#[tokio::test]
async fn registration_emits_added_event_for_viewable_collections() {
    let bus = EventBus::default();
    let mut events = bus.subscribe();
    let manager = CollectionManager::new(bus, HashMap::new());

    manager.register(GraphCollection::new(
        "semantic",
        "Semantic",
        Arc::new(MemoryGraphStore::new()),
    ));

    assert_eq!(
        events.try_recv().unwrap(),
        CoreEvent::Collection(CollectionEvent::Added {
            collection_id: "semantic".to_string()
        })
    );
}
