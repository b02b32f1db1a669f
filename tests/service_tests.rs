//! Concurrent access through the graph service
//!
//! Run with: cargo test --test service_tests

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use worldgraph::embedding::{HashingEmbedder, ManagedEmbedder};
use worldgraph::types::{attributes, AttributeMap};
use worldgraph::{
    ActionRecord, EntitySource, EntityType, GraphConfig, GraphError, GraphService, GraphView,
    LoadOutcome, RecallOptions, SemanticRecall, WorldGraph,
};

fn in_memory() -> worldgraph::GraphHandle {
    GraphService::spawn(WorldGraph::new(GraphConfig::in_memory()))
}

#[tokio::test]
async fn concurrent_turns_are_serialized() {
    let handle = in_memory();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            handle
                .record(ActionRecord::tool(
                    "web_search",
                    attributes([("query", format!("topic {}", i))]),
                ))
                .await
                .unwrap();
            handle.advance_turn().await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.turn, 8);
    assert_eq!(snapshot.actions.len(), 8);
    let mut ids: Vec<&str> = snapshot.actions.iter().map(|a| a.id.as_str()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn snapshot_is_stable_while_graph_moves_on() {
    let handle = in_memory();
    handle
        .record(ActionRecord::tool(
            "spotify_control",
            attributes([("song_name", "Numb")]),
        ))
        .await
        .unwrap();

    let pinned = handle.snapshot();
    handle
        .record(ActionRecord::tool("open_app", attributes([("app_name", "Notes")])))
        .await
        .unwrap();

    assert_eq!(
        pinned.resolve_reference("play that").target_id(),
        Some("entity:song:numb")
    );
    assert_eq!(
        handle.snapshot().resolve_reference("open that").target_id(),
        Some("entity:app:notes")
    );
}

#[tokio::test]
async fn subscribers_see_each_mutation() {
    let handle = in_memory();
    let mut updates = handle.subscribe();

    handle.observe_user_input("quick, hurry up").await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        updates.borrow().intent,
        worldgraph::UserIntent::Urgent
    );
}

#[tokio::test]
async fn save_and_load_through_service() {
    let dir = TempDir::new().unwrap();
    let config = GraphConfig::with_snapshot_path(dir.path().join("graph.json"));
    let handle = GraphService::spawn(WorldGraph::new(config.clone()));

    handle
        .get_or_create_entity(
            EntityType::Person,
            "Alex",
            EntitySource::UserStated,
            attributes([("relation", "friend")]),
        )
        .await
        .unwrap();
    handle.save().await.unwrap();
    handle.reset().await.unwrap();
    assert!(handle.snapshot().entity("entity:person:alex").is_none());

    // Reset deleted the file
    assert!(matches!(handle.load().await.unwrap(), LoadOutcome::NoSnapshot));

    handle
        .get_or_create_entity(
            EntityType::Person,
            "Alex",
            EntitySource::UserStated,
            AttributeMap::new(),
        )
        .await
        .unwrap();
    handle.save().await.unwrap();
    let graph = handle.shutdown().await.unwrap();
    drop(graph);

    let reopened = GraphService::spawn(WorldGraph::open(config));
    assert!(reopened.snapshot().entity("entity:person:alex").is_some());
}

#[tokio::test]
async fn stopped_service_reports_error() {
    let handle = in_memory();
    handle.shutdown().await.unwrap();
    assert!(matches!(
        handle.save().await,
        Err(GraphError::ServiceStopped)
    ));
}

#[tokio::test]
async fn recall_over_service_snapshot() {
    let handle = in_memory();
    handle
        .get_or_create_entity(
            EntityType::Topic,
            "Neural networks",
            EntitySource::UserStated,
            attributes([("field", "machine learning")]),
        )
        .await
        .unwrap();

    let recall = SemanticRecall::new(
        Arc::new(ManagedEmbedder::with_embedder(
            Arc::new(HashingEmbedder::new(256)),
            Duration::from_secs(300),
        )),
        Duration::from_secs(5),
    );
    let hits = recall
        .recall(handle.snapshot(), "neural networks", RecallOptions::default())
        .await;
    assert_eq!(
        hits.first().map(|h| h.entity.id.as_str()),
        Some("entity:topic:neural_networks")
    );
}
