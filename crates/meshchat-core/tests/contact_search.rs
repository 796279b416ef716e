//! Contact discovery through the ChatEngine API

use std::sync::Arc;
use std::time::Duration;

use meshchat_core::graph::GraphPath;
use meshchat_core::{ChatConfig, ChatEngine, GraphPrimitive, KdfParams, MemoryGraph};
use serde_json::json;

fn test_config(window_ms: u64) -> ChatConfig {
    ChatConfig {
        kdf: KdfParams {
            memory_kib: 64,
            iterations: 1,
        },
        search_window: Duration::from_millis(window_ms),
        ..ChatConfig::default()
    }
}

async fn engine(graph: &Arc<MemoryGraph>, alias: &str, window_ms: u64) -> ChatEngine {
    let engine = ChatEngine::with_primitive(
        test_config(window_ms),
        graph.clone() as Arc<dyn GraphPrimitive>,
    )
    .unwrap();
    engine.initialize().await.unwrap();
    engine.create_account(alias, "password").await.unwrap();
    engine.login(alias, "password").await.unwrap();
    engine
}

#[tokio::test]
async fn test_search_floor() {
    let graph = Arc::new(MemoryGraph::new());
    let alice = engine(&graph, "alice", 50).await;
    let _bob = engine(&graph, "bob", 50).await;

    let handle = alice.search_users("ab").await.unwrap();
    assert!(!handle.is_active());
    assert!(alice.store().search_results.get().is_empty());
    assert!(!alice.store().is_loading_contacts.get());
    assert_eq!(graph.watcher_count(), 4); // two sessions x (chats + contacts)

    alice.teardown().await;
}

#[tokio::test]
async fn test_search_finds_peers_but_never_self() {
    let graph = Arc::new(MemoryGraph::new());
    let alice = engine(&graph, "alice", 50).await;
    let _alicia = engine(&graph, "Alicia", 50).await;
    let _bob = engine(&graph, "bob", 50).await;

    alice.search_users("ALI").await.unwrap();
    let results = alice.store().search_results.get();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].username, "Alicia");
    assert!(results[0].online);

    alice.teardown().await;
}

#[tokio::test]
async fn test_new_search_replaces_previous() {
    let graph = Arc::new(MemoryGraph::new());
    let alice = engine(&graph, "alice", 1_000).await;
    let _bob = engine(&graph, "bobby", 1_000).await;
    let _carol = engine(&graph, "carol", 1_000).await;

    let first = alice.search_users("bob").await.unwrap();
    assert_eq!(alice.store().search_results.get().len(), 1);

    let second = alice.search_users("car").await.unwrap();
    assert!(!first.is_active());
    assert!(second.is_active());

    let names: Vec<String> = alice
        .store()
        .search_results
        .get()
        .into_iter()
        .map(|c| c.username)
        .collect();
    assert_eq!(names, vec!["carol"]);

    second.cancel().await;
    alice.teardown().await;
}

#[tokio::test]
async fn test_grace_window_then_late_match() {
    let graph = Arc::new(MemoryGraph::new());
    let alice = engine(&graph, "alice", 30).await;

    let handle = alice.search_users("dave").await.unwrap();
    assert!(alice.store().is_loading_contacts.get());
    assert!(alice.store().search_results.get().is_empty());

    let mut loading = alice.store().is_loading_contacts.subscribe();
    tokio::time::timeout(Duration::from_secs(5), loading.wait_for(|l| !*l))
        .await
        .expect("loading flag never cleared")
        .unwrap();

    // dave's alias replicates in after the window
    graph
        .write(
            &GraphPath::alias_entry("dave").unwrap(),
            json!({"username": "dave", "publicKey": "davekey"}),
        )
        .await
        .unwrap();

    let mut results = alice.store().search_results.subscribe();
    tokio::time::timeout(Duration::from_secs(5), results.wait_for(|r| r.len() == 1))
        .await
        .expect("late match never appended")
        .unwrap();
    assert!(!alice.store().is_loading_contacts.get());

    handle.cancel().await;
    alice.teardown().await;
}

#[tokio::test]
async fn test_contacts_follow_chat_creation() {
    let graph = Arc::new(MemoryGraph::new());
    let alice = engine(&graph, "alice", 50).await;
    let bob = engine(&graph, "bob", 50).await;
    let bob_key = bob.session().unwrap().public_key();

    alice.create_private_chat(&bob_key, "bob").await.unwrap();
    let contacts = alice.store().active_contacts.get();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].public_key, bob_key);

    let mut bob_contacts = bob.store().active_contacts.subscribe();
    tokio::time::timeout(Duration::from_secs(5), bob_contacts.wait_for(|c| c.len() == 1))
        .await
        .expect("reciprocal contact never arrived")
        .unwrap();

    alice.teardown().await;
    bob.teardown().await;
}
