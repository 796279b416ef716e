//! End-to-end chat flows between engines sharing one graph replica
//!
//! ## Test Architecture
//!
//! - **Unit tests** (`src/chat/*.rs`): ingest, ids, mirrors on a bare GraphStore
//! - **Integration tests** (this file): two or more `ChatEngine`s over one
//!   `Arc<MemoryGraph>`, which behaves like peers whose replicas converged
//!
//! Projection changes are awaited with `watch::Receiver::wait_for` under a
//! timeout instead of sleeping.

use std::sync::Arc;
use std::time::Duration;

use meshchat_core::chat::ChatRecord;
use meshchat_core::crypto;
use meshchat_core::graph::GraphPath;
use meshchat_core::{ChatConfig, ChatEngine, GraphPrimitive, KdfParams, MemoryGraph};
use serde_json::Value;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> ChatConfig {
    ChatConfig {
        kdf: KdfParams {
            memory_kib: 64,
            iterations: 1,
        },
        search_window: Duration::from_millis(50),
        ..ChatConfig::default()
    }
}

/// Create, log in and return a ready engine plus its public key.
async fn user(graph: &Arc<MemoryGraph>, alias: &str) -> (ChatEngine, String) {
    let engine =
        ChatEngine::with_primitive(test_config(), graph.clone() as Arc<dyn GraphPrimitive>)
            .unwrap();
    engine.initialize().await.unwrap();
    let public_key = engine.create_account(alias, "password").await.unwrap();
    engine.login(alias, "password").await.unwrap();
    (engine, public_key)
}

#[tokio::test]
async fn test_hello_reaches_recipient() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, alice_key) = user(&graph, "alice").await;
    let (bob, bob_key) = user(&graph, "bob").await;

    let chat_id = alice.create_private_chat(&bob_key, "bob").await.unwrap();

    // Bob's chat list picks up the mirrored chat
    let mut chats = bob.store().chats.subscribe();
    tokio::time::timeout(WAIT, chats.wait_for(|c| c.iter().any(|c| c.id == chat_id)))
        .await
        .expect("mirrored chat never appeared")
        .unwrap();

    bob.load_messages(&chat_id).await.unwrap();
    assert!(!bob.store().is_loading_messages.get());

    assert!(alice.send_message(&chat_id, "hello", None).await);

    let mut messages = bob.store().sorted_messages.subscribe();
    let received = tokio::time::timeout(WAIT, messages.wait_for(|m| !m.is_empty()))
        .await
        .expect("message never arrived")
        .unwrap()
        .clone();

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content, "hello");
    assert_eq!(received[0].sender, alice_key);
    assert!(!received[0].delivered);
    assert!(!received[0].read);

    alice.teardown().await;
    bob.teardown().await;
}

#[tokio::test]
async fn test_mirrored_message_and_previews_hold_no_plaintext() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, alice_key) = user(&graph, "alice").await;
    let (bob, bob_key) = user(&graph, "bob").await;

    let chat_id = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    let secret = "the eagle lands at midnight, bring the long ladder";
    assert!(alice.send_message(&chat_id, secret, None).await);

    for owner in [&alice_key, &bob_key] {
        let messages = graph
            .children(&GraphPath::messages(owner, &chat_id).unwrap())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        let content = messages[0].1["content"].as_str().unwrap().to_string();
        assert!(crypto::is_ciphertext(&content));

        let chat = graph
            .read(&GraphPath::chat(owner, &chat_id).unwrap())
            .await
            .unwrap()
            .unwrap();
        let raw = chat.to_string();
        assert!(!raw.contains("eagle"));
    }

    let bob_chat: ChatRecord = serde_json::from_value(
        graph
            .read(&GraphPath::chat(&bob_key, &chat_id).unwrap())
            .await
            .unwrap()
            .unwrap(),
    )
    .unwrap();
    assert_eq!(bob_chat.unread, 1);
    assert_eq!(bob_chat.name, "alice");

    // Bob's projection decrypts the preview
    let mut chats = bob.store().chats.subscribe();
    let expected = meshchat_core::chat::preview_text(secret);
    tokio::time::timeout(
        WAIT,
        chats.wait_for(|c| c.iter().any(|c| c.last_message_preview == expected)),
    )
    .await
    .expect("preview never decrypted")
    .unwrap();
    assert!(expected.ends_with("..."));

    alice.teardown().await;
    bob.teardown().await;
}

#[tokio::test]
async fn test_sender_sees_own_message_once() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, _) = user(&graph, "alice").await;
    let (_bob, bob_key) = user(&graph, "bob").await;

    let chat_id = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    alice.load_messages(&chat_id).await.unwrap();
    assert!(alice.send_message(&chat_id, "one", None).await);
    assert!(alice.send_message(&chat_id, "two", None).await);

    // let the echo events drain through the watch task
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages = alice.store().sorted_messages.get();
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents.len(), 2);
    assert!(contents.contains(&"one"));
    assert!(contents.contains(&"two"));

    alice.teardown().await;
}

#[tokio::test]
async fn test_read_receipt_flows_back_to_sender() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, _) = user(&graph, "alice").await;
    let (bob, bob_key) = user(&graph, "bob").await;

    let chat_id = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    alice.load_messages(&chat_id).await.unwrap();
    assert!(alice.send_message(&chat_id, "did you get this?", None).await);

    bob.create_private_chat(&alice.session().unwrap().public_key(), "alice")
        .await
        .unwrap();
    bob.load_messages(&chat_id).await.unwrap();
    let message_id = bob.store().sorted_messages.get()[0].id.clone();

    bob.mark_delivered(&chat_id, &message_id).await.unwrap();
    assert!(bob.mark_read(&chat_id, &message_id).await.unwrap());
    bob.clear_unread(&chat_id).await.unwrap();

    let mut messages = alice.store().messages.subscribe();
    tokio::time::timeout(WAIT, messages.wait_for(|m| m.iter().all(|m| m.read && m.delivered)))
        .await
        .expect("read receipt never arrived")
        .unwrap();

    let mut chats = bob.store().chats.subscribe();
    tokio::time::timeout(
        WAIT,
        chats.wait_for(|c| c.iter().any(|c| c.id == chat_id && c.unread_count == 0)),
    )
    .await
    .expect("unread counter never cleared")
    .unwrap();

    alice.teardown().await;
    bob.teardown().await;
}

#[tokio::test]
async fn test_read_receipts_can_be_switched_off() {
    let graph = Arc::new(MemoryGraph::new());
    let mut config = test_config();
    config.features.read_receipts = false;

    let alice = ChatEngine::with_primitive(config, graph.clone() as Arc<dyn GraphPrimitive>).unwrap();
    alice.initialize().await.unwrap();
    alice.create_account("alice", "password").await.unwrap();
    alice.login("alice", "password").await.unwrap();
    let (_bob, bob_key) = user(&graph, "bob").await;

    let chat_id = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    alice.load_messages(&chat_id).await.unwrap();
    assert!(alice.send_message(&chat_id, "hi", None).await);
    let message_id = alice.store().messages.get()[0].id.clone();

    assert!(!alice.mark_read(&chat_id, &message_id).await.unwrap());
    let stored: Value = graph
        .read(&GraphPath::message(&bob_key, &chat_id, &message_id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored["read"], false);

    alice.teardown().await;
}

#[tokio::test]
async fn test_send_to_other_chat_leaves_loaded_view_alone() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, _) = user(&graph, "alice").await;
    let (_bob, bob_key) = user(&graph, "bob").await;
    let (_carol, carol_key) = user(&graph, "carol").await;

    let bob_chat = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    let carol_chat = alice.create_private_chat(&carol_key, "carol").await.unwrap();

    alice.load_messages(&bob_chat).await.unwrap();
    assert!(alice.send_message(&carol_chat, "for carol only", None).await);

    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(alice.store().loaded_chat.get().as_deref(), Some(bob_chat.as_str()));
    assert!(alice.store().messages.get().is_empty());
    assert!(alice.store().sorted_messages.get().is_empty());

    // the message still lands in carol's chat and its preview
    alice.load_messages(&carol_chat).await.unwrap();
    let messages = alice.store().sorted_messages.get();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "for carol only");
    let chat = alice.store().find_chat(&carol_chat).unwrap();
    assert_eq!(chat.last_message_preview, "for carol only");

    alice.teardown().await;
}

#[tokio::test]
async fn test_unknown_recipient_key_fails_send() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, _) = user(&graph, "alice").await;

    // a chat whose counterpart never published ~<pub>
    let chat_id = alice
        .create_private_chat("9zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz", "ghost")
        .await
        .unwrap();
    assert!(!alice.send_message(&chat_id, "anyone there?", None).await);

    alice.teardown().await;
}

#[tokio::test]
async fn test_chat_creation_is_idempotent_across_both_sides() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, alice_key) = user(&graph, "alice").await;
    let (bob, bob_key) = user(&graph, "bob").await;

    let from_alice = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    let from_bob = bob.create_private_chat(&alice_key, "alice").await.unwrap();
    assert_eq!(from_alice, from_bob);

    assert_eq!(bob.store().chats.get().len(), 1);
    assert!(alice.check_mirror(&from_alice).await.unwrap().is_complete());

    alice.teardown().await;
    bob.teardown().await;
}

#[tokio::test]
async fn test_logout_clears_projections_and_session() {
    let graph = Arc::new(MemoryGraph::new());
    let (alice, alice_key) = user(&graph, "alice").await;
    let (_bob, bob_key) = user(&graph, "bob").await;

    let chat_id = alice.create_private_chat(&bob_key, "bob").await.unwrap();
    alice.load_messages(&chat_id).await.unwrap();
    alice.send_message(&chat_id, "bye", None).await;

    alice.logout().await;

    assert!(!alice.is_authenticated());
    assert!(!graph.has_session(&alice_key));
    assert!(alice.store().chats.get().is_empty());
    assert!(alice.store().sorted_messages.get().is_empty());
    assert!(alice.store().current_chat.get().is_none());
    assert!(alice.store().loaded_chat.get().is_none());
    assert!(!alice.graph().is_initialized());

    // offline presence was published before the store went down
    let presence = graph
        .read(&GraphPath::user_entry("alice").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(presence["status"], "Offline");
}
