//! Property-based tests for ids, crypto and projection merges
//!
//! Uses proptest to check the invariants the chat layer relies on.

use meshchat_core::chat::{ingest, private_chat_id, recipient_from_chat_id, IngestOutcome, MessageRecord};
use meshchat_core::crypto;
use meshchat_core::projection::{sort_chats, sort_messages};
use meshchat_core::{Chat, ChatKind, ChatStore, KeyPair, Message};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

/// base58 alphabet, the shape of a public key
fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[1-9A-HJ-NP-Za-km-z]{32,44}").expect("valid regex")
}

fn message(id: usize, ts: i64) -> Message {
    Message {
        id: format!("m{}", id),
        sender: "sender".to_string(),
        content: String::new(),
        timestamp: ts,
        delivered: false,
        read: false,
        reply_to: None,
    }
}

fn chat(id: usize, ts: i64) -> Chat {
    Chat {
        id: format!("c{}", id),
        kind: ChatKind::Private,
        name: String::new(),
        last_message_preview: String::new(),
        last_message_timestamp: ts,
        unread_count: 0,
        participants: None,
        admin: None,
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn chat_id_is_symmetric(a in key_strategy(), b in key_strategy()) {
        prop_assert_eq!(private_chat_id(&a, &b), private_chat_id(&b, &a));
    }

    #[test]
    fn recipient_is_the_other_side(a in key_strategy(), b in key_strategy()) {
        prop_assume!(a != b);
        let id = private_chat_id(&a, &b);
        prop_assert_eq!(recipient_from_chat_id(&id, &a), b);
    }

    #[test]
    fn encrypt_roundtrip_and_wrong_key(text in ".{0,200}") {
        let recipient = KeyPair::generate();
        let stranger = KeyPair::generate();
        let sealed = crypto::encrypt(&text, &recipient.encryption_public_key()).unwrap();

        prop_assert!(crypto::is_ciphertext(&sealed));
        prop_assert_eq!(crypto::decrypt(&sealed, &recipient), Some(text));
        prop_assert_eq!(crypto::decrypt(&sealed, &stranger), None);
    }

    #[test]
    fn sorted_messages_are_ascending_permutation(ts in prop::collection::vec(-1_000i64..1_000, 0..40)) {
        let messages: Vec<Message> = ts.iter().enumerate().map(|(i, t)| message(i, *t)).collect();
        let sorted = sort_messages(&messages);

        prop_assert_eq!(sorted.len(), messages.len());
        prop_assert!(sorted.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        // stable: equal timestamps keep insertion order
        let index = |m: &Message| m.id[1..].parse::<usize>().unwrap();
        prop_assert!(sorted
            .windows(2)
            .all(|w| w[0].timestamp != w[1].timestamp || index(&w[0]) < index(&w[1])));
    }

    #[test]
    fn sorted_chats_are_descending(ts in prop::collection::vec(-1_000i64..1_000, 0..40)) {
        let chats: Vec<Chat> = ts.iter().enumerate().map(|(i, t)| chat(i, *t)).collect();
        let sorted = sort_chats(&chats);

        prop_assert_eq!(sorted.len(), chats.len());
        prop_assert!(sorted.windows(2).all(|w| w[0].last_message_timestamp >= w[1].last_message_timestamp));
    }

    #[test]
    fn ingest_is_idempotent(texts in prop::collection::vec("[a-z ]{1,20}", 1..8), repeats in 1usize..4) {
        let keys = KeyPair::generate();
        let store = ChatStore::new();

        for _ in 0..repeats {
            for (i, text) in texts.iter().enumerate() {
                let record = MessageRecord {
                    sender: keys.public_key(),
                    content: crypto::encrypt(text, &keys.encryption_public_key()).unwrap(),
                    timestamp: i as i64,
                    delivered: false,
                    read: false,
                    reply_to: None,
                };
                let value = serde_json::to_value(&record).unwrap();
                let outcome = ingest(&store, &keys, &format!("id{}", i), &value);
                prop_assert!(matches!(outcome, IngestOutcome::Inserted | IngestOutcome::Duplicate));
            }
        }

        prop_assert_eq!(store.messages.get().len(), texts.len());
        prop_assert_eq!(store.sorted_messages.get().len(), texts.len());
    }
}
