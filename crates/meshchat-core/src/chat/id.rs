//! Chat and message identifiers
//!
//! ```text
//! private_<min(pubA, pubB)>_<max(pubA, pubB)>
//! group_<millis>_<base36 suffix>
//! <millis>_<base36 suffix>            (message)
//! ```
//!
//! Public keys are base58 and never contain `_`, so a private id always splits
//! into exactly three parts.

use rand::Rng;
use tracing::warn;

const PRIVATE_PREFIX: &str = "private";
const GROUP_PREFIX: &str = "group";

/// Symmetric id for the private chat between two identities.
pub fn private_chat_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}_{}_{}", PRIVATE_PREFIX, first, second)
}

pub fn group_chat_id() -> String {
    format!("{}_{}_{}", GROUP_PREFIX, now_millis(), random_suffix())
}

pub fn message_id() -> String {
    format!("{}_{}", now_millis(), random_suffix())
}

pub fn is_private_chat_id(chat_id: &str) -> bool {
    let parts: Vec<&str> = chat_id.split('_').collect();
    parts.len() == 3 && parts[0] == PRIVATE_PREFIX
}

/// The other participant of a private chat.
///
/// Ids that do not have the `private_<a>_<b>` shape fall back to the raw id,
/// treated as the recipient's public key.
pub fn recipient_from_chat_id(chat_id: &str, me: &str) -> String {
    let parts: Vec<&str> = chat_id.split('_').collect();
    if parts.len() == 3 && parts[0] == PRIVATE_PREFIX {
        return if parts[1] == me { parts[2] } else { parts[1] }.to_string();
    }
    warn!(%chat_id, "Chat id is not private_<a>_<b>, using it as the recipient key");
    chat_id.to_string()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Up to 13 base36 characters of randomness.
pub fn random_suffix() -> String {
    to_base36(rand::rng().random::<u64>())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_private_id_is_sorted() {
        assert_eq!(private_chat_id("bbb", "aaa"), "private_aaa_bbb");
        assert_eq!(private_chat_id("aaa", "bbb"), "private_aaa_bbb");
    }

    #[test]
    fn test_recipient_from_private_id() {
        let id = private_chat_id("alicekey", "bobkey");
        assert_eq!(recipient_from_chat_id(&id, "alicekey"), "bobkey");
        assert_eq!(recipient_from_chat_id(&id, "bobkey"), "alicekey");
    }

    #[test]
    fn test_recipient_fallback_uses_raw_id() {
        assert_eq!(recipient_from_chat_id("somekey", "me"), "somekey");
        assert_eq!(recipient_from_chat_id("private_a_b_c", "a"), "private_a_b_c");
        assert_eq!(recipient_from_chat_id("group_1_x", "me"), "group_1_x");
    }

    #[test]
    fn test_generated_ids_shape() {
        let group = group_chat_id();
        let parts: Vec<&str> = group.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "group");
        assert!(parts[1].parse::<i64>().is_ok());

        let message = message_id();
        let parts: Vec<&str> = message.split('_').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[1].len() <= 13);
        assert!(parts[1].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u64::MAX).len(), 13);
    }

    #[test]
    fn test_message_ids_differ() {
        assert_ne!(message_id(), message_id());
    }

    proptest! {
        #[test]
        fn prop_private_id_symmetric(a in "[1-9A-HJ-NP-Za-km-z]{32,44}", b in "[1-9A-HJ-NP-Za-km-z]{32,44}") {
            prop_assert_eq!(private_chat_id(&a, &b), private_chat_id(&b, &a));
        }

        #[test]
        fn prop_recipient_roundtrip(a in "[1-9A-HJ-NP-Za-km-z]{32,44}", b in "[1-9A-HJ-NP-Za-km-z]{32,44}") {
            prop_assume!(a != b);
            let id = private_chat_id(&a, &b);
            prop_assert!(is_private_chat_id(&id));
            prop_assert_eq!(recipient_from_chat_id(&id, &a), b.clone());
            prop_assert_eq!(recipient_from_chat_id(&id, &b), a.clone());
        }
    }
}
