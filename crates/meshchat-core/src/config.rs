//! Injected configuration for the chat core
//!
//! Nothing in the core hard-codes peers, retry timing or feature switches;
//! everything flows in through [`ChatConfig`]. Defaults match the values the
//! desktop and web front ends ship with.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Environment variable prefix used by [`ChatConfig::from_env`].
pub const ENV_PREFIX: &str = "MESHCHAT_";

/// Retry and polling parameters for components that talk to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// How many times to attempt reaching the configured peers
    pub max_attempts: u32,
    /// Pause between attempts
    #[serde(with = "duration_ms")]
    pub retry_delay: Duration,
    /// Interval for periodic refresh work (presence, polling fallbacks)
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(2000),
            poll_interval: Duration::from_millis(5000),
        }
    }
}

/// Optional behaviours the presentation layer can switch off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub read_receipts: bool,
    pub file_uploads: bool,
    pub image_previews: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            read_receipts: true,
            file_uploads: true,
            image_previews: true,
        }
    }
}

/// Argon2id cost for sealing key pairs under the account password.
///
/// The values used at account creation are stored next to the sealed key
/// pair, so changing them only affects new accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
        }
    }
}

/// Complete configuration surface for [`crate::ChatEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Ordered list of relay peer endpoints
    pub peers: Vec<String>,
    /// Persist graph nodes to the slower on-disk cache
    pub persist_to_disk: bool,
    /// Take part in wider peer discovery
    pub peer_discovery: bool,
    pub default_room_id: String,
    pub default_room_name: String,
    pub backoff: BackoffPolicy,
    /// How long a contact search gates the loading flag
    #[serde(with = "duration_ms")]
    pub search_window: Duration,
    pub features: FeatureFlags,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            persist_to_disk: true,
            peer_discovery: false,
            default_room_id: "general".to_string(),
            default_room_name: "General Chat".to_string(),
            backoff: BackoffPolicy::default(),
            search_window: Duration::from_millis(2000),
            features: FeatureFlags::default(),
            kdf: KdfParams::default(),
        }
    }
}

impl ChatConfig {
    /// Build a configuration from process environment variables.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Keys are the unprefixed names (`PEERS`, `MAX_RETRIES`, ...) joined to
    /// [`ENV_PREFIX`]. Missing keys keep their defaults; malformed numbers are
    /// rejected rather than silently ignored.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = Self::default();

        if let Some(peers) = get("PEERS") {
            config.peers = peers
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(id) = get("DEFAULT_ROOM_ID") {
            config.default_room_id = id;
        }
        if let Some(name) = get("DEFAULT_ROOM_NAME") {
            config.default_room_name = name;
        }
        if let Some(v) = get("MAX_RETRIES") {
            config.backoff.max_attempts = parse_number("MAX_RETRIES", &v)? as u32;
        }
        if let Some(v) = get("RETRY_DELAY_MS") {
            config.backoff.retry_delay = Duration::from_millis(parse_number("RETRY_DELAY_MS", &v)?);
        }
        if let Some(v) = get("POLL_INTERVAL_MS") {
            config.backoff.poll_interval =
                Duration::from_millis(parse_number("POLL_INTERVAL_MS", &v)?);
        }
        if let Some(v) = get("SEARCH_WINDOW_MS") {
            config.search_window = Duration::from_millis(parse_number("SEARCH_WINDOW_MS", &v)?);
        }
        if let Some(v) = get("KDF_MEMORY_KIB") {
            config.kdf.memory_kib = parse_number("KDF_MEMORY_KIB", &v)? as u32;
        }
        if let Some(v) = get("KDF_ITERATIONS") {
            config.kdf.iterations = parse_number("KDF_ITERATIONS", &v)? as u32;
        }
        if let Some(v) = get("PERSIST_TO_DISK") {
            config.persist_to_disk = parse_flag(&v);
        }
        if let Some(v) = get("PEER_DISCOVERY") {
            config.peer_discovery = parse_flag(&v);
        }
        if let Some(v) = get("ENABLE_READ_RECEIPTS") {
            config.features.read_receipts = parse_flag(&v);
        }
        if let Some(v) = get("ENABLE_FILE_UPLOADS") {
            config.features.file_uploads = parse_flag(&v);
        }
        if let Some(v) = get("ENABLE_IMAGE_PREVIEWS") {
            config.features.image_previews = parse_flag(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot run with.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.backoff.max_attempts == 0 {
            return Err(ChatError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff.poll_interval.is_zero() {
            return Err(ChatError::InvalidConfig(
                "poll_interval must be non-zero".to_string(),
            ));
        }
        if self.search_window.is_zero() {
            return Err(ChatError::InvalidConfig(
                "search_window must be non-zero".to_string(),
            ));
        }
        if self.default_room_id.trim().is_empty() {
            return Err(ChatError::InvalidConfig(
                "default_room_id cannot be empty".to_string(),
            ));
        }
        if self.kdf.memory_kib < 8 || self.kdf.iterations == 0 {
            return Err(ChatError::InvalidConfig(
                "kdf needs at least 8 KiB and one iteration".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64, ChatError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ChatError::InvalidConfig(format!("{}{} is not a number: {:?}", ENV_PREFIX, name, value)))
}

/// Flags are on unless explicitly "false".
fn parse_flag(value: &str) -> bool {
    !value.trim().eq_ignore_ascii_case("false")
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
