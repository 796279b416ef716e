//! Persistent storage using redb.
//!
//! This module provides ACID-compliant storage for:
//! - The local replica of the graph (disk cache, replayed on start)
//! - Session recall artifacts (cleared on logout)
//!
//! Next to the database lives `device.key`, a random 32-byte key readable only
//! by the owner. Recall artifacts are sealed with it before they reach redb.

use crate::error::ChatError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Device-local key file, created next to the database
pub const DEVICE_KEY_FILE: &str = "device.key";
const DEVICE_KEY_LEN: usize = 32;

// Table definitions
const GRAPH_NODES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("graph_nodes");
const SESSION_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("session");

/// Storage layer using redb for ACID-compliant persistence
#[derive(Clone)]
pub struct Storage {
    db: Arc<RwLock<Database>>,
    dir: PathBuf,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// Creates the parent directory and all tables if they don't exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(GRAPH_NODES_TABLE)?;
            let _ = write_txn.open_table(SESSION_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            dir,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Graph Node Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a graph node under its `/`-joined path.
    ///
    /// Tombstones are saved as JSON `null` so they survive a restart.
    pub fn save_node(&self, path: &str, value: &Value) -> Result<(), ChatError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(GRAPH_NODES_TABLE)?;
            let data = serde_json::to_vec(value)?;
            table.insert(path, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load_node(&self, path: &str) -> Result<Option<Value>, ChatError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(GRAPH_NODES_TABLE)?;

        match table.get(path)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Load every cached node, ordered by path.
    pub fn list_nodes(&self) -> Result<Vec<(String, Value)>, ChatError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(GRAPH_NODES_TABLE)?;

        let mut nodes = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let node: Value = serde_json::from_slice(value.value())?;
            nodes.push((key.value().to_string(), node));
        }
        Ok(nodes)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Session Operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Save a recall artifact under `key`, replacing any previous one.
    pub fn save_session(&self, key: &str, data: &[u8]) -> Result<(), ChatError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSION_TABLE)?;
            table.insert(key, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load_session(&self, key: &str) -> Result<Option<Vec<u8>>, ChatError> {
        let db = self.db.read();
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SESSION_TABLE)?;

        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Remove every recall artifact. Returns how many were removed.
    pub fn clear_sessions(&self) -> Result<usize, ChatError> {
        let db = self.db.read();
        let write_txn = db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(SESSION_TABLE)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in &keys {
                table.remove(key.as_str())?;
            }
            keys.len()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Device Key
    // ═══════════════════════════════════════════════════════════════════════

    /// Load the device-local key, creating it on first use.
    pub fn device_key(&self) -> Result<[u8; DEVICE_KEY_LEN], ChatError> {
        let path = self.dir.join(DEVICE_KEY_FILE);
        if path.exists() {
            let encoded = fs::read_to_string(&path)?;
            let decoded = BASE64
                .decode(encoded.trim())
                .map_err(|e| ChatError::Storage(format!("unreadable device key: {}", e)))?;
            return <[u8; DEVICE_KEY_LEN]>::try_from(decoded.as_slice()).map_err(|_| {
                ChatError::Storage(format!("device key must be {} bytes", DEVICE_KEY_LEN))
            });
        }

        let key = crate::crypto::SecretCipher::generate_key();
        write_restricted(&path, BASE64.encode(key).as_bytes())?;
        Ok(key)
    }
}

/// Create `path` readable and writable by the owner only.
fn write_restricted(path: &Path, data: &[u8]) -> Result<(), ChatError> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");
        let storage = Storage::new(&db_path).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_storage_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/path/to/test.redb");
        let storage = Storage::new(&db_path);
        assert!(storage.is_ok());
        assert!(db_path.exists());
    }

    #[test]
    fn test_save_and_load_node() {
        let (storage, _temp) = create_test_storage();

        let value = json!({"pub": "abc", "alias": "alice"});
        storage.save_node("~abc", &value).unwrap();

        assert_eq!(storage.load_node("~abc").unwrap(), Some(value));
        assert_eq!(storage.load_node("~missing").unwrap(), None);
    }

    #[test]
    fn test_tombstone_is_persisted() {
        let (storage, _temp) = create_test_storage();

        storage.save_node("users/alice", &json!({"username": "alice"})).unwrap();
        storage.save_node("users/alice", &Value::Null).unwrap();

        assert_eq!(storage.load_node("users/alice").unwrap(), Some(Value::Null));
    }

    #[test]
    fn test_list_nodes_sorted_by_path() {
        let (storage, _temp) = create_test_storage();

        storage.save_node("users/bob", &json!({"username": "bob"})).unwrap();
        storage.save_node("aliases/bob", &json!({"username": "bob"})).unwrap();

        let nodes = storage.list_nodes().unwrap();
        let paths: Vec<&str> = nodes.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["aliases/bob", "users/bob"]);
    }

    #[test]
    fn test_nodes_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.redb");

        {
            let storage = Storage::new(&db_path).unwrap();
            storage.save_node("~abc", &json!({"alias": "alice"})).unwrap();
        }

        let storage = Storage::new(&db_path).unwrap();
        assert_eq!(
            storage.load_node("~abc").unwrap(),
            Some(json!({"alias": "alice"}))
        );
    }

    #[test]
    fn test_session_save_load_clear() {
        let (storage, _temp) = create_test_storage();

        assert!(storage.load_session("recall").unwrap().is_none());

        storage.save_session("recall", b"artifact").unwrap();
        assert_eq!(storage.load_session("recall").unwrap(), Some(b"artifact".to_vec()));

        assert_eq!(storage.clear_sessions().unwrap(), 1);
        assert!(storage.load_session("recall").unwrap().is_none());
        assert_eq!(storage.clear_sessions().unwrap(), 0);
    }

    #[test]
    fn test_device_key_is_created_once() {
        let (storage, temp) = create_test_storage();

        let key = storage.device_key().unwrap();
        assert_eq!(storage.device_key().unwrap(), key);

        let reopened = Storage::new(temp.path().join("other.redb")).unwrap();
        assert_eq!(reopened.device_key().unwrap(), key);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(temp.path().join(DEVICE_KEY_FILE))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
