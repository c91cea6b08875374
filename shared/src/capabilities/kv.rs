use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 512;
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvKey {
    namespace: KeyNamespace,
    key: String,
}

impl KvKey {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        let key = key.into();
        Self::validate_key(&key)?;
        Ok(Self { namespace, key })
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.namespace.prefix(), self.key)
    }

    pub fn namespace(&self) -> &KeyNamespace {
        &self.namespace
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn validate_key(key: &str) -> Result<(), KvError> {
        if key.is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(KvError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if key.trim().is_empty() {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be only whitespace".to_string(),
            });
        }

        if key.contains('\0') {
            return Err(KvError::InvalidKey {
                key: key.replace('\0', "\\0"),
                reason: "key cannot contain null bytes".to_string(),
            });
        }

        if key.chars().any(|c| c.is_control() && c != '\t') {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
                reason: "key contains invalid control characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyNamespace {
    Records,
    Drafts,
    Activity,
}

impl KeyNamespace {
    pub fn prefix(&self) -> &str {
        match self {
            KeyNamespace::Records => "records",
            KeyNamespace::Drafts => "drafts",
            KeyNamespace::Activity => "activity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvValue {
    data: Vec<u8>,
    version: u64,
}

impl KvValue {
    pub fn new(data: Vec<u8>) -> Result<Self, KvError> {
        check_size(&data)?;
        Ok(Self { data, version: 1 })
    }

    pub(crate) fn from_parts(data: Vec<u8>, version: u64) -> Self {
        Self { data, version }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, KvError> {
        serde_json::from_slice(&self.data).map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: None,
        })
    }

    pub fn update_data(&mut self, data: Vec<u8>) -> Result<(), KvError> {
        check_size(&data)?;
        self.data = data;
        self.version = self.version.saturating_add(1);
        Ok(())
    }
}

fn check_size(data: &[u8]) -> Result<(), KvError> {
    if data.len() > MAX_VALUE_SIZE {
        return Err(KvError::ValueTooLarge {
            size: data.len(),
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum KvError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage error: {message} (code: {code:?}, retryable: {retryable})")]
    Storage {
        code: StorageErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("serialization error: {message}")]
    Serialization { message: String, key: Option<String> },
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        match self {
            KvError::Storage { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub fn storage(code: StorageErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_retryable();
        Self::Storage {
            code,
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageErrorCode {
    Unknown,
    ConnectionFailed,
    Corrupted,
    DiskFull,
    PermissionDenied,
    Busy,
    Locked,
    IoError,
}

impl StorageErrorCode {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorCode::ConnectionFailed | StorageErrorCode::Busy | StorageErrorCode::Locked
        )
    }
}

/// Synchronous key/value capability, the moral equivalent of browser local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &KvKey) -> Result<Option<KvValue>, KvError>;
    fn set(&self, key: &KvKey, data: Vec<u8>) -> Result<u64, KvError>;
    fn delete(&self, key: &KvKey) -> Result<bool, KvError>;
}

/// In-process store for tests and shells without durable storage.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, KvValue>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes raw bytes without any checks; lets tests plant corrupt values.
    pub fn put_raw(&self, key: &KvKey, data: impl Into<Vec<u8>>) {
        let value = KvValue::from_parts(data.into(), 1);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.raw(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &KvKey) -> Result<Option<KvValue>, KvError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&key.raw()).cloned())
    }

    fn set(&self, key: &KvKey, data: Vec<u8>) -> Result<u64, KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get_mut(&key.raw()) {
            Some(existing) => {
                existing.update_data(data)?;
                Ok(existing.version())
            }
            None => {
                let value = KvValue::new(data)?;
                entries.insert(key.raw(), value);
                Ok(1)
            }
        }
    }

    fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(&key.raw()).is_some())
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use self::sqlite::SqliteKv;

#[cfg(not(target_arch = "wasm32"))]
mod sqlite {
    use super::{check_size, KeyValueStore, KvError, KvKey, KvValue, StorageErrorCode};
    use crate::time::now_ms;
    use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
    use std::path::Path;
    use std::sync::{Mutex, PoisonError};

    /// SQLite-backed key/value table for native shells.
    pub struct SqliteKv {
        conn: Mutex<Connection>,
    }

    impl SqliteKv {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, KvError> {
            let conn = Connection::open(path)?;
            Self::init(conn)
        }

        pub fn open_in_memory() -> Result<Self, KvError> {
            let conn = Connection::open_in_memory()?;
            Self::init(conn)
        }

        fn init(conn: Connection) -> Result<Self, KvError> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv_entries (
                    key TEXT PRIMARY KEY,
                    data BLOB NOT NULL,
                    version INTEGER NOT NULL DEFAULT 1,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
            )?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }
    }

    impl KeyValueStore for SqliteKv {
        fn get(&self, key: &KvKey) -> Result<Option<KvValue>, KvError> {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let row = conn
                .query_row(
                    "SELECT data, version FROM kv_entries WHERE key = ?1",
                    params![key.raw()],
                    |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;

            Ok(row.map(|(data, version)| {
                KvValue::from_parts(data, u64::try_from(version).unwrap_or_default())
            }))
        }

        fn set(&self, key: &KvKey, data: Vec<u8>) -> Result<u64, KvError> {
            check_size(&data)?;
            let now = i64::try_from(now_ms()).unwrap_or(i64::MAX);
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let version: i64 = conn.query_row(
                r#"
                INSERT INTO kv_entries (key, data, version, created_at, updated_at)
                VALUES (?1, ?2, 1, ?3, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    data = excluded.data,
                    version = kv_entries.version + 1,
                    updated_at = excluded.updated_at
                RETURNING version
                "#,
                params![key.raw(), data, now],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(version).unwrap_or_default())
        }

        fn delete(&self, key: &KvKey) -> Result<bool, KvError> {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            let removed = conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key.raw()])?;
            Ok(removed > 0)
        }
    }

    impl From<rusqlite::Error> for KvError {
        fn from(e: rusqlite::Error) -> Self {
            let code = match &e {
                rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                    ErrorCode::DatabaseBusy => StorageErrorCode::Busy,
                    ErrorCode::DatabaseLocked => StorageErrorCode::Locked,
                    ErrorCode::DiskFull => StorageErrorCode::DiskFull,
                    ErrorCode::PermissionDenied | ErrorCode::ReadOnly => {
                        StorageErrorCode::PermissionDenied
                    }
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                        StorageErrorCode::Corrupted
                    }
                    ErrorCode::CannotOpen => StorageErrorCode::ConnectionFailed,
                    ErrorCode::SystemIoFailure => StorageErrorCode::IoError,
                    _ => StorageErrorCode::Unknown,
                },
                _ => StorageErrorCode::Unknown,
            };
            KvError::storage(code, e.to_string())
        }
    }
}

/// A single typed JSON value stored under one fixed key.
pub struct TypedKvSlot<T> {
    key: KvKey,
    _phantom: PhantomData<T>,
}

impl<T: Serialize + DeserializeOwned> TypedKvSlot<T> {
    pub fn new(namespace: KeyNamespace, key: impl Into<String>) -> Result<Self, KvError> {
        Ok(Self {
            key: KvKey::new(namespace, key)?,
            _phantom: PhantomData,
        })
    }

    pub fn key(&self) -> &KvKey {
        &self.key
    }

    pub fn load(&self, kv: &dyn KeyValueStore) -> Result<Option<T>, KvError> {
        match kv.get(&self.key)? {
            Some(value) => value.deserialize().map(Some).map_err(|e| match e {
                KvError::Serialization { message, .. } => KvError::Serialization {
                    message,
                    key: Some(self.key.raw()),
                },
                other => other,
            }),
            None => Ok(None),
        }
    }

    pub fn save(&self, kv: &dyn KeyValueStore, value: &T) -> Result<u64, KvError> {
        let data = serde_json::to_vec(value).map_err(|e| KvError::Serialization {
            message: e.to_string(),
            key: Some(self.key.raw()),
        })?;
        kv.set(&self.key, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation_empty() {
        let result = KvKey::new(KeyNamespace::Records, "");
        assert!(matches!(result, Err(KvError::InvalidKey { .. })));
    }

    #[test]
    fn test_key_validation_whitespace() {
        assert!(KvKey::new(KeyNamespace::Records, "   ").is_err());
    }

    #[test]
    fn test_key_validation_null_byte() {
        assert!(KvKey::new(KeyNamespace::Records, "key\0value").is_err());
    }

    #[test]
    fn test_key_validation_too_long() {
        let long_key = "a".repeat(MAX_KEY_LENGTH + 1);
        assert!(KvKey::new(KeyNamespace::Records, long_key).is_err());
    }

    #[test]
    fn test_key_validation_control_chars() {
        assert!(KvKey::new(KeyNamespace::Records, "key\x01value").is_err());
    }

    #[test]
    fn test_key_namespace_prefix() {
        let key = KvKey::new(KeyNamespace::Drafts, "autoSaveData").unwrap();
        assert_eq!(key.raw(), "drafts:autoSaveData");
    }

    #[test]
    fn test_value_size_limit() {
        let large_data = vec![0u8; MAX_VALUE_SIZE + 1];
        assert!(matches!(
            KvValue::new(large_data),
            Err(KvError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn test_memory_kv_versions_writes() {
        let kv = MemoryKv::new();
        let key = KvKey::new(KeyNamespace::Drafts, "autoSaveData").unwrap();

        assert_eq!(kv.set(&key, b"true".to_vec()).unwrap(), 1);
        assert_eq!(kv.set(&key, b"false".to_vec()).unwrap(), 2);

        let value = kv.get(&key).unwrap().unwrap();
        assert_eq!(value.data(), b"false");
        assert_eq!(value.version(), 2);

        assert!(kv.delete(&key).unwrap());
        assert!(!kv.delete(&key).unwrap());
        assert!(kv.get(&key).unwrap().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(KvError::storage(StorageErrorCode::Busy, "busy").is_retryable());
        assert!(!KvError::storage(StorageErrorCode::Corrupted, "bad").is_retryable());
    }

    #[test]
    fn test_typed_slot_roundtrip_and_corruption() {
        let kv = MemoryKv::new();
        let slot: TypedKvSlot<Vec<String>> =
            TypedKvSlot::new(KeyNamespace::Records, "names").unwrap();

        assert_eq!(slot.load(&kv).unwrap(), None);
        slot.save(&kv, &vec!["a".to_string()]).unwrap();
        assert_eq!(slot.load(&kv).unwrap(), Some(vec!["a".to_string()]));

        kv.put_raw(slot.key(), "{not json");
        let err = slot.load(&kv).unwrap_err();
        assert!(matches!(
            err,
            KvError::Serialization { key: Some(ref k), .. } if k == "records:names"
        ));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_sqlite_kv_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let key = KvKey::new(KeyNamespace::Records, "vehicles").unwrap();

        {
            let kv = SqliteKv::open(&path).unwrap();
            assert_eq!(kv.set(&key, b"[]".to_vec()).unwrap(), 1);
            assert_eq!(kv.set(&key, b"[1]".to_vec()).unwrap(), 2);
        }

        let kv = SqliteKv::open(&path).unwrap();
        let value = kv.get(&key).unwrap().unwrap();
        assert_eq!(value.data(), b"[1]");
        assert_eq!(value.version(), 2);
        assert!(kv.delete(&key).unwrap());
        assert!(kv.get(&key).unwrap().is_none());
    }
}
