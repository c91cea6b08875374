mod http;
mod kv;

pub use self::http::{HttpError, RetryPolicy, ValidatedUrl};
pub use self::kv::{
    KeyNamespace, KeyValueStore, KvError, KvKey, KvValue, MemoryKv, StorageErrorCode,
    TypedKvSlot,
};

#[cfg(feature = "remote")]
pub use self::http::RestClient;

#[cfg(not(target_arch = "wasm32"))]
pub use self::kv::SqliteKv;
