use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    HttpError, KeyNamespace, KeyValueStore, KvError, KvKey, TypedKvSlot,
};
use crate::model::{RecordId, VehicleRecord};

pub const RECORDS_KEY: &str = "vehicles";
pub const SNAPSHOT_KEY: &str = "autoSaveData";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("stored record list is corrupted: {0}")]
    Corrupted(String),

    #[error("no signed-in user; the remote store is keyed by user")]
    NotSignedIn,

    #[error("backend misconfigured: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Http(#[from] HttpError),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Kv(e) => e.is_retryable(),
            StoreError::Http(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Persistence for the full list of vehicle records.
///
/// Implementations own the persisted list; callers read it, change it in memory and
/// write the whole list back. There is no concurrency token: the last write wins.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn backend_tag(&self) -> &'static str;

    /// The current list. A store that has never been written returns an empty list.
    async fn list(&self) -> Result<Vec<VehicleRecord>, StoreError>;

    async fn save(&self, records: &[VehicleRecord]) -> Result<(), StoreError>;
}

/// Single slot holding the auto-save snapshot as raw JSON text, independent of the
/// record list. Parsing is left to the caller so a corrupt blob can be discarded there.
pub trait SnapshotStore: Send + Sync {
    fn get(&self) -> Result<Option<String>, StoreError>;
    fn set(&self, json: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<bool, StoreError>;
}

/// Snapshot slot on top of any key/value store.
pub struct KvSnapshotSlot {
    kv: Arc<dyn KeyValueStore>,
    key: KvKey,
}

impl KvSnapshotSlot {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        Ok(Self {
            kv,
            key: KvKey::new(KeyNamespace::Drafts, SNAPSHOT_KEY)?,
        })
    }

    pub fn key(&self) -> &KvKey {
        &self.key
    }
}

impl SnapshotStore for KvSnapshotSlot {
    fn get(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .kv
            .get(&self.key)?
            .map(|value| String::from_utf8_lossy(value.data()).into_owned()))
    }

    fn set(&self, json: &str) -> Result<(), StoreError> {
        self.kv.set(&self.key, json.as_bytes().to_vec())?;
        Ok(())
    }

    fn clear(&self) -> Result<bool, StoreError> {
        Ok(self.kv.delete(&self.key)?)
    }
}

/// Record list kept as one JSON array in device-local key/value storage.
pub struct LocalRecordStore {
    kv: Arc<dyn KeyValueStore>,
    slot: TypedKvSlot<Vec<VehicleRecord>>,
}

impl LocalRecordStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        Ok(Self {
            kv,
            slot: TypedKvSlot::new(KeyNamespace::Records, RECORDS_KEY)?,
        })
    }
}

#[async_trait]
impl RecordStore for LocalRecordStore {
    fn backend_tag(&self) -> &'static str {
        "local"
    }

    async fn list(&self) -> Result<Vec<VehicleRecord>, StoreError> {
        match self.slot.load(self.kv.as_ref()) {
            Ok(Some(records)) => Ok(records),
            Ok(None) => {
                debug!("no stored record list, starting empty");
                Ok(Vec::new())
            }
            Err(KvError::Serialization { message, .. }) => {
                warn!(error = %message, "stored record list failed to parse");
                Err(StoreError::Corrupted(message))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[VehicleRecord]) -> Result<(), StoreError> {
        let version = self.slot.save(self.kv.as_ref(), &records.to_vec())?;
        debug!(count = records.len(), version, "record list saved locally");
        Ok(())
    }
}

#[cfg(feature = "remote")]
pub use self::remote::RemoteRecordStore;

#[cfg(feature = "remote")]
mod remote {
    use super::{RecordStore, StoreError};
    use crate::capabilities::RestClient;
    use crate::model::{RecordId, UserId, VehicleRecord};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use tracing::{info, instrument, warn};

    pub const VEHICLES_TABLE: &str = "/rest/v1/vehicles";
    const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=minimal";

    #[derive(Serialize)]
    struct RowOut<'a> {
        id: &'a RecordId,
        user_id: &'a UserId,
        data: &'a VehicleRecord,
    }

    #[derive(Deserialize)]
    struct RowIn {
        id: Option<String>,
        data: serde_json::Value,
    }

    /// Record list kept as one row per record in a PostgREST table, scoped to a user.
    pub struct RemoteRecordStore {
        client: Arc<RestClient>,
        user_id: UserId,
    }

    impl RemoteRecordStore {
        pub fn new(client: Arc<RestClient>, user_id: UserId) -> Self {
            Self { client, user_id }
        }

        fn user_filter(&self) -> (&'static str, String) {
            ("user_id", format!("eq.{}", self.user_id))
        }
    }

    /// PostgREST `in.(...)` list with every member double-quoted.
    pub(crate) fn quoted_in_list(ids: &[&RecordId]) -> String {
        let quoted: Vec<String> = ids
            .iter()
            .map(|id| format!("\"{}\"", id.as_str().replace('\\', "\\\\").replace('"', "\\\"")))
            .collect();
        format!("({})", quoted.join(","))
    }

    #[async_trait]
    impl RecordStore for RemoteRecordStore {
        fn backend_tag(&self) -> &'static str {
            "remote"
        }

        #[instrument(name = "remote_records_list", skip(self), fields(user = %self.user_id))]
        async fn list(&self) -> Result<Vec<VehicleRecord>, StoreError> {
            let rows: Vec<RowIn> = self
                .client
                .get_json(
                    VEHICLES_TABLE,
                    &[
                        self.user_filter(),
                        ("select", "id,data".to_string()),
                        ("order", "created_at.desc".to_string()),
                    ],
                )
                .await?;

            let total = rows.len();
            let records: Vec<VehicleRecord> = rows
                .into_iter()
                .filter_map(|row| match serde_json::from_value(row.data) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(row_id = ?row.id, error = %e, "skipping unreadable remote row");
                        None
                    }
                })
                .collect();
            info!(total, loaded = records.len(), "remote records fetched");
            Ok(records)
        }

        #[instrument(name = "remote_records_save", skip(self, records), fields(user = %self.user_id, count = records.len()))]
        async fn save(&self, records: &[VehicleRecord]) -> Result<(), StoreError> {
            if !records.is_empty() {
                let rows: Vec<RowOut<'_>> = records
                    .iter()
                    .map(|record| RowOut {
                        id: &record.id,
                        user_id: &self.user_id,
                        data: record,
                    })
                    .collect();
                self.client
                    .post_json(
                        VEHICLES_TABLE,
                        &[("on_conflict", "id".to_string())],
                        &rows,
                        Some(UPSERT_PREFER),
                    )
                    .await?;
            }

            let mut query = vec![self.user_filter()];
            if !records.is_empty() {
                let ids: Vec<&RecordId> = records.iter().map(|r| &r.id).collect();
                query.push(("id", format!("not.in.{}", quoted_in_list(&ids))));
            }
            self.client.delete(VEHICLES_TABLE, &query).await?;
            Ok(())
        }
    }
}

/// Everything the app core persists through, chosen once at startup.
pub struct Backend {
    pub records: Arc<dyn RecordStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub activity: Arc<dyn crate::activity::ActivitySink>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("records", &self.records.backend_tag())
            .finish_non_exhaustive()
    }
}

impl Backend {
    /// Local backend over the given key/value store.
    pub fn local(kv: Arc<dyn KeyValueStore>, activity_limit: usize) -> Result<Self, StoreError> {
        Ok(Self {
            records: Arc::new(LocalRecordStore::new(kv.clone())?),
            snapshots: Arc::new(KvSnapshotSlot::new(kv.clone())?),
            activity: Arc::new(crate::activity::LocalActivityLog::with_capacity(
                kv,
                activity_limit,
            )?),
        })
    }
}

/// Builds the configured backend. The auto-save slot always stays on the device, also
/// when records live remotely.
#[instrument(skip(config))]
pub fn open_backend(config: &crate::config::AppConfig) -> Result<Backend, StoreError> {
    let kv = open_local_kv(&config.backend)?;
    match config.backend.kind {
        crate::config::BackendKind::Local => {
            info!(backend = "local", "opening record store");
            Backend::local(kv, config.activity.max_local_entries)
        }
        #[cfg(feature = "remote")]
        crate::config::BackendKind::Remote => {
            use crate::capabilities::RestClient;

            let user = config.user_id.as_ref().ok_or(StoreError::NotSignedIn)?;
            let remote = config.backend.remote.as_ref().ok_or_else(|| {
                StoreError::Misconfigured("remote backend selected without remote settings".into())
            })?;
            let base = remote.validated_url()?;
            let client = Arc::new(RestClient::new(
                base,
                remote.api_key.clone(),
                remote.retry.clone(),
            ));
            info!(backend = "remote", host = %client.base().host(), "opening record store");
            Ok(Backend {
                records: Arc::new(RemoteRecordStore::new(client.clone(), user.clone())),
                snapshots: Arc::new(KvSnapshotSlot::new(kv)?),
                activity: Arc::new(crate::activity::RemoteActivityLog::new(client)),
            })
        }
        #[cfg(not(feature = "remote"))]
        crate::config::BackendKind::Remote => {
            Err(StoreError::Misconfigured(
                "built without the `remote` feature".to_string(),
            ))
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn open_local_kv(
    config: &crate::config::BackendConfig,
) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    match &config.db_path {
        Some(path) => {
            debug!(path = %path.display(), "opening sqlite key/value store");
            Ok(Arc::new(crate::capabilities::SqliteKv::open(path)?))
        }
        None => Ok(Arc::new(crate::capabilities::MemoryKv::new())),
    }
}

#[cfg(target_arch = "wasm32")]
fn open_local_kv(
    _config: &crate::config::BackendConfig,
) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    Ok(Arc::new(crate::capabilities::MemoryKv::new()))
}
