use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, instrument, warn};

use crate::capabilities::{KeyNamespace, KeyValueStore, TypedKvSlot};
use crate::config::DEFAULT_ACTIVITY_LOG_LIMIT;
use crate::filter::Locale;
use crate::model::UserId;
use crate::store::StoreError;
use crate::time::Clock;

pub const ACTIVITY_LOG_KEY: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    VehicleAdded,
    VehicleUpdated,
    VehicleDeleted,
    VehicleViewed,
    ExportExcel,
    ExportJson,
    WarehouseTransfer,
    StatusChange,
    Login,
    Logout,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 10] = [
        Self::VehicleAdded,
        Self::VehicleUpdated,
        Self::VehicleDeleted,
        Self::VehicleViewed,
        Self::ExportExcel,
        Self::ExportJson,
        Self::WarehouseTransfer,
        Self::StatusChange,
        Self::Login,
        Self::Logout,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VehicleAdded => "VEHICLE_ADDED",
            Self::VehicleUpdated => "VEHICLE_UPDATED",
            Self::VehicleDeleted => "VEHICLE_DELETED",
            Self::VehicleViewed => "VEHICLE_VIEWED",
            Self::ExportExcel => "EXPORT_EXCEL",
            Self::ExportJson => "EXPORT_JSON",
            Self::WarehouseTransfer => "WAREHOUSE_TRANSFER",
            Self::StatusChange => "STATUS_CHANGE",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
        }
    }

    pub const fn label(self, locale: Locale) -> &'static str {
        match locale {
            Locale::En => match self {
                Self::VehicleAdded => "Vehicle added",
                Self::VehicleUpdated => "Vehicle updated",
                Self::VehicleDeleted => "Vehicle deleted",
                Self::VehicleViewed => "Vehicle viewed",
                Self::ExportExcel => "Excel export",
                Self::ExportJson => "JSON export",
                Self::WarehouseTransfer => "Warehouse transfer",
                Self::StatusChange => "Status change",
                Self::Login => "Signed in",
                Self::Logout => "Signed out",
            },
            Locale::Ar => match self {
                Self::VehicleAdded => "إضافة مركبة",
                Self::VehicleUpdated => "تعديل مركبة",
                Self::VehicleDeleted => "حذف مركبة",
                Self::VehicleViewed => "عرض مركبة",
                Self::ExportExcel => "تصدير Excel",
                Self::ExportJson => "تصدير JSON",
                Self::WarehouseTransfer => "نقل للمستودع",
                Self::StatusChange => "تغيير الحالة",
                Self::Login => "تسجيل دخول",
                Self::Logout => "تسجيل خروج",
            },
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown activity type '{s}'"))
    }
}

/// Who performed an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    /// Display name, falling back to the sign-in email.
    pub user_name: String,
}

impl Actor {
    pub fn new(user_id: UserId, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub user_id: UserId,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only destination for activity entries.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn append(&self, entry: &ActivityEntry) -> Result<(), StoreError>;

    /// Newest first, at most `limit` entries.
    async fn recent(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError>;
}

/// Activity log kept on the device, capped at a fixed number of entries.
pub struct LocalActivityLog {
    kv: Arc<dyn KeyValueStore>,
    slot: TypedKvSlot<Vec<ActivityEntry>>,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl LocalActivityLog {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Result<Self, StoreError> {
        Self::with_capacity(kv, DEFAULT_ACTIVITY_LOG_LIMIT)
    }

    pub fn with_capacity(kv: Arc<dyn KeyValueStore>, max_entries: usize) -> Result<Self, StoreError> {
        Ok(Self {
            kv,
            slot: TypedKvSlot::new(KeyNamespace::Activity, ACTIVITY_LOG_KEY)?,
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<Vec<ActivityEntry>, StoreError> {
        Ok(self.slot.load(self.kv.as_ref())?.unwrap_or_default())
    }
}

#[async_trait]
impl ActivitySink for LocalActivityLog {
    async fn append(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.push(entry.clone());
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(..overflow);
        }
        self.slot.save(self.kv.as_ref(), &entries)?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
        Ok(self.load()?.into_iter().rev().take(limit).collect())
    }
}

#[cfg(feature = "remote")]
pub use self::remote::RemoteActivityLog;

#[cfg(feature = "remote")]
mod remote {
    use super::{ActivityEntry, ActivityKind, ActivitySink};
    use crate::capabilities::RestClient;
    use crate::model::UserId;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};
    use std::sync::Arc;
    use tracing::instrument;

    pub const ACTIVITY_TABLE: &str = "/rest/v1/activity_logs";

    #[derive(Serialize, Deserialize)]
    struct Row {
        id: String,
        #[serde(rename = "type")]
        kind: ActivityKind,
        #[serde(default)]
        details: Map<String, Value>,
        user_id: UserId,
        user_name: String,
        timestamp: DateTime<Utc>,
    }

    impl From<&ActivityEntry> for Row {
        fn from(entry: &ActivityEntry) -> Self {
            Self {
                id: entry.id.clone(),
                kind: entry.kind,
                details: entry.details.clone(),
                user_id: entry.user_id.clone(),
                user_name: entry.user_name.clone(),
                timestamp: entry.timestamp,
            }
        }
    }

    impl From<Row> for ActivityEntry {
        fn from(row: Row) -> Self {
            Self {
                id: row.id,
                kind: row.kind,
                details: row.details,
                user_id: row.user_id,
                user_name: row.user_name,
                timestamp: row.timestamp,
            }
        }
    }

    /// Activity rows in a PostgREST table. Reads rely on the server's row-level policy
    /// to scope rows to the signed-in user.
    pub struct RemoteActivityLog {
        client: Arc<RestClient>,
    }

    impl RemoteActivityLog {
        pub fn new(client: Arc<RestClient>) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl ActivitySink for RemoteActivityLog {
        #[instrument(name = "remote_activity_append", skip(self, entry), fields(kind = %entry.kind))]
        async fn append(&self, entry: &ActivityEntry) -> Result<(), StoreError> {
            self.client
                .post_json(ACTIVITY_TABLE, &[], &Row::from(entry), Some("return=minimal"))
                .await?;
            Ok(())
        }

        #[instrument(name = "remote_activity_recent", skip(self))]
        async fn recent(&self, limit: usize) -> Result<Vec<ActivityEntry>, StoreError> {
            let rows: Vec<Row> = self
                .client
                .get_json(
                    ACTIVITY_TABLE,
                    &[
                        ("order", "timestamp.desc".to_string()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await?;
            Ok(rows.into_iter().map(ActivityEntry::from).collect())
        }
    }
}

/// Best-effort activity logging on behalf of the signed-in user.
///
/// A failed write is logged and dropped. It never fails or rolls back the action that
/// triggered it.
pub struct ActivityRecorder {
    sink: Arc<dyn ActivitySink>,
    clock: Arc<dyn Clock>,
    actor: Mutex<Option<Actor>>,
}

impl fmt::Debug for ActivityRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityRecorder")
            .field("signed_in", &self.actor().is_some())
            .finish_non_exhaustive()
    }
}

impl ActivityRecorder {
    pub fn new(sink: Arc<dyn ActivitySink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            actor: Mutex::new(None),
        }
    }

    pub fn actor(&self) -> Option<Actor> {
        self.actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn sign_in(&self, actor: Actor) {
        *self.actor.lock().unwrap_or_else(PoisonError::into_inner) = Some(actor);
        self.log(ActivityKind::Login, Value::Null).await;
    }

    pub async fn sign_out(&self) {
        self.log(ActivityKind::Logout, Value::Null).await;
        *self.actor.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Appends one entry. Returns whether it was written; `false` without a signed-in
    /// user or when the sink failed.
    #[instrument(skip(self, details))]
    pub async fn log(&self, kind: ActivityKind, details: Value) -> bool {
        let Some(actor) = self.actor() else {
            debug!("no signed-in user, activity not logged");
            return false;
        };

        let entry = ActivityEntry {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            details: into_details(details),
            user_id: actor.user_id,
            user_name: actor.user_name,
            timestamp: self.clock.now(),
        };

        match self.sink.append(&entry).await {
            Ok(()) => {
                debug!("activity logged");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to log activity");
                false
            }
        }
    }

    /// Newest-first entries for the activity page; empty when the log can't be read.
    pub async fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        if self.actor().is_none() {
            return Vec::new();
        }
        match self.sink.recent(limit).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read activity log");
                Vec::new()
            }
        }
    }
}

fn into_details(details: Value) -> Map<String, Value> {
    match details {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
