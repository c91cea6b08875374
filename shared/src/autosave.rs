use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AutoSaveConfig;
use crate::model::{FormFields, RecordId};
use crate::scheduler::Debouncer;
use crate::store::SnapshotStore;
use crate::time::Clock;

/// In-progress form contents as written to the auto-save slot:
/// `{ ...fields, vehicleId, savedAt }`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveSnapshot {
    #[serde(flatten)]
    pub fields: FormFields,
    #[serde(default)]
    pub vehicle_id: Option<RecordId>,
    pub saved_at: DateTime<Utc>,
}

impl fmt::Debug for AutoSaveSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSaveSnapshot")
            .field("field_count", &self.fields.len())
            .field("vehicle_id", &self.vehicle_id)
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

impl AutoSaveSnapshot {
    pub fn is_expired(&self, now: DateTime<Utc>, expiry: chrono::Duration) -> bool {
        now - self.saved_at >= expiry
    }
}

/// Save indicator next to the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Idle,
    Pending,
    Saved,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Nothing stored.
    Nothing,
    /// Unreadable snapshot, discarded.
    Corrupt,
    /// Snapshot too old, discarded.
    Expired,
    /// User said no, discarded.
    Declined,
    Restored {
        fields: FormFields,
        record_id: Option<RecordId>,
    },
}

struct State {
    current_record: Option<RecordId>,
    pending: Option<FormFields>,
    status: SaveStatus,
    debouncer: Debouncer,
}

struct Inner {
    config: AutoSaveConfig,
    slot: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    writes: AtomicU64,
}

/// Debounced snapshots of the form being edited, with expiry-based recovery.
#[derive(Clone)]
pub struct AutoSaveController {
    inner: Arc<Inner>,
}

impl fmt::Debug for AutoSaveController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("AutoSaveController")
            .field("current_record", &state.current_record)
            .field("status", &state.status)
            .field("pending", &state.debouncer.is_pending())
            .finish()
    }
}

impl AutoSaveController {
    pub fn new(config: AutoSaveConfig, slot: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        let debouncer = Debouncer::new(Duration::from_millis(config.debounce_ms));
        Self {
            inner: Arc::new(Inner {
                config,
                slot,
                clock,
                state: Mutex::new(State {
                    current_record: None,
                    pending: None,
                    status: SaveStatus::Idle,
                    debouncer,
                }),
                writes: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SaveStatus {
        self.lock().status
    }

    pub fn current_record(&self) -> Option<RecordId> {
        self.lock().current_record.clone()
    }

    /// Record that subsequent snapshots belong to; `None` for a new, unsaved form.
    pub fn set_current_record(&self, id: Option<RecordId>) {
        self.lock().current_record = id;
    }

    /// Number of snapshots written so far.
    pub fn snapshot_writes(&self) -> u64 {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Notes the complete current field set and restarts the quiet period.
    pub fn form_changed(&self, fields: FormFields) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let scheduled = {
            let mut state = self.lock();
            state.pending = Some(fields);
            state.status = SaveStatus::Pending;
            state.debouncer.schedule(async move {
                if let Some(inner) = weak.upgrade() {
                    write_pending(&inner);
                }
            })
        };
        if let Err(e) = scheduled {
            debug!(error = %e, "writing auto-save snapshot immediately");
            write_pending(&self.inner);
        }
    }

    /// Writes any pending change now instead of waiting out the quiet period.
    pub fn flush(&self) {
        self.lock().debouncer.cancel();
        write_pending(&self.inner);
    }

    /// Drops the pending change and empties the slot. Used once the form is saved for
    /// real, discarded, or replaced by another record.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.debouncer.cancel();
            state.pending = None;
            state.status = SaveStatus::Idle;
        }
        if let Err(e) = self.inner.slot.clear() {
            warn!(error = %e, "failed to clear auto-save snapshot");
        }
    }

    /// Looks for a snapshot from an earlier session. A fresh one is offered to
    /// `confirm`; corrupt, expired and declined snapshots are discarded. Never fails.
    pub fn recover<F>(&self, confirm: F) -> RecoveryOutcome
    where
        F: FnOnce(&AutoSaveSnapshot) -> bool,
    {
        let raw = match self.inner.slot.get() {
            Ok(Some(raw)) => raw,
            Ok(None) => return RecoveryOutcome::Nothing,
            Err(e) => {
                warn!(error = %e, "auto-save slot unreadable, starting with an empty form");
                return RecoveryOutcome::Nothing;
            }
        };

        let snapshot: AutoSaveSnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "discarding corrupt auto-save snapshot");
                self.discard();
                return RecoveryOutcome::Corrupt;
            }
        };

        let now = self.inner.clock.now();
        if snapshot.is_expired(now, self.inner.config.expiry()) {
            info!(saved_at = %snapshot.saved_at, "discarding expired auto-save snapshot");
            self.discard();
            return RecoveryOutcome::Expired;
        }

        if !confirm(&snapshot) {
            debug!("auto-save recovery declined");
            self.discard();
            return RecoveryOutcome::Declined;
        }

        info!(
            fields = snapshot.fields.len(),
            record = ?snapshot.vehicle_id,
            "restoring auto-saved form"
        );
        self.set_current_record(snapshot.vehicle_id.clone());
        RecoveryOutcome::Restored {
            fields: snapshot.fields,
            record_id: snapshot.vehicle_id,
        }
    }

    fn discard(&self) {
        if let Err(e) = self.inner.slot.clear() {
            warn!(error = %e, "failed to discard auto-save snapshot");
        }
    }
}

fn write_pending(inner: &Inner) {
    let (fields, vehicle_id) = {
        let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.pending.take() {
            Some(fields) => (fields, state.current_record.clone()),
            None => return,
        }
    };

    let snapshot = AutoSaveSnapshot {
        fields: fields.without_reserved(),
        vehicle_id,
        saved_at: inner.clock.now(),
    };

    let result = serde_json::to_string(&snapshot)
        .map_err(|e| e.to_string())
        .and_then(|json| inner.slot.set(&json).map_err(|e| e.to_string()));

    let status = match result {
        Ok(()) => {
            inner.writes.fetch_add(1, Ordering::SeqCst);
            debug!(fields = snapshot.fields.len(), "auto-save snapshot written");
            SaveStatus::Saved
        }
        Err(e) => {
            warn!(error = %e, "auto-save snapshot write failed");
            SaveStatus::Failed
        }
    };

    let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
    // A change that arrived during the write keeps the indicator at Pending.
    if state.pending.is_none() {
        state.status = status;
    }
}
