use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::activity::{ActivityKind, ActivityRecorder};
use crate::model::{FieldValue, FormFields, KnownField, OperationStatus, RecordId, VehicleRecord};
use crate::store::{RecordStore, StoreError};
use crate::time::Clock;

/// Record lifecycle on top of a [`RecordStore`].
///
/// Each mutation reads the full list, changes it and writes it back. Mutations through
/// one service are serialized; writers in other processes still race (last write wins).
/// Every successful mutation is followed by a best-effort activity entry.
pub struct VehicleService {
    store: Arc<dyn RecordStore>,
    activity: Arc<ActivityRecorder>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for VehicleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VehicleService")
            .field("store", &self.store.backend_tag())
            .finish_non_exhaustive()
    }
}

/// `"Toyota Camry 2020"`, skipping missing parts.
pub fn vehicle_name(record: &VehicleRecord) -> String {
    [KnownField::Make, KnownField::Model, KnownField::Year]
        .into_iter()
        .filter_map(|field| record.known(field))
        .map(FieldValue::to_display_string)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe(record: &VehicleRecord) -> serde_json::Value {
    json!({
        "vehicleId": record.id,
        "vehicleName": vehicle_name(record),
        "contractNo": record.fields.text(KnownField::ContractNo.as_str()),
    })
}

impl VehicleService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        activity: Arc<ActivityRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            activity,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn activity(&self) -> &ActivityRecorder {
        &self.activity
    }

    pub async fn list(&self) -> Result<Vec<VehicleRecord>, StoreError> {
        self.store.list().await
    }

    pub async fn get(&self, id: &RecordId) -> Result<VehicleRecord, StoreError> {
        self.store
            .list()
            .await?
            .into_iter()
            .find(|record| &record.id == id)
            .ok_or_else(|| StoreError::RecordNotFound(id.clone()))
    }

    /// Loads a record for editing and notes the view.
    pub async fn open(&self, id: &RecordId) -> Result<VehicleRecord, StoreError> {
        let record = self.get(id).await?;
        self.activity
            .log(ActivityKind::VehicleViewed, describe(&record))
            .await;
        Ok(record)
    }

    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    pub async fn create(&self, fields: FormFields) -> Result<VehicleRecord, StoreError> {
        let record = {
            let _guard = self.write_lock.lock().await;
            let mut records = self.store.list().await?;
            let record = VehicleRecord::new(RecordId::generate(), fields, self.clock.now());
            records.push(record.clone());
            self.store.save(&records).await?;
            record
        };
        info!(id = %record.id, "vehicle created");
        self.activity
            .log(ActivityKind::VehicleAdded, describe(&record))
            .await;
        Ok(record)
    }

    /// Replaces the free-form fields of an existing record. `id` and `createdAt` stay.
    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    pub async fn update(
        &self,
        id: &RecordId,
        fields: FormFields,
    ) -> Result<VehicleRecord, StoreError> {
        let fields = fields.without_reserved();
        let record = self
            .modify(id, |record| {
                record.fields = fields;
            })
            .await?;
        info!(id = %record.id, "vehicle updated");
        self.activity
            .log(ActivityKind::VehicleUpdated, describe(&record))
            .await;
        Ok(record)
    }

    /// The form's Save button: a new record when nothing is loaded, otherwise an update
    /// of the loaded one.
    pub async fn save_form(
        &self,
        current: Option<&RecordId>,
        fields: FormFields,
    ) -> Result<VehicleRecord, StoreError> {
        match current {
            Some(id) => self.update(id, fields).await,
            None => self.create(fields).await,
        }
    }

    /// Returns `false` when no record had that id.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &RecordId) -> Result<bool, StoreError> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let mut records = self.store.list().await?;
            let Some(index) = records.iter().position(|record| &record.id == id) else {
                return Ok(false);
            };
            let removed = records.remove(index);
            self.store.save(&records).await?;
            removed
        };
        info!(id = %id, "vehicle deleted");
        self.activity
            .log(ActivityKind::VehicleDeleted, describe(&removed))
            .await;
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn transfer_to_warehouse(
        &self,
        id: &RecordId,
        warehouse_id: &str,
        warehouse_name: &str,
    ) -> Result<VehicleRecord, StoreError> {
        let record = self
            .modify(id, |record| {
                record
                    .fields
                    .insert(KnownField::Warehouse.as_str(), warehouse_id);
                record
                    .fields
                    .insert(KnownField::WarehouseName.as_str(), warehouse_name);
            })
            .await?;
        self.activity
            .log(
                ActivityKind::WarehouseTransfer,
                json!({ "vehicleId": id, "warehouse": warehouse_name }),
            )
            .await;
        Ok(record)
    }

    #[instrument(skip(self))]
    pub async fn update_operation_status(
        &self,
        id: &RecordId,
        status: OperationStatus,
    ) -> Result<VehicleRecord, StoreError> {
        let mut old_status = None;
        let record = self
            .modify(id, |record| {
                old_status = record
                    .fields
                    .insert(KnownField::OperationStatus.as_str(), status.as_str())
                    .map(|old| old.to_display_string());
            })
            .await?;
        self.activity
            .log(
                ActivityKind::StatusChange,
                json!({
                    "vehicleId": id,
                    "vehicleName": vehicle_name(&record),
                    "oldStatus": old_status,
                    "newStatus": status.as_str(),
                }),
            )
            .await;
        Ok(record)
    }

    async fn modify<F>(&self, id: &RecordId, change: F) -> Result<VehicleRecord, StoreError>
    where
        F: FnOnce(&mut VehicleRecord) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut records = self.store.list().await?;
        let record = records
            .iter_mut()
            .find(|record| &record.id == id)
            .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
        change(record);
        record.updated_at = Some(self.clock.now());
        let updated = record.clone();
        self.store.save(&records).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{Actor, LocalActivityLog};
    use crate::capabilities::{KeyValueStore, MemoryKv};
    use crate::model::UserId;
    use crate::store::LocalRecordStore;
    use crate::time::ManualClock;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        service: VehicleService,
        clock: Arc<ManualClock>,
        activity: Arc<ActivityRecorder>,
    }

    async fn fixture() -> Fixture {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap(),
        ));
        let activity = Arc::new(ActivityRecorder::new(
            Arc::new(LocalActivityLog::new(kv.clone()).unwrap()),
            clock.clone(),
        ));
        activity
            .sign_in(Actor::new(UserId::new("u-1"), "Omar"))
            .await;
        let service = VehicleService::new(
            Arc::new(LocalRecordStore::new(kv).unwrap()),
            activity.clone(),
            clock.clone(),
        );
        Fixture {
            service,
            clock,
            activity,
        }
    }

    fn camry() -> FormFields {
        FormFields::new()
            .with("make", "Toyota")
            .with("model", "Camry")
            .with("year", 2020)
            .with("contractNo", "C-77")
    }

    #[test]
    fn test_vehicle_name_skips_missing_parts() {
        let record = VehicleRecord::new(
            RecordId::new("a"),
            FormFields::new().with("make", "Kia").with("year", 2019),
            Utc::now(),
        );
        assert_eq!(vehicle_name(&record), "Kia 2019");
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let f = fixture().await;
        let record = f
            .service
            .create(camry().with("id", "forged").with("createdAt", "1990-01-01"))
            .await
            .unwrap();

        assert_ne!(record.id.as_str(), "forged");
        assert_eq!(record.created_at, Some(f.clock.now()));
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(f.service.list().await.unwrap(), vec![record.clone()]);

        let log = f.activity.recent(1).await;
        assert_eq!(log[0].kind, ActivityKind::VehicleAdded);
        assert_eq!(log[0].details["vehicleName"], "Toyota Camry 2020");
        assert_eq!(log[0].details["contractNo"], "C-77");
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let f = fixture().await;
        let created = f.service.create(camry()).await.unwrap();
        f.clock.advance(Duration::hours(3));

        let updated = f
            .service
            .save_form(Some(&created.id), camry().with("color", "White"))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.updated_at, Some(f.clock.now()));
        assert_eq!(updated.fields.text("color"), Some("White"));
        assert_eq!(f.service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let f = fixture().await;
        let missing = RecordId::new("nope");
        assert_eq!(
            f.service.update(&missing, camry()).await,
            Err(StoreError::RecordNotFound(missing.clone()))
        );
        assert!(matches!(
            f.service.get(&missing).await,
            Err(StoreError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let f = fixture().await;
        let created = f.service.create(camry()).await.unwrap();
        assert!(f.service.delete(&created.id).await.unwrap());
        assert!(!f.service.delete(&created.id).await.unwrap());
        assert!(f.service.list().await.unwrap().is_empty());
        assert_eq!(
            f.activity.recent(1).await[0].kind,
            ActivityKind::VehicleDeleted
        );
    }

    #[tokio::test]
    async fn test_transfer_and_status_change() {
        let f = fixture().await;
        let created = f.service.create(camry()).await.unwrap();

        let moved = f
            .service
            .transfer_to_warehouse(&created.id, "wh-2", "North Yard")
            .await
            .unwrap();
        assert_eq!(moved.fields.text("warehouse"), Some("wh-2"));
        assert_eq!(moved.fields.text("warehouseName"), Some("North Yard"));

        f.service
            .update_operation_status(&created.id, OperationStatus::Working)
            .await
            .unwrap();
        let changed = f
            .service
            .update_operation_status(&created.id, OperationStatus::NeedsMaintenance)
            .await
            .unwrap();
        assert_eq!(changed.fields.text("operationStatus"), Some("needs_maintenance"));

        let last = &f.activity.recent(1).await[0];
        assert_eq!(last.kind, ActivityKind::StatusChange);
        assert_eq!(last.details["oldStatus"], "working");
        assert_eq!(last.details["newStatus"], "needs_maintenance");
    }
}
