use chrono::Datelike;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::activity::{ActivityKind, ActivityRecorder, Actor};
use crate::autosave::{AutoSaveController, AutoSaveSnapshot, RecoveryOutcome};
use crate::config::AppConfig;
use crate::export::{export_records_json, export_rows};
use crate::filter::{FilterManager, Locale};
use crate::model::{generate_form_number, FormFields, KnownField, OperationStatus, RecordId, VehicleRecord};
use crate::notify::{Notification, Notifier};
use crate::store::{open_backend, Backend};
use crate::time::{Clock, SystemClock};
use crate::vehicles::VehicleService;
use crate::AppError;

/// Field the form keeps the evaluation date in.
pub const EVALUATION_DATE_FIELD: &str = "evaluationDate";

/// One open evaluation screen: record list, filters, the form being edited and its
/// auto-save slot.
///
/// Store failures never escape as errors. They are logged and turned into `Error`
/// notifications, and the call reports failure through its return value.
pub struct EvaluationSession {
    vehicles: VehicleService,
    activity: Arc<ActivityRecorder>,
    filter: FilterManager,
    autosave: AutoSaveController,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locale: Locale,
}

impl std::fmt::Debug for EvaluationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationSession")
            .field("vehicles", &self.vehicles)
            .field("filter", &self.filter)
            .field("autosave", &self.autosave)
            .finish_non_exhaustive()
    }
}

impl EvaluationSession {
    pub fn new(
        backend: Backend,
        config: &AppConfig,
        filter: FilterManager,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let activity = Arc::new(ActivityRecorder::new(backend.activity, clock.clone()));
        let vehicles = VehicleService::new(backend.records, activity.clone(), clock.clone());
        let autosave =
            AutoSaveController::new(config.autosave.clone(), backend.snapshots, clock.clone());
        Self {
            vehicles,
            activity,
            filter,
            autosave,
            notifier,
            clock,
            locale: config.filter.locale,
        }
    }

    /// Opens the configured backend on the system clock.
    pub fn open(
        config: &AppConfig,
        filter: FilterManager,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        let backend = open_backend(config)?;
        Ok(Self::new(backend, config, filter, notifier, Arc::new(SystemClock)))
    }

    pub fn filter(&self) -> &FilterManager {
        &self.filter
    }

    pub fn autosave(&self) -> &AutoSaveController {
        &self.autosave
    }

    pub fn vehicles(&self) -> &VehicleService {
        &self.vehicles
    }

    pub fn activity(&self) -> &ActivityRecorder {
        &self.activity
    }

    pub async fn sign_in(&self, actor: Actor) {
        self.activity.sign_in(actor).await;
    }

    pub async fn sign_out(&self) {
        self.activity.sign_out().await;
    }

    /// Loads the record list into the filter manager, then offers any recent auto-save
    /// snapshot to `confirm`.
    ///
    /// A snapshot targeting a record that is missing from a successfully loaded list
    /// restores as a new form. When the list could not be read the target is kept.
    #[instrument(skip_all)]
    pub async fn start<F>(&self, confirm: F) -> RecoveryOutcome
    where
        F: FnOnce(&AutoSaveSnapshot) -> bool,
    {
        let records = self.reload().await;
        match self.autosave.recover(confirm) {
            RecoveryOutcome::Restored {
                fields,
                record_id: Some(id),
            } if records
                .as_ref()
                .is_some_and(|records| !records.iter().any(|record| record.id == id)) =>
            {
                warn!(record = %id, "auto-saved record no longer exists, restoring as a new form");
                self.autosave.set_current_record(None);
                RecoveryOutcome::Restored {
                    fields,
                    record_id: None,
                }
            }
            outcome => outcome,
        }
    }

    /// Re-reads the record list and refreshes facets and the filtered view. Returns
    /// `None` when the list could not be read; the failure is reported and the manager
    /// keeps its previous records.
    pub async fn reload(&self) -> Option<Vec<VehicleRecord>> {
        match self.vehicles.list().await {
            Ok(records) => {
                self.filter.populate(records.clone());
                self.filter.apply();
                Some(records)
            }
            Err(e) => {
                self.report(e.into());
                None
            }
        }
    }

    pub fn form_changed(&self, fields: FormFields) {
        self.autosave.form_changed(fields);
    }

    /// Saves the form as a new record or over the loaded one, then drops the auto-save
    /// snapshot. On failure the snapshot is kept.
    pub async fn save_form(&self, fields: FormFields) -> Option<VehicleRecord> {
        let current = self.autosave.current_record();
        let is_new = current.is_none();
        match self.vehicles.save_form(current.as_ref(), fields).await {
            Ok(record) => {
                self.autosave.clear();
                self.autosave.set_current_record(Some(record.id.clone()));
                self.reload().await;
                self.notifier.notify(Notification::success(if is_new {
                    "Vehicle saved"
                } else {
                    "Vehicle updated"
                }));
                Some(record)
            }
            Err(e) => {
                self.report(e.into());
                None
            }
        }
    }

    /// Puts a stored record into the form. Any unsaved snapshot is discarded.
    pub async fn load_record(&self, id: &RecordId) -> Option<VehicleRecord> {
        match self.vehicles.open(id).await {
            Ok(record) => {
                self.autosave.clear();
                self.autosave.set_current_record(Some(record.id.clone()));
                self.notifier.notify(Notification::info("Vehicle loaded"));
                Some(record)
            }
            Err(e) => {
                self.report(e.into());
                None
            }
        }
    }

    /// Starts a blank form with a fresh form number and today's date.
    pub fn new_form(&self) -> FormFields {
        self.autosave.clear();
        self.autosave.set_current_record(None);
        let today = self.clock.now().date_naive();
        let form_number = generate_form_number(today.year(), &mut rand::thread_rng());
        self.notifier.notify(Notification::info("New form ready"));
        FormFields::new()
            .with(KnownField::FormNumber.as_str(), form_number)
            .with(EVALUATION_DATE_FIELD, today.format("%Y-%m-%d").to_string())
    }

    pub async fn delete_record(&self, id: &RecordId) -> bool {
        match self.vehicles.delete(id).await {
            Ok(true) => {
                if self.autosave.current_record().as_ref() == Some(id) {
                    self.autosave.clear();
                    self.autosave.set_current_record(None);
                }
                self.reload().await;
                self.notifier.notify(Notification::info("Vehicle deleted"));
                true
            }
            Ok(false) => {
                self.report(AppError::from(crate::store::StoreError::RecordNotFound(id.clone())));
                false
            }
            Err(e) => {
                self.report(e.into());
                false
            }
        }
    }

    pub async fn transfer_to_warehouse(
        &self,
        id: &RecordId,
        warehouse_id: &str,
        warehouse_name: &str,
    ) -> bool {
        match self
            .vehicles
            .transfer_to_warehouse(id, warehouse_id, warehouse_name)
            .await
        {
            Ok(_) => {
                self.reload().await;
                self.notifier
                    .notify(Notification::success(format!("Moved to {warehouse_name}")));
                true
            }
            Err(e) => {
                self.report(e.into());
                false
            }
        }
    }

    pub async fn update_operation_status(&self, id: &RecordId, status: OperationStatus) -> bool {
        match self.vehicles.update_operation_status(id, status).await {
            Ok(_) => {
                self.reload().await;
                self.notifier.notify(Notification::success("Status updated"));
                true
            }
            Err(e) => {
                self.report(e.into());
                false
            }
        }
    }

    /// The records currently shown, in display order.
    fn visible_records(&self) -> Vec<VehicleRecord> {
        self.filter
            .last_view()
            .map(|view| view.records)
            .unwrap_or_else(|| self.filter.filtered())
    }

    /// JSON export of exactly the filtered and sorted records on screen.
    pub async fn export_filtered_json(&self) -> Option<String> {
        let records = self.visible_records();
        if records.is_empty() {
            self.notifier
                .notify(Notification::warning("No vehicles to export"));
            return None;
        }
        match export_records_json(&records, self.clock.now()) {
            Ok(json) => {
                info!(count = records.len(), "filtered records exported as json");
                self.activity
                    .log(ActivityKind::ExportJson, serde_json::json!({ "count": records.len() }))
                    .await;
                Some(json)
            }
            Err(e) => {
                self.report(e.into());
                None
            }
        }
    }

    /// Spreadsheet rows (header first) for the filtered and sorted records on screen.
    pub async fn export_filtered_rows(&self) -> Option<Vec<Vec<String>>> {
        let records = self.visible_records();
        if records.is_empty() {
            self.notifier
                .notify(Notification::warning("No vehicles to export"));
            return None;
        }
        let rows = export_rows(&records, self.locale);
        self.activity
            .log(ActivityKind::ExportExcel, serde_json::json!({ "count": records.len() }))
            .await;
        Some(rows)
    }

    fn report(&self, err: AppError) {
        error!(code = err.code(), error = %err, "operation failed");
        self.notifier
            .notify(Notification::error(err.user_facing_message()));
    }
}
