use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::time::to_iso8601;

// --- Typed IDs ---

macro_rules! typed_id {
    ($name:ident) => {
        #[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

typed_id!(RecordId);
typed_id!(UserId);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Keys that belong to the record envelope or the auto-save slot and must never be
/// taken from free-form form input.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "createdAt",
    "updatedAt",
    "vehicleId",
    "savedAt",
    "exportedAt",
];

/// A single form value. Multi-select inputs (checkbox groups, photo lists) arrive as lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Flag(bool),
}

impl FieldValue {
    /// Stringification used by search, filters and facets. Whole numbers print without a
    /// fractional part and lists join with commas.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join(","),
            Self::Flag(b) => b.to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Number(_) | Self::Flag(_) => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        // exact: integral and well inside i64 range
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

/// Free-form field bag of a form or record. Null values are dropped on load.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FormFields(BTreeMap<String, FieldValue>);

impl<'de> Deserialize<'de> for FormFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<FieldValue>>::deserialize(deserializer)?;
        Ok(Self(
            raw.into_iter()
                .filter_map(|(key, value)| value.map(|v| (key, v)))
                .collect(),
        ))
    }
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(FieldValue::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.0.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops envelope keys so identity and timestamps cannot be smuggled in via form input.
    #[must_use]
    pub fn without_reserved(mut self) -> Self {
        self.0.retain(|key, _| !RESERVED_KEYS.contains(&key.as_str()));
        self
    }
}

impl FromIterator<(String, FieldValue)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Field names the evaluation form is known to produce. Anything else lives in the
/// record's free-form bag under its own name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownField {
    FormNumber,
    CustomerName,
    ContractNo,
    PlateNo,
    Make,
    Model,
    Year,
    Vin,
    Color,
    Odometer,
    FuelType,
    MarketValue,
    OverallRating,
    Recommendation,
    RecoveryLocation,
    OperationStatus,
    Warehouse,
    WarehouseName,
    Notes,
    Images,
    GpsLatitude,
    GpsLongitude,
}

impl KnownField {
    pub const ALL: [KnownField; 22] = [
        Self::FormNumber,
        Self::CustomerName,
        Self::ContractNo,
        Self::PlateNo,
        Self::Make,
        Self::Model,
        Self::Year,
        Self::Vin,
        Self::Color,
        Self::Odometer,
        Self::FuelType,
        Self::MarketValue,
        Self::OverallRating,
        Self::Recommendation,
        Self::RecoveryLocation,
        Self::OperationStatus,
        Self::Warehouse,
        Self::WarehouseName,
        Self::Notes,
        Self::Images,
        Self::GpsLatitude,
        Self::GpsLongitude,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FormNumber => "formNumber",
            Self::CustomerName => "customerName",
            Self::ContractNo => "contractNo",
            Self::PlateNo => "plateNo",
            Self::Make => "make",
            Self::Model => "model",
            Self::Year => "year",
            Self::Vin => "vin",
            Self::Color => "color",
            Self::Odometer => "odometer",
            Self::FuelType => "fuelType",
            Self::MarketValue => "marketValue",
            Self::OverallRating => "overallRating",
            Self::Recommendation => "recommendation",
            Self::RecoveryLocation => "recoveryLocation",
            Self::OperationStatus => "operationStatus",
            Self::Warehouse => "warehouse",
            Self::WarehouseName => "warehouseName",
            Self::Notes => "notes",
            Self::Images => "images",
            Self::GpsLatitude => "gpsLatitude",
            Self::GpsLongitude => "gpsLongitude",
        }
    }
}

impl fmt::Display for KnownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnownField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|f| f.as_str() == s).ok_or(())
    }
}

/// Operating condition of a recovered vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Working,
    NotWorking,
    NeedsMaintenance,
}

impl OperationStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::NotWorking => "not_working",
            Self::NeedsMaintenance => "needs_maintenance",
        }
    }
}

/// One vehicle evaluation. `id` and `createdAt` are fixed at creation; `updatedAt`
/// moves on every mutation.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredVehicleRecord")]
pub struct VehicleRecord {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: FormFields,
}

/// Field older builds stamped on every save instead of `createdAt`/`updatedAt`.
const LEGACY_SAVED_AT: &str = "savedAt";

/// A record as read back from storage.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredVehicleRecord {
    id: RecordId,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: FormFields,
}

impl From<StoredVehicleRecord> for VehicleRecord {
    fn from(stored: StoredVehicleRecord) -> Self {
        let StoredVehicleRecord {
            id,
            created_at,
            updated_at,
            mut fields,
        } = stored;
        let saved_at = fields
            .remove(LEGACY_SAVED_AT)
            .and_then(|value| value.as_str().and_then(|raw| DateTime::parse_from_rfc3339(raw).ok()))
            .map(|ts| ts.with_timezone(&Utc));
        Self {
            id,
            created_at: created_at.or(saved_at),
            updated_at: updated_at.or(saved_at),
            fields,
        }
    }
}

// Redact debug output because this can contain customer names and contract numbers.
impl fmt::Debug for VehicleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VehicleRecord")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("field_count", &self.fields.len())
            .finish()
    }
}

impl VehicleRecord {
    pub fn new(id: RecordId, fields: FormFields, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: Some(now),
            updated_at: Some(now),
            fields: fields.without_reserved(),
        }
    }

    /// Looks a field up by wire name, envelope fields included.
    pub fn field(&self, name: &str) -> Option<Cow<'_, FieldValue>> {
        match name {
            "id" => Some(Cow::Owned(FieldValue::Text(self.id.0.clone()))),
            "createdAt" => self
                .created_at
                .as_ref()
                .map(|ts| Cow::Owned(FieldValue::Text(to_iso8601(ts)))),
            "updatedAt" => self
                .updated_at
                .as_ref()
                .map(|ts| Cow::Owned(FieldValue::Text(to_iso8601(ts)))),
            _ => self.fields.get(name).map(Cow::Borrowed),
        }
    }

    pub fn known(&self, field: KnownField) -> Option<&FieldValue> {
        self.fields.get(field.as_str())
    }

    pub fn make(&self) -> Option<&str> {
        self.fields.text(KnownField::Make.as_str())
    }

    pub fn model(&self) -> Option<&str> {
        self.fields.text(KnownField::Model.as_str())
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.fields.text(KnownField::CustomerName.as_str())
    }

    pub fn form_number(&self) -> Option<&str> {
        self.fields.text(KnownField::FormNumber.as_str())
    }

    pub fn images(&self) -> &[String] {
        match self.known(KnownField::Images) {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }
}

/// Form numbers look like `VE-2024-0042`.
pub fn generate_form_number<R: Rng + ?Sized>(year: i32, rng: &mut R) -> String {
    format!("VE-{year}-{:04}", rng.gen_range(0..10_000))
}
