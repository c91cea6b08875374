use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::filter::labels::display_value;
use crate::filter::Locale;
use crate::model::VehicleRecord;
use crate::time::to_iso8601;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to serialize export: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Spreadsheet columns as `(field, header)`, in sheet order.
pub const EXPORT_COLUMNS: &[(&str, &str)] = &[
    ("formNumber", "Form Number"),
    ("customerName", "Customer"),
    ("make", "Make"),
    ("model", "Model"),
    ("year", "Year"),
    ("vin", "VIN"),
    ("marketValue", "Market Value"),
    ("overallRating", "Rating"),
    ("recommendation", "Recommendation"),
    ("evaluationDate", "Date"),
];

const FALLBACK_FORM_NUMBER: &str = "form";

fn stamped(record: &VehicleRecord, now: DateTime<Utc>) -> Result<Value, ExportError> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.insert("exportedAt".to_string(), Value::String(to_iso8601(&now)));
    }
    Ok(value)
}

/// One record as pretty-printed JSON with an `exportedAt` stamp.
pub fn export_record_json(record: &VehicleRecord, now: DateTime<Utc>) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(&stamped(record, now)?)?)
}

/// A JSON array of records, each stamped like [`export_record_json`], order kept.
pub fn export_records_json(records: &[VehicleRecord], now: DateTime<Utc>) -> Result<String, ExportError> {
    let values = records
        .iter()
        .map(|record| stamped(record, now))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(serde_json::to_string_pretty(&values)?)
}

pub fn export_file_name(form_number: Option<&str>, date: NaiveDate) -> String {
    let form_number = form_number
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(FALLBACK_FORM_NUMBER);
    format!("Vehicle_Evaluation_{form_number}_{}.json", date.format("%Y-%m-%d"))
}

/// Header row followed by one row per record, in the order given.
pub fn export_rows(records: &[VehicleRecord], locale: Locale) -> Vec<Vec<String>> {
    let mut rows = Vec::with_capacity(records.len() + 1);
    rows.push(
        EXPORT_COLUMNS
            .iter()
            .map(|(_, header)| (*header).to_string())
            .collect(),
    );
    for record in records {
        rows.push(
            EXPORT_COLUMNS
                .iter()
                .map(|(field, _)| {
                    let raw = record
                        .field(field)
                        .map(|value| value.to_display_string())
                        .unwrap_or_default();
                    match *field {
                        "overallRating" | "recommendation" if !raw.is_empty() => {
                            display_value(field, &raw, locale)
                        }
                        _ => raw,
                    }
                })
                .collect(),
        );
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FormFields, RecordId};
    use chrono::TimeZone;

    fn record() -> VehicleRecord {
        VehicleRecord::new(
            RecordId::new("v-1"),
            FormFields::new()
                .with("formNumber", "VE-2024-0042")
                .with("make", "Hyundai")
                .with("year", 2018)
                .with("marketValue", 42500.5),
            Utc.with_ymd_and_hms(2024, 4, 2, 8, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_json_export_adds_exported_at() {
        let now = Utc.with_ymd_and_hms(2024, 4, 3, 9, 30, 0).unwrap();
        let json = export_record_json(&record(), now).unwrap();
        assert!(json.contains('\n'));

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["exportedAt"], "2024-04-03T09:30:00.000Z");
        assert_eq!(value["id"], "v-1");
        assert_eq!(value["make"], "Hyundai");
    }

    #[test]
    fn test_records_export_keeps_order() {
        let now = Utc.with_ymd_and_hms(2024, 4, 3, 9, 30, 0).unwrap();
        let mut second = record();
        second.id = RecordId::new("v-2");
        let json = export_records_json(&[second, record()], now).unwrap();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["id"], "v-2");
        assert_eq!(value[1]["id"], "v-1");
        assert_eq!(value[1]["exportedAt"], "2024-04-03T09:30:00.000Z");
    }

    #[test]
    fn test_file_name() {
        let date = NaiveDate::from_ymd_opt(2024, 4, 3).unwrap();
        assert_eq!(
            export_file_name(Some("VE-2024-0042"), date),
            "Vehicle_Evaluation_VE-2024-0042_2024-04-03.json"
        );
        assert_eq!(
            export_file_name(Some("  "), date),
            "Vehicle_Evaluation_form_2024-04-03.json"
        );
    }

    #[test]
    fn test_rows_follow_column_order() {
        let rows = export_rows(&[record()], Locale::En);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "Form Number");
        assert_eq!(rows[0].len(), EXPORT_COLUMNS.len());
        assert_eq!(rows[1][0], "VE-2024-0042");
        assert_eq!(rows[1][2], "Hyundai");
        assert_eq!(rows[1][3], "");
        assert_eq!(rows[1][4], "2018");
    }
}
