use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::state::{FilterState, SortDirection, SortSpec};
use crate::model::{FieldValue, VehicleRecord};

/// Fields the search box looks into.
pub const SEARCH_FIELDS: &[&str] = &[
    "customerName",
    "make",
    "model",
    "vin",
    "contractNo",
    "plateNo",
    "color",
    "notes",
];

/// Comparable form of a field value. Orders as empty < numbers < text, so values of
/// mixed type always have a total order.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Empty,
    Number(f64),
    Text(String),
}

impl SortKey {
    pub fn of(value: Option<&FieldValue>) -> Self {
        match value {
            None => Self::Empty,
            Some(FieldValue::Number(n)) if n.is_finite() => Self::Number(*n),
            Some(FieldValue::Number(_)) => Self::Empty,
            Some(other) => {
                let text = other.to_display_string();
                if text.is_empty() {
                    return Self::Empty;
                }
                match text.trim().parse::<f64>() {
                    Ok(n) if n.is_finite() => Self::Number(n),
                    _ => Self::Text(text),
                }
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::Number(_) => 1,
            Self::Text(_) => 2,
        }
    }

    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

pub fn matches_search(record: &VehicleRecord, query: &str) -> bool {
    if query.is_empty() {
        return true;
    }
    SEARCH_FIELDS.iter().any(|field| {
        record
            .field(field)
            .map(|v| v.to_display_string().to_lowercase().contains(query))
            .unwrap_or(false)
    })
}

/// Exact, case-insensitive match on every constraint. A record without the field is
/// excluded.
pub fn matches_filters(record: &VehicleRecord, filters: &BTreeMap<String, String>) -> bool {
    filters.iter().all(|(key, wanted)| match record.field(key) {
        Some(value) if !value.is_empty() => {
            value.to_display_string().to_lowercase() == wanted.to_lowercase()
        }
        _ => false,
    })
}

/// Stable sort in place. Ties keep their input order in both directions.
pub fn sort_records(records: &mut [VehicleRecord], sort: &SortSpec) {
    let mut keyed: Vec<(SortKey, VehicleRecord)> = records
        .iter()
        .map(|r| (SortKey::of(r.field(&sort.field).as_deref()), r.clone()))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare_keys(a, b, sort.direction));
    for (slot, (_, record)) in records.iter_mut().zip(keyed) {
        *slot = record;
    }
}

fn compare_keys(a: &SortKey, b: &SortKey, direction: SortDirection) -> Ordering {
    let ord = a.total_cmp(b);
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

/// Applies search, filters and sort to `records` without touching the input.
pub fn filter_records(records: &[VehicleRecord], state: &FilterState) -> Vec<VehicleRecord> {
    let mut out: Vec<VehicleRecord> = records
        .iter()
        .filter(|r| matches_search(r, state.search()) && matches_filters(r, state.filters()))
        .cloned()
        .collect();
    sort_records(&mut out, state.sort());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FormFields, RecordId};
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn rec(id: &str, fields: FormFields, minutes: i64) -> VehicleRecord {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        VehicleRecord::new(RecordId::new(id), fields, base + Duration::minutes(minutes))
    }

    fn pair() -> Vec<VehicleRecord> {
        vec![
            rec("t", FormFields::new().with("make", "Toyota").with("year", 2019), 0),
            rec("h", FormFields::new().with("make", "Honda").with("year", 2020), 1),
        ]
    }

    fn ids(records: &[VehicleRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_filter_exact_case_insensitive() {
        let mut state = FilterState::new();
        state.set_filter("make", Some("toyota")).unwrap();
        assert_eq!(ids(&filter_records(&pair(), &state)), vec!["t"]);

        state.set_filter("make", Some("toy")).unwrap();
        assert!(filter_records(&pair(), &state).is_empty());
    }

    #[test]
    fn test_filter_excludes_missing_field() {
        let mut state = FilterState::new();
        state.set_filter("color", Some("white")).unwrap();
        assert!(filter_records(&pair(), &state).is_empty());
    }

    #[test]
    fn test_filter_numeric_field_matches_text() {
        let mut state = FilterState::new();
        state.set_filter("year", Some("2020")).unwrap();
        assert_eq!(ids(&filter_records(&pair(), &state)), vec!["h"]);
    }

    #[test]
    fn test_search_substring_any_field() {
        let mut state = FilterState::new();
        state.set_search("TOY");
        assert_eq!(ids(&filter_records(&pair(), &state)), vec!["t"]);

        let records = vec![rec(
            "n",
            FormFields::new().with("notes", "Left mirror cracked").with("make", "Kia"),
            0,
        )];
        state.set_search("mirror");
        assert_eq!(ids(&filter_records(&records, &state)), vec!["n"]);
    }

    #[test]
    fn test_search_ignores_non_search_fields() {
        let records = vec![rec("x", FormFields::new().with("recoveryLocation", "Ajman"), 0)];
        let mut state = FilterState::new();
        state.set_search("ajman");
        assert!(filter_records(&records, &state).is_empty());
    }

    #[test]
    fn test_sort_year_both_directions() {
        let mut state = FilterState::new();
        state.set_sort(SortSpec::new("year", SortDirection::Asc));
        assert_eq!(ids(&filter_records(&pair(), &state)), vec!["t", "h"]);
        state.set_sort(SortSpec::new("year", SortDirection::Desc));
        assert_eq!(ids(&filter_records(&pair(), &state)), vec!["h", "t"]);
    }

    #[test]
    fn test_default_sort_newest_first() {
        let state = FilterState::new();
        assert_eq!(ids(&filter_records(&pair(), &state)), vec!["h", "t"]);
    }

    #[test]
    fn test_sort_mixed_types_missing_first_ascending() {
        let records = vec![
            rec("text", FormFields::new().with("year", "unknown"), 0),
            rec("num", FormFields::new().with("year", 2018), 1),
            rec("str-num", FormFields::new().with("year", "2017"), 2),
            rec("none", FormFields::new(), 3),
            rec("blank", FormFields::new().with("year", ""), 4),
        ];
        let mut sorted = records.clone();
        sort_records(&mut sorted, &SortSpec::new("year", SortDirection::Asc));
        assert_eq!(ids(&sorted), vec!["none", "blank", "str-num", "num", "text"]);
    }

    #[test]
    fn test_sort_numeric_strings_compare_as_numbers() {
        let records = vec![
            rec("a", FormFields::new().with("marketValue", "9000"), 0),
            rec("b", FormFields::new().with("marketValue", "10000"), 1),
        ];
        let mut sorted = records.clone();
        sort_records(&mut sorted, &SortSpec::new("marketValue", SortDirection::Asc));
        assert_eq!(ids(&sorted), vec!["a", "b"]);
    }

    #[test]
    fn test_sort_ties_keep_input_order() {
        let records = vec![
            rec("1", FormFields::new().with("make", "Kia"), 0),
            rec("2", FormFields::new().with("make", "Kia"), 1),
            rec("3", FormFields::new().with("make", "Audi"), 2),
        ];
        let mut asc = records.clone();
        sort_records(&mut asc, &SortSpec::new("make", SortDirection::Asc));
        assert_eq!(ids(&asc), vec!["3", "1", "2"]);

        let mut desc = records.clone();
        sort_records(&mut desc, &SortSpec::new("make", SortDirection::Desc));
        assert_eq!(ids(&desc), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_filter_records_leaves_input_untouched() {
        let records = pair();
        let before = records.clone();
        let mut state = FilterState::new();
        state.set_sort(SortSpec::new("year", SortDirection::Asc));
        let _ = filter_records(&records, &state);
        assert_eq!(records, before);
    }

    fn arb_value() -> impl Strategy<Value = Option<FieldValue>> {
        prop_oneof![
            Just(None),
            any::<f64>().prop_map(|n| Some(FieldValue::Number(n))),
            "[0-9]{0,4}".prop_map(|s| Some(FieldValue::Text(s))),
            "[a-z ]{0,6}".prop_map(|s| Some(FieldValue::Text(s))),
        ]
    }

    proptest! {
        #[test]
        fn test_sort_key_order_is_total(a in arb_value(), b in arb_value(), c in arb_value()) {
            let (ka, kb, kc) = (SortKey::of(a.as_ref()), SortKey::of(b.as_ref()), SortKey::of(c.as_ref()));
            prop_assert_eq!(ka.total_cmp(&kb), kb.total_cmp(&ka).reverse());
            if ka.total_cmp(&kb) != Ordering::Greater && kb.total_cmp(&kc) != Ordering::Greater {
                prop_assert_ne!(ka.total_cmp(&kc), Ordering::Greater);
            }
        }

        #[test]
        fn test_sorting_never_panics_and_is_ordered(values in prop::collection::vec(arb_value(), 0..20)) {
            let records: Vec<VehicleRecord> = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let mut fields = FormFields::new();
                    if let Some(v) = v {
                        fields.insert("odometer", v.clone());
                    }
                    rec(&i.to_string(), fields, 0)
                })
                .collect();
            let mut sorted = records.clone();
            sort_records(&mut sorted, &SortSpec::new("odometer", SortDirection::Asc));
            prop_assert_eq!(sorted.len(), records.len());
            for w in sorted.windows(2) {
                let a = SortKey::of(w[0].field("odometer").as_deref());
                let b = SortKey::of(w[1].field("odometer").as_deref());
                prop_assert_ne!(a.total_cmp(&b), Ordering::Greater);
            }
        }
    }
}
