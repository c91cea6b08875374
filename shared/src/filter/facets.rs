use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{KnownField, VehicleRecord};

pub const UNASSIGNED_WAREHOUSE: &str = "unassigned";

/// Categorical fields offered as filter dropdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    Make,
    Model,
    Year,
    Color,
    RecoveryLocation,
}

impl Facet {
    pub const ALL: [Facet; 5] = [
        Facet::Make,
        Facet::Model,
        Facet::Year,
        Facet::Color,
        Facet::RecoveryLocation,
    ];

    pub const fn field(self) -> KnownField {
        match self {
            Facet::Make => KnownField::Make,
            Facet::Model => KnownField::Model,
            Facet::Year => KnownField::Year,
            Facet::Color => KnownField::Color,
            Facet::RecoveryLocation => KnownField::RecoveryLocation,
        }
    }

    pub fn from_field(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.field().as_str() == name)
    }
}

/// Distinct values per facet, in display order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FacetOptions {
    pub makes: Vec<String>,
    pub models: Vec<String>,
    pub years: Vec<String>,
    pub colors: Vec<String>,
    pub locations: Vec<String>,
}

impl FacetOptions {
    pub fn get(&self, facet: Facet) -> &[String] {
        match facet {
            Facet::Make => &self.makes,
            Facet::Model => &self.models,
            Facet::Year => &self.years,
            Facet::Color => &self.colors,
            Facet::RecoveryLocation => &self.locations,
        }
    }

    /// The value a dropdown should keep selected after its options are rebuilt: the
    /// previous selection if it is still offered, otherwise nothing.
    pub fn retain_selection(&self, facet: Facet, previous: Option<&str>) -> Option<String> {
        let previous = previous.filter(|p| !p.is_empty())?;
        self.get(facet)
            .iter()
            .any(|v| v == previous)
            .then(|| previous.to_string())
    }
}

pub fn distinct_values(records: &[VehicleRecord], field: &str) -> BTreeSet<String> {
    records
        .iter()
        .filter_map(|r| r.fields.get(field))
        .filter(|v| !v.is_empty())
        .map(|v| v.to_display_string())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// Years newest first; anything that is not a number goes last, in text order.
fn year_order(a: &str, b: &str) -> Ordering {
    match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
        (Ok(x), Ok(y)) => y.total_cmp(&x),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Facet options for the given records. Pure: the records are not modified and the
/// same input always yields the same options.
pub fn collect_facets(records: &[VehicleRecord]) -> FacetOptions {
    let sorted = |facet: Facet| -> Vec<String> {
        distinct_values(records, facet.field().as_str())
            .into_iter()
            .collect()
    };

    let mut years = sorted(Facet::Year);
    years.sort_by(|a, b| year_order(a, b));

    FacetOptions {
        makes: sorted(Facet::Make),
        models: sorted(Facet::Model),
        years,
        colors: sorted(Facet::Color),
        locations: sorted(Facet::RecoveryLocation),
    }
}

/// Vehicles per warehouse id. Records without a warehouse count as `unassigned`.
pub fn warehouse_counts(records: &[VehicleRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        let key = record
            .known(KnownField::Warehouse)
            .filter(|v| !v.is_empty())
            .map(|v| v.to_display_string())
            .unwrap_or_else(|| UNASSIGNED_WAREHOUSE.to_string());
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}
