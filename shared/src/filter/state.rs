use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

use super::FilterError;

pub const PARAM_QUERY: &str = "q";
pub const PARAM_SORT: &str = "sort";
pub const PARAM_DIR: &str = "dir";
/// Key used by the active-filter summary for the search box.
pub const SEARCH_KEY: &str = "search";

pub const DEFAULT_SORT_FIELD: &str = "createdAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortDirection {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(FilterError::InvalidDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: DEFAULT_SORT_FIELD.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn is_default(&self) -> bool {
        self.field == DEFAULT_SORT_FIELD && self.direction == SortDirection::Desc
    }

    /// Parses the sort dropdown's `field-direction` values, e.g. `year-asc`.
    pub fn parse_preset(value: &str) -> Result<Self, FilterError> {
        let (field, dir) = value
            .rsplit_once('-')
            .ok_or_else(|| FilterError::InvalidSortPreset(value.to_string()))?;
        if field.is_empty() {
            return Err(FilterError::InvalidSortPreset(value.to_string()));
        }
        Ok(Self::new(field, dir.parse()?))
    }

    /// Trims the field name. A blank field becomes [`DEFAULT_SORT_FIELD`], which is also
    /// what a blank `sort` parameter decodes to.
    pub fn normalized(self) -> Self {
        let field = self.field.trim();
        let field = if field.is_empty() { DEFAULT_SORT_FIELD } else { field };
        Self::new(field, self.direction)
    }

    pub fn preset_value(&self) -> String {
        format!("{}-{}", self.field, self.direction)
    }
}

/// One entry of the sort dropdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortPreset {
    pub field: &'static str,
    pub direction: SortDirection,
    pub label: &'static str,
}

pub const SORT_PRESETS: &[SortPreset] = &[
    SortPreset { field: "createdAt", direction: SortDirection::Desc, label: "Newest first" },
    SortPreset { field: "createdAt", direction: SortDirection::Asc, label: "Oldest first" },
    SortPreset { field: "marketValue", direction: SortDirection::Desc, label: "Highest value" },
    SortPreset { field: "marketValue", direction: SortDirection::Asc, label: "Lowest value" },
    SortPreset { field: "year", direction: SortDirection::Desc, label: "Newest model year" },
    SortPreset { field: "year", direction: SortDirection::Asc, label: "Oldest model year" },
    SortPreset { field: "odometer", direction: SortDirection::Asc, label: "Lowest mileage" },
    SortPreset { field: "make", direction: SortDirection::Asc, label: "Make (A-Z)" },
    SortPreset { field: "customerName", direction: SortDirection::Asc, label: "Customer (A-Z)" },
];

/// Search text, exact-match constraints and sort order for the record list.
///
/// `filters` is ordered by key so the encoded query string is stable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterState {
    search: String,
    filters: BTreeMap<String, String>,
    sort: SortSpec,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn filter(&self, key: &str) -> Option<&str> {
        self.filters.get(key).map(String::as_str)
    }

    pub fn sort(&self) -> &SortSpec {
        &self.sort
    }

    /// Stores the query trimmed and lower-cased.
    pub fn set_search(&mut self, query: &str) {
        self.search = normalize_search(query);
    }

    /// Sets or, for an empty value, clears the constraint on `key`.
    pub fn set_filter(&mut self, key: &str, value: Option<&str>) -> Result<(), FilterError> {
        validate_filter_key(key)?;
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => {
                self.filters.insert(key.to_string(), v.to_string());
            }
            None => {
                self.filters.remove(key);
            }
        }
        Ok(())
    }

    pub fn set_sort(&mut self, sort: SortSpec) {
        self.sort = sort.normalized();
    }

    /// Removes one constraint; [`SEARCH_KEY`] clears the search text. Returns whether
    /// anything changed.
    pub fn remove(&mut self, key: &str) -> bool {
        if key == SEARCH_KEY {
            let had = !self.search.is_empty();
            self.search.clear();
            return had;
        }
        self.filters.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_default(&self) -> bool {
        self.search.is_empty() && self.filters.is_empty() && self.sort.is_default()
    }

    /// Number of individually removable constraints: the search text plus each filter.
    pub fn active_count(&self) -> usize {
        usize::from(!self.search.is_empty()) + self.filters.len()
    }

    /// Encodes as a query string: `q`, then filters in key order, then `sort` and `dir`
    /// when they differ from the defaults. The default state encodes to `""`.
    pub fn to_query_string(&self) -> String {
        let mut out = form_urlencoded::Serializer::new(String::new());
        if !self.search.is_empty() {
            out.append_pair(PARAM_QUERY, &self.search);
        }
        for (key, value) in &self.filters {
            out.append_pair(key, value);
        }
        if self.sort.field != DEFAULT_SORT_FIELD {
            out.append_pair(PARAM_SORT, &self.sort.field);
        }
        if self.sort.direction != SortDirection::Desc {
            out.append_pair(PARAM_DIR, self.sort.direction.as_str());
        }
        out.finish()
    }

    /// Decodes a query string (a leading `?` is accepted). Every parameter other than
    /// `q`, `sort` and `dir` is a filter. Never fails: empty values are ignored, an
    /// unknown direction falls back to descending, the first `q`/`sort`/`dir` wins and
    /// the last occurrence of a repeated filter wins.
    pub fn from_query_string(query: &str) -> Self {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut state = Self::default();
        let (mut seen_q, mut seen_sort, mut seen_dir) = (false, false, false);

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                PARAM_QUERY => {
                    if !seen_q {
                        seen_q = true;
                        state.set_search(&value);
                    }
                }
                PARAM_SORT => {
                    if !seen_sort {
                        seen_sort = true;
                        state.set_sort(SortSpec::new(value.as_ref(), state.sort.direction));
                    }
                }
                PARAM_DIR => {
                    if !seen_dir {
                        seen_dir = true;
                        state.sort.direction = value.parse().unwrap_or_default();
                    }
                }
                other => {
                    // Only SEARCH_KEY or an empty key can fail here; both are skipped.
                    let _ = state.set_filter(other, Some(&value));
                }
            }
        }
        state
    }
}

pub(crate) fn normalize_search(query: &str) -> String {
    query.trim().to_lowercase()
}

pub(crate) fn validate_filter_key(key: &str) -> Result<(), FilterError> {
    if key.trim().is_empty() {
        return Err(FilterError::EmptyKey);
    }
    if matches!(key, PARAM_QUERY | PARAM_SORT | PARAM_DIR | SEARCH_KEY) {
        return Err(FilterError::ReservedKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_state_encodes_empty() {
        assert_eq!(FilterState::default().to_query_string(), "");
        assert!(FilterState::from_query_string("").is_default());
    }

    #[test]
    fn test_query_string_order_and_defaults() {
        let mut state = FilterState::new();
        state.set_search("  Toy ");
        state.set_filter("make", Some("Toyota")).unwrap();
        state.set_filter("color", Some("White")).unwrap();
        state.set_sort(SortSpec::new("year", SortDirection::Asc));

        assert_eq!(
            state.to_query_string(),
            "q=toy&color=White&make=Toyota&sort=year&dir=asc"
        );
    }

    #[test]
    fn test_default_sort_parts_omitted_independently() {
        let mut state = FilterState::new();
        state.set_sort(SortSpec::new("createdAt", SortDirection::Asc));
        assert_eq!(state.to_query_string(), "dir=asc");

        state.set_sort(SortSpec::new("year", SortDirection::Desc));
        assert_eq!(state.to_query_string(), "sort=year");
    }

    #[test]
    fn test_blank_or_padded_sort_field_is_normalized() {
        let mut state = FilterState::new();
        state.set_sort(SortSpec::new("", SortDirection::Asc));
        assert_eq!(state.sort(), &SortSpec::new(DEFAULT_SORT_FIELD, SortDirection::Asc));
        assert_eq!(state.to_query_string(), "dir=asc");
        assert_eq!(FilterState::from_query_string("dir=asc"), state);

        state.set_sort(SortSpec::new("  year ", SortDirection::Desc));
        assert_eq!(state.sort().field, "year");
        assert_eq!(FilterState::from_query_string(&state.to_query_string()), state);
    }

    #[test]
    fn test_parse_unknown_params_are_filters() {
        let state = FilterState::from_query_string("?q=Camry&warehouse=east&recommendation=repair_sell");
        assert_eq!(state.search(), "camry");
        assert_eq!(state.filter("warehouse"), Some("east"));
        assert_eq!(state.filter("recommendation"), Some("repair_sell"));
        assert!(state.sort().is_default());
    }

    #[test]
    fn test_parse_is_lenient() {
        let state = FilterState::from_query_string("make=&dir=sideways&sort=&q=a&q=b&color=red&color=blue");
        assert_eq!(state.filter("make"), None);
        assert_eq!(state.sort().direction, SortDirection::Desc);
        assert_eq!(state.sort().field, DEFAULT_SORT_FIELD);
        assert_eq!(state.search(), "a");
        assert_eq!(state.filter("color"), Some("blue"));
    }

    #[test]
    fn test_encoding_escapes_values() {
        let mut state = FilterState::new();
        state.set_filter("recoveryLocation", Some("Dubai & Sharjah")).unwrap();
        let encoded = state.to_query_string();
        assert_eq!(encoded, "recoveryLocation=Dubai+%26+Sharjah");
        assert_eq!(FilterState::from_query_string(&encoded), state);
    }

    #[test]
    fn test_set_filter_rejects_reserved_keys() {
        let mut state = FilterState::new();
        for key in ["q", "sort", "dir", "search"] {
            assert_eq!(
                state.set_filter(key, Some("x")),
                Err(FilterError::ReservedKey(key.to_string()))
            );
        }
        assert_eq!(state.set_filter(" ", Some("x")), Err(FilterError::EmptyKey));
    }

    #[test]
    fn test_set_filter_empty_value_clears() {
        let mut state = FilterState::new();
        state.set_filter("make", Some("Kia")).unwrap();
        state.set_filter("make", Some("   ")).unwrap();
        assert!(state.filters().is_empty());
        state.set_filter("make", Some("Kia")).unwrap();
        state.set_filter("make", None).unwrap();
        assert!(state.filters().is_empty());
    }

    #[test]
    fn test_remove_and_active_count() {
        let mut state = FilterState::new();
        state.set_search("kia");
        state.set_filter("make", Some("Kia")).unwrap();
        assert_eq!(state.active_count(), 2);
        assert!(state.remove(SEARCH_KEY));
        assert!(!state.remove(SEARCH_KEY));
        assert!(state.remove("make"));
        assert_eq!(state.active_count(), 0);
    }

    #[test]
    fn test_sort_presets() {
        let spec = SortSpec::parse_preset("year-asc").unwrap();
        assert_eq!(spec, SortSpec::new("year", SortDirection::Asc));
        assert_eq!(spec.preset_value(), "year-asc");
        assert!(SortSpec::parse_preset("year").is_err());
        assert!(SortSpec::parse_preset("year-up").is_err());
        assert!(SortSpec::parse_preset("-asc").is_err());
        for preset in SORT_PRESETS {
            let value = format!("{}-{}", preset.field, preset.direction);
            assert_eq!(SortSpec::parse_preset(&value).unwrap().field, preset.field);
        }
    }

    fn arb_state() -> impl Strategy<Value = FilterState> {
        let search = "[a-z0-9 &=+%]{0,12}";
        let filters = prop::collection::btree_map("[a-zA-Z][a-zA-Z0-9_]{0,10}", "[A-Za-z0-9 &=+%/]{1,12}", 0..4);
        let sort_field = prop_oneof![
            Just("createdAt".to_string()),
            Just(String::new()),
            "[a-zA-Z]{1,10}",
            " {0,2}[a-zA-Z]{0,8} {0,2}",
        ];
        let dir = prop_oneof![Just(SortDirection::Asc), Just(SortDirection::Desc)];
        (search, filters, sort_field, dir).prop_map(|(search, filters, field, direction)| {
            let mut state = FilterState::new();
            state.set_search(&search);
            for (k, v) in filters {
                let _ = state.set_filter(&k, Some(&v));
            }
            state.set_sort(SortSpec::new(field, direction));
            state
        })
    }

    proptest! {
        #[test]
        fn test_query_string_roundtrip(state in arb_state()) {
            let encoded = state.to_query_string();
            prop_assert_eq!(FilterState::from_query_string(&encoded), state);
        }
    }
}
