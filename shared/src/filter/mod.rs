//! Record search, filtering and sorting with query-string persistence.

pub mod engine;
pub mod facets;
pub mod labels;
pub mod manager;
pub mod state;

use thiserror::Error;

pub use self::engine::{filter_records, SortKey, SEARCH_FIELDS};
pub use self::facets::{collect_facets, warehouse_counts, Facet, FacetOptions};
pub use self::labels::Locale;
pub use self::manager::{
    ActiveFilter, BoundControls, FilterManager, FilterManagerBuilder, FilterView, LocationSync,
    MemoryLocation,
};
pub use self::state::{FilterState, SortDirection, SortSpec, SEARCH_KEY, SORT_PRESETS};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter key cannot be empty")]
    EmptyKey,

    #[error("'{0}' is reserved and cannot be used as a filter key")]
    ReservedKey(String),

    #[error("invalid sort direction '{0}', expected 'asc' or 'desc'")]
    InvalidDirection(String),

    #[error("invalid sort option '{0}', expected '<field>-<asc|desc>'")]
    InvalidSortPreset(String),
}
