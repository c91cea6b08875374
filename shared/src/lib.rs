//! Core of the vehicle evaluation app.
//!
//! The shell owns the DOM, the address bar and the dialogs. This crate owns everything
//! else: the record list and its backends, search/filter/sort with query-string
//! persistence, debounced auto-save of the form being edited with expiry-based
//! recovery, and the best-effort activity log.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod activity;
pub mod autosave;
pub mod capabilities;
pub mod config;
pub mod export;
pub mod filter;
pub mod model;
pub mod notify;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod time;
pub mod vehicles;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::capabilities::{HttpError, KvError};
use crate::config::ConfigError;
use crate::export::ExportError;
use crate::filter::FilterError;
use crate::store::StoreError;

pub use crate::activity::{ActivityEntry, ActivityKind, ActivityRecorder, Actor};
pub use crate::autosave::{AutoSaveController, AutoSaveSnapshot, RecoveryOutcome, SaveStatus};
pub use crate::config::AppConfig;
pub use crate::filter::{FilterManager, FilterState, FilterView, SortDirection};
pub use crate::model::{FieldValue, FormFields, RecordId, UserId, VehicleRecord};
pub use crate::notify::{Notification, NotificationKind, Notifier};
pub use crate::session::EvaluationSession;
pub use crate::store::{Backend, RecordStore, SnapshotStore};
pub use crate::vehicles::VehicleService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Transient,
    Permanent,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    Storage,
    Serialization,
    Deserialization,
    Configuration,
    Internal,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Authorization => "FORBIDDEN",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Configuration => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Conflict | Self::RateLimited | Self::Storage => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Deserialization | Self::Configuration | Self::Internal => {
                ErrorSeverity::Fatal
            }

            Self::Authentication
            | Self::Authorization
            | Self::Validation
            | Self::NotFound
            | Self::Unknown => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::Storage | Self::Conflict
        )
    }

    fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::Validation,
            401 => Self::Authentication,
            403 => Self::Authorization,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            500..=599 => Self::Network,
            _ => Self::Unknown,
        }
    }
}

/// Error as it crosses into the shell: a kind for branching, a message for logs and a
/// user-facing text for notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable() && !matches!(self.severity, ErrorSeverity::Fatal)
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Unable to connect. Please check your internet connection and try again.".into()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".into(),
            ErrorKind::Authentication => "Your session has expired. Please sign in again.".into(),
            ErrorKind::Authorization => "You don't have permission to perform this action.".into(),
            ErrorKind::Validation | ErrorKind::Configuration => self.message.clone(),
            ErrorKind::NotFound => "The vehicle could not be found. It may have been deleted.".into(),
            ErrorKind::Conflict => {
                "This vehicle was changed elsewhere. Please refresh and try again.".into()
            }
            ErrorKind::RateLimited => "Too many requests. Please wait a moment and try again.".into(),
            ErrorKind::Storage => {
                "Unable to save data on this device. Please free up some storage space.".into()
            }
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "Saved data could not be read. Please contact support if this persists.".into()
            }
            ErrorKind::Internal | ErrorKind::Unknown => {
                "An unexpected error occurred. Please try again or contact support.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)
    }
}

impl std::error::Error for AppError {}

impl From<HttpError> for AppError {
    fn from(e: HttpError) -> Self {
        let kind = match &e {
            HttpError::InvalidUrl { .. }
            | HttpError::PrivateNetworkBlocked { .. }
            | HttpError::InvalidHeader { .. } => ErrorKind::Configuration,
            HttpError::SerializationError { .. } => ErrorKind::Serialization,
            HttpError::ConnectionError { .. } => ErrorKind::Network,
            HttpError::Timeout { .. } => ErrorKind::Timeout,
            HttpError::HttpStatus { status, .. } => ErrorKind::from_http_status(*status),
            HttpError::ResponseTooLarge { .. } | HttpError::InvalidResponse { .. } => {
                ErrorKind::Deserialization
            }
        };
        let err = AppError::new(kind, e.to_string());
        match e.request_id() {
            Some(id) => err.with_context("request_id", id),
            None => err,
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        let kind = match &e {
            KvError::InvalidKey { .. } => ErrorKind::Internal,
            KvError::ValueTooLarge { .. } | KvError::Storage { .. } => ErrorKind::Storage,
            KvError::Serialization { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RecordNotFound(id) => {
                AppError::new(ErrorKind::NotFound, format!("record not found: {id}"))
                    .with_context("record_id", id.as_str())
            }
            StoreError::Corrupted(message) => AppError::new(
                ErrorKind::Deserialization,
                format!("stored record list is corrupted: {message}"),
            ),
            StoreError::NotSignedIn => {
                AppError::new(ErrorKind::Authentication, "no signed-in user")
            }
            StoreError::Misconfigured(message) => AppError::new(ErrorKind::Configuration, message),
            StoreError::Kv(e) => e.into(),
            StoreError::Http(e) => e.into(),
        }
    }
}

impl From<FilterError> for AppError {
    fn from(e: FilterError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::Configuration, e.to_string())
    }
}

impl From<ExportError> for AppError {
    fn from(e: ExportError) -> Self {
        AppError::new(ErrorKind::Serialization, e.to_string())
    }
}
