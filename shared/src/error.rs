use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::config::ConfigError;
use crate::external::LocationError;
use crate::geo::CoordinateError;
use crate::model::{CategoryError, ComplaintId, DraftError, IdError, TransitionError};
use crate::session::SessionError;

/// Failures surfaced by a [`crate::store::ComplaintStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The request itself is malformed. Retrying will not help.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("complaint not found: {0}")]
    NotFound(ComplaintId),

    /// The backing store could not be reached or did not answer in time.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<DraftError> for StoreError {
    fn from(e: DraftError) -> Self {
        StoreError::Validation(e.to_string())
    }
}

impl From<CoordinateError> for StoreError {
    fn from(e: CoordinateError) -> Self {
        StoreError::Validation(e.to_string())
    }
}

impl From<TransitionError> for StoreError {
    fn from(e: TransitionError) -> Self {
        StoreError::Validation(e.to_string())
    }
}

/// Failures of the on-device offline queue and its persistence.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("offline queue is full ({max} entries)")]
    Full { max: usize },

    #[error("queue capacity must be between 1 and {max}, got {capacity}")]
    CapacityOutOfRange { capacity: usize, max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted queue file: {reason}")]
    Corrupted { reason: &'static str },

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: u32, max: u32 },

    #[error("queue file too large: {size} bytes, max {max}")]
    TooLarge { size: usize, max: usize },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<ciborium::de::Error<std::io::Error>> for QueueError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for QueueError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        QueueError::Serialization(e.to_string())
    }
}

/// Failures of a [`crate::workflow::DedupWorkflow`] step.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: &'static str,
        action: &'static str,
    },

    #[error("{0} is not one of the offered candidates")]
    UnknownCandidate(ComplaintId),

    /// The chosen candidate disappeared between listing and supporting.
    #[error("complaint {0} is no longer available")]
    CandidateUnavailable(ComplaintId),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("background task failed: {0}")]
    Interrupted(String),
}

impl From<tokio::task::JoinError> for WorkflowError {
    fn from(e: tokio::task::JoinError) -> Self {
        WorkflowError::Interrupted(e.to_string())
    }
}

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
    Validation,
    NotFound,
    QuotaExceeded,
    Storage,
    Serialization,
    Deserialization,
    Location,
    LocationPermissionDenied,
    InvalidState,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Authentication => "AUTH_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::Storage => "STORAGE_ERROR",
            Self::Serialization => "SERIALIZATION_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::Location => "LOCATION_ERROR",
            Self::LocationPermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::InvalidState => "INVALID_STATE",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Timeout | Self::Storage | Self::Location => {
                ErrorSeverity::Transient
            }

            Self::Serialization | Self::Deserialization | Self::Internal | Self::InvalidState => {
                ErrorSeverity::Fatal
            }

            Self::Authentication
            | Self::Validation
            | Self::NotFound
            | Self::QuotaExceeded
            | Self::LocationPermissionDenied => ErrorSeverity::Permanent,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Storage | Self::Location
        )
    }
}

/// Shell-facing error: a stable code, a severity and a message that can be
/// shown to the citizen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
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
                "Could not reach the complaints service. Check your connection and try again.".into()
            }
            ErrorKind::Timeout => "The complaints service is taking too long. Try again shortly.".into(),
            ErrorKind::Authentication => "Please sign in to report an issue.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::NotFound => "This issue is no longer available.".into(),
            ErrorKind::QuotaExceeded => {
                "Your report could not be saved, even on this device. Please try again when you are back online."
                    .into()
            }
            ErrorKind::Storage => {
                "Your report could not be saved on this device. Free up some space and try again.".into()
            }
            ErrorKind::Serialization | ErrorKind::Deserialization => {
                "Saved reports on this device could not be read.".into()
            }
            ErrorKind::Location => {
                "Could not find where you are. Turn on GPS or pick the spot on the map.".into()
            }
            ErrorKind::LocationPermissionDenied => {
                "Reporting an issue needs your location. Allow location access in Settings."
                    .into()
            }
            ErrorKind::InvalidState => {
                "Something went wrong with this report. Start a new one.".into()
            }
            ErrorKind::Internal => {
                "Something went wrong. Try again in a moment.".into()
            }
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<IdError> for AppError {
    fn from(e: IdError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<CategoryError> for AppError {
    fn from(e: CategoryError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<DraftError> for AppError {
    fn from(e: DraftError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::new(ErrorKind::InvalidState, "Invalid configuration").with_internal(e.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::Validation(msg) => AppError::new(ErrorKind::Validation, msg.clone()),
            StoreError::NotFound(id) => AppError::new(ErrorKind::NotFound, e.to_string())
                .with_context("complaint_id", id.as_str()),
            StoreError::Unavailable(_) => {
                AppError::new(ErrorKind::Network, "Complaint service unavailable")
                    .with_internal(e.to_string())
            }
        }
    }
}

impl From<QueueError> for AppError {
    fn from(e: QueueError) -> Self {
        let kind = match &e {
            QueueError::Full { .. } => ErrorKind::QuotaExceeded,
            QueueError::CapacityOutOfRange { .. } => ErrorKind::Validation,
            QueueError::Io(_) | QueueError::Storage(_) | QueueError::TooLarge { .. } => {
                ErrorKind::Storage
            }
            QueueError::Serialization(_) => ErrorKind::Serialization,
            QueueError::Corrupted { .. }
            | QueueError::IntegrityCheckFailed { .. }
            | QueueError::FutureSchema { .. } => ErrorKind::Deserialization,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::new(ErrorKind::Authentication, e.to_string())
    }
}

impl From<LocationError> for AppError {
    fn from(e: LocationError) -> Self {
        let kind = match &e {
            LocationError::PermissionDenied => ErrorKind::LocationPermissionDenied,
            LocationError::Unavailable(_) | LocationError::InvalidFix(_) => ErrorKind::Location,
        };
        AppError::new(kind, e.to_string())
    }
}

impl From<WorkflowError> for AppError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::InvalidTransition { .. } | WorkflowError::Interrupted(_) => {
                AppError::new(ErrorKind::InvalidState, e.to_string())
            }
            WorkflowError::UnknownCandidate(_) => {
                AppError::new(ErrorKind::Validation, e.to_string())
            }
            WorkflowError::CandidateUnavailable(id) => {
                AppError::new(ErrorKind::NotFound, "This issue is no longer available")
                    .with_context("complaint_id", id.as_str())
            }
            WorkflowError::Session(e) => e.into(),
            WorkflowError::Store(e) => e.into(),
            WorkflowError::Queue(e) => e.into(),
        }
    }
}
