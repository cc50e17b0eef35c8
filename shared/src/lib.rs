//! Shared core for the civic issue reporting app.
//!
//! Before a citizen files a complaint, open complaints of the same category
//! near the reported spot are offered as likely duplicates. Supporting one
//! adds the citizen as a supporter and upvoter instead of creating a new
//! record. Submissions that cannot reach the store wait in an offline queue.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod detector;
pub mod error;
pub mod external;
pub mod geo;
pub mod model;
pub mod queue;
pub mod service;
pub mod session;
pub mod store;
pub mod workflow;

pub use config::{ConfigError, DedupConfig};
pub use detector::DuplicateDetector;
pub use error::{
    AppError, AppResult, ErrorKind, ErrorSeverity, QueueError, StoreError, WorkflowError,
};
pub use external::{locate, resolve_image, Address, GeolocationProvider, ImageStore};
pub use geo::{distance_meters, format_distance, is_within_radius, BoundingBox, Coordinate};
pub use model::{
    Category, CitizenId, Complaint, ComplaintId, ComplaintStatus, DraftComplaint, ImageRef,
    Location, NearbyMatch, Severity, StatusEvent, StatusUpdate, UnixTimeMs,
};
pub use queue::{DrainReport, MemoryQueueStorage, OfflineQueue, QueueStorage};
#[cfg(not(target_arch = "wasm32"))]
pub use queue::FileQueueStorage;
pub use service::DedupService;
pub use session::{Role, Session, SessionContext};
pub use store::{ComplaintStore, InMemoryComplaintStore, TimeoutStore};
#[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
pub use store::SqliteComplaintStore;
pub use workflow::{DedupWorkflow, RetryTarget, Submission, SubmissionMode, WorkflowState};

pub const DEFAULT_DEDUP_RADIUS_M: f64 = 100.0;
pub const MAX_DEDUP_RADIUS_M: f64 = 5_000.0;
pub const DEFAULT_MAX_CANDIDATES: usize = 50;
/// Upper bound on candidates a single nearby query may return.
pub const MAX_CANDIDATES_LIMIT: usize = 500;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;
/// Largest offline queue the file storage can hold within its size limit.
pub const MAX_QUEUE_CAPACITY: usize = 1_000;
