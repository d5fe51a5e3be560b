pub mod db;
pub mod error;
pub mod repo;
pub mod types;

pub use error::StorageError;
pub use repo::AuditRepository;
pub use types::{PersistedAnalysis, ReportGroup, Road, Transcription};
