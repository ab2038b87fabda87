//! Save records, storage and background persistence

mod persistence;
mod record;
mod store;

pub use persistence::{
    AutosaveOutcome, Completion, PersistenceCoordinator, PersistenceEvent, SaveTrigger,
};
pub use record::{BodyRecord, FormatVersion, SaveRecord};
pub use store::{validate_slot, FileStore, SaveStore};

/// Errors that can occur while saving or loading
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported save format {found} (this build reads {}.x)", .supported.major)]
    UnsupportedVersion {
        found: FormatVersion,
        supported: FormatVersion,
    },

    #[error("invalid slot name {0:?}")]
    InvalidSlot(String),

    #[error("save slot {0:?} not found")]
    SlotNotFound(String),

    #[error("corrupt save record: {0}")]
    Corrupt(String),

    #[error("persistence worker is not running")]
    WorkerUnavailable,
}
