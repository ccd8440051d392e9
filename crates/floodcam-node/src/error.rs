use floodcam_assembly::ReassemblyError;
use floodcam_codec::DecodeError;
use floodcam_core::AssemblyKey;
use thiserror::Error;

/// Errors returned by [`ObjectStore`](crate::finalize::ObjectStore) backends.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to write object file: {0}")]
    Write(std::io::Error),
    #[error("failed to read object file: {0}")]
    Read(std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Finalization failed for one object; the object has been dropped.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("persisting {key} failed after {attempts} attempts: {source}")]
    Persistence {
        key: AssemblyKey,
        attempts: u32,
        #[source]
        source: PersistenceError,
    },
}

/// Per-message failure in the ingest path. Never fatal to the loop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}

/// Submission to a [`CollectorService`](crate::service::CollectorService)
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("collector service is shut down")]
    Closed,
    #[error("ingest queue is full; message dropped")]
    QueueFull,
}
