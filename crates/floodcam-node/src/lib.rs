//! Floodcam collector runtime.
//!
//! Wires the decoder and reassembly engine to a persistence backend: the
//! synchronous [`runtime`] pipeline, the [`finalize`] step with its
//! [`ObjectStore`](finalize::ObjectStore) contract, and the Tokio-driven
//! [`service`] that runs ingestion, eviction and persistence side by side.

pub mod config;
pub mod error;
pub mod finalize;
pub mod pairs;
pub mod persistence;
pub mod runtime;
pub mod service;

pub use config::ReassemblyConfig;
pub use error::{FinalizeError, PersistenceError, RuntimeError, ServiceError};
pub use finalize::{CompletedObject, Finalizer, ObjectStore, RecordId};
pub use runtime::{process_message, Pipeline, RuntimeEvent, RuntimeStats};
pub use service::CollectorService;
