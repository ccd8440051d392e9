use std::fmt;
use std::sync::Arc;

use floodcam_assembly::{AssemblyBuffer, CompletionKind};
use floodcam_codec::envelope::ImageEnvelope;
use floodcam_core::hash::{blake3_32, digest_short_hex};
use floodcam_core::{AssemblyKey, ObjectDigest};
use tracing::{error, info, warn};

use crate::error::{FinalizeError, PersistenceError};

/// How an object reached the finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectSource {
    /// Reassembled from `chunks` path-encoded chunks.
    Chunked { kind: CompletionKind, chunks: u64 },
    /// Delivered whole in a JSON envelope.
    Envelope,
}

impl ObjectSource {
    /// Short label for logs and stored rows.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectSource::Chunked {
                kind: CompletionKind::Exact,
                ..
            } => "chunked",
            ObjectSource::Chunked {
                kind: CompletionKind::Truncated { .. },
                ..
            } => "chunked-truncated",
            ObjectSource::Envelope => "envelope",
        }
    }
}

/// Producer metadata carried alongside the bytes. Chunked objects only know
/// their key; envelopes fill the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerTags {
    pub device: Option<String>,
    pub reason: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<i64>,
    pub difference: Option<f64>,
}

/// A finished object ready for the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedObject {
    pub key: AssemblyKey,
    pub bytes: Vec<u8>,
    /// Declared size the object was finalized against.
    pub total_size: u32,
    /// Length of `bytes`.
    pub actual_size: u32,
    pub contiguous: bool,
    pub source: ObjectSource,
    pub tags: ProducerTags,
    pub digest: ObjectDigest,
}

impl CompletedObject {
    pub fn digest_hex(&self) -> String {
        digest_short_hex(&self.digest)
    }

    /// `<variant>_<session>_<size>bytes.jpg`
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}bytes.jpg",
            self.key.variant, self.key.session, self.actual_size
        )
    }
}

/// Builds the final object from a detached, contiguous buffer.
pub fn assemble(buffer: AssemblyBuffer, kind: CompletionKind) -> CompletedObject {
    let total_size = buffer.total_size();
    let bytes = buffer.assemble(total_size);
    let actual_size = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    CompletedObject {
        key: buffer.key().clone(),
        digest: blake3_32(&bytes),
        bytes,
        total_size,
        actual_size,
        contiguous: actual_size == total_size,
        source: ObjectSource::Chunked {
            kind,
            chunks: buffer.chunks_seen(),
        },
        tags: ProducerTags::default(),
    }
}

/// Wraps a whole-image envelope; no buffer is involved.
pub fn from_envelope(envelope: ImageEnvelope) -> CompletedObject {
    let key = envelope.key();
    let actual_size = u32::try_from(envelope.image.len()).unwrap_or(u32::MAX);
    if let Some(declared) = envelope.declared_size {
        if declared != u64::from(actual_size) {
            warn!(
                session = %key.session,
                variant = %key.variant,
                declared,
                actual = actual_size,
                "envelope size field disagrees with decoded image"
            );
        }
    }
    CompletedObject {
        digest: blake3_32(&envelope.image),
        key,
        bytes: envelope.image,
        total_size: actual_size,
        actual_size,
        contiguous: true,
        source: ObjectSource::Envelope,
        tags: ProducerTags {
            device: Some(envelope.device),
            reason: Some(envelope.reason),
            width: envelope.width,
            height: envelope.height,
            format: envelope.format,
            difference: envelope.difference,
        },
    }
}

/// Identifier a store hands back for a persisted object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(pub String);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable sink for finalized objects.
///
/// `store` must be durable when it returns `Ok`. Storing an object whose
/// digest is already present may return the existing record.
pub trait ObjectStore {
    fn store(&self, object: &CompletedObject) -> Result<RecordId, PersistenceError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn store(&self, object: &CompletedObject) -> Result<RecordId, PersistenceError> {
        (**self).store(object)
    }
}

/// Hands completed objects to a store, retrying a bounded number of times.
pub struct Finalizer<S> {
    store: S,
    retries: u32,
}

impl<S: ObjectStore> Finalizer<S> {
    pub fn new(store: S, retries: u32) -> Self {
        Self { store, retries }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persists `object`. After `1 + retries` failed attempts the object is
    /// dropped and the last error returned.
    pub fn finalize(&self, object: &CompletedObject) -> Result<RecordId, FinalizeError> {
        let attempts = self.retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.store.store(object) {
                Ok(record) => {
                    info!(
                        session = %object.key.session,
                        variant = %object.key.variant,
                        size = object.actual_size,
                        digest = %object.digest_hex(),
                        record = %record,
                        "object finalized"
                    );
                    return Ok(record);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        session = %object.key.session,
                        variant = %object.key.variant,
                        attempt,
                        "store failed, retrying: {err}"
                    );
                    attempt += 1;
                }
                Err(source) => {
                    let err = FinalizeError::Persistence {
                        key: object.key.clone(),
                        attempts,
                        source,
                    };
                    error!(
                        session = %object.key.session,
                        variant = %object.key.variant,
                        "{err}; dropping object"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use floodcam_assembly::{AssemblyBuffer, CompletionKind};
    use floodcam_codec::envelope::ImageEnvelope;
    use floodcam_core::hash::blake3_32;
    use floodcam_core::{AssemblyKey, SessionId, Variant};

    use super::{
        assemble, from_envelope, CompletedObject, Finalizer, ObjectSource, ObjectStore, RecordId,
    };
    use crate::error::{FinalizeError, PersistenceError};

    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    impl ObjectStore for FlakyStore {
        fn store(&self, _object: &CompletedObject) -> Result<RecordId, PersistenceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(PersistenceError::Backend(format!("failure {call}")))
            } else {
                Ok(RecordId(format!("rec-{call}")))
            }
        }
    }

    fn object() -> CompletedObject {
        let mut buffer = AssemblyBuffer::new(
            AssemblyKey::new(SessionId(42), Variant::Current),
            4,
            Instant::now(),
        );
        buffer.insert(2, vec![3, 4], Instant::now());
        buffer.insert(0, vec![1, 2], Instant::now());
        assemble(buffer, CompletionKind::Exact)
    }

    #[test]
    fn assemble_fills_metadata() {
        let obj = object();
        assert_eq!(obj.bytes, vec![1, 2, 3, 4]);
        assert_eq!(obj.total_size, 4);
        assert_eq!(obj.actual_size, 4);
        assert!(obj.contiguous);
        assert_eq!(obj.digest, blake3_32(&[1, 2, 3, 4]));
        assert_eq!(
            obj.source,
            ObjectSource::Chunked {
                kind: CompletionKind::Exact,
                chunks: 2
            }
        );
        assert_eq!(obj.file_name(), "atual_42_4bytes.jpg");
    }

    #[test]
    fn envelope_object_keeps_producer_tags() {
        let obj = from_envelope(ImageEnvelope {
            timestamp: 1_700_000_000,
            device: "esp32cam_001".to_string(),
            reason: "first_capture".to_string(),
            variant: Variant::Previous,
            image: vec![9; 10],
            declared_size: Some(12),
            width: Some(320),
            height: Some(240),
            format: None,
            difference: Some(3.5),
        });
        assert_eq!(
            obj.key,
            AssemblyKey::new(SessionId(1_700_000_000), Variant::Previous)
        );
        assert_eq!(obj.actual_size, 10);
        assert!(obj.contiguous);
        assert_eq!(obj.source, ObjectSource::Envelope);
        assert_eq!(obj.tags.device.as_deref(), Some("esp32cam_001"));
        assert_eq!(obj.tags.difference, Some(3.5));
    }

    #[test]
    fn one_retry_recovers_transient_failure() {
        let finalizer = Finalizer::new(
            FlakyStore {
                failures: 1,
                calls: AtomicU32::new(0),
            },
            1,
        );
        let record = finalizer.finalize(&object()).expect("retry should succeed");
        assert_eq!(record, RecordId("rec-1".to_string()));
        assert_eq!(finalizer.store().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn repeated_failure_is_surfaced_after_one_retry() {
        let finalizer = Finalizer::new(
            FlakyStore {
                failures: 5,
                calls: AtomicU32::new(0),
            },
            1,
        );
        let err = finalizer.finalize(&object()).expect_err("should give up");
        let FinalizeError::Persistence { attempts, .. } = err;
        assert_eq!(attempts, 2);
        assert_eq!(finalizer.store().calls.load(Ordering::SeqCst), 2);
    }
}
