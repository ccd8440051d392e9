use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use floodcam_core::hash::blake3_32;
use floodcam_core::{AssemblyKey, ObjectDigest};

use crate::error::PersistenceError;
use crate::finalize::{CompletedObject, ObjectStore, RecordId};

/// Writes each object as an image file under one directory.
///
/// Files are written to a temporary name and renamed into place, so a reader
/// never sees a partial image. Re-storing identical bytes reuses the existing
/// file; a different object with the same name gets a digest suffix.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    /// Creates the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(PersistenceError::Write)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn same_digest(path: &Path, digest: &ObjectDigest) -> Result<bool, PersistenceError> {
        let existing = fs::read(path).map_err(PersistenceError::Read)?;
        Ok(&blake3_32(&existing) == digest)
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn store(&self, object: &CompletedObject) -> Result<RecordId, PersistenceError> {
        let mut path = self.root.join(object.file_name());
        if path.exists() {
            if Self::same_digest(&path, &object.digest)? {
                return Ok(RecordId(path.display().to_string()));
            }
            let stem = object.file_name();
            let stem = stem.trim_end_matches(".jpg");
            path = self
                .root
                .join(format!("{stem}_{}.jpg", object.digest_hex()));
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &object.bytes).map_err(PersistenceError::Write)?;
        fs::rename(&tmp, &path).map_err(PersistenceError::Write)?;
        Ok(RecordId(path.display().to_string()))
    }
}

/// Keeps objects in memory. Storing the same bytes under the same key again
/// returns the existing record.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: Vec<CompletedObject>,
    by_key: HashMap<(AssemblyKey, ObjectDigest), usize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of everything stored so far, in store order.
    pub fn objects(&self) -> Vec<CompletedObject> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .objects
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObjectStore for MemoryObjectStore {
    fn store(&self, object: &CompletedObject) -> Result<RecordId, PersistenceError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let dedup_key = (object.key.clone(), object.digest);
        if let Some(index) = inner.by_key.get(&dedup_key) {
            return Ok(RecordId(format!("mem-{index}")));
        }
        let index = inner.objects.len();
        inner.objects.push(object.clone());
        inner.by_key.insert(dedup_key, index);
        Ok(RecordId(format!("mem-{index}")))
    }
}
