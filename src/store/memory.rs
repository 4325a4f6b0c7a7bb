//! In-process object store.

use super::{
    ObjectMeta, ObjectStore, ObjectSummary, PutObject, PutOutcome, StoreError, WriteMode,
};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A stored object, as kept by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub cache_control: Option<String>,
    pub sha256: Option<String>,
}

/// Object store held in memory.
///
/// Uses Mutex (not RefCell) so it is Sync and works with rayon's par_iter.
/// Counts every mutating call so tests can assert "no remote writes".
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    objects: Mutex<BTreeMap<String, StoredObject>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Seed an object without counting it as a write.
    pub fn insert_raw(&self, key: &str, body: &[u8], sha256: Option<&str>) {
        self.lock().insert(
            key.to_string(),
            StoredObject {
                body: body.to_vec(),
                content_type: "application/octet-stream".to_string(),
                content_encoding: None,
                cache_control: None,
                sha256: sha256.map(str::to_string),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of successful puts that changed stored content.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        // A poisoned map still holds consistent entries; every mutation is a
        // single insert or remove.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(self.lock().get(key).map(|obj| ObjectMeta {
            sha256: obj.sha256.clone(),
        }))
    }

    fn put(&self, object: &PutObject) -> Result<PutOutcome, StoreError> {
        let mut objects = self.lock();
        if object.mode == WriteMode::CreateOnly && objects.contains_key(&object.key) {
            return Ok(PutOutcome::AlreadyExists);
        }
        objects.insert(
            object.key.clone(),
            StoredObject {
                body: object.body.clone(),
                content_type: object.content_type.clone(),
                content_encoding: object.content_encoding.clone(),
                cache_control: object.cache_control.clone(),
                sha256: Some(object.sha256.clone()),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(PutOutcome::Written)
    }

    fn list(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectSummary {
                key: key.clone(),
                size: obj.body.len() as u64,
            })
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.lock().remove(key).is_some() {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
