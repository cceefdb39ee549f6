use super::Backend;
use crate::error::{DaybookError, Result};
use crate::model::{sort_newest_first, Doc, DocId, DocType, SyncStatus};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory backend for testing logic without I/O.
///
/// Ids are assigned with the same epoch-seconds scheme as the file store.
/// `list_calls` counts every `list()` so decorators can be checked for
/// redundant work.
pub struct MemoryBackend {
    doc_type: DocType,
    docs: Mutex<HashMap<DocId, Doc>>,
    list_calls: AtomicUsize,
    simulate_write_error: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(DocType::Note)
    }
}

impl MemoryBackend {
    pub fn new(doc_type: DocType) -> Self {
        Self {
            doc_type,
            docs: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            simulate_write_error: AtomicBool::new(false),
        }
    }

    /// Seed with documents, storing each as-is through `create_or_update`.
    pub fn with_docs(self, docs: impl IntoIterator<Item = Doc>) -> Result<Self> {
        for doc in docs {
            self.create_or_update(doc)?;
        }
        Ok(self)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.simulate_write_error.store(simulate, Ordering::SeqCst);
    }

    pub fn remove(&self, id: &DocId) -> Option<Doc> {
        self.docs.lock().remove(id)
    }
}

impl Backend for MemoryBackend {
    fn doc_type(&self) -> DocType {
        self.doc_type
    }

    fn list(&self) -> Result<Vec<Doc>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut docs: Vec<Doc> = self.docs.lock().values().cloned().collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    fn get(&self, id: &DocId, _hard: bool) -> Result<Doc> {
        self.docs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| DaybookError::NotFound(id.clone()))
    }

    fn create_or_update(&self, mut doc: Doc) -> Result<Doc> {
        if self.simulate_write_error.load(Ordering::SeqCst) {
            return Err(DaybookError::Io(std::io::Error::other(
                "simulated write error",
            )));
        }
        let created = *doc.created.get_or_insert_with(Utc::now);
        let id = doc
            .id
            .get_or_insert_with(|| DocId::from_timestamp(created))
            .clone();
        self.docs.lock().insert(id, doc.clone());
        Ok(doc)
    }

    fn reconcile(&self, id: &DocId) -> Result<Doc> {
        self.get(id, true)
    }

    fn count(&self) -> usize {
        self.docs.lock().len()
    }

    fn status(&self) -> SyncStatus {
        SyncStatus::Ok
    }

    fn storage_path(&self) -> String {
        "memory://".to_string()
    }

    fn storage_path_doc(&self, id: &DocId) -> String {
        format!("memory://{}", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_assigns_id_and_created() {
        let backend = MemoryBackend::default();
        let stored = backend.create_or_update(Doc::new("hello")).unwrap();
        let id = stored.id.clone().unwrap();
        assert!(stored.created.is_some());
        assert_eq!(backend.get(&id, false).unwrap(), stored);
    }

    #[test]
    fn test_keeps_explicit_id() {
        let backend = MemoryBackend::default();
        let created = Utc.timestamp_opt(42, 0).unwrap();
        let stored = backend
            .create_or_update(Doc::new("x").with_id("evt-1").with_created(created))
            .unwrap();
        assert_eq!(stored.id, Some(DocId::from("evt-1")));
    }

    #[test]
    fn test_list_counts_calls() {
        let backend = MemoryBackend::default();
        backend.list().unwrap();
        backend.list().unwrap();
        assert_eq!(backend.list_calls(), 2);
    }

    #[test]
    fn test_simulated_write_error() {
        let backend = MemoryBackend::default();
        backend.set_simulate_write_error(true);
        let err = backend.create_or_update(Doc::new("x")).unwrap_err();
        assert!(err.is_io());
        assert_eq!(backend.count(), 0);
    }

    #[test]
    fn test_get_missing() {
        let backend = MemoryBackend::default();
        let err = backend.get(&DocId::from("nope"), false).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(backend.storage_path_doc(&DocId::from("a")), "memory://a");
    }
}
