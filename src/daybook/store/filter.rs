//! # Filtering Backend
//!
//! A read-only decorator that shows a live, filtered subset of another
//! backend without the source knowing anything about filtering.
//!
//! The filter text is pulled, not pushed: every `list`/`count` asks the
//! [`FilterText`] provider for its current value (typically whatever a search
//! box holds right now) and compares it with the text of the last recompute.
//!
//! - **Same text**: the memoized view is returned as-is.
//! - **Changed text**: a fresh snapshot is pulled from the source, documents
//!   failing [`Doc::matches`] are dropped, the rest are stable-sorted by
//!   modified-or-created time (newest first) and memoized under the new text.
//!   Empty text keeps every document.
//!
//! The memo is a single slot keyed by the one current filter value, and it is
//! replaced under the backend's lock, so callers never see a view that
//! disagrees with the text it was computed for.
//!
//! Writes and reconciles are rejected with [`DaybookError::ReadOnly`];
//! everything else delegates to the wrapped source.

use super::Backend;
use crate::error::{DaybookError, Result};
use crate::model::{sort_by_recency, Doc, DocId, DocType, SyncStatus};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Supplies the filter text at call time.
pub trait FilterText: Send + Sync {
    fn filter_text(&self) -> String;
}

impl<F> FilterText for F
where
    F: Fn() -> String + Send + Sync,
{
    fn filter_text(&self) -> String {
        self()
    }
}

struct FilterState {
    full: Vec<Doc>,
    filter_text: String,
    displayed: Vec<Doc>,
}

pub struct FilterBackend<B, F> {
    source: B,
    filter: F,
    state: Mutex<FilterState>,
}

impl<B: Backend, F: FilterText> FilterBackend<B, F> {
    /// Wrap `source`, pulling its full snapshot immediately.
    pub fn new(source: B, filter: F) -> Result<Self> {
        let full = source.list()?;
        let mut displayed = full.clone();
        sort_by_recency(&mut displayed);
        Ok(Self {
            source,
            filter,
            state: Mutex::new(FilterState {
                full,
                filter_text: String::new(),
                displayed,
            }),
        })
    }

    pub fn source(&self) -> &B {
        &self.source
    }

    /// The filter text the current view was computed for.
    pub fn current_filter(&self) -> String {
        self.state.lock().filter_text.clone()
    }

    fn displayed(&self) -> Vec<Doc> {
        let text = self.filter.filter_text();
        let mut state = self.state.lock();
        if text == state.filter_text {
            return state.displayed.clone();
        }

        match self.source.list() {
            Ok(full) => state.full = full,
            Err(err) => warn!(%err, "source list failed, filtering last snapshot"),
        }

        let mut displayed: Vec<Doc> = if text.trim().is_empty() {
            state.full.clone()
        } else {
            state
                .full
                .iter()
                .filter(|doc| doc.matches(&text))
                .cloned()
                .collect()
        };
        sort_by_recency(&mut displayed);
        debug!(
            filter = %text,
            matched = displayed.len(),
            total = state.full.len(),
            "recomputed filtered view"
        );

        state.displayed = displayed;
        state.filter_text = text;
        state.displayed.clone()
    }
}

impl<B: Backend, F: FilterText> Backend for FilterBackend<B, F> {
    fn doc_type(&self) -> DocType {
        self.source.doc_type()
    }

    fn list(&self) -> Result<Vec<Doc>> {
        Ok(self.displayed())
    }

    fn get(&self, id: &DocId, hard: bool) -> Result<Doc> {
        self.source.get(id, hard)
    }

    fn create_or_update(&self, _doc: Doc) -> Result<Doc> {
        Err(DaybookError::ReadOnly("filter backend"))
    }

    fn reconcile(&self, _id: &DocId) -> Result<Doc> {
        Err(DaybookError::ReadOnly("filter backend"))
    }

    fn count(&self) -> usize {
        self.displayed().len()
    }

    fn status(&self) -> SyncStatus {
        self.source.status()
    }

    fn storage_path(&self) -> String {
        self.source.storage_path()
    }

    fn storage_path_doc(&self, id: &DocId) -> String {
        self.source.storage_path_doc(id)
    }
}
