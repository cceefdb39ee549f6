//! # Storage Layer
//!
//! This module defines the [`Backend`] trait: the one capability interface
//! every data source implements, whether it is a directory of markdown files
//! answering in microseconds or a calendar API answering in seconds. The
//! presentation layer only ever talks to `Backend` and [`Doc`] values.
//!
//! ## Implementations
//!
//! - [`fs::FileStore`]: One file per day in a watched directory. The files are
//!   the truth; an in-memory index is kept coherent by mtime comparison.
//! - [`filter::FilterBackend`]: Read-only decorator exposing a filtered,
//!   recency-sorted view of any other backend.
//! - [`remote::RemoteCache`]: Turns a paginated remote API ([`remote::RemoteSource`])
//!   into a cheap local collection with TTL-based full refetches.
//! - [`memory::MemoryBackend`]: Plain in-memory backend for testing logic
//!   without I/O.
//!
//! ## Soft vs Hard Reads
//!
//! `get(id, false)` answers from the cache only. `get(id, true)` first
//! reconciles that id against the source of truth. Backends in `Error` or
//! `Offline` status keep answering from their last good cache.
//!
//! ## Navigation
//!
//! [`Backend::next`] and [`Backend::previous`] walk the `list()` order
//! (newest first): `next` moves to the older neighbour, `previous` to the
//! newer one. Running off either end is reported as
//! [`DaybookError::NoNextDocument`] / [`DaybookError::NoPreviousDocument`].
//!
//! ## Concurrency
//!
//! All methods take `&self`. Each stateful backend guards its maps with a
//! single mutex, so backends can be shared across threads behind an `Arc`.

use crate::error::{DaybookError, Result};
use crate::model::{Doc, DocId, DocType, SyncStatus};
use std::sync::Arc;

pub mod filter;
pub mod frontmatter;
pub mod fs;
pub mod memory;
pub mod remote;
pub mod watcher;

/// Abstract interface for a document source.
pub trait Backend: Send + Sync {
    /// Fixed content kind, for display grouping.
    fn doc_type(&self) -> DocType;

    /// The current collection, newest first. May refresh first if the
    /// backend's freshness policy says so.
    fn list(&self) -> Result<Vec<Doc>>;

    /// Look up one document. `hard` reconciles against the source first.
    fn get(&self, id: &DocId, hard: bool) -> Result<Doc>;

    /// Persist a document, assigning id and creation time to drafts.
    /// Returns the document as stored.
    fn create_or_update(&self, doc: Doc) -> Result<Doc>;

    /// Refresh `id` from the source of truth and return the fresh value.
    fn reconcile(&self, id: &DocId) -> Result<Doc>;

    /// Size of the cached collection.
    fn count(&self) -> usize;

    fn status(&self) -> SyncStatus;

    /// Location descriptor for the whole backend (path, URL, ...).
    fn storage_path(&self) -> String;

    /// Location descriptor for one document.
    fn storage_path_doc(&self, id: &DocId) -> String;

    /// The next older document after `id` in `list()` order.
    fn next(&self, id: &DocId) -> Result<Doc> {
        let docs = self.list()?;
        let pos = position(&docs, id)?;
        docs.into_iter()
            .nth(pos + 1)
            .ok_or(DaybookError::NoNextDocument)
    }

    /// The next newer document before `id` in `list()` order.
    fn previous(&self, id: &DocId) -> Result<Doc> {
        let docs = self.list()?;
        let pos = position(&docs, id)?;
        if pos == 0 {
            return Err(DaybookError::NoPreviousDocument);
        }
        docs.into_iter()
            .nth(pos - 1)
            .ok_or(DaybookError::NoPreviousDocument)
    }
}

fn position(docs: &[Doc], id: &DocId) -> Result<usize> {
    docs.iter()
        .position(|doc| doc.id.as_ref() == Some(id))
        .ok_or_else(|| DaybookError::NotFound(id.clone()))
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn doc_type(&self) -> DocType {
        (**self).doc_type()
    }

    fn list(&self) -> Result<Vec<Doc>> {
        (**self).list()
    }

    fn get(&self, id: &DocId, hard: bool) -> Result<Doc> {
        (**self).get(id, hard)
    }

    fn create_or_update(&self, doc: Doc) -> Result<Doc> {
        (**self).create_or_update(doc)
    }

    fn reconcile(&self, id: &DocId) -> Result<Doc> {
        (**self).reconcile(id)
    }

    fn count(&self) -> usize {
        (**self).count()
    }

    fn status(&self) -> SyncStatus {
        (**self).status()
    }

    fn storage_path(&self) -> String {
        (**self).storage_path()
    }

    fn storage_path_doc(&self, id: &DocId) -> String {
        (**self).storage_path_doc(id)
    }
}
