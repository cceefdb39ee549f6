//! # Daybook Architecture
//!
//! Daybook is the **data layer of a journaling app**: a directory of daily
//! markdown files, plus cached views over remote services (calendars, cloud
//! notes), all exposed to a UI through one capability interface.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Presentation (not part of this crate)                      │
//! │  - Renders lists, navigates, edits                          │
//! │  - Only sees `Backend` and `Doc`                            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Backends (store/)                                          │
//! │  - FileStore: one watched file per day                      │
//! │  - FilterBackend: read-only filtered view of another backend│
//! │  - RemoteCache: TTL cache over a paginated RemoteSource     │
//! │  - MemoryBackend: in-memory, for tests                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Codec (store/frontmatter.rs)                               │
//! │  - `---` YAML metadata `---` body                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## No I/O Assumptions Above the Store
//!
//! Nothing in this crate writes to stdout or exits the process. Diagnostics
//! are `tracing` events; [`logging::init_tracing`] installs a stderr
//! subscriber for hosts that have none of their own.
//!
//! ## Configuration
//!
//! [`config::DaybookConfig`] reads `DAYBOOK_*` environment variables over
//! built-in defaults. [`store::fs::FileStore::from_config`] opens the
//! configured directory.
//!
//! ## Testing Strategy
//!
//! - **Codec and model**: plain unit tests, no filesystem.
//! - **Decorators**: tested over [`store::memory::MemoryBackend`], which
//!   counts `list()` calls so redundant recomputes show up.
//! - **Remote caching**: driven by [`clock::ManualClock`] and a scripted
//!   source, so staleness never depends on wall time.
//! - **File store**: `tests/` and the `test_utils` helpers run against a
//!   temporary directory.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod store;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use error::{DaybookError, Result};
pub use logging::{init_tracing, init_tracing_from_config};
pub use model::{Doc, DocId, DocType, SyncStatus};
pub use store::Backend;
