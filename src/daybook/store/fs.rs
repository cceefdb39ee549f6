//! # File Store
//!
//! A directory of journal files, one per UTC calendar day, named
//! `YYYY-MM-DD.md` after the document's creation instant. The files are the
//! truth; the store keeps two maps in memory:
//!
//! - `entries`: id → document, the cache every soft read answers from.
//! - `mtimes`: id → last observed file mtime. Purely a staleness oracle.
//!
//! ## Lifecycle
//!
//! [`FileStore::open`] expands the directory, creates it if needed, loads
//! every matching file and starts a [`DirWatcher`]. A file that fails to
//! parse aborts the open: a corrupt note should be visible, not hidden.
//! The watcher is stopped when the store is dropped.
//!
//! ## Reconciliation
//!
//! Reconciling an id costs one `stat`, plus one read when the file is newer
//! than the recorded mtime (or the id is not cached yet). It is never a full
//! rescan. Outcomes:
//!
//! - **Fresh**: mtime unchanged → cached value returned.
//! - **Stale**: file newer → reloaded, cache replaced.
//! - **Zombie**: file gone → evicted, `NotFound`.
//! - **Replaced**: the day's file now holds another document → the old id is
//!   evicted, the new one adopted, `NotFound` for the old id.
//! - **Corrupt**: parse error returned, cache left as it was.
//!
//! Watcher events reconcile every known id mapped to the changed file, or
//! adopt the file as a new document when none is.
//!
//! ## Writes
//!
//! `create_or_update` holds the store lock for the whole write, so writes are
//! serialized. The file is written to a hidden temp file, synced, and renamed
//! over the target; the cache is only touched after the rename succeeds. A
//! failed write leaves the status at `Error`.
//!
//! ## One Document Per Day
//!
//! Because the filename only carries the date, two documents created on the
//! same UTC day share a file and the later write replaces the earlier one.
//! This is the journal semantic and is kept deliberately.
//!
//! Updating a document with a `created` on another day moves it: the new
//! day's file is written and the old one removed.

use super::frontmatter::{self, DELIMITER};
use super::watcher::DirWatcher;
use super::Backend;
use crate::config::{expand_path, normalize_ext, DaybookConfig};
use crate::error::{DaybookError, Result};
use crate::model::{sort_newest_first, Doc, DocId, DocType, SyncStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How to open a [`FileStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub dir: String,
    pub file_ext: String,
    pub watch: bool,
}

impl StoreOptions {
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            file_ext: ".md".to_string(),
            watch: true,
        }
    }

    pub fn with_file_ext(mut self, ext: &str) -> Self {
        self.file_ext = normalize_ext(ext);
        self
    }

    pub fn without_watcher(mut self) -> Self {
        self.watch = false;
        self
    }
}

impl From<&DaybookConfig> for StoreOptions {
    fn from(config: &DaybookConfig) -> Self {
        StoreOptions::new(config.storage_dir.clone()).with_file_ext(&config.file_ext)
    }
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<DocId, Doc>,
    mtimes: HashMap<DocId, SystemTime>,
    status: SyncStatus,
}

struct Shared {
    root: PathBuf,
    file_ext: String,
    state: Mutex<StoreState>,
}

pub struct FileStore {
    shared: Arc<Shared>,
    watcher: Mutex<Option<DirWatcher>>,
}

impl FileStore {
    /// Open `dir` with the default `.md` extension and a running watcher.
    pub fn open(dir: &str) -> Result<Self> {
        Self::open_with(StoreOptions::new(dir))
    }

    pub fn from_config(config: &DaybookConfig) -> Result<Self> {
        Self::open_with(StoreOptions::from(config))
    }

    pub fn open_with(options: StoreOptions) -> Result<Self> {
        let root = expand_path(&options.dir);
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }

        let shared = Arc::new(Shared {
            root,
            file_ext: normalize_ext(&options.file_ext),
            state: Mutex::new(StoreState::default()),
        });
        shared.load_all()?;

        let store = Self {
            shared,
            watcher: Mutex::new(None),
        };
        if options.watch {
            store.start_watching()?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    pub fn file_ext(&self) -> &str {
        &self.shared.file_ext
    }

    /// Start reconciling on external edits. No-op if already watching.
    pub fn start_watching(&self) -> Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let watcher = DirWatcher::spawn(&self.shared.root, move |path| {
            shared.on_file_changed(&path);
        })?;
        *slot = Some(watcher);
        Ok(())
    }

    /// Release the OS watch handle and join the consumer thread.
    pub fn stop_watching(&self) {
        // Take it out first so the join happens without our lock held.
        let watcher = self.watcher.lock().take();
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl Shared {
    fn path_for_created(&self, created: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{}{}", created.format("%Y-%m-%d"), self.file_ext))
    }

    /// Derived file path for `id`: from the cached creation time, or from
    /// the id itself when it follows the epoch-seconds scheme.
    fn path_for_id(&self, state: &StoreState, id: &DocId) -> Option<PathBuf> {
        state
            .entries
            .get(id)
            .and_then(|doc| doc.created)
            .or_else(|| id.as_timestamp())
            .map(|created| self.path_for_created(created))
    }

    /// Journal files only; hidden temp files from our own writes are skipped.
    fn is_store_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| !name.starts_with('.') && name.ends_with(&self.file_ext))
    }

    fn load_all(&self) -> Result<()> {
        let pattern = format!(
            "{}/*{}",
            glob::Pattern::escape(&self.root.to_string_lossy()),
            glob::Pattern::escape(&self.file_ext)
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| DaybookError::Validation(format!("bad storage path: {}", e)))?;

        let mut state = self.state.lock();
        for entry in paths {
            let path = entry.map_err(|e| DaybookError::Io(e.into_error()))?;
            if !self.is_store_file(&path) {
                continue;
            }
            let (doc, mtime) = load_file(&path).inspect_err(|err| {
                error!(path = %path.display(), %err, "failed to load journal file");
            })?;
            let id = stored_id(&doc)?;

            if let Some(created) = doc.created {
                if self.path_for_created(created).file_name() != path.file_name() {
                    warn!(
                        path = %path.display(),
                        %id,
                        "file name does not match creation date; it will not be found by id"
                    );
                }
            }
            if state.entries.contains_key(&id) {
                warn!(%id, path = %path.display(), "duplicate document id, keeping last");
            }
            state.mtimes.insert(id.clone(), mtime);
            state.entries.insert(id, doc);
        }
        state.status = SyncStatus::Ok;

        info!(
            root = %self.root.display(),
            count = state.entries.len(),
            "loaded journal"
        );
        Ok(())
    }

    fn reconcile(&self, id: &DocId) -> Result<Doc> {
        let path = {
            let state = self.state.lock();
            self.path_for_id(&state, id)
        }
        .ok_or_else(|| DaybookError::NotFound(id.clone()))?;

        let mtime = match fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut state = self.state.lock();
                if state.entries.remove(id).is_some() {
                    debug!(%id, "file gone, evicting");
                }
                state.mtimes.remove(id);
                return Err(DaybookError::NotFound(id.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        {
            let state = self.state.lock();
            if let (Some(doc), Some(seen)) = (state.entries.get(id), state.mtimes.get(id)) {
                if mtime <= *seen {
                    debug!(%id, "cache fresh");
                    return Ok(doc.clone());
                }
            }
        }

        // Parse failures surface here with the cache untouched.
        let (doc, mtime) = load_file(&path)?;
        let loaded_id = stored_id(&doc)?;

        let mut state = self.state.lock();
        if loaded_id != *id {
            warn!(%id, replaced_by = %loaded_id, "day file now holds another document");
            state.entries.remove(id);
            state.mtimes.remove(id);
            state.mtimes.insert(loaded_id.clone(), mtime);
            state.entries.insert(loaded_id, doc);
            return Err(DaybookError::NotFound(id.clone()));
        }
        debug!(%id, "reloaded from disk");
        state.mtimes.insert(loaded_id.clone(), mtime);
        state.entries.insert(loaded_id, doc.clone());
        Ok(doc)
    }

    fn create_or_update(&self, mut doc: Doc) -> Result<Doc> {
        let mut state = self.state.lock();

        let cached_created = doc
            .id
            .as_ref()
            .and_then(|id| state.entries.get(id))
            .and_then(|d| d.created);
        let created = doc
            .created
            .or(cached_created)
            .or_else(|| doc.id.as_ref().and_then(DocId::as_timestamp))
            .unwrap_or_else(now_secs);
        doc.created = Some(created);
        let id = doc
            .id
            .get_or_insert_with(|| DocId::from_timestamp(created))
            .clone();
        let path = self.path_for_created(created);

        let mtime = match write_file(&path, &doc) {
            Ok(mtime) => mtime,
            Err(err) => {
                error!(%id, path = %path.display(), %err, "write failed");
                if err.is_io() {
                    state.status = SyncStatus::Error;
                }
                return Err(err);
            }
        };
        state.status = SyncStatus::Ok;

        // Moved to another day: the previous file would otherwise resurface
        // on the next load with the same id.
        let moved_from = cached_created
            .map(|c| self.path_for_created(c))
            .filter(|old| *old != path);
        if let Some(old_path) = moved_from {
            let still_used = state.entries.iter().any(|(other, d)| {
                *other != id && d.created.is_some_and(|c| self.path_for_created(c) == old_path)
            });
            if !still_used {
                remove_moved_file(&id, &old_path);
            }
        }

        // Whatever else lived in this day's file was just overwritten.
        let displaced: Vec<DocId> = state
            .entries
            .iter()
            .filter(|(other, d)| {
                **other != id && d.created.is_some_and(|c| self.path_for_created(c) == path)
            })
            .map(|(other, _)| other.clone())
            .collect();
        for other in displaced {
            warn!(id = %other, replaced_by = %id, "same-day document overwritten");
            state.entries.remove(&other);
            state.mtimes.remove(&other);
        }

        state.mtimes.insert(id.clone(), mtime);
        state.entries.insert(id, doc.clone());
        Ok(doc)
    }

    fn on_file_changed(&self, path: &Path) {
        if !self.is_store_file(path) {
            return;
        }
        let known: Vec<DocId> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .filter(|(_, doc)| {
                    doc.created
                        .is_some_and(|c| self.path_for_created(c).file_name() == path.file_name())
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        if known.is_empty() {
            self.adopt(path);
            return;
        }
        for id in known {
            match self.reconcile(&id) {
                Ok(_) => {}
                Err(DaybookError::NotFound(_)) => {}
                Err(err) => warn!(%id, %err, "reconcile after external edit failed"),
            }
        }
    }

    /// A matching file no cached document maps to.
    fn adopt(&self, path: &Path) {
        let (doc, mtime) = match load_file(path) {
            Ok(loaded) => loaded,
            Err(err) => {
                warn!(path = %path.display(), %err, "ignoring unreadable new file");
                return;
            }
        };
        let Ok(id) = stored_id(&doc) else {
            return;
        };
        info!(%id, path = %path.display(), "adopted new file");
        let mut state = self.state.lock();
        state.mtimes.insert(id.clone(), mtime);
        state.entries.insert(id, doc);
    }
}

fn remove_moved_file(id: &DocId, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(%id, path = %path.display(), "removed previous day file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(%id, path = %path.display(), %err, "could not remove previous day file"),
    }
}

fn now_secs() -> DateTime<Utc> {
    DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now)
}

fn stored_id(doc: &Doc) -> Result<DocId> {
    doc.id
        .clone()
        .ok_or_else(|| DaybookError::Validation("document has no id".to_string()))
}

/// The mtime is taken from the open handle before reading, so a write that
/// lands in between makes the recorded mtime older, never newer.
fn load_file(path: &Path) -> Result<(Doc, SystemTime)> {
    let mut file = File::open(path)?;
    let mtime = file.metadata()?.modified()?;
    let mut raw = String::new();
    file.read_to_string(&mut raw)?;
    let doc = frontmatter::decode(&raw)?;
    Ok((doc, mtime))
}

/// Write via a hidden temp file in the same directory, then rename over
/// `path`. Returns the mtime of the finished file.
fn write_file(path: &Path, doc: &Doc) -> Result<SystemTime> {
    let metadata = frontmatter::encode_metadata(doc)?;
    let dir = path
        .parent()
        .ok_or_else(|| DaybookError::Validation(format!("no parent for {}", path.display())))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = dir.join(format!(".{}.{}.tmp", name, Uuid::new_v4()));

    let written = (|| -> io::Result<SystemTime> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut out = BufWriter::new(file);
        write!(out, "{}\n{}{}\n", DELIMITER, metadata, DELIMITER)?;
        out.write_all(doc.content.as_bytes())?;
        out.write_all(b"\n")?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        // Rename keeps the inode, so this is the mtime the target ends up with.
        let mtime = file.metadata()?.modified()?;
        fs::rename(&tmp_path, path)?;
        Ok(mtime)
    })();

    written.map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        err.into()
    })
}

impl Backend for FileStore {
    fn doc_type(&self) -> DocType {
        DocType::Journal
    }

    fn list(&self) -> Result<Vec<Doc>> {
        let mut docs: Vec<Doc> = self.shared.state.lock().entries.values().cloned().collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    fn get(&self, id: &DocId, hard: bool) -> Result<Doc> {
        if hard {
            return self.shared.reconcile(id);
        }
        self.shared
            .state
            .lock()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| DaybookError::NotFound(id.clone()))
    }

    fn create_or_update(&self, doc: Doc) -> Result<Doc> {
        self.shared.create_or_update(doc)
    }

    fn reconcile(&self, id: &DocId) -> Result<Doc> {
        self.shared.reconcile(id)
    }

    fn count(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    fn status(&self) -> SyncStatus {
        self.shared.state.lock().status
    }

    fn storage_path(&self) -> String {
        self.shared.root.display().to_string()
    }

    fn storage_path_doc(&self, id: &DocId) -> String {
        let state = self.shared.state.lock();
        self.shared
            .path_for_id(&state, id)
            .unwrap_or_else(|| self.shared.root.join(format!("{}{}", id, self.shared.file_ext)))
            .display()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use chrono::TimeZone;

    const JUNE_30: i64 = 1625025715;

    fn entry(secs: i64, content: &str) -> Doc {
        Doc::new(content).with_created(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_open_status_is_ok() {
        let env = TestEnv::new();
        assert_eq!(env.store.status(), SyncStatus::Ok);
        assert!(!env.store.is_watching());
    }

    #[test]
    fn test_failed_write_sets_error_status() {
        let env = TestEnv::new();
        // A directory squatting on the day's file name makes the rename fail.
        fs::create_dir(env.root.join("2021-06-30.md")).unwrap();

        let err = env.store.create_or_update(entry(JUNE_30, "lost")).unwrap_err();
        assert!(err.is_io());
        assert_eq!(env.store.status(), SyncStatus::Error);
        assert_eq!(env.store.count(), 0);

        fs::remove_dir(env.root.join("2021-06-30.md")).unwrap();
        env.store.create_or_update(entry(JUNE_30, "saved")).unwrap();
        assert_eq!(env.store.status(), SyncStatus::Ok);
    }

    #[test]
    fn test_corrupt_edit_keeps_cached_document() {
        let env = TestEnv::with_files(&[(
            "2021-06-30.md",
            entry(JUNE_30, "good").with_id(JUNE_30),
        )]);
        let id = DocId::from(JUNE_30);

        env.edit_externally("2021-06-30.md", "garbage without metadata\n", 5);

        assert!(env.store.get(&id, true).unwrap_err().is_parse());
        assert_eq!(env.store.get(&id, false).unwrap().content, "good");
    }

    #[test]
    fn test_replaced_day_file_evicts_old_id() {
        let env = TestEnv::with_files(&[(
            "2021-06-30.md",
            entry(JUNE_30, "old").with_id(JUNE_30),
        )]);
        let old = DocId::from(JUNE_30);
        let newer = JUNE_30 + 60;

        let raw = frontmatter::encode(&entry(newer, "new").with_id(newer)).unwrap();
        env.edit_externally("2021-06-30.md", &raw, 5);

        assert!(env.store.reconcile(&old).unwrap_err().is_not_found());
        let adopted = env.store.get(&DocId::from(newer), false).unwrap();
        assert_eq!(adopted.content, "new");
        assert_eq!(env.store.count(), 1);
    }

    #[test]
    fn test_file_event_adopts_unknown_file() {
        let env = TestEnv::new();
        let raw = frontmatter::encode(&entry(JUNE_30, "from elsewhere")).unwrap();
        let path = env.root.join("2021-06-30.md");
        fs::write(&path, raw).unwrap();

        env.store.shared.on_file_changed(&path);

        let doc = env.store.get(&DocId::from(JUNE_30), false).unwrap();
        assert_eq!(doc.content, "from elsewhere");
    }

    #[test]
    fn test_file_event_ignores_temp_and_foreign_files() {
        let env = TestEnv::new();
        let raw = frontmatter::encode(&entry(JUNE_30, "x")).unwrap();
        for name in [".2021-06-30.md.abc.tmp", "2021-06-30.txt"] {
            let path = env.root.join(name);
            fs::write(&path, &raw).unwrap();
            env.store.shared.on_file_changed(&path);
        }
        assert_eq!(env.store.count(), 0);
    }

    #[test]
    fn test_file_event_reconciles_known_document() {
        let env = TestEnv::with_files(&[(
            "2021-06-30.md",
            entry(JUNE_30, "v1").with_id(JUNE_30),
        )]);
        let raw = frontmatter::encode(&entry(JUNE_30, "v2").with_id(JUNE_30)).unwrap();
        env.edit_externally("2021-06-30.md", &raw, 5);

        env.store.shared.on_file_changed(&env.root.join("2021-06-30.md"));

        let doc = env.store.get(&DocId::from(JUNE_30), false).unwrap();
        assert_eq!(doc.content, "v2");
    }

    #[test]
    fn test_unknown_non_timestamp_id_has_fallback_path() {
        let env = TestEnv::new();
        let path = env.store.storage_path_doc(&DocId::from("someday"));
        assert!(path.ends_with("someday.md"));
        assert!(env.store.reconcile(&DocId::from("someday")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_rejected_metadata_writes_nothing() {
        let env = TestEnv::new();
        let doc = entry(JUNE_30, "body").with_tags(["a---b"]);

        let err = env.store.create_or_update(doc).unwrap_err();

        assert!(matches!(err, DaybookError::Validation(_)));
        assert_eq!(env.store.status(), SyncStatus::Ok);
        assert_eq!(fs::read_dir(&env.root).unwrap().count(), 0);
    }

    #[test]
    fn test_recorded_mtime_matches_written_file() {
        let env = TestEnv::new();
        env.store.create_or_update(entry(JUNE_30, "x")).unwrap();

        let on_disk = fs::metadata(env.root.join("2021-06-30.md"))
            .unwrap()
            .modified()
            .unwrap();
        let state = env.store.shared.state.lock();
        assert_eq!(state.mtimes.get(&DocId::from(JUNE_30)), Some(&on_disk));
    }

    #[test]
    fn test_load_file_reports_handle_mtime() {
        let env = TestEnv::new();
        let path = env.root.join("2021-06-30.md");
        fs::write(&path, frontmatter::encode(&entry(JUNE_30, "x")).unwrap()).unwrap();
        crate::test_utils::bump_mtime(&path, 5);

        let (doc, mtime) = load_file(&path).unwrap();
        assert_eq!(doc.content, "x");
        assert_eq!(mtime, fs::metadata(&path).unwrap().modified().unwrap());
    }

    #[test]
    fn test_moving_to_another_day_removes_old_file() {
        let env = TestEnv::new();
        let id = DocId::from(JUNE_30 + 86400);
        env.store
            .create_or_update(entry(JUNE_30 + 86400, "draft"))
            .unwrap();

        let moved = Doc::new("final")
            .with_id(id.clone())
            .with_created(Utc.timestamp_opt(JUNE_30, 0).unwrap());
        env.store.create_or_update(moved).unwrap();

        assert!(env.root.join("2021-06-30.md").exists());
        assert!(!env.root.join("2021-07-01.md").exists());
        assert_eq!(env.store.get(&id, true).unwrap().content, "final");
    }
}
