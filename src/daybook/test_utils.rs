use crate::model::Doc;
use crate::store::frontmatter;
use crate::store::fs::{FileStore, StoreOptions};
use std::fs::{self, File};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub struct TestEnv {
    // Held so the directory outlives the store.
    pub _temp_dir: TempDir,
    pub store: FileStore,
    pub root: PathBuf,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// An empty store without a watcher, so tests control every reconcile.
    pub fn new() -> Self {
        Self::with_files(&[])
    }

    /// Seed the directory with `(file name, document)` pairs before opening.
    pub fn with_files(files: &[(&str, Doc)]) -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        for (name, doc) in files {
            let raw = frontmatter::encode(doc).expect("failed to encode fixture");
            fs::write(root.join(name), raw).expect("failed to write fixture");
        }
        let store = FileStore::open_with(
            StoreOptions::new(root.to_string_lossy().into_owned()).without_watcher(),
        )
        .expect("failed to open store");
        Self {
            _temp_dir: temp_dir,
            store,
            root,
        }
    }

    /// Overwrite a file behind the store's back and push its mtime `secs`
    /// into the future, so coarse filesystem timestamps still compare newer.
    pub fn edit_externally(&self, name: &str, raw: &str, secs: u64) {
        let path = self.root.join(name);
        fs::write(&path, raw).expect("failed to write file");
        bump_mtime(&path, secs);
    }
}

pub fn bump_mtime(path: &std::path::Path, secs: u64) {
    let file = File::options()
        .write(true)
        .open(path)
        .expect("failed to open file");
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .expect("failed to set mtime");
}
