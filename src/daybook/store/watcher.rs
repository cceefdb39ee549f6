//! Directory watching for external edits.
//!
//! The OS watcher never touches store state. Its callback only pushes changed
//! paths onto a channel; a dedicated consumer thread drains the channel and
//! runs the store's reconcile logic on its own schedule.
//!
//! ```text
//! notify callback ──path──▶ crossbeam channel ──▶ consumer thread ──▶ on_change(path)
//! ```
//!
//! Dropping (or [`DirWatcher::stop`]ping) the watcher releases the OS handle.
//! That drops the callback and with it the channel's only sender, so the
//! consumer loop ends and the thread is joined.

use crate::error::Result;
use crossbeam_channel::Sender;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub struct DirWatcher {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl DirWatcher {
    /// Watch `dir` (non-recursively) and call `on_change` on the consumer
    /// thread for every created or written path.
    pub fn spawn<F>(dir: &Path, mut on_change: F) -> Result<Self>
    where
        F: FnMut(PathBuf) + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded::<PathBuf>();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| forward(&tx, res),
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        let worker = thread::Builder::new()
            .name("daybook-watch".to_string())
            .spawn(move || {
                for path in rx.iter() {
                    on_change(path);
                }
                debug!("watch channel closed, consumer exiting");
            })?;

        debug!(dir = %dir.display(), "watching directory");
        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
        })
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Release the OS watch and wait for the consumer thread to finish.
    pub fn stop(&mut self) {
        drop(self.watcher.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("watch consumer thread panicked");
            }
        }
    }
}

impl Drop for DirWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(tx: &Sender<PathBuf>, res: notify::Result<Event>) {
    let event = match res {
        Ok(event) => event,
        Err(err) => {
            warn!(?err, "directory watch error");
            return;
        }
    };
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in event.paths {
        if tx.send(path).is_err() {
            // Consumer is gone; nothing left to notify.
            return;
        }
    }
}
