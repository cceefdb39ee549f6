//! # Remote Cache
//!
//! Makes a slow, rate-limited remote API (calendar, cloud notes, ...) look
//! like a cheap local collection. A concrete service only implements
//! [`RemoteSource`]: one paginated list call, plus an optional write. The
//! caching policy lives here, once, in [`RemoteCache`].
//!
//! ## State Machine
//!
//! ```text
//! Uninitialized ──▶ Synchronizing ──▶ Ok ──(stale)──▶ Synchronizing
//!                        │                                  │
//!                        └──────(fetch fails)──▶ Error ◀────┘
//! ```
//!
//! A collection is stale when it was never fetched or the last successful
//! fetch is older than the refresh interval. [`Backend::status`] reports
//! `Synchronizing` as soon as it notices staleness, before any caller has
//! actually triggered the refetch. `Error` (or `Offline`, when the source
//! says it is unreachable) sticks until the next successful fetch.
//!
//! ## Refetching
//!
//! - `list()` refetches when stale.
//! - `get(id, true)` and `reconcile(id)` always refetch.
//! - `get(id, false)` never touches the network.
//!
//! A refetch follows continuation tokens until none is left, building the
//! new collection off to the side with the lock released. Only a complete
//! result is swapped in, as a whole-map replacement, so remote deletions
//! simply disappear. A failed refetch keeps the previous collection and
//! reads keep answering from it.
//!
//! While one thread refetches, concurrent stale `list()` calls serve the
//! current collection instead of starting a second fetch. Forced fetches
//! (`refresh()`, hard reads) queue behind the running one, so an older
//! result can never replace a newer one.

use super::Backend;
use crate::clock::{Clock, SystemClock};
use crate::error::{DaybookError, Result};
use crate::model::{sort_newest_first, Doc, DocId, DocType, SyncStatus};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One page of a remote listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Doc>,
    pub next_token: Option<String>,
}

/// An authenticated remote API, reduced to what the cache needs.
pub trait RemoteSource: Send + Sync {
    fn doc_type(&self) -> DocType;

    /// Fetch the page after `token` (`None` for the first page). Every item
    /// must carry an id.
    fn fetch_page(&self, token: Option<&str>) -> Result<Page>;

    /// Create or update `doc` remotely and return it as stored.
    fn push(&self, _doc: &Doc) -> Result<Doc> {
        Err(DaybookError::ReadOnly("remote source"))
    }

    /// Base URL or other descriptor of the remote collection.
    fn location(&self) -> String;

    fn doc_location(&self, id: &DocId) -> String {
        format!("{}/{}", self.location(), id)
    }
}

#[derive(Default)]
struct RemoteState {
    docs: HashMap<DocId, Doc>,
    status: SyncStatus,
    last_fetched: Option<DateTime<Utc>>,
    fetching: bool,
}

pub struct RemoteCache<S, C = SystemClock> {
    source: S,
    clock: C,
    refresh_interval: TimeDelta,
    state: Mutex<RemoteState>,
    fetch_done: Condvar,
}

impl<S: RemoteSource> RemoteCache<S> {
    pub fn new(source: S, refresh_interval: std::time::Duration) -> Self {
        Self::with_clock(source, SystemClock, refresh_interval)
    }
}

impl<S: RemoteSource, C: Clock> RemoteCache<S, C> {
    pub fn with_clock(source: S, clock: C, refresh_interval: std::time::Duration) -> Self {
        Self {
            source,
            clock,
            refresh_interval: TimeDelta::from_std(refresh_interval).unwrap_or(TimeDelta::MAX),
            state: Mutex::new(RemoteState::default()),
            fetch_done: Condvar::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn last_fetched(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_fetched
    }

    /// Refetch the whole collection now, regardless of staleness. If another
    /// fetch is in flight, waits for it and then fetches again.
    /// Returns the number of documents fetched.
    pub fn refresh(&self) -> Result<usize> {
        self.begin_fetch(true);
        self.run_fetch()
    }

    fn is_stale(&self, state: &RemoteState) -> bool {
        match state.last_fetched {
            None => true,
            Some(at) => self.clock.now() - at > self.refresh_interval,
        }
    }

    /// Claim the fetch slot. Unforced claims fail when fresh or in flight;
    /// forced claims wait for the slot, so fetches never overlap and a
    /// later fetch always lands last.
    fn begin_fetch(&self, force: bool) -> bool {
        let mut state = self.state.lock();
        if force {
            while state.fetching {
                self.fetch_done.wait(&mut state);
            }
        } else if state.fetching || !self.is_stale(&state) {
            return false;
        }
        state.fetching = true;
        state.status = SyncStatus::Synchronizing;
        true
    }

    fn run_fetch(&self) -> Result<usize> {
        let _slot = FetchSlot(self);
        let fetched = self.fetch_all();

        let mut state = self.state.lock();
        match fetched {
            Ok(docs) => {
                let count = docs.len();
                state.docs = docs;
                state.last_fetched = Some(self.clock.now());
                state.status = SyncStatus::Ok;
                info!(location = %self.source.location(), count, "remote collection refreshed");
                Ok(count)
            }
            Err(err) => {
                state.status = match err {
                    DaybookError::Offline(_) => SyncStatus::Offline,
                    _ => SyncStatus::Error,
                };
                warn!(location = %self.source.location(), %err, "remote fetch failed");
                Err(err)
            }
        }
    }

    /// Runs without the lock held.
    fn fetch_all(&self) -> Result<HashMap<DocId, Doc>> {
        let mut docs = HashMap::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self.source.fetch_page(token.as_deref())?;
            pages += 1;
            for doc in page.items {
                let id = doc.id.clone().ok_or_else(|| {
                    DaybookError::Validation("remote item without id".to_string())
                })?;
                docs.insert(id, doc);
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(pages, count = docs.len(), "fetched all pages");
        Ok(docs)
    }

    fn lookup(&self, id: &DocId) -> Result<Doc> {
        self.state
            .lock()
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| DaybookError::NotFound(id.clone()))
    }
}

/// Releases the fetch slot when a fetch ends, including by panic.
struct FetchSlot<'a, S, C>(&'a RemoteCache<S, C>);

impl<S, C> Drop for FetchSlot<'_, S, C> {
    fn drop(&mut self) {
        self.0.state.lock().fetching = false;
        self.0.fetch_done.notify_all();
    }
}

impl<S: RemoteSource, C: Clock> Backend for RemoteCache<S, C> {
    fn doc_type(&self) -> DocType {
        self.source.doc_type()
    }

    fn list(&self) -> Result<Vec<Doc>> {
        if self.begin_fetch(false) {
            if let Err(err) = self.run_fetch() {
                if self.state.lock().last_fetched.is_none() {
                    return Err(err);
                }
                debug!("serving stale collection");
            }
        }
        let mut docs: Vec<Doc> = self.state.lock().docs.values().cloned().collect();
        sort_newest_first(&mut docs);
        Ok(docs)
    }

    fn get(&self, id: &DocId, hard: bool) -> Result<Doc> {
        if !hard {
            return self.lookup(id);
        }
        match self.reconcile(id) {
            Err(err) if err.is_io() => self.lookup(id).map_err(|_| err),
            other => other,
        }
    }

    fn create_or_update(&self, doc: Doc) -> Result<Doc> {
        let stored = self.source.push(&doc)?;
        let id = stored
            .id
            .clone()
            .ok_or_else(|| DaybookError::Validation("remote returned no id".to_string()))?;
        self.state.lock().docs.insert(id, stored.clone());
        Ok(stored)
    }

    fn reconcile(&self, id: &DocId) -> Result<Doc> {
        self.refresh()?;
        self.lookup(id)
    }

    fn count(&self) -> usize {
        self.state.lock().docs.len()
    }

    fn status(&self) -> SyncStatus {
        let mut state = self.state.lock();
        if matches!(state.status, SyncStatus::Ok | SyncStatus::Uninitialized)
            && self.is_stale(&state)
        {
            state.status = SyncStatus::Synchronizing;
        }
        state.status
    }

    fn storage_path(&self) -> String {
        self.source.location()
    }

    fn storage_path_doc(&self, id: &DocId) -> String {
        self.source.doc_location(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use crossbeam_channel::{Receiver, Sender};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// A calendar-like API serving `page_size` events per page.
    struct FakeCalendar {
        events: Mutex<Vec<Doc>>,
        page_size: usize,
        page_calls: AtomicUsize,
        failing: AtomicBool,
        offline: AtomicBool,
        writable: bool,
    }

    impl FakeCalendar {
        fn new(count: usize, page_size: usize) -> Self {
            let events = (0..count)
                .map(|i| {
                    Doc::new(format!("event {}", i))
                        .with_id(format!("evt-{}", i))
                        .with_created(Utc.timestamp_opt(1_000 + i as i64, 0).unwrap())
                })
                .collect();
            Self {
                events: Mutex::new(events),
                page_size,
                page_calls: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
                offline: AtomicBool::new(false),
                writable: false,
            }
        }

        fn calls(&self) -> usize {
            self.page_calls.load(Ordering::SeqCst)
        }
    }

    impl RemoteSource for FakeCalendar {
        fn doc_type(&self) -> DocType {
            DocType::Event
        }

        fn fetch_page(&self, token: Option<&str>) -> Result<Page> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(DaybookError::Offline("no route to host".to_string()));
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(DaybookError::Remote("HTTP 503".to_string()));
            }
            let start: usize = token.map(|t| t.parse().unwrap()).unwrap_or(0);
            let events = self.events.lock();
            let end = (start + self.page_size).min(events.len());
            Ok(Page {
                items: events[start..end].to_vec(),
                next_token: (end < events.len()).then(|| end.to_string()),
            })
        }

        fn push(&self, doc: &Doc) -> Result<Doc> {
            if !self.writable {
                return Err(DaybookError::ReadOnly("remote source"));
            }
            let mut stored = doc.clone();
            stored.id.get_or_insert_with(|| DocId::from("evt-new"));
            self.events.lock().push(stored.clone());
            Ok(stored)
        }

        fn location(&self) -> String {
            "https://calendar.example/primary".to_string()
        }
    }

    const INTERVAL: Duration = Duration::from_secs(300);

    fn cache(source: FakeCalendar) -> (RemoteCache<FakeCalendar, ManualClock>, ManualClock) {
        let clock = ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        (RemoteCache::with_clock(source, clock.clone(), INTERVAL), clock)
    }

    #[test]
    fn test_never_fetched_reports_synchronizing() {
        let (cache, _) = cache(FakeCalendar::new(3, 10));
        assert_eq!(cache.status(), SyncStatus::Synchronizing);
        assert_eq!(cache.count(), 0);
        assert_eq!(cache.source().calls(), 0);
    }

    #[test]
    fn test_list_aggregates_all_pages() {
        let (cache, _) = cache(FakeCalendar::new(7, 3));
        let docs = cache.list().unwrap();
        assert_eq!(docs.len(), 7);
        assert_eq!(cache.source().calls(), 3);
        assert_eq!(docs[0].content, "event 6");
        assert_eq!(cache.status(), SyncStatus::Ok);
    }

    #[test]
    fn test_fresh_collection_is_not_refetched() {
        let (cache, clock) = cache(FakeCalendar::new(2, 10));
        cache.list().unwrap();
        clock.advance(TimeDelta::seconds(299));
        cache.list().unwrap();
        assert_eq!(cache.source().calls(), 1);
        assert_eq!(cache.status(), SyncStatus::Ok);
    }

    #[test]
    fn test_staleness_is_declared_before_refetch() {
        let (cache, clock) = cache(FakeCalendar::new(2, 10));
        cache.list().unwrap();
        clock.advance(TimeDelta::seconds(301));

        assert_eq!(cache.status(), SyncStatus::Synchronizing);
        assert_eq!(cache.source().calls(), 1);

        cache.list().unwrap();
        assert_eq!(cache.source().calls(), 2);
        assert_eq!(cache.status(), SyncStatus::Ok);
    }

    #[test]
    fn test_refetch_replaces_whole_collection() {
        let (cache, clock) = cache(FakeCalendar::new(3, 10));
        cache.list().unwrap();

        cache.source().events.lock().remove(0);
        clock.advance(TimeDelta::seconds(301));

        let docs = cache.list().unwrap();
        assert_eq!(docs.len(), 2);
        let gone = cache.get(&DocId::from("evt-0"), false).unwrap_err();
        assert!(gone.is_not_found());
    }

    #[test]
    fn test_failed_refresh_keeps_collection() {
        let (cache, clock) = cache(FakeCalendar::new(3, 10));
        cache.list().unwrap();

        cache.source().failing.store(true, Ordering::SeqCst);
        assert!(cache.refresh().is_err());
        assert_eq!(cache.status(), SyncStatus::Error);
        assert_eq!(cache.count(), 3);

        // Stale and failing: still answers, still in error.
        clock.advance(TimeDelta::seconds(301));
        assert_eq!(cache.status(), SyncStatus::Error);
        assert_eq!(cache.list().unwrap().len(), 3);
        assert_eq!(cache.status(), SyncStatus::Error);

        cache.source().failing.store(false, Ordering::SeqCst);
        cache.refresh().unwrap();
        assert_eq!(cache.status(), SyncStatus::Ok);
    }

    #[test]
    fn test_first_fetch_failure_is_returned() {
        let source = FakeCalendar::new(3, 10);
        source.failing.store(true, Ordering::SeqCst);
        let (cache, _) = cache(source);

        assert!(cache.list().is_err());
        assert_eq!(cache.status(), SyncStatus::Error);
    }

    #[test]
    fn test_unreachable_source_is_offline() {
        let (cache, _) = cache(FakeCalendar::new(3, 10));
        cache.list().unwrap();

        cache.source().offline.store(true, Ordering::SeqCst);
        let err = cache.refresh().unwrap_err();
        assert!(err.is_io());
        assert_eq!(cache.status(), SyncStatus::Offline);
    }

    #[test]
    fn test_soft_get_never_fetches() {
        let (cache, _) = cache(FakeCalendar::new(3, 10));
        let err = cache.get(&DocId::from("evt-1"), false).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cache.source().calls(), 0);
    }

    #[test]
    fn test_hard_get_refetches() {
        let (cache, _) = cache(FakeCalendar::new(3, 10));
        cache.list().unwrap();

        cache
            .source()
            .events
            .lock()
            .iter_mut()
            .for_each(|d| d.content.push_str(" (moved)"));

        let doc = cache.get(&DocId::from("evt-1"), true).unwrap();
        assert_eq!(doc.content, "event 1 (moved)");
        assert_eq!(cache.source().calls(), 2);
    }

    #[test]
    fn test_hard_get_falls_back_to_cache_on_failure() {
        let (cache, _) = cache(FakeCalendar::new(3, 10));
        cache.list().unwrap();
        cache.source().failing.store(true, Ordering::SeqCst);

        let doc = cache.get(&DocId::from("evt-2"), true).unwrap();
        assert_eq!(doc.content, "event 2");
        assert!(cache.get(&DocId::from("evt-9"), true).unwrap_err().is_io());
    }

    #[test]
    fn test_read_only_source_rejects_writes() {
        let (cache, _) = cache(FakeCalendar::new(1, 10));
        let err = cache.create_or_update(Doc::new("x")).unwrap_err();
        assert!(matches!(err, DaybookError::ReadOnly(_)));
    }

    #[test]
    fn test_push_upserts_into_cache() {
        let mut source = FakeCalendar::new(1, 10);
        source.writable = true;
        let (cache, _) = cache(source);

        let stored = cache.create_or_update(Doc::new("lunch")).unwrap();
        assert_eq!(stored.id, Some(DocId::from("evt-new")));
        assert_eq!(cache.get(&DocId::from("evt-new"), false).unwrap().content, "lunch");
    }

    #[test]
    fn test_storage_paths() {
        let (cache, _) = cache(FakeCalendar::new(1, 10));
        assert_eq!(cache.storage_path(), "https://calendar.example/primary");
        assert_eq!(
            cache.storage_path_doc(&DocId::from("evt-0")),
            "https://calendar.example/primary/evt-0"
        );
        assert_eq!(cache.doc_type(), DocType::Event);
    }

    /// Parks inside every fetch until the test lets it finish. Each fetch
    /// returns one event whose content names the fetch that produced it.
    struct SlowCalendar {
        calls: AtomicUsize,
        started: Sender<usize>,
        release: Receiver<()>,
    }

    impl RemoteSource for SlowCalendar {
        fn doc_type(&self) -> DocType {
            DocType::Event
        }

        fn fetch_page(&self, _token: Option<&str>) -> Result<Page> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.started.send(call).unwrap();
            self.release.recv().unwrap();
            Ok(Page {
                items: vec![Doc::new(format!("fetch {}", call))
                    .with_id("evt-1")
                    .with_created(Utc.timestamp_opt(1_000, 0).unwrap())],
                next_token: None,
            })
        }

        fn location(&self) -> String {
            "https://calendar.example/slow".to_string()
        }
    }

    fn slow_cache() -> (
        Arc<RemoteCache<SlowCalendar, ManualClock>>,
        Receiver<usize>,
        Sender<()>,
    ) {
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let source = SlowCalendar {
            calls: AtomicUsize::new(0),
            started: started_tx,
            release: release_rx,
        };
        let cache = RemoteCache::with_clock(source, ManualClock::default(), INTERVAL);
        (Arc::new(cache), started_rx, release_tx)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_reads_are_not_blocked_by_running_fetch() {
        let (cache, started, release) = slow_cache();
        let id = DocId::from("evt-1");

        let lister = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.list())
        };
        assert_eq!(started.recv_timeout(WAIT).unwrap(), 1);

        // Mid-fetch: everything answers from the current (empty) collection.
        assert!(cache.get(&id, false).unwrap_err().is_not_found());
        assert_eq!(cache.count(), 0);
        assert!(cache.list().unwrap().is_empty());
        assert_eq!(cache.status(), SyncStatus::Synchronizing);
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), 1);

        release.send(()).unwrap();
        let docs = lister.join().unwrap().unwrap();
        assert_eq!(docs[0].content, "fetch 1");
        assert_eq!(cache.status(), SyncStatus::Ok);
    }

    #[test]
    fn test_forced_refresh_waits_for_running_fetch() {
        let (cache, started, release) = slow_cache();

        let lister = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.list())
        };
        assert_eq!(started.recv_timeout(WAIT).unwrap(), 1);

        let refresher = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.refresh())
        };
        // No second fetch while the first is still running.
        assert!(started.recv_timeout(Duration::from_millis(200)).is_err());

        release.send(()).unwrap();
        assert_eq!(started.recv_timeout(WAIT).unwrap(), 2);
        release.send(()).unwrap();

        lister.join().unwrap().unwrap();
        assert_eq!(refresher.join().unwrap().unwrap(), 1);
        let doc = cache.get(&DocId::from("evt-1"), false).unwrap();
        assert_eq!(doc.content, "fetch 2");
        assert_eq!(cache.source().calls.load(Ordering::SeqCst), 2);
    }
}
