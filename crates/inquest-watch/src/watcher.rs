//! Recursive directory watcher.
//!
//! ```text
//!   OS watch service ──callback──► mpsc ──► consumer thread (WatchLoop)
//!                                               │
//!                 dir created ──► register (walk, watch each dir NonRecursive)
//!                 file created/modified ──► WorkerPool ──► FileHandler
//! ```
//!
//! Every directory is watched non-recursively and tracked in a registered set,
//! so a directory seen twice is only walked once. Files found while walking a
//! newly registered directory go through the same dispatch path as files the
//! OS reports, and a created file is dispatched at most once.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use walkdir::WalkDir;

use crate::error::WatchError;
use crate::pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEventKind {
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Caller-supplied reaction to file events. Runs on the worker pool.
#[async_trait]
pub trait FileHandler: Send + Sync + 'static {
    async fn on_file(&self, event: FileEvent);
}

#[derive(Debug, Clone, Default)]
pub struct WatchConfig {
    /// Dispatch files that already exist under the root when watching starts.
    pub emit_existing: bool,
}

enum WatchCommand {
    Event(notify::Result<Event>),
    Shutdown,
}

const NO_EVENT: i64 = i64::MIN;

// ============================================================================
// Public handle
// ============================================================================

pub struct DirectoryWatcher {
    root: PathBuf,
    tx: mpsc::Sender<WatchCommand>,
    consumer: Option<JoinHandle<()>>,
    registered: Arc<Mutex<HashSet<PathBuf>>>,
    last_event: Arc<AtomicI64>,
}

impl DirectoryWatcher {
    /// Registers `root` and everything below it, then starts the consumer thread.
    /// With `emit_existing`, files found during registration are dispatched
    /// from the consumer thread before any OS event.
    pub fn start(
        root: impl Into<PathBuf>,
        config: WatchConfig,
        pool: Arc<WorkerPool>,
        handler: Arc<dyn FileHandler>,
    ) -> Result<Self, WatchError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(WatchError::RootMissing(root));
        }

        let (tx, rx) = mpsc::channel();
        let events = tx.clone();
        let watcher = notify::recommended_watcher(move |result| {
            if events.send(WatchCommand::Event(result)).is_err() {
                tracing::debug!("watch consumer gone, dropping event");
            }
        })?;

        let registered = Arc::new(Mutex::new(HashSet::new()));
        let last_event = Arc::new(AtomicI64::new(NO_EVENT));
        let mut state: WatchLoop<RecommendedWatcher> = WatchLoop {
            watcher,
            registered: Arc::clone(&registered),
            created: HashSet::new(),
            last_event: Arc::clone(&last_event),
            pool,
            handler,
        };
        let existing = state.register(&root);

        let consumer = std::thread::Builder::new()
            .name("inquest_watcher".to_string())
            .spawn(move || {
                // Dispatch blocks on a full pool, so it never runs on the caller.
                if config.emit_existing {
                    for file in existing {
                        state.dispatch(file, FileEventKind::Created);
                    }
                }
                loop {
                    match rx.recv() {
                        Ok(WatchCommand::Event(Ok(event))) => state.handle_event(event),
                        Ok(WatchCommand::Event(Err(err))) => {
                            tracing::warn!(error = %err, "watch service reported an error");
                        }
                        Ok(WatchCommand::Shutdown) | Err(_) => break,
                    }
                }
                // Dropping the state releases every OS watch handle.
                drop(state);
            })
            .map_err(WatchError::Spawn)?;

        tracing::info!(root = %root.display(), "watching directory tree");
        Ok(Self {
            root,
            tx,
            consumer: Some(consumer),
            registered,
            last_event,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_registered(&self, dir: &Path) -> bool {
        self.registered.lock().contains(dir)
    }

    pub fn registered_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<_> = self.registered.lock().iter().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Time of the most recent OS event, for liveness supervision.
    pub fn last_event(&self) -> Option<DateTime<Utc>> {
        match self.last_event.load(Ordering::Relaxed) {
            NO_EVENT => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        }
    }

    /// Stops the consumer loop and waits for it. Queued handler jobs are left
    /// to the worker pool.
    pub fn shutdown(mut self) -> Result<(), WatchError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), WatchError> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };
        let _ = self.tx.send(WatchCommand::Shutdown);
        consumer.join().map_err(|_| WatchError::ConsumerPanicked)?;
        tracing::info!(root = %self.root.display(), "watcher stopped");
        Ok(())
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(error = %err, "watcher did not stop cleanly");
        }
    }
}

// ============================================================================
// Consumer state
// ============================================================================

struct WatchLoop<W: Watcher> {
    watcher: W,
    registered: Arc<Mutex<HashSet<PathBuf>>>,
    /// Files already dispatched as created, so overlapping walks and OS
    /// events do not dispatch them twice. Entries leave only on removal or
    /// rename, so the set grows with the number of logs seen in one run.
    created: HashSet<PathBuf>,
    last_event: Arc<AtomicI64>,
    pool: Arc<WorkerPool>,
    handler: Arc<dyn FileHandler>,
}

impl<W: Watcher> WatchLoop<W> {
    fn handle_event(&mut self, event: Event) {
        self.last_event
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);

        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in event.paths {
                    self.on_created(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let Some(path) = event.paths.into_iter().last() {
                    self.on_created(path);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
                for path in event.paths {
                    self.forget(&path);
                }
            }
            EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
                for path in event.paths {
                    if path.is_file() {
                        self.dispatch(path, FileEventKind::Modified);
                    }
                }
            }
            _ => {}
        }
    }

    fn on_created(&mut self, path: PathBuf) {
        if path.is_dir() {
            if !self.registered.lock().contains(&path) {
                for file in self.register(&path) {
                    self.dispatch(file, FileEventKind::Created);
                }
            }
        } else {
            self.dispatch(path, FileEventKind::Created);
        }
    }

    /// Watches `dir` and every unregistered directory below it and returns
    /// the files found. Each directory is watched before it is listed, so a
    /// file landing mid-registration is either listed or reported by the OS.
    fn register(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut pending = vec![dir.to_path_buf()];
        let mut files = Vec::new();
        while let Some(dir) = pending.pop() {
            if self.registered.lock().contains(&dir) {
                continue;
            }
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    tracing::debug!(dir = %dir.display(), "registered directory");
                    self.registered.lock().insert(dir.clone());
                }
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "failed to watch directory");
                }
            }

            let listing = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false);
            for entry in listing {
                match entry {
                    Ok(entry) if entry.file_type().is_dir() => pending.push(entry.into_path()),
                    Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                    }
                }
            }
        }
        files
    }

    fn forget(&mut self, path: &Path) {
        self.created.remove(path);
        let mut registered = self.registered.lock();
        let before = registered.len();
        registered.retain(|dir| !dir.starts_with(path));
        if registered.len() != before {
            tracing::debug!(dir = %path.display(), "directory removed");
        }
    }

    fn dispatch(&mut self, path: PathBuf, kind: FileEventKind) {
        if kind == FileEventKind::Created && !self.created.insert(path.clone()) {
            tracing::debug!(path = %path.display(), "already dispatched");
            return;
        }

        let handler = Arc::clone(&self.handler);
        let event = FileEvent { path, kind };
        let described = event.path.clone();
        if let Err(err) = self.pool.submit(async move { handler.on_file(event).await }) {
            tracing::warn!(path = %described.display(), error = %err, "file event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SaturationPolicy;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use notify::NullWatcher;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<FileEvent>>,
    }

    #[async_trait]
    impl FileHandler for Recorder {
        async fn on_file(&self, event: FileEvent) {
            self.events.lock().push(event);
        }
    }

    impl Recorder {
        fn created(&self, path: &Path) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| e.path == path && e.kind == FileEventKind::Created)
                .count()
        }
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn null_loop(pool: Arc<WorkerPool>, handler: Arc<Recorder>) -> WatchLoop<NullWatcher> {
        watch_loop(NullWatcher, pool, handler)
    }

    fn watch_loop<W: Watcher>(
        watcher: W,
        pool: Arc<WorkerPool>,
        handler: Arc<Recorder>,
    ) -> WatchLoop<W> {
        WatchLoop {
            watcher,
            registered: Arc::new(Mutex::new(HashSet::new())),
            created: HashSet::new(),
            last_event: Arc::new(AtomicI64::new(NO_EVENT)),
            pool,
            handler,
        }
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    #[test]
    fn registration_walks_nested_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("BossA/sub")).unwrap();
        fs::create_dir_all(dir.path().join("BossB")).unwrap();

        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 1, 8, SaturationPolicy::Wait));
        let recorder = Arc::new(Recorder::default());
        let mut state = null_loop(Arc::clone(&pool), Arc::clone(&recorder));

        state.register(dir.path());
        let registered = state.registered.lock().clone();
        assert_eq!(registered.len(), 4);
        assert!(registered.contains(&dir.path().join("BossA/sub")));
    }

    #[test]
    fn new_directory_dispatches_existing_files_once() {
        let dir = tempdir().unwrap();
        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 1, 8, SaturationPolicy::Wait));
        let recorder = Arc::new(Recorder::default());
        let mut state = null_loop(Arc::clone(&pool), Arc::clone(&recorder));
        state.register(dir.path());

        let boss = dir.path().join("BossA");
        let log = boss.join("20240101-120000.zevtc");
        fs::create_dir(&boss).unwrap();
        fs::write(&log, b"evtc").unwrap();

        // Directory event, a duplicate of it, then the file's own event.
        state.handle_event(event(EventKind::Create(CreateKind::Folder), &boss));
        state.handle_event(event(EventKind::Create(CreateKind::Folder), &boss));
        state.handle_event(event(EventKind::Create(CreateKind::File), &log));

        drop(state);
        rt.block_on(pool.shutdown());
        assert_eq!(recorder.created(&log), 1);
    }

    /// Writes a log into `target` at the moment it is asked to watch it.
    struct WritesOnWatch {
        target: PathBuf,
    }

    impl Watcher for WritesOnWatch {
        fn new<F: notify::EventHandler>(_handler: F, _config: notify::Config) -> notify::Result<Self> {
            Ok(Self {
                target: PathBuf::new(),
            })
        }

        fn watch(&mut self, path: &Path, _mode: RecursiveMode) -> notify::Result<()> {
            if path == self.target {
                fs::write(path.join("late.zevtc"), b"evtc")?;
            }
            Ok(())
        }

        fn unwatch(&mut self, _path: &Path) -> notify::Result<()> {
            Ok(())
        }

        fn kind() -> notify::WatcherKind {
            notify::WatcherKind::NullWatcher
        }
    }

    #[test]
    fn file_landing_while_directory_is_registered_is_dispatched() {
        let dir = tempdir().unwrap();
        let boss = dir.path().join("BossA");
        fs::create_dir(&boss).unwrap();

        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 1, 8, SaturationPolicy::Wait));
        let recorder = Arc::new(Recorder::default());
        let watcher = WritesOnWatch {
            target: boss.clone(),
        };
        let mut state = watch_loop(watcher, Arc::clone(&pool), Arc::clone(&recorder));

        state.handle_event(event(EventKind::Create(CreateKind::Folder), &boss));

        drop(state);
        rt.block_on(pool.shutdown());
        assert_eq!(recorder.created(&boss.join("late.zevtc")), 1);
    }

    #[test]
    fn modifications_are_dispatched_every_time() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("a.zevtc");
        fs::write(&log, b"evtc").unwrap();

        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 1, 8, SaturationPolicy::Wait));
        let recorder = Arc::new(Recorder::default());
        let mut state = null_loop(Arc::clone(&pool), Arc::clone(&recorder));

        let modified = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        state.handle_event(event(modified, &log));
        state.handle_event(event(modified, &log));

        assert!(state.last_event.load(Ordering::Relaxed) != NO_EVENT);
        drop(state);
        rt.block_on(pool.shutdown());
        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == FileEventKind::Modified));
    }

    #[test]
    fn removed_directory_is_forgotten() {
        let dir = tempdir().unwrap();
        let boss = dir.path().join("BossA");
        fs::create_dir(&boss).unwrap();

        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 1, 8, SaturationPolicy::Wait));
        let recorder = Arc::new(Recorder::default());
        let mut state = null_loop(Arc::clone(&pool), Arc::clone(&recorder));
        state.register(dir.path());
        assert!(state.registered.lock().contains(&boss));

        fs::remove_dir(&boss).unwrap();
        state.handle_event(event(EventKind::Remove(RemoveKind::Folder), &boss));
        assert!(!state.registered.lock().contains(&boss));

        // A vanished path in a create event is treated as a file and dispatched.
        state.handle_event(event(EventKind::Create(CreateKind::Any), &boss.join("x")));
        drop(state);
        rt.block_on(pool.shutdown());
    }

    #[test]
    fn watches_a_real_tree() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("BossA");
        fs::create_dir(&existing).unwrap();
        fs::write(existing.join("old.zevtc"), b"old").unwrap();

        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 2, 16, SaturationPolicy::Wait));
        let recorder = Arc::new(Recorder::default());
        let watcher = DirectoryWatcher::start(
            dir.path(),
            WatchConfig::default(),
            Arc::clone(&pool),
            recorder.clone() as Arc<dyn FileHandler>,
        )
        .unwrap();
        assert!(watcher.is_registered(&existing));
        assert!(watcher.last_event().is_none());

        let fresh = existing.join("20240101-120000.zevtc");
        fs::write(&fresh, b"evtc").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while recorder.created(&fresh) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(recorder.created(&fresh), 1);
        assert_eq!(recorder.created(&existing.join("old.zevtc")), 0);
        assert!(watcher.last_event().is_some());

        watcher.shutdown().unwrap();
        rt.block_on(pool.shutdown());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn existing_files_are_dispatched_when_started_inside_a_runtime() {
        let dir = tempdir().unwrap();
        let boss = dir.path().join("BossA");
        fs::create_dir(&boss).unwrap();
        let old = boss.join("old.zevtc");
        fs::write(&old, b"old").unwrap();

        let pool = Arc::new(WorkerPool::new(
            &tokio::runtime::Handle::current(),
            1,
            1,
            SaturationPolicy::Wait,
        ));
        let recorder = Arc::new(Recorder::default());
        let watcher = DirectoryWatcher::start(
            dir.path(),
            WatchConfig {
                emit_existing: true,
            },
            Arc::clone(&pool),
            recorder.clone() as Arc<dyn FileHandler>,
        )
        .unwrap();
        assert!(watcher.is_registered(&boss));

        for _ in 0..500 {
            if recorder.created(&old) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recorder.created(&old), 1);

        tokio::task::spawn_blocking(move || watcher.shutdown())
            .await
            .unwrap()
            .unwrap();
        pool.shutdown().await;
    }

    #[test]
    fn missing_root_is_rejected() {
        let dir = tempdir().unwrap();
        let rt = runtime();
        let pool = Arc::new(WorkerPool::new(rt.handle(), 1, 1, SaturationPolicy::Wait));
        let err = DirectoryWatcher::start(
            dir.path().join("absent"),
            WatchConfig::default(),
            pool,
            Arc::new(Recorder::default()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, WatchError::RootMissing(_)));
    }
}
