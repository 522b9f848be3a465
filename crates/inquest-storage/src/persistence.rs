//! Persistence context for the uploader.
//!
//! ```text
//!   ┌───────────────────────────────────────────────────────────────┐
//!   │                         Persistence                          │
//!   ├───────────────────────────────────────────────────────────────┤
//!   │  IdentityResolver   path ──► LogIdentity                       │
//!   │                                                               │
//!   │  general partition (inquest.pers)                             │
//!   │    <identity>        DpsLog        (via dps cache)            │
//!   │    %StoredLogs%      StoredLogs    (read-modify-write, locked) │
//!   │    %FolderToBoss%    FolderToBoss  (read-modify-write, locked) │
//!   │    %BossToName%      BossToName    (read-modify-write, locked) │
//!   │                                                               │
//!   │  analysis partition (gw2ei.pers)                              │
//!   │    <identity>        JsonLog       (via ei cache)             │
//!   │                                                               │
//!   │  Session             documents seen since startup             │
//!   └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! One instance is created at startup and shared by reference (usually in an
//! `Arc`) with the watcher handlers. There is no process-global state.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use inquest_core::{
    BossToName, DpsLog, FolderToBoss, IdentityResolver, JsonLog, LogIdentity, LogState, Session,
    StoredLogs, TriggerId,
};

use crate::cache::Cache;
use crate::codec::{Storable, StoreKey};
use crate::error::{StoreError, StoreResult};
use crate::store::{KeyValueStore, Partition, TypedStore};
use crate::StorageConfig;

pub const STORED_LOGS_KEY: &str = "%StoredLogs%";
pub const FOLDER_TO_BOSS_KEY: &str = "%FolderToBoss%";
pub const BOSS_TO_NAME_KEY: &str = "%BossToName%";

/// Keys only written under their aggregate lock.
const RESERVED_KEYS: [&str; 3] = [STORED_LOGS_KEY, FOLDER_TO_BOSS_KEY, BOSS_TO_NAME_KEY];

/// Serializes read-modify-write cycles on the aggregate maps.
#[derive(Default)]
struct AggregateLocks {
    stored_logs: Mutex<()>,
    folder_to_boss: Mutex<()>,
    boss_to_name: Mutex<()>,
}

pub struct Persistence {
    resolver: IdentityResolver,
    general: Arc<Partition>,
    analysis: Arc<Partition>,
    dps_logs: Cache<Partition, DpsLog>,
    ei_logs: Cache<Partition, JsonLog>,
    locks: AggregateLocks,
    session: Arc<Session>,
}

impl Persistence {
    /// Opens both partitions described by `config`.
    pub fn open(
        config: &StorageConfig,
        resolver: IdentityResolver,
        session: Arc<Session>,
    ) -> StoreResult<Self> {
        let general = Partition::open(config.general_dir())?;
        let analysis = Partition::open(config.analysis_dir())?;
        tracing::info!(
            root = %resolver.root().display(),
            storage = %config.root.display(),
            "persistence opened"
        );
        Ok(Self::with_partitions(
            resolver,
            Arc::new(general),
            Arc::new(analysis),
            session,
        ))
    }

    pub fn with_partitions(
        resolver: IdentityResolver,
        general: Arc<Partition>,
        analysis: Arc<Partition>,
        session: Arc<Session>,
    ) -> Self {
        Self {
            resolver,
            dps_logs: Cache::new(Arc::clone(&general)),
            ei_logs: Cache::new(Arc::clone(&analysis)),
            general,
            analysis,
            locks: AggregateLocks::default(),
            session,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn identity(&self, path: &Path) -> StoreResult<LogIdentity> {
        Ok(self.resolver.resolve(path)?)
    }

    // ========================================================================
    // Generic typed access (general partition)
    // ========================================================================

    pub fn get<K, V>(&self, key: &K) -> StoreResult<V>
    where
        K: StoreKey + ?Sized,
        V: Storable,
    {
        self.general.get(key)
    }

    /// Writes an arbitrary value. The aggregate keys are refused; they change
    /// only through [`record_state`](Self::record_state) and
    /// [`remember_meta`](Self::remember_meta).
    pub fn set<K, V>(&self, key: &K, value: &V) -> StoreResult<()>
    where
        K: StoreKey + ?Sized,
        V: Storable,
    {
        let bytes = key.key_bytes();
        if RESERVED_KEYS.iter().any(|reserved| reserved.as_bytes() == bytes.as_ref()) {
            return Err(StoreError::ReservedKey {
                key: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        self.general.set(key, value)
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Persists the upload response for the log at `path` and adds it to the
    /// session.
    pub fn store_dps_report_log(&self, path: &Path, log: DpsLog) -> StoreResult<LogIdentity> {
        let identity = self.identity(path)?;
        let log = self.dps_logs.set(&identity, log)?;
        self.session.add(identity.clone(), log);
        tracing::debug!(identity = %identity, "stored upload response");
        Ok(identity)
    }

    pub fn dps_report_log(&self, path: &Path) -> StoreResult<Arc<DpsLog>> {
        let identity = self.identity(path)?;
        self.dps_logs.get(&identity)
    }

    /// Persists the analyzer output for the log at `path` and adds it to the
    /// session.
    pub fn store_ei_log(&self, path: &Path, log: JsonLog) -> StoreResult<LogIdentity> {
        let identity = self.identity(path)?;
        let log = self.ei_logs.set(&identity, log)?;
        self.session.add(identity.clone(), log);
        tracing::debug!(identity = %identity, "stored analysis output");
        Ok(identity)
    }

    pub fn ei_log(&self, path: &Path) -> StoreResult<Arc<JsonLog>> {
        let identity = self.identity(path)?;
        self.ei_logs.get(&identity)
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    pub fn stored_logs(&self) -> StoreResult<StoredLogs> {
        self.general.get_or_default(STORED_LOGS_KEY)
    }

    pub fn log_state(&self, path: &Path) -> StoreResult<LogState> {
        let identity = self.identity(path)?;
        Ok(self.stored_logs()?.state(&identity))
    }

    /// Merges `event` into the stored state of the log at `path`.
    pub fn record_state(&self, path: &Path, event: LogState) -> StoreResult<LogState> {
        let identity = self.identity(path)?;
        self.record_identity_state(identity, event)
    }

    pub fn record_identity_state(
        &self,
        identity: LogIdentity,
        event: LogState,
    ) -> StoreResult<LogState> {
        let _guard = self.locks.stored_logs.lock();
        let mut logs = self.stored_logs()?;
        let previous = logs.state(&identity);
        let next = logs.record(identity.clone(), event);
        if next != previous {
            self.general.set(STORED_LOGS_KEY, &logs)?;
            tracing::info!(identity = %identity, from = %previous, to = %next, "log state advanced");
        }
        Ok(next)
    }

    pub fn folder_to_boss(&self) -> StoreResult<FolderToBoss> {
        self.general.get_or_default(FOLDER_TO_BOSS_KEY)
    }

    pub fn boss_to_name(&self) -> StoreResult<BossToName> {
        self.general.get_or_default(BOSS_TO_NAME_KEY)
    }

    /// Records what is known about an encounter folder. Existing entries are
    /// never overwritten. Returns whether anything new was learned.
    pub fn remember_meta(
        &self,
        folder: &str,
        trigger: TriggerId,
        name: Option<&str>,
    ) -> StoreResult<bool> {
        // Fixed acquisition order: folder map, then name map.
        let _folders_guard = self.locks.folder_to_boss.lock();
        let _names_guard = self.locks.boss_to_name.lock();

        let mut folders = self.folder_to_boss()?;
        let new_folder = folders.insert_if_absent(folder, trigger);
        if new_folder {
            self.general.set(FOLDER_TO_BOSS_KEY, &folders)?;
        }

        let mut new_name = false;
        if let Some(name) = name {
            let mut names = self.boss_to_name()?;
            new_name = names.insert_if_absent(trigger, name);
            if new_name {
                self.general.set(BOSS_TO_NAME_KEY, &names)?;
            }
        }

        if new_folder || new_name {
            tracing::debug!(folder, trigger, name, "learned encounter meta");
        }
        Ok(new_folder || new_name)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn flush(&self) -> StoreResult<()> {
        self.general.flush()?;
        self.analysis.flush()
    }

    /// Flushes both partitions. The partition locks are released once the
    /// last handle is dropped.
    pub fn close(self) -> StoreResult<()> {
        self.flush()?;
        tracing::info!("persistence closed");
        Ok(())
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("root", &self.resolver.root())
            .field("general", &self.general)
            .field("analysis", &self.analysis)
            .finish()
    }
}
