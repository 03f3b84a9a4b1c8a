use crate::config::Config;
use crate::error::{Error, Result};
use crate::flags::FlagSet;
use crate::folder::{CachedFolder, FolderCtl};
use crate::imapw::ImapRemote;
use crate::layout::Layout;
use crate::manager::status::SyncStatus;
use crate::manager::CacheManager;
use crate::mode::CacheMode;
use crate::path::FolderPath;
use crate::pending::{PendingOp, PendingQueue};
use crate::remote::{RemoteResult, RemoteStore};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

type RegistryKey = (PathBuf, String);

/// Process-wide map of live stores, one per (cache root, username).
static REGISTRY: Lazy<Mutex<HashMap<RegistryKey, Store>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub(crate) struct StoreInner {
    layout: Layout,
    username: String,
    mode: RwLock<CacheMode>,
    remote: Mutex<Option<Box<dyn RemoteStore>>>,
    pending: Mutex<PendingQueue>,
    statuses: Mutex<HashMap<String, SyncStatus>>,
    folders: Mutex<HashMap<String, Arc<FolderCtl>>>,
    key: RegistryKey,
}

/// Handle to one cached mailbox account: a cache root on disk, the
/// active mode, and an optional shared remote connection. Cheap to
/// clone; all clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Open (or return the already-open) store for the configuration.
    ///
    /// Modes that require a remote fail `RemoteUnavailable` when the
    /// endpoint is missing or unreachable; Accelerated degrades to
    /// disk-only with a warning.
    pub fn open(config: &Config) -> Result<Store> {
        Store::open_inner(config, None)
    }

    /// Open with a caller-supplied remote, bypassing the IMAP adapter.
    pub fn open_with_remote(config: &Config, remote: Box<dyn RemoteStore>) -> Result<Store> {
        Store::open_inner(config, Some(remote))
    }

    fn open_inner(config: &Config, injected: Option<Box<dyn RemoteStore>>) -> Result<Store> {
        let mode = config.mode()?;
        let separator = config.separator();
        let root = config.cache_dir()?;
        let username = config.username();
        let key = (root.clone(), username.clone());

        let mut registry = REGISTRY.lock().unwrap();
        if let Some(existing) = registry.get(&key) {
            debug!("returning live store for {}@{}", username, root.display());
            return Ok(existing.clone());
        }

        let layout = Layout::new(root, separator)?;
        let remote = match injected {
            Some(remote) => Some(remote),
            None => match &config.imap {
                Some(imap_config) => match ImapRemote::connect(imap_config, separator) {
                    Ok(remote) => Some(Box::new(remote) as Box<dyn RemoteStore>),
                    Err(e) if mode.requires_remote() => {
                        warn!("remote connect failed: {}", e);
                        return Err(Error::RemoteUnavailable { mode });
                    }
                    Err(e) => {
                        warn!("remote connect failed, continuing disk-only: {}", e);
                        None
                    }
                },
                None if mode.requires_remote() => {
                    return Err(Error::RemoteUnavailable { mode });
                }
                None => None,
            },
        };
        if remote.is_none() && mode.requires_remote() {
            return Err(Error::RemoteUnavailable { mode });
        }

        let pending = PendingQueue::load(&layout);
        let store = Store {
            inner: Arc::new(StoreInner {
                layout,
                username,
                mode: RwLock::new(mode),
                remote: Mutex::new(remote),
                pending: Mutex::new(pending),
                statuses: Mutex::new(HashMap::new()),
                folders: Mutex::new(HashMap::new()),
                key: key.clone(),
            }),
        };
        registry.insert(key, store.clone());
        info!(
            "opened store {} at {} in {} mode",
            store.inner.username,
            store.inner.layout.root().display(),
            mode
        );
        Ok(store)
    }

    pub fn username(&self) -> &str {
        &self.inner.username
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    /// Cache root directory.
    pub fn root(&self) -> &std::path::Path {
        self.inner.layout.root()
    }

    /// The active mode; operations capture this once at entry.
    pub fn mode(&self) -> CacheMode {
        *self.inner.mode.read().unwrap()
    }

    /// Switch modes at runtime. In-flight operations keep the mode they
    /// captured at entry.
    pub fn set_mode(&self, mode: CacheMode) {
        let mut current = self.inner.mode.write().unwrap();
        if *current != mode {
            debug!("mode {} -> {}", *current, mode);
            *current = mode;
        }
    }

    pub fn has_remote(&self) -> bool {
        self.inner.remote.lock().unwrap().is_some()
    }

    /// Run one round-trip against the shared remote connection. Returns
    /// `None` when no remote is connected; the mutex covers the whole
    /// round-trip.
    pub(crate) fn with_remote<T>(
        &self,
        f: impl FnOnce(&mut dyn RemoteStore) -> RemoteResult<T>,
    ) -> Option<RemoteResult<T>> {
        let mut guard = self.inner.remote.lock().unwrap();
        guard.as_mut().map(|remote| f(remote.as_mut()))
    }

    /// The default (root) folder.
    pub fn default_folder(&self) -> CachedFolder {
        self.folder_at(FolderPath::root(self.inner.layout.separator()))
    }

    /// Folder handle by path string; lazily created, existence not
    /// implied.
    pub fn folder(&self, path: &str) -> Result<CachedFolder> {
        let parsed = FolderPath::parse(path, self.inner.layout.separator())?;
        Ok(self.folder_at(parsed))
    }

    pub(crate) fn folder_at(&self, path: FolderPath) -> CachedFolder {
        let ctl = {
            let mut folders = self.inner.folders.lock().unwrap();
            folders
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(FolderCtl::new()))
                .clone()
        };
        CachedFolder::new(self.clone(), path, ctl)
    }

    pub(crate) fn invalidate_folder_index(&self, path: &FolderPath) {
        if let Some(ctl) = self.inner.folders.lock().unwrap().get(&path.to_string()) {
            ctl.invalidate_index();
        }
    }

    /// Per-store orchestration handle.
    pub fn manager(&self) -> CacheManager {
        CacheManager::new(self.clone())
    }

    pub(crate) fn record_pending_create_folder(&self, folder: &FolderPath) {
        self.record_pending(PendingOp::CreateFolder {
            folder: folder.to_string(),
        });
    }

    pub(crate) fn record_pending_append(&self, folder: &FolderPath, message_id: &str) {
        self.record_pending(PendingOp::Append {
            folder: folder.to_string(),
            message_id: message_id.to_string(),
        });
    }

    pub(crate) fn record_pending_set_flags(
        &self,
        folder: &FolderPath,
        message_id: &str,
        flags: FlagSet,
    ) {
        self.record_pending(PendingOp::SetFlags {
            folder: folder.to_string(),
            message_id: message_id.to_string(),
            flags,
        });
    }

    fn record_pending(&self, op: PendingOp) {
        let mut pending = self.inner.pending.lock().unwrap();
        pending.push(op);
        if let Err(e) = pending.save(&self.inner.layout) {
            warn!("could not persist pending queue: {}", e);
        }
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingOp> {
        self.inner.pending.lock().unwrap().take_all()
    }

    pub(crate) fn restore_pending(&self, ops: Vec<PendingOp>) {
        let mut pending = self.inner.pending.lock().unwrap();
        pending.restore(ops);
        if let Err(e) = pending.save(&self.inner.layout) {
            warn!("could not persist pending queue: {}", e);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub(crate) fn record_status(&self, path: &FolderPath, status: SyncStatus) {
        self.inner
            .statuses
            .lock()
            .unwrap()
            .insert(path.to_string(), status.clone());
        // persist only where a folder directory already exists; a failed
        // sync of a missing folder must not create one
        if self.inner.layout.folder_dir(path).is_dir() {
            if let Err(e) = status.save(&self.inner.layout, path) {
                warn!("could not persist sync status for {}: {}", path, e);
            }
        }
    }

    pub(crate) fn cached_status(&self, path: &FolderPath) -> Option<SyncStatus> {
        self.inner.statuses.lock().unwrap().get(&path.to_string()).cloned()
    }

    /// Log out of the remote, flush the pending queue, and drop this
    /// store from the process registry.
    pub fn close(&self) -> Result<()> {
        {
            let mut guard = self.inner.remote.lock().unwrap();
            if let Some(remote) = guard.as_mut() {
                if let Err(e) = remote.logout() {
                    warn!("remote logout failed: {}", e);
                }
            }
            *guard = None;
        }
        {
            let pending = self.inner.pending.lock().unwrap();
            if !pending.is_empty() {
                pending.save(&self.inner.layout)?;
            }
        }
        REGISTRY.lock().unwrap().remove(&self.inner.key);
        info!("closed store {}", self.inner.username);
        Ok(())
    }
}

/// Temporarily forces a mode, restoring the previous one on drop — even
/// when the operation holding it fails or is cancelled. Concurrent
/// `Store::mode` readers observe the override while it is held.
pub(crate) struct ModeOverride {
    store: Store,
    previous: CacheMode,
}

impl ModeOverride {
    pub(crate) fn new(store: &Store, mode: CacheMode) -> ModeOverride {
        let previous = store.mode();
        store.set_mode(mode);
        ModeOverride {
            store: store.clone(),
            previous,
        }
    }
}

impl Drop for ModeOverride {
    fn drop(&mut self) {
        self.store.set_mode(self.previous);
    }
}
