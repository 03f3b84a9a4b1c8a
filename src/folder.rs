use crate::error::{Error, Result};
use crate::layout;
use crate::message::{CachedMessage, MessageData};
use crate::mode::CacheMode;
use crate::path::FolderPath;
use crate::predicate::Predicate;
use log::{debug, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Access level requested when opening a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FolderState {
    Closed,
    Open(AccessMode),
}

/// Shared per-folder state: every handle to the same folder path under a
/// store sees the same open count, open state, message index, and lock.
pub(crate) struct FolderCtl {
    open_count: AtomicU32,
    state: Mutex<FolderState>,
    index: Mutex<Option<Vec<String>>>,
    rw: RwLock<()>,
}

impl FolderCtl {
    pub(crate) fn new() -> FolderCtl {
        FolderCtl {
            open_count: AtomicU32::new(0),
            state: Mutex::new(FolderState::Closed),
            index: Mutex::new(None),
            rw: RwLock::new(()),
        }
    }

    /// Mutations are rejected while the folder is open read-only.
    pub(crate) fn require_writable(&self, path: &FolderPath) -> Result<()> {
        let state = self.state.lock().unwrap();
        if *state == FolderState::Open(AccessMode::ReadOnly) {
            return Err(Error::ReadOnlyState {
                folder: path.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.rw.write().unwrap()
    }

    pub(crate) fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.rw.read().unwrap()
    }

    pub(crate) fn invalidate_index(&self) {
        *self.index.lock().unwrap() = None;
    }
}

/// A node in the mail hierarchy, backed by a directory under the cache
/// root. Handles are created on demand by `Store::folder` and do not
/// imply existence.
pub struct CachedFolder {
    store: crate::store::Store,
    path: FolderPath,
    ctl: Arc<FolderCtl>,
}

impl CachedFolder {
    pub(crate) fn new(
        store: crate::store::Store,
        path: FolderPath,
        ctl: Arc<FolderCtl>,
    ) -> CachedFolder {
        CachedFolder { store, path, ctl }
    }

    pub fn path(&self) -> &FolderPath {
        &self.path
    }

    /// Last path component; empty for the default folder.
    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Directory existence is the source of truth in disk-first modes;
    /// otherwise the server is asked.
    pub fn exists(&self) -> Result<bool> {
        let mode = self.store.mode();
        if self.path.is_root() {
            return Ok(true);
        }
        if mode.reads_disk_first() {
            return Ok(self.store.layout().folder_dir(&self.path).is_dir());
        }
        self.store
            .with_remote(|r| r.folder_exists(&self.path))
            .ok_or(Error::RemoteUnavailable { mode })?
            .map_err(|e| e.into_error(mode, &self.path.to_string()))
    }

    /// Immediate subfolders, excluding the reserved `messages` entry.
    /// Server-authoritative modes return the server's listing and mirror
    /// the named directories locally.
    pub fn list(&self) -> Result<Vec<String>> {
        let mode = self.store.mode();
        if mode.server_authoritative() {
            let names = self
                .store
                .with_remote(|r| r.list_folders(&self.path))
                .ok_or(Error::RemoteUnavailable { mode })?
                .map_err(|e| e.into_error(mode, &self.path.to_string()))?;
            for name in &names {
                let child = self.path.child(name)?;
                self.store
                    .layout()
                    .ensure_dir(&self.store.layout().folder_dir(&child))?;
            }
            return Ok(names);
        }
        self.store.layout().list_subfolders(&self.path)
    }

    /// Like `list`, but accepting a match pattern. The pattern is
    /// currently ignored and every subfolder is returned.
    pub fn list_with_pattern(&self, _pattern: &str) -> Result<Vec<String>> {
        self.list()
    }

    /// Child handle, lazily created; does not imply existence.
    pub fn folder(&self, name: &str) -> Result<CachedFolder> {
        let child = self.path.child(name)?;
        Ok(self.store.folder_at(child))
    }

    pub fn parent(&self) -> Option<CachedFolder> {
        self.path.parent().map(|p| self.store.folder_at(p))
    }

    /// Create this folder. Offline creates the local directory tree only;
    /// server-authoritative modes create the remote folder first and
    /// abort on failure; Accelerated treats local creation as
    /// authoritative with a best-effort remote echo.
    pub fn create(&self) -> Result<()> {
        let mode = self.store.mode();
        if self.path.is_root() {
            return Ok(());
        }
        let dir = self.store.layout().folder_dir(&self.path);
        match mode {
            CacheMode::Offline => self.store.layout().ensure_dir(&dir),
            CacheMode::Accelerated => {
                self.store.layout().ensure_dir(&dir)?;
                match self.store.with_remote(|r| r.create_folder(&self.path)) {
                    Some(Err(e)) => {
                        warn!(
                            "best-effort remote create of {} failed, queued: {}",
                            self.path, e
                        );
                        self.store.record_pending_create_folder(&self.path);
                    }
                    _ => (),
                }
                Ok(())
            }
            _ => {
                self.store
                    .with_remote(|r| r.create_folder(&self.path))
                    .ok_or(Error::RemoteUnavailable { mode })?
                    .map_err(|e| e.into_error(mode, &self.path.to_string()))?;
                self.store.layout().ensure_dir(&dir)
            }
        }
    }

    /// Open with the requested access. Idempotent for compatible levels:
    /// read-only opens stack under any state, read-write opens stack
    /// under read-write; a read-write open over a read-only folder fails.
    pub fn open(&self, access: AccessMode) -> Result<()> {
        if !self.exists()? {
            return Err(Error::folder_not_found(self.path.to_string()));
        }
        let mut state = self.ctl.state.lock().unwrap();
        match (*state, access) {
            (FolderState::Closed, requested) => *state = FolderState::Open(requested),
            (FolderState::Open(AccessMode::ReadWrite), _) => (),
            (FolderState::Open(AccessMode::ReadOnly), AccessMode::ReadOnly) => (),
            (FolderState::Open(AccessMode::ReadOnly), AccessMode::ReadWrite) => {
                return Err(Error::ReadOnlyState {
                    folder: self.path.to_string(),
                })
            }
        }
        self.ctl.open_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        *self.ctl.state.lock().unwrap() != FolderState::Closed
    }

    /// Close one open; at zero the folder releases its message index.
    /// With `expunge`, messages flagged DELETED are removed first — in
    /// modes that reject deletes the expunge is skipped, not failed.
    pub fn close(&self, expunge: bool) -> Result<()> {
        {
            let state = self.ctl.state.lock().unwrap();
            if *state == FolderState::Closed {
                warn!("close of {} ignored: folder is not open", self.path);
                return Ok(());
            }
        }
        if expunge {
            let mode = self.store.mode();
            if mode.allows_delete() {
                self.expunge(mode)?;
            } else {
                warn!("expunge of {} skipped in {} mode", self.path, mode);
            }
        }
        if self.ctl.open_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            *self.ctl.state.lock().unwrap() = FolderState::Closed;
            self.ctl.invalidate_index();
            debug!("folder {} closed", self.path);
        }
        Ok(())
    }

    fn expunge(&self, mode: CacheMode) -> Result<u32> {
        let _guard = self.ctl.write_lock();
        let mut removed = 0;
        for dir_name in self.local_index()? {
            let message = CachedMessage::from_disk(
                self.store.clone(),
                self.ctl.clone(),
                self.path.clone(),
                dir_name.clone(),
            );
            if !message.is_deleted()? {
                continue;
            }
            let id = message.message_id()?;
            self.store
                .with_remote(|r| r.delete_message(&self.path, &id))
                .ok_or(Error::RemoteUnavailable { mode })?
                .map_err(|e| e.into_error(mode, &format!("{}/{}", self.path, id)))?;
            let dir = self.store.layout().message_dir(&self.path, &dir_name);
            self.store.layout().remove_tree(&dir)?;
            removed += 1;
        }
        if removed > 0 {
            self.ctl.invalidate_index();
        }
        Ok(removed)
    }

    /// Number of messages: complete local message directories in
    /// disk-first modes, the server's count otherwise.
    pub fn message_count(&self) -> Result<u32> {
        let mode = self.store.mode();
        if mode.reads_disk_first() {
            return Ok(self.local_index()?.len() as u32);
        }
        self.store
            .with_remote(|r| r.message_count(&self.path))
            .ok_or(Error::RemoteUnavailable { mode })?
            .map_err(|e| e.into_error(mode, &self.path.to_string()))
    }

    /// Stable, ordered message handles: lexicographic by directory name
    /// locally, server order when the server is authoritative (each
    /// fetched message is written to disk before handles are returned).
    pub fn messages(&self) -> Result<Vec<CachedMessage>> {
        let _guard = self.ctl.read_lock();
        self.messages_unlocked()
    }

    fn messages_unlocked(&self) -> Result<Vec<CachedMessage>> {
        let mode = self.store.mode();
        if mode.server_authoritative() {
            let fetched = self
                .store
                .with_remote(|r| r.fetch_messages(&self.path))
                .ok_or(Error::RemoteUnavailable { mode })?
                .map_err(|e| e.into_error(mode, &self.path.to_string()))?;
            let mut handles = Vec::with_capacity(fetched.len());
            for data in fetched {
                data.persist(self.store.layout(), &self.path)?;
                handles.push(CachedMessage::from_remote(
                    self.store.clone(),
                    self.ctl.clone(),
                    self.path.clone(),
                    data,
                    true,
                ));
            }
            self.ctl.invalidate_index();
            return Ok(handles);
        }
        let names = self.local_index()?;
        Ok(names
            .into_iter()
            .map(|dir_name| {
                CachedMessage::from_disk(
                    self.store.clone(),
                    self.ctl.clone(),
                    self.path.clone(),
                    dir_name,
                )
            })
            .collect())
    }

    /// 1-based sequence access over the stable ordering.
    pub fn message(&self, seq: usize) -> Result<CachedMessage> {
        if seq == 0 {
            return Err(Error::message_not_found("sequence number 0"));
        }
        let mut messages = self.messages()?;
        if seq > messages.len() {
            return Err(Error::message_not_found(format!(
                "{} message {}",
                self.path, seq
            )));
        }
        Ok(messages.swap_remove(seq - 1))
    }

    /// Lookup by message id (raw or already-sanitized).
    pub fn message_by_id(&self, id: &str) -> Result<CachedMessage> {
        let dir_name = layout::sanitize_message_id(id);
        let dir = self.store.layout().message_dir(&self.path, &dir_name);
        let mode = self.store.mode();
        if self.store.layout().is_complete_message_dir(&dir) {
            return Ok(CachedMessage::from_disk(
                self.store.clone(),
                self.ctl.clone(),
                self.path.clone(),
                dir_name,
            ));
        }
        if mode.allows_remote_read() {
            let handle = CachedMessage::from_disk(
                self.store.clone(),
                self.ctl.clone(),
                self.path.clone(),
                dir_name,
            );
            // force hydration so a miss surfaces here, not on first read
            handle.message_id()?;
            return Ok(handle);
        }
        Err(Error::message_not_found(id))
    }

    /// Apply a predicate to this folder's messages. Runs locally against
    /// cache contents unless the mode is server-authoritative and the
    /// predicate lowers to a remote query.
    pub fn search(&self, predicate: &Predicate) -> Result<Vec<CachedMessage>> {
        let _guard = self.ctl.read_lock();
        let mode = self.store.mode();
        if mode.server_authoritative() {
            if let Some(query) = predicate.lower() {
                let ids = self
                    .store
                    .with_remote(|r| r.search(&self.path, &query))
                    .ok_or(Error::RemoteUnavailable { mode })?
                    .map_err(|e| e.into_error(mode, &self.path.to_string()))?;
                let mut matches = Vec::with_capacity(ids.len());
                for id in ids {
                    let dir_name = layout::sanitize_message_id(&id);
                    matches.push(CachedMessage::from_disk(
                        self.store.clone(),
                        self.ctl.clone(),
                        self.path.clone(),
                        dir_name,
                    ));
                }
                return Ok(matches);
            }
        }
        let mut matches = Vec::new();
        for message in self.messages_unlocked()? {
            if predicate.matches(&message)? {
                matches.push(message);
            }
        }
        Ok(matches)
    }

    /// Append messages, one message directory each. In
    /// server-authoritative modes the remote append happens first and
    /// the server's echoed copy (when returned) is what gets persisted.
    pub fn append_messages(&self, messages: &[MessageData]) -> Result<()> {
        let mode = self.store.mode();
        if !mode.allows_local_write() {
            return Err(Error::ReadOnlyMode {
                op: "append",
                mode,
            });
        }
        self.ctl.require_writable(&self.path)?;
        let _guard = self.ctl.write_lock();

        for data in messages {
            if mode.server_authoritative() {
                let echoed = self
                    .store
                    .with_remote(|r| r.append(&self.path, data))
                    .ok_or(Error::RemoteUnavailable { mode })?
                    .map_err(|e| e.into_error(mode, &self.path.to_string()))?;
                match echoed {
                    Some(server_copy) => server_copy.persist(self.store.layout(), &self.path)?,
                    None => data.persist(self.store.layout(), &self.path)?,
                };
            } else {
                data.persist(self.store.layout(), &self.path)?;
                match self.store.with_remote(|r| r.append(&self.path, data)) {
                    Some(Err(e)) => {
                        warn!(
                            "best-effort remote append to {} failed, queued: {}",
                            self.path, e
                        );
                        self.store
                            .record_pending_append(&self.path, &data.effective_message_id());
                    }
                    _ => (),
                }
            }
        }
        self.ctl.invalidate_index();
        Ok(())
    }

    /// Delete this folder. Only server-authoritative modes may delete;
    /// the remote folder goes first, then the local tree.
    pub fn delete(&self, recurse: bool) -> Result<bool> {
        let mode = self.store.mode();
        if !mode.allows_delete() {
            return Err(Error::ReadOnlyMode {
                op: "folder delete",
                mode,
            });
        }
        if self.path.is_root() {
            return Err(Error::integrity(
                self.store.layout().root(),
                "the default folder cannot be deleted",
            ));
        }
        if !recurse && !self.store.layout().list_subfolders(&self.path)?.is_empty() {
            return Err(Error::Config(format!(
                "folder {} has subfolders; delete requires recurse",
                self.path
            )));
        }
        let _guard = self.ctl.write_lock();
        match self.store.with_remote(|r| r.delete_folder(&self.path)) {
            None => return Err(Error::RemoteUnavailable { mode }),
            Some(Err(crate::remote::RemoteError::NotFound(_))) => {
                debug!("remote folder {} already gone", self.path)
            }
            Some(Err(e)) => return Err(e.into_error(mode, &self.path.to_string())),
            Some(Ok(())) => (),
        }
        let removed = self
            .store
            .layout()
            .remove_tree(&self.store.layout().folder_dir(&self.path))?;
        self.ctl.invalidate_index();
        Ok(removed)
    }

    fn local_index(&self) -> Result<Vec<String>> {
        let mut index = self.ctl.index.lock().unwrap();
        if let Some(names) = &*index {
            return Ok(names.clone());
        }
        let names = self.store.layout().list_message_dirs(&self.path)?;
        *index = Some(names.clone());
        Ok(names)
    }
}
