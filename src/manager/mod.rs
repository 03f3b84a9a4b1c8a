pub mod stats;
pub mod status;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::flags::MailFlag;
use crate::folder::AccessMode;
use crate::layout::{FLAGS_FILE, PROPERTIES_FILE};
use crate::message::{parse_date, MessageData};
use crate::mode::CacheMode;
use crate::path::FolderPath;
use crate::pending::PendingOp;
use crate::properties::{Properties, KEY_DATE};
use crate::store::{ModeOverride, Store};
use chrono::{Duration, Utc};
use log::{info, warn};
use std::fs;

pub use stats::{format_size, CacheStats};
pub use status::SyncStatus;

/// Orchestration over one store: synchronization, cache clearing,
/// age-based purges, statistics, and pending-write replay.
pub struct CacheManager {
    store: Store,
}

impl CacheManager {
    pub(crate) fn new(store: Store) -> CacheManager {
        CacheManager { store }
    }

    /// Pull remote state for one folder into the cache.
    ///
    /// The mode is elevated to REFRESH for the duration and restored on
    /// the way out, success or not. The resulting status is recorded
    /// in memory and next to the folder's messages.
    pub fn synchronize(&self, path: &str, cancel: &CancelToken) -> Result<SyncStatus> {
        let entry_mode = self.store.mode();
        if entry_mode == CacheMode::Offline {
            return Err(Error::ReadOnlyMode {
                op: "synchronize",
                mode: entry_mode,
            });
        }
        if !self.store.has_remote() {
            return Err(Error::RemoteUnavailable {
                mode: CacheMode::Refresh,
            });
        }
        let folder_path = self.parse(path)?;
        let _elevated = ModeOverride::new(&self.store, CacheMode::Refresh);
        let result = self.sync_folder(&folder_path, cancel);
        match result {
            Ok(count) => {
                let status = SyncStatus::ok(count);
                self.store.record_status(&folder_path, status.clone());
                info!("synchronized {}: {} messages", folder_path, count);
                Ok(status)
            }
            Err(e) => {
                self.store
                    .record_status(&folder_path, SyncStatus::failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Synchronize a folder and all folders below it. Per-folder
    /// failures are recorded in the returned statuses and do not stop
    /// the walk; cancellation does.
    pub fn synchronize_tree(
        &self,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<Vec<(String, SyncStatus)>> {
        let entry_mode = self.store.mode();
        if entry_mode == CacheMode::Offline {
            return Err(Error::ReadOnlyMode {
                op: "synchronize",
                mode: entry_mode,
            });
        }
        if !self.store.has_remote() {
            return Err(Error::RemoteUnavailable {
                mode: CacheMode::Refresh,
            });
        }
        let folder_path = self.parse(path)?;
        let _elevated = ModeOverride::new(&self.store, CacheMode::Refresh);
        let mut statuses = Vec::new();
        self.sync_subtree(&folder_path, cancel, &mut statuses)?;
        Ok(statuses)
    }

    fn sync_subtree(
        &self,
        path: &FolderPath,
        cancel: &CancelToken,
        statuses: &mut Vec<(String, SyncStatus)>,
    ) -> Result<()> {
        cancel.check()?;
        let status = match self.sync_folder(path, cancel) {
            Ok(count) => SyncStatus::ok(count),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("sync of {} failed: {}", path, e);
                SyncStatus::failed(e.to_string())
            }
        };
        self.store.record_status(path, status.clone());
        statuses.push((path.to_string(), status));

        let children = match self
            .store
            .with_remote(|r| r.list_folders(path))
            .transpose()
        {
            Ok(Some(names)) => names,
            Ok(None) | Err(_) => self.store.layout().list_subfolders(path)?,
        };
        for name in children {
            let child = path.child(&name)?;
            self.sync_subtree(&child, cancel, statuses)?;
        }
        Ok(())
    }

    fn sync_folder(&self, path: &FolderPath, cancel: &CancelToken) -> Result<u32> {
        let folder = self.store.folder_at(path.clone());
        folder.open(AccessMode::ReadOnly)?;
        let result: Result<u32> = (|| {
            let fetched = self
                .store
                .with_remote(|r| r.fetch_messages(path))
                .ok_or(Error::RemoteUnavailable {
                    mode: CacheMode::Refresh,
                })?
                .map_err(|e| e.into_error(CacheMode::Refresh, &path.to_string()))?;
            let mut count = 0;
            for data in &fetched {
                cancel.check()?;
                data.persist(self.store.layout(), path)?;
                count += 1;
            }
            Ok(count)
        })();
        folder.close(false).ok();
        self.store.invalidate_folder_index(path);
        result
    }

    /// Last recorded sync status for a folder, surviving restarts.
    pub fn sync_status(&self, path: &str) -> Result<Option<SyncStatus>> {
        let folder_path = self.parse(path)?;
        if let Some(status) = self.store.cached_status(&folder_path) {
            return Ok(Some(status));
        }
        Ok(SyncStatus::load(self.store.layout(), &folder_path))
    }

    /// Remove a folder subtree from disk, or the entire cache when no
    /// path is given. Succeeds whether or not anything existed; returns
    /// whether something was removed.
    pub fn clear_cache(&self, path: Option<&str>) -> Result<bool> {
        let layout = self.store.layout();
        let folder_path = match path {
            Some(p) => Some(self.parse(p)?),
            None => None,
        };
        match folder_path {
            Some(ref fp) if !fp.is_root() => {
                let removed = layout.remove_tree(&layout.folder_dir(fp))?;
                self.store.invalidate_folder_index(fp);
                info!("cleared cache under {}", fp);
                Ok(removed)
            }
            _ => {
                // whole-cache clear: empty the root but keep it usable
                let mut removed = false;
                let entries =
                    fs::read_dir(layout.root()).map_err(|e| Error::io(layout.root(), e))?;
                for entry in entries {
                    let entry = entry.map_err(|e| Error::io(layout.root(), e))?;
                    removed |= layout.remove_tree(&entry.path())?;
                }
                info!("cleared entire cache at {}", layout.root().display());
                Ok(removed)
            }
        }
    }

    /// Remove cached messages older than `days`, sparing FLAGGED ones
    /// unless `include_flagged`. Permitted in DESTRUCTIVE mode only.
    pub fn purge_older_than(
        &self,
        path: &str,
        days: i64,
        include_flagged: bool,
        cancel: &CancelToken,
    ) -> Result<u32> {
        let mode = self.store.mode();
        if !mode.allows_purge() {
            return Err(Error::ReadOnlyMode { op: "purge", mode });
        }
        let folder_path = self.parse(path)?;
        let layout = self.store.layout();
        let cutoff = Utc::now() - Duration::days(days);
        let mut purged = 0;
        for dir_name in layout.list_message_dirs(&folder_path)? {
            cancel.check()?;
            let dir = layout.message_dir(&folder_path, &dir_name);
            let props_text = match fs::read_to_string(dir.join(PROPERTIES_FILE)) {
                Ok(text) => text,
                Err(_) => continue,
            };
            let sent = Properties::parse(&props_text)
                .get(KEY_DATE)
                .and_then(parse_date);
            let old_enough = match sent {
                Some(date) => date.with_timezone(&Utc) < cutoff,
                None => false,
            };
            if !old_enough {
                continue;
            }
            if !include_flagged {
                let flags = fs::read_to_string(dir.join(FLAGS_FILE))
                    .map(|text| crate::flags::FlagSet::from_lines(&text))
                    .unwrap_or_default();
                if flags.contains(MailFlag::Flagged) {
                    continue;
                }
            }
            layout.remove_tree(&dir)?;
            purged += 1;
        }
        self.store.invalidate_folder_index(&folder_path);
        info!("purged {} messages under {}", purged, folder_path);
        Ok(purged)
    }

    /// Walk the cache and report folder count, message count, and bytes
    /// on disk. A point-in-time snapshot; long walks may race writers.
    pub fn statistics(&self) -> Result<CacheStats> {
        stats::collect(self.store.layout())
    }

    /// Replay queued best-effort writes against the remote. Successes
    /// leave the queue; failures stay. Returns (replayed, remaining).
    pub fn drain_pending(&self) -> Result<(u32, u32)> {
        let ops = self.store.take_pending();
        let mut replayed = 0u32;
        let mut remaining = Vec::new();
        for op in ops {
            match self.replay(&op) {
                Ok(()) => replayed += 1,
                Err(e) => {
                    warn!("pending replay failed, keeping: {}", e);
                    remaining.push(op);
                }
            }
        }
        let left = remaining.len() as u32;
        self.store.restore_pending(remaining);
        Ok((replayed, left))
    }

    fn replay(&self, op: &PendingOp) -> Result<()> {
        let mode = self.store.mode();
        match op {
            PendingOp::CreateFolder { folder } => {
                let path = self.parse(folder)?;
                self.store
                    .with_remote(|r| r.create_folder(&path))
                    .ok_or(Error::RemoteUnavailable { mode })?
                    .map_err(|e| e.into_error(mode, folder))
            }
            PendingOp::Append { folder, message_id } => {
                let path = self.parse(folder)?;
                let dir_name = crate::layout::sanitize_message_id(message_id);
                let data = MessageData::load(self.store.layout(), &path, &dir_name)?;
                self.store
                    .with_remote(|r| r.append(&path, &data))
                    .ok_or(Error::RemoteUnavailable { mode })?
                    .map(|_| ())
                    .map_err(|e| e.into_error(mode, folder))
            }
            PendingOp::SetFlags {
                folder,
                message_id,
                flags,
            } => {
                let path = self.parse(folder)?;
                self.store
                    .with_remote(|r| r.set_flags(&path, message_id, *flags))
                    .ok_or(Error::RemoteUnavailable { mode })?
                    .map_err(|e| e.into_error(mode, folder))
            }
        }
    }

    fn parse(&self, path: &str) -> Result<FolderPath> {
        FolderPath::parse(path, self.store.layout().separator())
    }
}
