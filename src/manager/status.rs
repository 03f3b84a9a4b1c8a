use crate::error::Result;
use crate::layout::Layout;
use crate::path::FolderPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;

/// File inside a folder directory recording its last synchronization.
pub const STATUS_FILE: &str = ".sync-status.json";

/// Per-folder synchronization record, created lazily on the first sync
/// attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub last_sync: DateTime<Utc>,
    pub success: bool,
    pub message_count: u32,
    pub error: Option<String>,
}

impl SyncStatus {
    pub fn ok(message_count: u32) -> SyncStatus {
        SyncStatus {
            last_sync: Utc::now(),
            success: true,
            message_count,
            error: None,
        }
    }

    pub fn failed(error: String) -> SyncStatus {
        SyncStatus {
            last_sync: Utc::now(),
            success: false,
            message_count: 0,
            error: Some(error),
        }
    }

    pub(crate) fn save(&self, layout: &Layout, folder: &FolderPath) -> Result<()> {
        let json = serde_json::to_string_pretty(self).unwrap_or_default();
        layout.atomic_write(&layout.folder_dir(folder), STATUS_FILE, json.as_bytes())
    }

    pub(crate) fn load(layout: &Layout, folder: &FolderPath) -> Option<SyncStatus> {
        let path = layout.folder_dir(folder).join(STATUS_FILE);
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }
}
