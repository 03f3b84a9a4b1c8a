use crate::error::{Error, Result};
use crate::layout::{Layout, MESSAGES_DIR};
use walkdir::WalkDir;

/// Point-in-time cache statistics. Recomputed on demand; concurrent
/// writers may move the numbers while the walk is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub folders: u64,
    pub messages: u64,
    pub total_bytes: u64,
}

impl CacheStats {
    pub fn formatted_size(&self) -> String {
        format_size(self.total_bytes)
    }
}

/// Walk the cache root, counting folders (directories outside any
/// `messages` subtree), complete message directories, and file bytes.
pub(crate) fn collect(layout: &Layout) -> Result<CacheStats> {
    let root = layout.root();
    let mut stats = CacheStats::default();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(|p| p.to_path_buf()).unwrap_or_else(|| root.to_path_buf());
            match e.into_io_error() {
                Some(io) => Error::io(path, io),
                None => Error::integrity(path, "walk cycle"),
            }
        })?;
        let rel = match entry.path().strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let in_messages_subtree = rel
            .components()
            .any(|c| c.as_os_str() == MESSAGES_DIR);
        if entry.file_type().is_file() {
            let len = entry
                .metadata()
                .map_err(|e| match e.into_io_error() {
                    Some(io) => Error::io(entry.path(), io),
                    None => Error::integrity(entry.path(), "unreadable metadata"),
                })?
                .len();
            stats.total_bytes += len;
        } else if entry.file_type().is_dir() {
            if !in_messages_subtree {
                stats.folders += 1;
            } else if entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n == MESSAGES_DIR)
                .unwrap_or(false)
                && layout.is_complete_message_dir(entry.path())
            {
                stats.messages += 1;
            }
        }
    }
    Ok(stats)
}

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Human-readable size: whole bytes, one decimal above.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FolderPath;
    use crate::layout::{CONTENT_TXT, PROPERTIES_FILE};
    use tempfile::tempdir;

    #[test]
    fn format_size_picks_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_size(1536), "1.5 KiB");
    }

    #[test]
    fn collect_counts_folders_messages_and_bytes() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path().to_path_buf(), '/').unwrap();
        let inbox = FolderPath::parse("INBOX", '/').unwrap();
        let sub = FolderPath::parse("INBOX/Sub", '/').unwrap();
        layout.ensure_dir(&layout.folder_dir(&sub)).unwrap();

        let complete = layout.message_dir(&inbox, "m1");
        layout
            .atomic_write(&complete, PROPERTIES_FILE, b"Subject=x\n")
            .unwrap();
        layout.atomic_write(&complete, CONTENT_TXT, b"hello").unwrap();
        // incomplete directory: bytes count, message does not
        let partial = layout.message_dir(&inbox, "m2");
        layout
            .atomic_write(&partial, PROPERTIES_FILE, b"Subject=y\n")
            .unwrap();

        let stats = collect(&layout).unwrap();
        assert_eq!(stats.folders, 2);
        assert_eq!(stats.messages, 1);
        assert_eq!(
            stats.total_bytes,
            (b"Subject=x\n".len() + b"hello".len() + b"Subject=y\n".len()) as u64
        );
    }
}
