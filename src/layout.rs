use crate::error::{Error, Result};
use crate::path::FolderPath;
use log::debug;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Reserved directory under a folder holding its message subdirectories.
pub const MESSAGES_DIR: &str = "messages";
/// Header metadata file inside a message directory.
pub const PROPERTIES_FILE: &str = "message.properties";
/// Body file for text/plain messages.
pub const CONTENT_TXT: &str = "content.txt";
/// Body file preserving original bytes for anything else.
pub const CONTENT_MIME: &str = "content.mime";
/// Line-delimited flag names; absence means the empty set.
pub const FLAGS_FILE: &str = "flags.txt";
/// Attachments, one file per attachment, under the original filename.
pub const ATTACHMENTS_DIR: &str = "attachments";

const MAX_DIR_NAME_BYTES: usize = 120;

/// Owns the directory tree rooted at the cache directory.
///
/// All path resolution and every disk write in the engine goes through
/// here; nothing above this layer touches `std::fs` paths directly.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    separator: char,
}

impl Layout {
    pub fn new(root: PathBuf, separator: char) -> Result<Layout> {
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        let root = root
            .canonicalize()
            .map_err(|e| Error::io(&root, e))?;
        Ok(Layout { root, separator })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Directory for a folder; the root folder maps to the cache root.
    pub fn folder_dir(&self, path: &FolderPath) -> PathBuf {
        let mut dir = self.root.clone();
        for c in path.components() {
            dir.push(c);
        }
        dir
    }

    pub fn messages_dir(&self, path: &FolderPath) -> PathBuf {
        self.folder_dir(path).join(MESSAGES_DIR)
    }

    pub fn message_dir(&self, path: &FolderPath, dir_name: &str) -> PathBuf {
        self.messages_dir(path).join(dir_name)
    }

    /// Idempotent directory creation.
    pub fn ensure_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))
    }

    /// The `messages/` entry must be a directory if it exists at all.
    pub fn checked_messages_dir(&self, path: &FolderPath) -> Result<Option<PathBuf>> {
        let dir = self.messages_dir(path);
        if !dir.exists() {
            return Ok(None);
        }
        if !dir.is_dir() {
            return Err(Error::integrity(&dir, "`messages` exists but is not a directory"));
        }
        Ok(Some(dir))
    }

    /// Write-to-temp then rename; no partial file is ever visible.
    pub fn atomic_write(&self, dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_dir(dir)?;
        let tmp = dir.join(format!("{}.tmp", name));
        let target = dir.join(name);
        let mut f = File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
        f.write_all(bytes).map_err(|e| Error::io(&tmp, e))?;
        // fsync is best-effort: rename still gives atomic visibility
        f.sync_all().ok();
        drop(f);
        fs::rename(&tmp, &target).map_err(|e| Error::io(&target, e))
    }

    /// Recursive removal, refusing to touch anything outside the root.
    /// Returns false when the path did not exist.
    pub fn remove_tree(&self, target: &Path) -> Result<bool> {
        if !target.starts_with(&self.root) || target == self.root {
            return Err(Error::integrity(
                target,
                "refusing to remove a path outside the cache root",
            ));
        }
        if !target.exists() {
            return Ok(false);
        }
        debug!("removing tree {}", target.display());
        if target.is_dir() {
            fs::remove_dir_all(target).map_err(|e| Error::io(target, e))?;
        } else {
            fs::remove_file(target).map_err(|e| Error::io(target, e))?;
        }
        Ok(true)
    }

    /// A message directory is complete iff it has header metadata and at
    /// least one content file. Anything else is treated as nonexistent.
    pub fn is_complete_message_dir(&self, dir: &Path) -> bool {
        dir.is_dir()
            && dir.join(PROPERTIES_FILE).is_file()
            && (dir.join(CONTENT_TXT).is_file() || dir.join(CONTENT_MIME).is_file())
    }

    /// Stable directory names for the complete messages of a folder, in
    /// lexicographic order.
    pub fn list_message_dirs(&self, path: &FolderPath) -> Result<Vec<String>> {
        let dir = match self.checked_messages_dir(path)? {
            Some(dir) => dir,
            None => return Ok(Vec::new()),
        };
        let mut names = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            if self.is_complete_message_dir(&entry.path()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Immediate subfolder names, excluding the reserved `messages` entry.
    pub fn list_subfolders(&self, path: &FolderPath) -> Result<Vec<String>> {
        let dir = self.folder_dir(path);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() && name != MESSAGES_DIR {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Map a `Message-ID` header to a directory name: anything outside
/// `[A-Za-z0-9._-]` becomes `_`, truncated to 120 bytes. Pure, so the
/// mapping is stable across process restarts.
pub fn sanitize_message_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len().min(MAX_DIR_NAME_BYTES));
    for c in id.chars() {
        if out.len() >= MAX_DIR_NAME_BYTES {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    out
}

/// Fallback directory name when a message has no `Message-ID`: hex digest
/// over sent-date, sender, and subject.
pub fn digest_message_id(date: &str, from: &str, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(date.as_bytes());
    hasher.update(from.as_bytes());
    hasher.update(subject.as_bytes());
    hex::encode(hasher.finalize())
}
