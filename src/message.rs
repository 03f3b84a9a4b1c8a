use crate::error::{Error, Result};
use crate::flags::{FlagSet, MailFlag};
use crate::layout::{
    self, Layout, ATTACHMENTS_DIR, CONTENT_MIME, CONTENT_TXT, FLAGS_FILE, PROPERTIES_FILE,
};
use crate::mode::CacheMode;
use crate::path::FolderPath;
use crate::properties::{Properties, KEY_DATE, KEY_FROM, KEY_MESSAGE_ID, KEY_SUBJECT};
use crate::store::Store;
use chrono::{DateTime, FixedOffset};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Message body: decoded text for text/plain, original bytes otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Mime(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub data: Vec<u8>,
}

/// In-memory message value, used both for local appends and for messages
/// fetched from the remote.
#[derive(Debug, Clone)]
pub struct MessageData {
    pub message_id: Option<String>,
    pub headers: Vec<(String, String)>,
    pub flags: FlagSet,
    pub body: Body,
    pub attachments: Vec<Attachment>,
    pub sent_date: Option<DateTime<FixedOffset>>,
}

impl MessageData {
    /// Convenience constructor for a plain-text message.
    pub fn text(message_id: &str, from: &str, subject: &str, body: &str) -> MessageData {
        MessageData {
            message_id: Some(message_id.to_string()),
            headers: vec![
                (KEY_FROM.to_string(), from.to_string()),
                (KEY_SUBJECT.to_string(), subject.to_string()),
            ],
            flags: FlagSet::new(),
            body: Body::Text(body.to_string()),
            attachments: Vec::new(),
            sent_date: None,
        }
    }

    /// First header with the given name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        for (k, v) in self.headers.iter_mut() {
            if k.eq_ignore_ascii_case(name) {
                *v = value.to_string();
                return;
            }
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    fn date_string(&self) -> String {
        match &self.sent_date {
            Some(date) => date.to_rfc2822(),
            None => self.header(KEY_DATE).unwrap_or("").to_string(),
        }
    }

    /// The id used to address this message, on disk and on the wire: the
    /// `Message-ID` header, or a content digest when there is none.
    pub fn effective_message_id(&self) -> String {
        match &self.message_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => layout::digest_message_id(
                &self.date_string(),
                self.header(KEY_FROM).unwrap_or(""),
                self.header(KEY_SUBJECT).unwrap_or(""),
            ),
        }
    }

    /// Directory name under `messages/` for this message.
    pub fn dir_name(&self) -> String {
        layout::sanitize_message_id(&self.effective_message_id())
    }

    pub(crate) fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.set(KEY_MESSAGE_ID, &self.effective_message_id());
        props.set(KEY_SUBJECT, self.header(KEY_SUBJECT).unwrap_or(""));
        props.set(KEY_FROM, self.header(KEY_FROM).unwrap_or(""));
        props.set(KEY_DATE, &self.date_string());
        for (name, value) in &self.headers {
            if !name.eq_ignore_ascii_case(KEY_MESSAGE_ID) && !name.eq_ignore_ascii_case(KEY_DATE) {
                props.set(name, value);
            }
        }
        props
    }

    /// Write this message into its folder's `messages/` directory.
    ///
    /// The properties file lands last, so a crash mid-persist leaves an
    /// incomplete directory that listing treats as nonexistent.
    pub(crate) fn persist(&self, layout: &Layout, folder: &FolderPath) -> Result<String> {
        let dir_name = self.dir_name();
        let dir = layout.message_dir(folder, &dir_name);
        layout.ensure_dir(&dir)?;

        if !self.attachments.is_empty() {
            let attach_dir = dir.join(ATTACHMENTS_DIR);
            for attachment in &self.attachments {
                let name = layout::sanitize_message_id(&attachment.name);
                layout.atomic_write(&attach_dir, &name, &attachment.data)?;
            }
        }
        match &self.body {
            Body::Text(text) => layout.atomic_write(&dir, CONTENT_TXT, text.as_bytes())?,
            Body::Mime(bytes) => layout.atomic_write(&dir, CONTENT_MIME, bytes)?,
        }
        layout.atomic_write(&dir, FLAGS_FILE, self.flags.to_lines().as_bytes())?;
        layout.atomic_write(&dir, PROPERTIES_FILE, self.to_properties().render().as_bytes())?;
        debug!("persisted message {} in {}", dir_name, folder);
        Ok(dir_name)
    }

    /// Rebuild a message value from a complete message directory.
    pub(crate) fn load(layout: &Layout, folder: &FolderPath, dir_name: &str) -> Result<MessageData> {
        let dir = layout.message_dir(folder, dir_name);
        if !layout.is_complete_message_dir(&dir) {
            return Err(Error::message_not_found(dir_name));
        }
        let props_text = fs::read_to_string(dir.join(PROPERTIES_FILE))
            .map_err(|e| Error::io(dir.join(PROPERTIES_FILE), e))?;
        let props = Properties::parse(&props_text);

        let body = if dir.join(CONTENT_TXT).is_file() {
            let text = fs::read_to_string(dir.join(CONTENT_TXT))
                .map_err(|e| Error::io(dir.join(CONTENT_TXT), e))?;
            Body::Text(text)
        } else {
            let bytes = fs::read(dir.join(CONTENT_MIME))
                .map_err(|e| Error::io(dir.join(CONTENT_MIME), e))?;
            Body::Mime(bytes)
        };

        let flags = match fs::read_to_string(dir.join(FLAGS_FILE)) {
            Ok(text) => FlagSet::from_lines(&text),
            Err(_) => FlagSet::new(),
        };

        let mut attachments = Vec::new();
        let attach_dir = dir.join(ATTACHMENTS_DIR);
        if attach_dir.is_dir() {
            let entries = fs::read_dir(&attach_dir).map_err(|e| Error::io(&attach_dir, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::io(&attach_dir, e))?;
                if entry.path().is_file() {
                    attachments.push(Attachment {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        data: fs::read(entry.path()).map_err(|e| Error::io(entry.path(), e))?,
                    });
                }
            }
            attachments.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let sent_date = props.get(KEY_DATE).and_then(parse_date);
        let headers = props
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case(KEY_MESSAGE_ID))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(MessageData {
            message_id: props.get(KEY_MESSAGE_ID).map(|s| s.to_string()),
            headers,
            flags,
            body,
            attachments,
            sent_date,
        })
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

/// Where a cached message's bytes currently live.
pub(crate) enum Source {
    /// Only the on-disk directory.
    Local,
    /// Only a fetched remote value, not yet written to disk.
    Remote(Box<MessageData>),
    /// On disk, with the fetched remote value still in hand.
    Both(Box<MessageData>),
}

impl Source {
    fn data(&self) -> Option<&MessageData> {
        match self {
            Source::Local => None,
            Source::Remote(data) | Source::Both(data) => Some(data),
        }
    }

    /// Remote → Both once the value has hit the disk.
    fn mark_persisted(&mut self) {
        if matches!(self, Source::Remote(_)) {
            if let Source::Remote(data) = std::mem::replace(self, Source::Local) {
                *self = Source::Both(data);
            }
        }
    }
}

struct MessageInner {
    source: Source,
    props: Option<Properties>,
    flags: Option<FlagSet>,
}

/// Handle to one cached message, owned by its folder.
///
/// Attributes hydrate lazily: in-memory cache first, then the on-disk
/// files, then the remote when the mode allows. Anything obtained from
/// the remote is written to disk before it is returned.
pub struct CachedMessage {
    store: Store,
    ctl: Arc<crate::folder::FolderCtl>,
    folder: FolderPath,
    dir_name: String,
    inner: Mutex<MessageInner>,
}

impl std::fmt::Debug for CachedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedMessage")
            .field("folder", &self.folder)
            .field("dir_name", &self.dir_name)
            .finish()
    }
}

impl CachedMessage {
    pub(crate) fn from_disk(
        store: Store,
        ctl: Arc<crate::folder::FolderCtl>,
        folder: FolderPath,
        dir_name: String,
    ) -> CachedMessage {
        CachedMessage {
            store,
            ctl,
            folder,
            dir_name,
            inner: Mutex::new(MessageInner {
                source: Source::Local,
                props: None,
                flags: None,
            }),
        }
    }

    pub(crate) fn from_remote(
        store: Store,
        ctl: Arc<crate::folder::FolderCtl>,
        folder: FolderPath,
        data: MessageData,
        persisted: bool,
    ) -> CachedMessage {
        let dir_name = data.dir_name();
        let source = if persisted {
            Source::Both(Box::new(data))
        } else {
            Source::Remote(Box::new(data))
        };
        CachedMessage {
            store,
            ctl,
            folder,
            dir_name,
            inner: Mutex::new(MessageInner {
                source,
                props: None,
                flags: None,
            }),
        }
    }

    /// Directory name under `messages/`; stable across restarts.
    pub fn dir_name(&self) -> &str {
        &self.dir_name
    }

    pub fn folder_path(&self) -> &FolderPath {
        &self.folder
    }

    fn dir(&self) -> PathBuf {
        self.store.layout().message_dir(&self.folder, &self.dir_name)
    }

    /// Hydrate header metadata: memory, then disk, then remote.
    fn load_props(&self, mode: CacheMode) -> Result<Properties> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(props) = &inner.props {
            return Ok(props.clone());
        }

        let props_file = self.dir().join(PROPERTIES_FILE);
        if props_file.is_file() {
            let text =
                fs::read_to_string(&props_file).map_err(|e| Error::io(&props_file, e))?;
            let props = Properties::parse(&text);
            inner.props = Some(props.clone());
            return Ok(props);
        }

        // fetched value still in memory counts as the cache
        if let Some(data) = inner.source.data() {
            let props = data.to_properties();
            if mode != CacheMode::Offline {
                data.persist(self.store.layout(), &self.folder)?;
                inner.source.mark_persisted();
            }
            inner.props = Some(props.clone());
            return Ok(props);
        }

        if mode.allows_remote_read() {
            let id = self.dir_name.clone();
            let fetched = match self.store.with_remote(|r| r.fetch_message(&self.folder, &id)) {
                Some(Ok(fetched)) => fetched,
                Some(Err(e)) if mode.remote_is_best_effort() => {
                    // a flaky server must not break disk-preferred reads
                    warn!("remote read of {}/{} failed: {}", self.folder, id, e);
                    None
                }
                Some(Err(e)) => {
                    return Err(e.into_error(mode, &format!("{}/{}", self.folder, id)));
                }
                None if mode.requires_remote() => {
                    return Err(Error::RemoteUnavailable { mode });
                }
                None => None,
            };
            if let Some(data) = fetched {
                data.persist(self.store.layout(), &self.folder)?;
                let props = data.to_properties();
                inner.source = Source::Both(Box::new(data));
                inner.props = Some(props.clone());
                return Ok(props);
            }
        }

        Err(Error::message_not_found(self.dir_name.as_str()))
    }

    /// The message id this message is addressed by, locally and remotely.
    pub fn message_id(&self) -> Result<String> {
        let mode = self.store.mode();
        let props = self.load_props(mode)?;
        Ok(props
            .get(KEY_MESSAGE_ID)
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.dir_name.clone()))
    }

    pub fn subject(&self) -> Result<Option<String>> {
        self.header(KEY_SUBJECT)
    }

    pub fn from(&self) -> Result<Option<String>> {
        self.header(KEY_FROM)
    }

    /// Bare address from the `From` header, display-name cruft stripped.
    pub fn clean_from(&self) -> Result<Option<String>> {
        Ok(self.from()?.map(|raw| clean_address(&raw)))
    }

    pub fn sent_date(&self) -> Result<Option<DateTime<FixedOffset>>> {
        let mode = self.store.mode();
        let props = self.load_props(mode)?;
        Ok(props.get(KEY_DATE).and_then(parse_date))
    }

    /// Any preserved header, by canonical name.
    pub fn header(&self, name: &str) -> Result<Option<String>> {
        let mode = self.store.mode();
        let props = self.load_props(mode)?;
        Ok(props.get(name).map(|s| s.to_string()))
    }

    pub fn flags(&self) -> Result<FlagSet> {
        let mode = self.store.mode();
        {
            let inner = self.inner.lock().unwrap();
            if let Some(flags) = inner.flags {
                return Ok(flags);
            }
        }
        let flags_file = self.dir().join(FLAGS_FILE);
        if flags_file.is_file() {
            let text = fs::read_to_string(&flags_file).map_err(|e| Error::io(&flags_file, e))?;
            let flags = FlagSet::from_lines(&text);
            self.inner.lock().unwrap().flags = Some(flags);
            return Ok(flags);
        }
        // no flags file yet: hydrate the whole message if we can, since
        // an absent directory and an empty flag set look the same here
        if self.dir().join(PROPERTIES_FILE).is_file() {
            self.inner.lock().unwrap().flags = Some(FlagSet::new());
            return Ok(FlagSet::new());
        }
        self.load_props(mode)?;
        let flags = {
            let inner = self.inner.lock().unwrap();
            inner.source.data().map(|d| d.flags).unwrap_or_default()
        };
        self.inner.lock().unwrap().flags = Some(flags);
        Ok(flags)
    }

    pub fn is_flagged(&self) -> Result<bool> {
        Ok(self.flags()?.contains(MailFlag::Flagged))
    }

    pub fn is_deleted(&self) -> Result<bool> {
        Ok(self.flags()?.contains(MailFlag::Deleted))
    }

    /// Replace this message's flag set, routed by the active mode.
    pub fn set_flags(&self, flags: FlagSet) -> Result<()> {
        let mode = self.store.mode();
        if !mode.allows_local_write() {
            return Err(Error::ReadOnlyMode {
                op: "flag update",
                mode,
            });
        }
        self.ctl.require_writable(&self.folder)?;
        let _guard = self.ctl.write_lock();

        let id = self.message_id()?;
        if mode.server_authoritative() {
            self.store
                .with_remote(|r| r.set_flags(&self.folder, &id, flags))
                .ok_or(Error::RemoteUnavailable { mode })?
                .map_err(|e| e.into_error(mode, &format!("{}/{}", self.folder, id)))?;
            self.write_flags_local(flags)
        } else {
            self.write_flags_local(flags)?;
            match self.store.with_remote(|r| r.set_flags(&self.folder, &id, flags)) {
                Some(Err(e)) => {
                    warn!(
                        "best-effort flag update for {}/{} failed, queued: {}",
                        self.folder, id, e
                    );
                    self.store.record_pending_set_flags(&self.folder, &id, flags);
                }
                _ => (),
            }
            Ok(())
        }
    }

    fn write_flags_local(&self, flags: FlagSet) -> Result<()> {
        let dir = self.dir();
        self.store
            .layout()
            .atomic_write(&dir, FLAGS_FILE, flags.to_lines().as_bytes())?;
        self.inner.lock().unwrap().flags = Some(flags);
        Ok(())
    }

    /// Decoded text body, if this is a text message.
    pub fn text_body(&self) -> Result<Option<String>> {
        let mode = self.store.mode();
        self.load_props(mode)?;
        let content = self.dir().join(CONTENT_TXT);
        if content.is_file() {
            let text = fs::read_to_string(&content).map_err(|e| Error::io(&content, e))?;
            return Ok(Some(text));
        }
        Ok(None)
    }

    /// Raw content bytes: the original MIME when preserved, otherwise the
    /// text body bytes.
    pub fn raw_content(&self) -> Result<Vec<u8>> {
        let mode = self.store.mode();
        self.load_props(mode)?;
        let mime = self.dir().join(CONTENT_MIME);
        if mime.is_file() {
            return fs::read(&mime).map_err(|e| Error::io(&mime, e));
        }
        let text = self.dir().join(CONTENT_TXT);
        fs::read(&text).map_err(|e| Error::io(&text, e))
    }

    /// Names of attachments stored alongside the content.
    pub fn attachment_names(&self) -> Result<Vec<String>> {
        let dir = self.dir().join(ATTACHMENTS_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

static ADDR_IN_BRACKETS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>").unwrap());

/// Strip display-name cruft from an address header value.
fn clean_address(raw: &str) -> String {
    if let Some(caps) = ADDR_IN_BRACKETS.captures(raw) {
        return caps[1].to_string();
    }
    raw.trim().trim_matches('"').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_address_strips_display_names() {
        assert_eq!(
            clean_address("Alice Example <alice@example.com>"),
            "alice@example.com"
        );
        assert_eq!(
            clean_address("\"Example, Alice\" <alice@example.com>"),
            "alice@example.com"
        );
        assert_eq!(clean_address("bob@example.com"), "bob@example.com");
        assert_eq!(clean_address("  carol@example.com  "), "carol@example.com");
    }

    #[test]
    fn effective_id_prefers_the_header() {
        let data = MessageData::text("<abc@x>", "a@x", "s", "b");
        assert_eq!(data.effective_message_id(), "<abc@x>");
        assert_eq!(data.dir_name(), "_abc_x_");
    }

    #[test]
    fn effective_id_falls_back_to_digest() {
        let mut data = MessageData::text("", "a@x", "s", "b");
        data.message_id = None;
        let id = data.effective_message_id();
        assert_eq!(id.len(), 64);
        // stable for identical content
        assert_eq!(id, data.clone().effective_message_id());
    }

    #[test]
    fn properties_carry_required_keys() {
        let data = MessageData::text("<m@x>", "alice@example.com", "Hello", "body");
        let props = data.to_properties();
        assert_eq!(props.get(KEY_MESSAGE_ID), Some("<m@x>"));
        assert_eq!(props.get(KEY_SUBJECT), Some("Hello"));
        assert_eq!(props.get(KEY_FROM), Some("alice@example.com"));
        assert!(props.get(KEY_DATE).is_some());
    }

    #[test]
    fn parse_date_accepts_both_forms() {
        assert!(parse_date("Mon, 2 Jan 2006 15:04:05 -0700").is_some());
        assert!(parse_date("2006-01-02T15:04:05+00:00").is_some());
        assert!(parse_date("not a date").is_none());
    }
}
