use crate::config::ImapConfig;
use crate::error::{Error, Result};
use crate::flags::{FlagSet, MailFlag};
use crate::layout::sanitize_message_id;
use crate::message::{parse_date, Attachment, Body, MessageData};
use crate::path::FolderPath;
use crate::predicate::RemoteQuery;
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use anyhow::anyhow;
use chrono::Duration;
use imap::types::{Fetch, Flag};
use imap::Session;
use log::debug;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use native_tls::{TlsConnector, TlsStream};
use std::net::TcpStream;
use std::ops::Deref;

/// `RemoteStore` over a blocking IMAP session.
///
/// One instance per store; the store's connection mutex serializes the
/// send/receive round-trips. Messages are addressed by `Message-ID`
/// header, raw or in its sanitized directory-name form.
pub struct ImapRemote {
    session: Session<TlsStream<TcpStream>>,
    selected: Option<String>,
    separator: char,
}

impl ImapRemote {
    pub fn connect(config: &ImapConfig, separator: char) -> Result<ImapRemote> {
        if config.ssl == Some(false) {
            return Err(Error::Config(
                "plaintext imap is not supported; leave imap.ssl unset or true".to_string(),
            ));
        }
        let mut tlsconnector = TlsConnector::builder();
        if let Some(cert) = config.server_ca_cert()? {
            tlsconnector.add_root_certificate(cert);
        }
        let tls = tlsconnector
            .build()
            .map_err(|e| Error::Config(format!("tls setup failed: {}", e)))?;

        let socket_addr = (config.host.as_str(), config.effective_port());
        let client = imap::connect(socket_addr, config.host.as_str(), &tls).map_err(|e| {
            Error::RemoteTransient {
                context: format!("connect {}:{}", config.host, config.effective_port()),
                source: anyhow!(e),
            }
        })?;
        let password = config.resolve_password()?;
        let session = client
            .login(config.user.as_str(), &password)
            .map_err(|(e, _)| Error::RemoteTransient {
                context: format!("login {}", config.user),
                source: anyhow!(e),
            })?;
        debug!("imap session established for {}", config.user);
        Ok(ImapRemote {
            session,
            selected: None,
            separator,
        })
    }

    /// Mailbox name on the wire; the default folder maps to INBOX.
    fn mailbox_name(&self, path: &FolderPath) -> String {
        if path.is_root() {
            return "INBOX".to_string();
        }
        path.components().join(&self.separator.to_string())
    }

    fn select(&mut self, mailbox: &str) -> RemoteResult<u32> {
        let mbox = self.session.select(mailbox).map_err(map_imap_err)?;
        self.selected = Some(mailbox.to_string());
        Ok(mbox.exists)
    }

    fn uid_for_message_id(&mut self, mailbox: &str, id: &str) -> RemoteResult<Option<u32>> {
        self.select(mailbox)?;
        let uids = self
            .session
            .uid_search(format!("HEADER Message-ID {}", quote(id)))
            .map_err(map_imap_err)?;
        if let Some(uid) = uids.iter().next() {
            return Ok(Some(*uid));
        }
        // the caller may only know the sanitized directory name
        let zc_vec_fetch = self
            .session
            .uid_fetch("1:*", "(UID RFC822.HEADER)")
            .map_err(map_imap_err)?;
        for fetch in zc_vec_fetch.deref() {
            let (uid, raw) = match (fetch.uid, message_id_from_header(fetch)) {
                (Some(uid), Some(raw)) => (uid, raw),
                _ => continue,
            };
            if raw == id || sanitize_message_id(&raw) == id {
                return Ok(Some(uid));
            }
        }
        Ok(None)
    }

    fn require_uid(&mut self, mailbox: &str, id: &str) -> RemoteResult<u32> {
        self.uid_for_message_id(mailbox, id)?
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}

impl RemoteStore for ImapRemote {
    fn list_folders(&mut self, path: &FolderPath) -> RemoteResult<Vec<String>> {
        let pattern = if path.is_root() {
            "%".to_string()
        } else {
            format!("{}{}%", self.mailbox_name(path), self.separator)
        };
        let listing = self
            .session
            .list(None, Some(pattern.as_str()))
            .map_err(map_imap_err)?;
        let mut names = Vec::new();
        for mailbox in listing.deref() {
            let full = mailbox.name();
            let child = match full.rsplit(self.separator).next() {
                Some(last) if !last.is_empty() => last.to_string(),
                _ => continue,
            };
            names.push(child);
        }
        names.sort();
        Ok(names)
    }

    fn folder_exists(&mut self, path: &FolderPath) -> RemoteResult<bool> {
        let name = self.mailbox_name(path);
        let listing = self
            .session
            .list(None, Some(name.as_str()))
            .map_err(map_imap_err)?;
        Ok(!listing.deref().is_empty())
    }

    fn create_folder(&mut self, path: &FolderPath) -> RemoteResult<()> {
        let name = self.mailbox_name(path);
        self.session.create(&name).map_err(map_imap_err)
    }

    fn delete_folder(&mut self, path: &FolderPath) -> RemoteResult<()> {
        let name = self.mailbox_name(path);
        if self.selected.as_deref() == Some(name.as_str()) {
            self.selected = None;
        }
        self.session.delete(&name).map_err(map_imap_err)
    }

    fn message_count(&mut self, path: &FolderPath) -> RemoteResult<u32> {
        let name = self.mailbox_name(path);
        self.select(&name)
    }

    fn fetch_messages(&mut self, path: &FolderPath) -> RemoteResult<Vec<MessageData>> {
        let name = self.mailbox_name(path);
        let exists = self.select(&name)?;
        if exists == 0 {
            return Ok(Vec::new());
        }
        let zc_vec_fetch = self
            .session
            .uid_fetch("1:*", "(UID FLAGS INTERNALDATE BODY.PEEK[])")
            .map_err(map_imap_err)?;
        let mut messages = Vec::new();
        for fetch in zc_vec_fetch.deref() {
            let body = match fetch.body() {
                Some(body) => body,
                None => continue,
            };
            let flags = flagset_from_imap(fetch.flags());
            messages.push(parse_rfc822(body, flags).map_err(RemoteError::Transient)?);
        }
        Ok(messages)
    }

    fn fetch_message(
        &mut self,
        path: &FolderPath,
        message_id: &str,
    ) -> RemoteResult<Option<MessageData>> {
        let name = self.mailbox_name(path);
        let uid = match self.uid_for_message_id(&name, message_id)? {
            Some(uid) => uid,
            None => return Ok(None),
        };
        let zc_vec_fetch = self
            .session
            .uid_fetch(
                format!("{}", uid),
                "(UID FLAGS INTERNALDATE BODY.PEEK[])",
            )
            .map_err(map_imap_err)?;
        for fetch in zc_vec_fetch.deref() {
            if let Some(body) = fetch.body() {
                let flags = flagset_from_imap(fetch.flags());
                return Ok(Some(parse_rfc822(body, flags).map_err(RemoteError::Transient)?));
            }
        }
        Ok(None)
    }

    fn append(
        &mut self,
        path: &FolderPath,
        data: &MessageData,
    ) -> RemoteResult<Option<MessageData>> {
        let name = self.mailbox_name(path);
        let body = to_rfc822(data);
        let flags = imap_flags(data.flags);
        self.session
            .append(&name, &body)
            .flags(flags)
            .finish()
            .map_err(map_imap_err)?;
        Ok(None)
    }

    fn set_flags(
        &mut self,
        path: &FolderPath,
        message_id: &str,
        flags: FlagSet,
    ) -> RemoteResult<()> {
        let name = self.mailbox_name(path);
        let uid = self.require_uid(&name, message_id)?;
        self.session
            .uid_store(format!("{}", uid), format!("FLAGS ({})", flag_names(flags)))
            .map(|_| ())
            .map_err(map_imap_err)
    }

    fn delete_message(&mut self, path: &FolderPath, message_id: &str) -> RemoteResult<()> {
        let name = self.mailbox_name(path);
        let uid = self.require_uid(&name, message_id)?;
        self.session
            .uid_store(format!("{}", uid), "+FLAGS (\\Deleted)")
            .map_err(map_imap_err)?;
        self.session
            .uid_expunge(format!("{}", uid))
            .map(|_| ())
            .map_err(map_imap_err)
    }

    fn search(&mut self, path: &FolderPath, query: &RemoteQuery) -> RemoteResult<Vec<String>> {
        let name = self.mailbox_name(path);
        self.select(&name)?;
        let uids = self
            .session
            .uid_search(query_string(query))
            .map_err(map_imap_err)?;
        let mut ids = Vec::new();
        for uid in uids {
            let zc_vec_fetch = self
                .session
                .uid_fetch(format!("{}", uid), "(UID RFC822.HEADER)")
                .map_err(map_imap_err)?;
            for fetch in zc_vec_fetch.deref() {
                if let Some(id) = message_id_from_header(fetch) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn logout(&mut self) -> RemoteResult<()> {
        self.session.logout().map_err(map_imap_err)
    }
}

fn map_imap_err(e: imap::error::Error) -> RemoteError {
    match e {
        imap::error::Error::Io(io) => RemoteError::Unavailable(anyhow!(io)),
        imap::error::Error::ConnectionLost => {
            RemoteError::Unavailable(anyhow!("connection lost"))
        }
        other => RemoteError::Transient(anyhow!(other)),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Lower a remote query to IMAP SEARCH keys. All shapes are
/// conjunctive, which is why `Or`/`Not` never reach this adapter.
fn query_string(query: &RemoteQuery) -> String {
    match query {
        RemoteQuery::SenderContains(s) => format!("FROM {}", quote(s)),
        RemoteQuery::SubjectContains(s) => format!("SUBJECT {}", quote(s)),
        RemoteQuery::SentDateBetween(start, end) => format!(
            "SINCE {} BEFORE {}",
            start.format("%d-%b-%Y"),
            (*end + Duration::days(1)).format("%d-%b-%Y")
        ),
        RemoteQuery::And(terms) => terms
            .iter()
            .map(query_string)
            .collect::<Vec<String>>()
            .join(" "),
    }
}

fn message_id_from_header(fetch: &Fetch) -> Option<String> {
    let header = fetch.header()?;
    let parsed = mailparse::parse_headers(header).ok()?;
    parsed.0.get_first_value("Message-ID")
}

fn flagset_from_imap(flags: &[Flag]) -> FlagSet {
    let mut set = FlagSet::new();
    for flag in flags {
        match flag {
            Flag::Seen => set.insert(MailFlag::Seen),
            Flag::Answered => set.insert(MailFlag::Answered),
            Flag::Flagged => set.insert(MailFlag::Flagged),
            Flag::Deleted => set.insert(MailFlag::Deleted),
            Flag::Draft => set.insert(MailFlag::Draft),
            Flag::Recent => set.insert(MailFlag::Recent),
            Flag::Custom(_) => set.insert(MailFlag::User),
            _ => (),
        }
    }
    set
}

fn imap_flags(set: FlagSet) -> Vec<Flag<'static>> {
    let mut flags = Vec::new();
    for flag in set.iter() {
        match flag {
            MailFlag::Seen => flags.push(Flag::Seen),
            MailFlag::Answered => flags.push(Flag::Answered),
            MailFlag::Flagged => flags.push(Flag::Flagged),
            MailFlag::Deleted => flags.push(Flag::Deleted),
            MailFlag::Draft => flags.push(Flag::Draft),
            // \Recent is server-managed and cannot be stored
            MailFlag::Recent => (),
            MailFlag::User => flags.push(Flag::Custom("USER".into())),
        }
    }
    flags
}

fn flag_names(set: FlagSet) -> String {
    imap_flags(set)
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

/// Decode a fetched RFC 822 message into the engine's value type.
/// Single-part text/plain keeps a decoded text body; everything else
/// preserves the original bytes.
fn parse_rfc822(bytes: &[u8], flags: FlagSet) -> anyhow::Result<MessageData> {
    let parsed = mailparse::parse_mail(bytes)?;
    let mut headers = Vec::new();
    let mut message_id = None;
    let mut sent_date = None;
    for header in &parsed.headers {
        let key = header.get_key();
        let value = header.get_value();
        if key.eq_ignore_ascii_case("Message-ID") {
            message_id = Some(value.trim().to_string());
        }
        if key.eq_ignore_ascii_case("Date") {
            sent_date = parse_date(value.trim());
        }
        headers.push((key, value));
    }

    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments)?;

    let body = if parsed.subparts.is_empty()
        && parsed.ctype.mimetype.eq_ignore_ascii_case("text/plain")
    {
        Body::Text(parsed.get_body()?)
    } else {
        Body::Mime(bytes.to_vec())
    };

    Ok(MessageData {
        message_id,
        headers,
        flags,
        body,
        attachments,
        sent_date,
    })
}

fn collect_attachments(part: &ParsedMail, out: &mut Vec<Attachment>) -> anyhow::Result<()> {
    for sub in &part.subparts {
        let disposition = sub.get_content_disposition();
        if disposition.disposition == DispositionType::Attachment {
            if let Some(name) = disposition.params.get("filename") {
                out.push(Attachment {
                    name: name.clone(),
                    data: sub.get_body_raw()?,
                });
            }
        }
        collect_attachments(sub, out)?;
    }
    Ok(())
}

/// Serialize a message value for APPEND: original bytes when we have
/// them, a minimal RFC 822 rendering for locally authored text.
fn to_rfc822(data: &MessageData) -> Vec<u8> {
    match &data.body {
        Body::Mime(bytes) => bytes.clone(),
        Body::Text(text) => {
            let mut out = String::new();
            if let Some(id) = &data.message_id {
                out.push_str("Message-ID: ");
                out.push_str(id);
                out.push_str("\r\n");
            }
            if data.header("Date").is_none() {
                if let Some(date) = &data.sent_date {
                    out.push_str("Date: ");
                    out.push_str(&date.to_rfc2822());
                    out.push_str("\r\n");
                }
            }
            for (key, value) in &data.headers {
                if key.eq_ignore_ascii_case("Message-ID") {
                    continue;
                }
                out.push_str(key);
                out.push_str(": ");
                out.push_str(&value.replace('\n', " "));
                out.push_str("\r\n");
            }
            out.push_str("\r\n");
            out.push_str(&text.replace('\n', "\r\n"));
            out.into_bytes()
        }
    }
}
