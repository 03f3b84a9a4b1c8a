use chrono::{DateTime, Duration, Utc};
use mailcache::{
    AccessMode, CacheConfig, CacheMode, CancelToken, Config, Error, FlagSet, FolderPath, MailFlag,
    MessageData, Predicate, RemoteError, RemoteQuery, RemoteResult, RemoteStore, Store, SyncStatus,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::{tempdir, TempDir};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config_for(root: &TempDir, mode: &str) -> Config {
    Config {
        cache: CacheConfig {
            directory: Some(PathBuf::from(root.path())),
            mode: Some(mode.to_string()),
            separator: None,
        },
        imap: None,
    }
}

// ---------------------------------------------------------------------
// Mock remote
// ---------------------------------------------------------------------

#[derive(Default)]
struct MockState {
    folders: HashMap<String, Vec<MessageData>>,
    fail_writes: bool,
    fail_reads_for: Option<String>,
    fetch_started: Option<Sender<()>>,
    fetch_release: Option<Receiver<()>>,
}

#[derive(Clone, Default)]
struct MockRemote {
    state: Arc<Mutex<MockState>>,
}

impl MockRemote {
    fn with_folder(folder: &str) -> MockRemote {
        let mock = MockRemote::default();
        mock.state
            .lock()
            .unwrap()
            .folders
            .insert(folder.to_string(), Vec::new());
        mock
    }

    fn put_message(&self, folder: &str, data: MessageData) {
        self.state
            .lock()
            .unwrap()
            .folders
            .entry(folder.to_string())
            .or_default()
            .push(data);
    }

    fn message_count(&self, folder: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .folders
            .get(folder)
            .map(|m| m.len())
            .unwrap_or(0)
    }

    fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    fn set_fail_reads_for(&self, folder: Option<&str>) {
        self.state.lock().unwrap().fail_reads_for = folder.map(|s| s.to_string());
    }

    fn add_folder(&self, folder: &str) {
        self.state
            .lock()
            .unwrap()
            .folders
            .entry(folder.to_string())
            .or_default();
    }
}

fn read_refused() -> RemoteError {
    RemoteError::Transient(anyhow::anyhow!("mock read refused"))
}

fn write_refused() -> RemoteError {
    RemoteError::Transient(anyhow::anyhow!("mock write refused"))
}

fn matches_query(query: &RemoteQuery, data: &MessageData) -> bool {
    match query {
        RemoteQuery::SenderContains(s) => data
            .header("From")
            .map(|v| v.to_lowercase().contains(&s.to_lowercase()))
            .unwrap_or(false),
        RemoteQuery::SubjectContains(s) => data
            .header("Subject")
            .map(|v| v.to_lowercase().contains(&s.to_lowercase()))
            .unwrap_or(false),
        RemoteQuery::SentDateBetween(a, b) => data
            .sent_date
            .map(|d| {
                let d = d.with_timezone(&Utc);
                d >= *a && d <= *b
            })
            .unwrap_or(false),
        RemoteQuery::And(terms) => terms.iter().all(|t| matches_query(t, data)),
    }
}

impl RemoteStore for MockRemote {
    fn list_folders(&mut self, path: &FolderPath) -> RemoteResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let prefix = if path.is_root() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut names: Vec<String> = state
            .folders
            .keys()
            .filter_map(|full| {
                let rest = full.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(rest.to_string())
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn folder_exists(&mut self, path: &FolderPath) -> RemoteResult<bool> {
        if path.is_root() {
            return Ok(true);
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .folders
            .contains_key(&path.to_string()))
    }

    fn create_folder(&mut self, path: &FolderPath) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(write_refused());
        }
        state.folders.entry(path.to_string()).or_default();
        Ok(())
    }

    fn delete_folder(&mut self, path: &FolderPath) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(write_refused());
        }
        let prefix = format!("{}/", path);
        state
            .folders
            .retain(|name, _| name != &path.to_string() && !name.starts_with(&prefix));
        Ok(())
    }

    fn message_count(&mut self, path: &FolderPath) -> RemoteResult<u32> {
        let state = self.state.lock().unwrap();
        Ok(state
            .folders
            .get(&path.to_string())
            .map(|m| m.len() as u32)
            .unwrap_or(0))
    }

    fn fetch_messages(&mut self, path: &FolderPath) -> RemoteResult<Vec<MessageData>> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            (state.fetch_started.take(), state.fetch_release.take())
        };
        if let (Some(started), Some(release)) = gate {
            started.send(()).ok();
            release.recv().ok();
        }
        let state = self.state.lock().unwrap();
        if state.fail_reads_for.as_deref() == Some(path.to_string().as_str()) {
            return Err(read_refused());
        }
        state
            .folders
            .get(&path.to_string())
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))
    }

    fn fetch_message(
        &mut self,
        path: &FolderPath,
        message_id: &str,
    ) -> RemoteResult<Option<MessageData>> {
        let state = self.state.lock().unwrap();
        if state.fail_reads_for.as_deref() == Some(path.to_string().as_str()) {
            return Err(read_refused());
        }
        let messages = match state.folders.get(&path.to_string()) {
            Some(messages) => messages,
            None => return Ok(None),
        };
        Ok(messages
            .iter()
            .find(|m| {
                let id = m.effective_message_id();
                id == message_id || m.dir_name() == message_id
            })
            .cloned())
    }

    fn append(
        &mut self,
        path: &FolderPath,
        data: &MessageData,
    ) -> RemoteResult<Option<MessageData>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(write_refused());
        }
        state
            .folders
            .entry(path.to_string())
            .or_default()
            .push(data.clone());
        Ok(None)
    }

    fn set_flags(
        &mut self,
        path: &FolderPath,
        message_id: &str,
        flags: FlagSet,
    ) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(write_refused());
        }
        let messages = state
            .folders
            .get_mut(&path.to_string())
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        for message in messages.iter_mut() {
            let id = message.effective_message_id();
            if id == message_id || message.dir_name() == message_id {
                message.flags = flags;
                return Ok(());
            }
        }
        Err(RemoteError::NotFound(message_id.to_string()))
    }

    fn delete_message(&mut self, path: &FolderPath, message_id: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(write_refused());
        }
        let messages = state
            .folders
            .get_mut(&path.to_string())
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        let before = messages.len();
        messages.retain(|m| {
            let id = m.effective_message_id();
            id != message_id && m.dir_name() != message_id
        });
        if messages.len() == before {
            return Err(RemoteError::NotFound(message_id.to_string()));
        }
        Ok(())
    }

    fn search(&mut self, path: &FolderPath, query: &RemoteQuery) -> RemoteResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        let messages = state
            .folders
            .get(&path.to_string())
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        Ok(messages
            .iter()
            .filter(|m| matches_query(query, m))
            .map(|m| m.effective_message_id())
            .collect())
    }
}

// ---------------------------------------------------------------------
// Offline folder lifecycle
// ---------------------------------------------------------------------

#[test]
fn offline_create_and_list() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "OFFLINE")).unwrap();

    store.folder("INBOX").unwrap().create().unwrap();
    store.folder("INBOX/Archive").unwrap().create().unwrap();

    assert_eq!(store.default_folder().list().unwrap(), vec!["INBOX"]);
    assert_eq!(
        store.folder("INBOX").unwrap().list().unwrap(),
        vec!["Archive"]
    );
    assert!(store.root().join("INBOX").is_dir());
    assert!(store.root().join("INBOX/Archive").is_dir());
    store.close().unwrap();
}

#[test]
fn list_with_pattern_returns_everything() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "OFFLINE")).unwrap();
    store.folder("INBOX").unwrap().create().unwrap();
    store.folder("Sent").unwrap().create().unwrap();

    // the pattern is documented as ignored
    let folders = store.default_folder().list_with_pattern("IN*").unwrap();
    assert_eq!(folders, vec!["INBOX", "Sent"]);
    assert_eq!(folders, store.default_folder().list().unwrap());
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Offline mutation rejection
// ---------------------------------------------------------------------

#[test]
fn offline_append_is_rejected_and_cache_untouched() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "OFFLINE")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox.open(AccessMode::ReadWrite).unwrap();

    let message = MessageData::text("<abc@x>", "a@x", "Hello", "body");
    let err = inbox.append_messages(&[message]).unwrap_err();
    assert!(matches!(err, Error::ReadOnlyMode { .. }));
    assert_eq!(inbox.message_count().unwrap(), 0);
    assert!(!store.root().join("INBOX/messages").exists());

    // flag updates and deletes are rejected the same way
    assert!(matches!(
        store.folder("INBOX").unwrap().delete(true),
        Err(Error::ReadOnlyMode { .. })
    ));
    inbox.close(false).unwrap();
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Accelerated appends without a reachable server
// ---------------------------------------------------------------------

#[test]
fn accelerated_append_without_remote() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();

    inbox.open(AccessMode::ReadWrite).unwrap();
    inbox
        .append_messages(&[MessageData::text("<abc@x>", "a@x", "Hello", "hi there")])
        .unwrap();
    inbox.close(false).unwrap();

    let reopened = store.folder("INBOX").unwrap();
    reopened.open(AccessMode::ReadOnly).unwrap();
    assert_eq!(reopened.message_count().unwrap(), 1);
    let message = reopened.message(1).unwrap();
    assert_eq!(message.subject().unwrap().as_deref(), Some("Hello"));
    reopened.close(false).unwrap();

    let props = std::fs::read_to_string(
        store
            .root()
            .join("INBOX/messages/_abc_x_/message.properties"),
    )
    .unwrap();
    assert!(props.lines().any(|l| l == "Subject=Hello"));
    store.close().unwrap();
}

#[test]
fn accelerated_serves_remote_on_local_miss() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    mock.put_message(
        "INBOX",
        MessageData::text("<m@x>", "a@x", "Fetched", "remote body"),
    );
    let store =
        Store::open_with_remote(&config_for(&root, "ACCELERATED"), Box::new(mock.clone()))
            .unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();

    // nothing on disk yet: the lookup falls through to the server and
    // the fetched value is written back before it is returned
    let message = inbox.message_by_id("<m@x>").unwrap();
    assert_eq!(message.subject().unwrap().as_deref(), Some("Fetched"));
    assert!(store
        .root()
        .join("INBOX/messages/_m_x_/message.properties")
        .is_file());

    // with the server now failing, the disk copy answers
    mock.set_fail_reads_for(Some("INBOX"));
    let again = store.folder("INBOX").unwrap().message_by_id("<m@x>").unwrap();
    assert_eq!(again.subject().unwrap().as_deref(), Some("Fetched"));

    // a miss on both sides degrades to not-found, not a remote error
    let err = store
        .folder("INBOX")
        .unwrap()
        .message_by_id("<ghost@x>")
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Mode elevation during sync, restored afterwards
// ---------------------------------------------------------------------

#[test]
fn synchronize_elevates_mode_and_restores_it() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    mock.put_message("INBOX", MessageData::text("<s1@x>", "a@x", "One", "1"));

    let (started_tx, started_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel();
    {
        let mut state = mock.state.lock().unwrap();
        state.fetch_started = Some(started_tx);
        state.fetch_release = Some(release_rx);
    }

    let store =
        Store::open_with_remote(&config_for(&root, "ACCELERATED"), Box::new(mock.clone()))
            .unwrap();
    assert_eq!(store.mode(), CacheMode::Accelerated);

    let worker = {
        let store = store.clone();
        thread::spawn(move || store.manager().synchronize("INBOX", &CancelToken::new()))
    };

    started_rx.recv().unwrap();
    assert_eq!(store.mode(), CacheMode::Refresh);
    release_tx.send(()).unwrap();

    let status = worker.join().unwrap().unwrap();
    assert!(status.success);
    assert_eq!(status.message_count, 1);
    assert_eq!(store.mode(), CacheMode::Accelerated);
    store.close().unwrap();
}

#[test]
fn cancelled_synchronize_restores_mode() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    mock.put_message("INBOX", MessageData::text("<c1@x>", "a@x", "One", "1"));
    let store =
        Store::open_with_remote(&config_for(&root, "ACCELERATED"), Box::new(mock)).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = store.manager().synchronize("INBOX", &cancel).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(store.mode(), CacheMode::Accelerated);

    let status = store.manager().sync_status("INBOX").unwrap().unwrap();
    assert!(!status.success);
    store.close().unwrap();
}

#[test]
fn synchronize_tree_recurses_and_records_per_folder_failures() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    mock.add_folder("INBOX/Bad");
    mock.add_folder("INBOX/Sub");
    mock.put_message("INBOX", MessageData::text("<t1@x>", "a@x", "one", "b"));
    mock.put_message("INBOX", MessageData::text("<t2@x>", "a@x", "two", "b"));
    mock.put_message("INBOX/Sub", MessageData::text("<t3@x>", "a@x", "three", "b"));
    mock.set_fail_reads_for(Some("INBOX/Bad"));

    let store =
        Store::open_with_remote(&config_for(&root, "ACCELERATED"), Box::new(mock)).unwrap();
    let statuses = store
        .manager()
        .synchronize_tree("INBOX", &CancelToken::new())
        .unwrap();
    assert_eq!(store.mode(), CacheMode::Accelerated);

    // one failing folder does not stop its siblings
    let by_path: HashMap<String, SyncStatus> = statuses.into_iter().collect();
    assert_eq!(by_path.len(), 3);
    assert!(by_path["INBOX"].success);
    assert_eq!(by_path["INBOX"].message_count, 2);
    assert!(!by_path["INBOX/Bad"].success);
    assert!(by_path["INBOX/Bad"].error.is_some());
    assert!(by_path["INBOX/Sub"].success);
    assert_eq!(by_path["INBOX/Sub"].message_count, 1);

    assert!(store
        .root()
        .join("INBOX/messages/_t1_x_/message.properties")
        .is_file());
    assert!(store
        .root()
        .join("INBOX/Sub/messages/_t3_x_/message.properties")
        .is_file());

    // the recorded failure is queryable afterwards
    let bad = store.manager().sync_status("INBOX/Bad").unwrap().unwrap();
    assert!(!bad.success);
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Purging respects the FLAGGED flag
// ---------------------------------------------------------------------

fn aged_message(id: &str, subject: &str, days_ago: i64, flagged: bool) -> MessageData {
    let mut data = MessageData::text(id, "old@x", subject, "old body");
    data.sent_date = Some((Utc::now() - Duration::days(days_ago)).fixed_offset());
    if flagged {
        data.flags.insert(MailFlag::Flagged);
    }
    data
}

#[test]
fn purge_respects_flagged_messages() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox
        .append_messages(&[
            aged_message("<a@x>", "plain", 60, false),
            aged_message("<b@x>", "starred", 60, true),
        ])
        .unwrap();

    // purge is a DESTRUCTIVE-only operation
    let err = store
        .manager()
        .purge_older_than("INBOX", 30, false, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnlyMode { .. }));

    store.set_mode(CacheMode::Destructive);
    let purged = store
        .manager()
        .purge_older_than("INBOX", 30, false, &CancelToken::new())
        .unwrap();
    assert_eq!(purged, 1);
    assert!(!store.root().join("INBOX/messages/_a_x_").exists());
    assert!(store.root().join("INBOX/messages/_b_x_").exists());

    let purged = store
        .manager()
        .purge_older_than("INBOX", 30, true, &CancelToken::new())
        .unwrap();
    assert_eq!(purged, 1);
    assert!(!store.root().join("INBOX/messages/_b_x_").exists());
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Clearing a subtree
// ---------------------------------------------------------------------

#[test]
fn clear_cache_removes_only_the_subtree() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "OFFLINE")).unwrap();
    for path in ["INBOX", "INBOX/Sub", "Sent"] {
        store.folder(path).unwrap().create().unwrap();
    }

    assert!(store.manager().clear_cache(Some("INBOX")).unwrap());
    assert!(!store.root().join("INBOX").exists());
    assert!(store.root().join("Sent").is_dir());
    assert!(store.root().is_dir());

    // idempotent
    assert!(!store.manager().clear_cache(Some("INBOX")).unwrap());
    // path escapes are rejected
    assert!(store.manager().clear_cache(Some("../else")).is_err());

    // no path clears everything but keeps the root usable
    assert!(store.manager().clear_cache(None).unwrap());
    assert!(store.root().is_dir());
    assert_eq!(store.default_folder().list().unwrap().len(), 0);
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Round-trip laws
// ---------------------------------------------------------------------

#[test]
fn append_then_get_preserves_attributes() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();

    let mut data = MessageData::text(
        "<rt@x>",
        "Alice Example <alice@example.com>",
        "Quarterly report",
        "see attached",
    );
    data.sent_date = DateTime::parse_from_rfc2822("Mon, 2 Jan 2006 15:04:05 -0700").ok();
    data.flags.insert(MailFlag::Seen);
    inbox.append_messages(&[data]).unwrap();

    let message = inbox.message_by_id("<rt@x>").unwrap();
    assert_eq!(
        message.subject().unwrap().as_deref(),
        Some("Quarterly report")
    );
    assert_eq!(
        message.from().unwrap().as_deref(),
        Some("Alice Example <alice@example.com>")
    );
    assert_eq!(
        message.clean_from().unwrap().as_deref(),
        Some("alice@example.com")
    );
    assert!(message.sent_date().unwrap().is_some());
    assert!(message.flags().unwrap().contains(MailFlag::Seen));
    assert_eq!(
        message.text_body().unwrap().as_deref(),
        Some("see attached")
    );
    store.close().unwrap();
}

#[test]
fn flag_write_then_read_round_trips() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox
        .append_messages(&[MessageData::text("<f@x>", "a@x", "s", "b")])
        .unwrap();

    let flags = FlagSet::new()
        .with(MailFlag::Answered)
        .with(MailFlag::Flagged);
    inbox.message_by_id("<f@x>").unwrap().set_flags(flags).unwrap();

    // a fresh handle reads from disk
    let message = store.folder("INBOX").unwrap().message_by_id("<f@x>").unwrap();
    assert_eq!(message.flags().unwrap(), flags);
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------

#[test]
fn concurrent_appends_all_land() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    store.folder("INBOX").unwrap().create().unwrap();

    let mut workers = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        workers.push(thread::spawn(move || {
            let inbox = store.folder("INBOX").unwrap();
            inbox
                .append_messages(&[MessageData::text(
                    &format!("<c{}@x>", i),
                    "a@x",
                    &format!("msg {}", i),
                    "body",
                )])
                .unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(store.folder("INBOX").unwrap().message_count().unwrap(), 8);
    store.close().unwrap();
}

#[test]
fn synchronize_yields_superset_of_remote_snapshot() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    for i in 0..3 {
        mock.put_message(
            "INBOX",
            MessageData::text(&format!("<r{}@x>", i), "a@x", &format!("remote {}", i), "b"),
        );
    }
    let store =
        Store::open_with_remote(&config_for(&root, "ACCELERATED"), Box::new(mock.clone()))
            .unwrap();

    // something appended locally before the sync must survive it
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox
        .append_messages(&[MessageData::text("<local@x>", "me@x", "mine", "b")])
        .unwrap();

    let status = store
        .manager()
        .synchronize("INBOX", &CancelToken::new())
        .unwrap();
    assert!(status.success);
    assert_eq!(status.message_count, 3);

    let names: Vec<String> = store
        .folder("INBOX")
        .unwrap()
        .messages()
        .unwrap()
        .iter()
        .map(|m| m.dir_name().to_string())
        .collect();
    for i in 0..3 {
        assert!(names.contains(&format!("_r{}_x_", i)));
    }
    assert!(names.contains(&"_local_x_".to_string()));
    store.close().unwrap();
}

#[test]
fn folder_open_state_gates_writes() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox.open(AccessMode::ReadOnly).unwrap();

    let err = inbox
        .append_messages(&[MessageData::text("<w@x>", "a@x", "s", "b")])
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnlyState { .. }));

    // read-write over read-only is refused; read-only stacks
    assert!(matches!(
        inbox.open(AccessMode::ReadWrite),
        Err(Error::ReadOnlyState { .. })
    ));
    inbox.open(AccessMode::ReadOnly).unwrap();
    inbox.close(false).unwrap();
    inbox.close(false).unwrap();
    assert!(!inbox.is_open());
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Online routing through the remote
// ---------------------------------------------------------------------

#[test]
fn online_append_writes_remote_then_disk() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    let store =
        Store::open_with_remote(&config_for(&root, "ONLINE"), Box::new(mock.clone())).unwrap();

    let inbox = store.folder("INBOX").unwrap();
    inbox
        .append_messages(&[MessageData::text("<o@x>", "a@x", "Online", "b")])
        .unwrap();
    assert_eq!(mock.message_count("INBOX"), 1);
    assert!(store
        .root()
        .join("INBOX/messages/_o_x_/message.properties")
        .is_file());

    // remote flag update is authoritative and mirrored locally
    let message = inbox.message_by_id("<o@x>").unwrap();
    let flags = FlagSet::new().with(MailFlag::Seen);
    message.set_flags(flags).unwrap();
    let state = mock.state.lock().unwrap();
    assert_eq!(state.folders["INBOX"][0].flags, flags);
    drop(state);
    assert_eq!(message.flags().unwrap(), flags);
    store.close().unwrap();
}

#[test]
fn online_delete_requires_mode_and_removes_both_sides() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    let store =
        Store::open_with_remote(&config_for(&root, "ONLINE"), Box::new(mock.clone())).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox
        .append_messages(&[MessageData::text("<d@x>", "a@x", "doomed", "b")])
        .unwrap();

    // expunge removes DELETED-flagged messages remotely and locally
    inbox.open(AccessMode::ReadWrite).unwrap();
    let message = inbox.message_by_id("<d@x>").unwrap();
    message
        .set_flags(FlagSet::new().with(MailFlag::Deleted))
        .unwrap();
    inbox.close(true).unwrap();
    assert_eq!(mock.message_count("INBOX"), 0);
    assert!(!store.root().join("INBOX/messages/_d_x_").exists());

    // folder deletion: remote first, then the local tree
    assert!(inbox.delete(true).unwrap());
    assert!(!store.root().join("INBOX").exists());
    assert!(!mock
        .state
        .lock()
        .unwrap()
        .folders
        .contains_key("INBOX"));
    store.close().unwrap();
}

#[test]
fn online_search_lowers_to_the_remote() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    mock.put_message(
        "INBOX",
        MessageData::text("<s1@x>", "alice@x", "weekly report", "b"),
    );
    mock.put_message(
        "INBOX",
        MessageData::text("<s2@x>", "bob@x", "lunch", "b"),
    );
    let store =
        Store::open_with_remote(&config_for(&root, "ONLINE"), Box::new(mock)).unwrap();

    let inbox = store.folder("INBOX").unwrap();
    let hits = inbox
        .search(&Predicate::SubjectContains("report".into()))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(
        hits[0].subject().unwrap().as_deref(),
        Some("weekly report")
    );

    // Or stays local even online: hydrated from the server's copies
    let hits = inbox
        .search(&Predicate::Or(vec![
            Predicate::SenderContains("alice".into()),
            Predicate::SenderContains("bob".into()),
        ]))
        .unwrap();
    assert_eq!(hits.len(), 2);
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Pending queue
// ---------------------------------------------------------------------

#[test]
fn failed_best_effort_writes_queue_and_drain() {
    init_logging();
    let root = tempdir().unwrap();
    let mock = MockRemote::with_folder("INBOX");
    mock.set_fail_writes(true);
    let store =
        Store::open_with_remote(&config_for(&root, "ACCELERATED"), Box::new(mock.clone()))
            .unwrap();

    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox
        .append_messages(&[MessageData::text("<p@x>", "a@x", "pending", "b")])
        .unwrap();

    // the local side succeeded, the remote write is queued
    assert_eq!(inbox.message_count().unwrap(), 1);
    assert!(store.pending_count() > 0);
    assert_eq!(mock.message_count("INBOX"), 0);

    // still failing: everything stays queued
    let (replayed, remaining) = store.manager().drain_pending().unwrap();
    assert_eq!(replayed, 0);
    assert!(remaining > 0);

    mock.set_fail_writes(false);
    let (replayed, remaining) = store.manager().drain_pending().unwrap();
    assert!(replayed > 0);
    assert_eq!(remaining, 0);
    assert_eq!(mock.message_count("INBOX"), 1);
    assert_eq!(store.pending_count(), 0);
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Local search and statistics
// ---------------------------------------------------------------------

#[test]
fn local_search_evaluates_the_algebra() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    let inbox = store.folder("INBOX").unwrap();
    inbox.create().unwrap();
    inbox
        .append_messages(&[
            MessageData::text("<l1@x>", "alice@x", "weekly report", "b"),
            MessageData::text("<l2@x>", "bob@x", "report draft", "b"),
            MessageData::text("<l3@x>", "carol@x", "lunch", "b"),
        ])
        .unwrap();

    let hits = inbox
        .search(&Predicate::And(vec![
            Predicate::SubjectContains("report".into()),
            Predicate::Not(Box::new(Predicate::SenderContains("bob".into()))),
        ]))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].clean_from().unwrap().as_deref(), Some("alice@x"));
    store.close().unwrap();
}

#[test]
fn statistics_count_folders_messages_and_bytes() {
    init_logging();
    let root = tempdir().unwrap();
    let store = Store::open(&config_for(&root, "ACCELERATED")).unwrap();
    store.folder("INBOX").unwrap().create().unwrap();
    store.folder("INBOX/Sub").unwrap().create().unwrap();
    store
        .folder("INBOX")
        .unwrap()
        .append_messages(&[MessageData::text("<st@x>", "a@x", "s", "body")])
        .unwrap();

    let stats = store.manager().statistics().unwrap();
    assert_eq!(stats.folders, 2);
    assert_eq!(stats.messages, 1);
    assert!(stats.total_bytes > 0);
    assert!(!stats.formatted_size().is_empty());
    store.close().unwrap();
}

// ---------------------------------------------------------------------
// Store registry
// ---------------------------------------------------------------------

#[test]
fn reopening_returns_the_live_instance() {
    init_logging();
    let root = tempdir().unwrap();
    let config = config_for(&root, "OFFLINE");
    let store = Store::open(&config).unwrap();
    store.set_mode(CacheMode::Accelerated);

    // same (root, username) key: the live store comes back
    let again = Store::open(&config).unwrap();
    assert_eq!(again.mode(), CacheMode::Accelerated);

    again.close().unwrap();
    let fresh = Store::open(&config).unwrap();
    assert_eq!(fresh.mode(), CacheMode::Offline);
    fresh.close().unwrap();
}
