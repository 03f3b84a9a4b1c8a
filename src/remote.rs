use crate::error::Error;
use crate::flags::FlagSet;
use crate::message::MessageData;
use crate::mode::CacheMode;
use crate::path::FolderPath;
use crate::predicate::RemoteQuery;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failures at the remote boundary. Causes are opaque so adapter
/// internals never leak into the engine.
#[derive(Debug)]
pub enum RemoteError {
    /// The connection is gone or was never established.
    Unavailable(anyhow::Error),
    /// A network hiccup; retrying or degrading locally is reasonable.
    Transient(anyhow::Error),
    /// The folder or message does not exist on the server.
    NotFound(String),
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RemoteError::Unavailable(e) => write!(f, "remote unavailable: {}", e),
            RemoteError::Transient(e) => write!(f, "remote error: {}", e),
            RemoteError::NotFound(what) => write!(f, "not found on server: {}", what),
        }
    }
}

impl RemoteError {
    /// Map into the boundary taxonomy for a mode that required the remote.
    pub(crate) fn into_error(self, mode: CacheMode, context: &str) -> Error {
        match self {
            RemoteError::Unavailable(_) => Error::RemoteUnavailable { mode },
            RemoteError::Transient(source) => Error::RemoteTransient {
                context: context.to_string(),
                source,
            },
            RemoteError::NotFound(name) => Error::NotFound {
                kind: "remote object",
                name,
            },
        }
    }
}

/// Capability interface onto one remote mailbox account.
///
/// The engine consumes this; the IMAP wire protocol lives behind it. All
/// calls block for network I/O and are serialized by the store's
/// connection mutex. Messages are addressed by `Message-ID`.
pub trait RemoteStore: Send {
    fn list_folders(&mut self, path: &FolderPath) -> RemoteResult<Vec<String>>;

    fn folder_exists(&mut self, path: &FolderPath) -> RemoteResult<bool>;

    fn create_folder(&mut self, path: &FolderPath) -> RemoteResult<()>;

    fn delete_folder(&mut self, path: &FolderPath) -> RemoteResult<()>;

    fn message_count(&mut self, path: &FolderPath) -> RemoteResult<u32>;

    /// Every message in the folder, in server order.
    fn fetch_messages(&mut self, path: &FolderPath) -> RemoteResult<Vec<MessageData>>;

    fn fetch_message(
        &mut self,
        path: &FolderPath,
        message_id: &str,
    ) -> RemoteResult<Option<MessageData>>;

    /// Append one message; returns the server's copy when the server
    /// echoes one back (e.g. with an assigned UID header).
    fn append(&mut self, path: &FolderPath, data: &MessageData)
        -> RemoteResult<Option<MessageData>>;

    /// Replace the flag set of one message.
    fn set_flags(
        &mut self,
        path: &FolderPath,
        message_id: &str,
        flags: FlagSet,
    ) -> RemoteResult<()>;

    fn delete_message(&mut self, path: &FolderPath, message_id: &str) -> RemoteResult<()>;

    /// Server-side search; returns matching message ids.
    fn search(&mut self, path: &FolderPath, query: &RemoteQuery) -> RemoteResult<Vec<String>>;

    /// Best-effort teardown on store close.
    fn logout(&mut self) -> RemoteResult<()> {
        Ok(())
    }
}
