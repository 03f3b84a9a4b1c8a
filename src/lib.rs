//! Filesystem-backed IMAP mail cache.
//!
//! A [`Store`] mediates access to one mail account through a directory
//! tree that mirrors the server's folder hierarchy. Every operation is
//! routed by the active [`CacheMode`]: disk only, disk-preferred with a
//! best-effort remote echo, or server-authoritative with the disk kept
//! in step. The [`CacheManager`] layers synchronization, purging, and
//! statistics on top.
//!
//! ```no_run
//! use mailcache::{Config, Store};
//!
//! let config = Config::from_toml(
//!     "[cache]\ndirectory = \"/tmp/mc\"\nmode = \"OFFLINE\"\n",
//! )?;
//! let store = Store::open(&config)?;
//! let inbox = store.folder("INBOX")?;
//! inbox.create()?;
//! assert!(inbox.exists()?);
//! # Ok::<(), mailcache::Error>(())
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod flags;
pub mod folder;
pub mod imapw;
pub mod layout;
pub mod manager;
pub mod message;
pub mod mode;
pub mod path;
pub mod pending;
pub mod predicate;
pub mod properties;
pub mod remote;
pub mod store;

pub use cancel::CancelToken;
pub use config::{CacheConfig, Config, ImapConfig};
pub use error::{Error, Result};
pub use flags::{FlagSet, MailFlag};
pub use folder::{AccessMode, CachedFolder};
pub use manager::{CacheManager, CacheStats, SyncStatus};
pub use message::{Attachment, Body, CachedMessage, MessageData};
pub use mode::CacheMode;
pub use path::FolderPath;
pub use predicate::{Predicate, RemoteQuery};
pub use remote::{RemoteError, RemoteResult, RemoteStore};
pub use store::Store;
