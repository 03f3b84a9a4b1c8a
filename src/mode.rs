use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// Policy selector driving read/write routing between disk and remote.
///
/// The mode lives on the store and applies to every folder under it.
/// Operations capture the mode once at their entry point, so an in-flight
/// operation is unaffected by a concurrent `set_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Disk only. All mutations are rejected.
    Offline,
    /// Disk preferred, server on miss. Mutations apply locally with a
    /// best-effort remote echo; deletes are rejected.
    Accelerated,
    /// Server authoritative; disk updated after every authoritative read.
    Online,
    /// Like Online, but cached state is overwritten unconditionally. Set
    /// temporarily by the sync protocol.
    Refresh,
    /// Like Online, and additionally permits irreversible local purges.
    Destructive,
}

impl CacheMode {
    /// True when the mode cannot operate without a connected remote.
    pub fn requires_remote(self) -> bool {
        matches!(
            self,
            CacheMode::Online | CacheMode::Refresh | CacheMode::Destructive
        )
    }

    /// True when the server is the source of truth for reads.
    pub fn server_authoritative(self) -> bool {
        self.requires_remote()
    }

    /// True when reads consult the disk before any remote.
    pub fn reads_disk_first(self) -> bool {
        matches!(self, CacheMode::Offline | CacheMode::Accelerated)
    }

    /// True when a read may consult the remote at all: every mode except
    /// Offline reaches the server, authoritatively or on a cache miss.
    pub fn allows_remote_read(self) -> bool {
        self != CacheMode::Offline
    }

    /// True when appends and flag updates are accepted at all.
    pub fn allows_local_write(self) -> bool {
        self != CacheMode::Offline
    }

    /// True when folder deletion and message expunge are accepted.
    pub fn allows_delete(self) -> bool {
        self.requires_remote()
    }

    /// True when the remote side of a write is best-effort rather than
    /// authoritative.
    pub fn remote_is_best_effort(self) -> bool {
        self == CacheMode::Accelerated
    }

    /// True when cache manager purge operations are permitted.
    pub fn allows_purge(self) -> bool {
        self == CacheMode::Destructive
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            CacheMode::Offline => "OFFLINE",
            CacheMode::Accelerated => "ACCELERATED",
            CacheMode::Online => "ONLINE",
            CacheMode::Refresh => "REFRESH",
            CacheMode::Destructive => "DESTRUCTIVE",
        };
        f.write_str(name)
    }
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<CacheMode, Error> {
        match s.to_ascii_uppercase().as_str() {
            "OFFLINE" => Ok(CacheMode::Offline),
            "ACCELERATED" => Ok(CacheMode::Accelerated),
            "ONLINE" => Ok(CacheMode::Online),
            "REFRESH" => Ok(CacheMode::Refresh),
            "DESTRUCTIVE" => Ok(CacheMode::Destructive),
            other => Err(Error::Config(format!("unknown cache mode: {}", other))),
        }
    }
}
