use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::ser::{Serialize, Serializer};
use std::fmt;

/// One standard message flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailFlag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    Recent,
    User,
}

const ALL_FLAGS: [MailFlag; 7] = [
    MailFlag::Seen,
    MailFlag::Answered,
    MailFlag::Flagged,
    MailFlag::Deleted,
    MailFlag::Draft,
    MailFlag::Recent,
    MailFlag::User,
];

impl MailFlag {
    fn bit(self) -> u8 {
        match self {
            MailFlag::Seen => 1 << 0,
            MailFlag::Answered => 1 << 1,
            MailFlag::Flagged => 1 << 2,
            MailFlag::Deleted => 1 << 3,
            MailFlag::Draft => 1 << 4,
            MailFlag::Recent => 1 << 5,
            MailFlag::User => 1 << 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MailFlag::Seen => "SEEN",
            MailFlag::Answered => "ANSWERED",
            MailFlag::Flagged => "FLAGGED",
            MailFlag::Deleted => "DELETED",
            MailFlag::Draft => "DRAFT",
            MailFlag::Recent => "RECENT",
            MailFlag::User => "USER",
        }
    }

    fn from_name(name: &str) -> Option<MailFlag> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SEEN" => Some(MailFlag::Seen),
            "ANSWERED" => Some(MailFlag::Answered),
            "FLAGGED" => Some(MailFlag::Flagged),
            "DELETED" => Some(MailFlag::Deleted),
            "DRAFT" => Some(MailFlag::Draft),
            "RECENT" => Some(MailFlag::Recent),
            "USER" => Some(MailFlag::User),
            _ => None,
        }
    }
}

/// Value-typed set of message flags.
///
/// The on-disk form is `flags.txt`: one flag name per line. Unrecognized
/// lines are ignored, and a missing file reads as the empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagSet {
    bits: u8,
}

impl FlagSet {
    pub fn new() -> FlagSet {
        FlagSet::default()
    }

    pub fn insert(&mut self, flag: MailFlag) {
        self.bits |= flag.bit();
    }

    pub fn remove(&mut self, flag: MailFlag) {
        self.bits &= !flag.bit();
    }

    pub fn with(mut self, flag: MailFlag) -> FlagSet {
        self.insert(flag);
        self
    }

    pub fn contains(&self, flag: MailFlag) -> bool {
        self.bits & flag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn union(&self, other: FlagSet) -> FlagSet {
        FlagSet {
            bits: self.bits | other.bits,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = MailFlag> + '_ {
        ALL_FLAGS.iter().copied().filter(|f| self.contains(*f))
    }

    /// Flags present in `other` but not here, and flags present here but
    /// not in `other`.
    pub fn diff(&self, other: FlagSet) -> FlagDiff {
        FlagDiff {
            added: FlagSet {
                bits: other.bits & !self.bits,
            },
            removed: FlagSet {
                bits: self.bits & !other.bits,
            },
        }
    }

    /// Parse the line-delimited `flags.txt` form.
    pub fn from_lines(text: &str) -> FlagSet {
        let mut flags = FlagSet::new();
        for line in text.lines() {
            if let Some(flag) = MailFlag::from_name(line) {
                flags.insert(flag);
            }
        }
        flags
    }

    /// Emit the line-delimited `flags.txt` form.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for flag in self.iter() {
            out.push_str(flag.name());
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for FlagSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(flag.name())?;
            first = false;
        }
        Ok(())
    }
}

impl From<&str> for FlagSet {
    fn from(s: &str) -> FlagSet {
        let mut flags = FlagSet::new();
        for part in s.split(',') {
            if let Some(flag) = MailFlag::from_name(part) {
                flags.insert(flag);
            }
        }
        flags
    }
}

impl Serialize for FlagSet {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct FlagSetVisitor;

impl<'de> Visitor<'de> for FlagSetVisitor {
    type Value = FlagSet;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(r#"comma-separated flag names, e.g. "SEEN,FLAGGED""#)
    }

    fn visit_str<E>(self, value: &str) -> Result<FlagSet, E>
    where
        E: de::Error,
    {
        Ok(FlagSet::from(value))
    }
}

impl<'de> Deserialize<'de> for FlagSet {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(FlagSetVisitor)
    }
}

/// Result of comparing two flag sets.
pub struct FlagDiff {
    pub added: FlagSet,
    pub removed: FlagSet,
}

impl FlagDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
