use crate::error::{Error, Result};
use std::fmt;

/// A validated folder path within a store.
///
/// Components are separated by the store's separator character (fixed at
/// store open). The empty path denotes the default (root) folder. Traversal
/// tokens and absolute paths are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderPath {
    components: Vec<String>,
    separator: char,
}

impl FolderPath {
    /// The default folder under the cache root.
    pub fn root(separator: char) -> FolderPath {
        FolderPath {
            components: Vec::new(),
            separator,
        }
    }

    pub fn parse(raw: &str, separator: char) -> Result<FolderPath> {
        if raw.is_empty() {
            return Ok(FolderPath::root(separator));
        }
        if raw.starts_with(separator) {
            return Err(Error::Config(format!("absolute folder path: {}", raw)));
        }
        let mut components = Vec::new();
        for part in raw.split(separator) {
            if part.is_empty() {
                return Err(Error::Config(format!("empty component in path: {}", raw)));
            }
            if part == "." || part == ".." {
                return Err(Error::Config(format!("traversal token in path: {}", raw)));
            }
            // a component must stay a single directory name on disk
            if part.contains('/') || part.contains('\\') || part.contains('\0') {
                return Err(Error::Config(format!("invalid component in path: {}", raw)));
            }
            components.push(part.to_string());
        }
        Ok(FolderPath {
            components,
            separator,
        })
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Last component, or the empty string for the root folder.
    pub fn name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn child(&self, name: &str) -> Result<FolderPath> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(self.separator)
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(Error::Config(format!("invalid folder name: {}", name)));
        }
        let mut components = self.components.clone();
        components.push(name.to_string());
        Ok(FolderPath {
            components,
            separator: self.separator,
        })
    }

    pub fn parent(&self) -> Option<FolderPath> {
        if self.components.is_empty() {
            return None;
        }
        let mut components = self.components.clone();
        components.pop();
        Some(FolderPath {
            components,
            separator: self.separator,
        })
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for c in &self.components {
            if !first {
                write!(f, "{}", self.separator)?;
            }
            f.write_str(c)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_paths() {
        let p = FolderPath::parse("INBOX/Archive/2024", '/').unwrap();
        assert_eq!(p.components(), &["INBOX", "Archive", "2024"]);
        assert_eq!(p.name(), "2024");
        assert_eq!(p.to_string(), "INBOX/Archive/2024");
    }

    #[test]
    fn empty_is_root() {
        let p = FolderPath::parse("", '/').unwrap();
        assert!(p.is_root());
        assert_eq!(p.name(), "");
        assert!(p.parent().is_none());
    }

    #[test]
    fn rejects_traversal_and_absolute() {
        assert!(FolderPath::parse("../etc", '/').is_err());
        assert!(FolderPath::parse("INBOX/../Sent", '/').is_err());
        assert!(FolderPath::parse("/INBOX", '/').is_err());
        assert!(FolderPath::parse("INBOX//Sub", '/').is_err());
    }

    #[test]
    fn alternate_separator() {
        let p = FolderPath::parse("INBOX.Sub", '.').unwrap();
        assert_eq!(p.components(), &["INBOX", "Sub"]);
        // path separators are never valid inside a component
        assert!(FolderPath::parse("a/b.c", '.').is_err());
    }

    #[test]
    fn child_and_parent() {
        let root = FolderPath::root('/');
        let inbox = root.child("INBOX").unwrap();
        let sub = inbox.child("Sub").unwrap();
        assert_eq!(sub.to_string(), "INBOX/Sub");
        assert_eq!(sub.parent().unwrap(), inbox);
        assert!(inbox.child("a/b").is_err());
        assert!(inbox.child("..").is_err());
    }
}
