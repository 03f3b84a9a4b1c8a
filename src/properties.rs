use std::collections::BTreeMap;

/// Keys every `message.properties` file carries.
pub const KEY_MESSAGE_ID: &str = "Message-ID";
pub const KEY_SUBJECT: &str = "Subject";
pub const KEY_FROM: &str = "From";
pub const KEY_DATE: &str = "Date";

const REQUIRED_KEYS: [&str; 4] = [KEY_MESSAGE_ID, KEY_SUBJECT, KEY_FROM, KEY_DATE];

/// Line-oriented `key=value` header store.
///
/// `=`, `:`, backslash, and newline are escaped in both keys and values, so
/// arbitrary header text round-trips. Malformed lines are ignored on read.
/// The write order is deterministic: required keys first, then the rest
/// lexicographically, so rewriting unchanged properties is byte-stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Properties {
        Properties::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn parse(text: &str) -> Properties {
        let mut props = Properties::new();
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = split_unescaped(line) {
                props.entries.insert(unescape(key), unescape(value));
            }
        }
        props
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for key in REQUIRED_KEYS {
            if let Some(value) = self.entries.get(key) {
                render_line(&mut out, key, value);
            }
        }
        for (key, value) in &self.entries {
            if !REQUIRED_KEYS.contains(&key.as_str()) {
                render_line(&mut out, key, value);
            }
        }
        out
    }
}

fn render_line(out: &mut String, key: &str, value: &str) {
    out.push_str(&escape(key));
    out.push('=');
    out.push_str(&escape(value));
    out.push('\n');
}

/// Split on the first `=` that is not preceded by a backslash escape.
fn split_unescaped(line: &str) -> Option<(&str, &str)> {
    let bytes = line.as_bytes();
    let mut escaped = false;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'\\' if !escaped => escaped = true,
            b'=' if !escaped => return Some((&line[..i], &line[i + 1..])),
            _ => escaped = false,
        }
    }
    None
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            ':' => out.push_str("\\:"),
            '\n' => out.push_str("\\n"),
            '\r' => (),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => (),
        }
    }
    out
}
