use crate::error::{Error, Result};
use crate::mode::CacheMode;
use native_tls::Certificate;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::process::Command;

/// Host-supplied configuration, deserialized from TOML.
///
/// ```toml
/// [cache]
/// directory = "/home/user/.mailcache"
/// mode = "ACCELERATED"
///
/// [imap]
/// host = "imap.example.com"
/// user = "user@example.com"
/// password_command = "pass show imap"
/// ```
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    pub imap: Option<ImapConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    /// Cache root; defaults to `$HOME/.mailcache`.
    pub directory: Option<PathBuf>,
    /// Initial mode; defaults to ACCELERATED.
    pub mode: Option<String>,
    /// Folder path separator, fixed at store open; defaults to `/`.
    pub separator: Option<char>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    /// Shell command whose stdout (trimmed) is the password.
    pub password_command: Option<String>,
    pub ssl: Option<bool>,
    /// PEM file for a private CA.
    pub server_ca_path: Option<String>,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Config(format!("bad config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Config> {
        let mut buf = String::new();
        File::open(path)
            .and_then(|mut f| f.read_to_string(&mut buf))
            .map_err(|e| Error::io(path, e))?;
        Config::from_toml(&buf)
    }

    fn validate(&self) -> Result<()> {
        self.mode()?;
        if let Some(imap) = &self.imap {
            if imap.host.is_empty() {
                return Err(Error::Config("imap.host must not be empty".to_string()));
            }
            if imap.user.is_empty() {
                return Err(Error::Config("imap.user must not be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache.directory {
            Some(dir) => Ok(dir.clone()),
            None => {
                let home = dirs_next::home_dir()
                    .ok_or_else(|| Error::Config("no home directory".to_string()))?;
                Ok(home.join(".mailcache"))
            }
        }
    }

    pub fn mode(&self) -> Result<CacheMode> {
        match &self.cache.mode {
            Some(raw) => raw.parse(),
            None => Ok(CacheMode::Accelerated),
        }
    }

    pub fn separator(&self) -> char {
        self.cache.separator.unwrap_or('/')
    }

    /// Store registry key; "local" for purely offline stores.
    pub fn username(&self) -> String {
        match &self.imap {
            Some(imap) => imap.user.clone(),
            None => "local".to_string(),
        }
    }
}

impl ImapConfig {
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(993)
    }

    /// The configured password, or the trimmed stdout of
    /// `password_command`.
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        let command = self.password_command.as_ref().ok_or_else(|| {
            Error::Config("imap requires password or password_command".to_string())
        })?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .map_err(|e| Error::Config(format!("password_command failed: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Config(format!(
                "password_command exited with {}",
                output.status
            )));
        }
        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|e| Error::Config(format!("password_command output not utf-8: {}", e)))
    }

    pub fn server_ca_cert(&self) -> Result<Option<Certificate>> {
        let ca_path = match &self.server_ca_path {
            Some(path) => path,
            None => return Ok(None),
        };
        let mut buf: Vec<u8> = Vec::new();
        File::open(ca_path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(|e| Error::io(ca_path, e))?;
        Certificate::from_pem(&buf)
            .map(Some)
            .map_err(|e| Error::Config(format!("bad CA certificate {}: {}", ca_path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.mode().unwrap(), CacheMode::Accelerated);
        assert_eq!(config.separator(), '/');
        assert_eq!(config.username(), "local");
        assert!(config.imap.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config = Config::from_toml(
            r#"
            [cache]
            directory = "/tmp/mc"
            mode = "offline"
            separator = "."

            [imap]
            host = "imap.example.com"
            port = 1993
            user = "alice"
            password = "secret"
            ssl = true
            "#,
        )
        .unwrap();
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/mc"));
        assert_eq!(config.mode().unwrap(), CacheMode::Offline);
        assert_eq!(config.separator(), '.');
        let imap = config.imap.unwrap();
        assert_eq!(imap.effective_port(), 1993);
        assert_eq!(imap.resolve_password().unwrap(), "secret");
    }

    #[test]
    fn bad_mode_is_a_config_error() {
        let err = Config::from_toml("[cache]\nmode = \"warp\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_imap_host_rejected() {
        let err = Config::from_toml("[imap]\nhost = \"\"\nuser = \"u\"\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn password_command_is_executed() {
        let imap = ImapConfig {
            host: "h".into(),
            port: None,
            user: "u".into(),
            password: None,
            password_command: Some("echo  hunter2 ".into()),
            ssl: None,
            server_ca_path: None,
        };
        assert_eq!(imap.resolve_password().unwrap(), "hunter2");
    }
}
