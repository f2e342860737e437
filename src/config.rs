//! Configuration management for Keepsake Server

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::index::EntryKind;

/// Default permanent upload ceiling: 10MB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Default temporary upload ceiling: 100MB
pub const DEFAULT_MAX_TEMP_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;

/// Default temporary upload lifetime: 2 hours
pub const DEFAULT_TEMP_TTL_SECS: u64 = 2 * 60 * 60;

/// Default interval between expiry sweeps
pub const DEFAULT_SWEEP_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub limits: UploadLimits,
    pub expiry: ExpiryConfig,
    pub auth: AuthConfig,
    /// Index files found in the upload directory without an entry
    pub adopt_untracked: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base of the URLs handed back to clients
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub permanent_dir: PathBuf,
    pub temporary_dir: PathBuf,
    /// Must share a filesystem with both areas
    pub staging_dir: PathBuf,
    pub index_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_permanent_bytes: u64,
    pub max_temporary_bytes: u64,
}

impl UploadLimits {
    /// Size ceiling for an upload of the given kind
    pub fn max_for(&self, kind: EntryKind) -> u64 {
        match kind {
            EntryKind::Permanent => self.max_permanent_bytes,
            EntryKind::Temporary => self.max_temporary_bytes,
        }
    }

    /// Largest ceiling of any kind
    pub fn largest(&self) -> u64 {
        self.max_permanent_bytes.max(self.max_temporary_bytes)
    }
}

#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Lifetime of temporary uploads
    pub ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Clone, Default)]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Parse a comma separated key list, ignoring blanks
    pub fn from_list(raw: &str) -> Self {
        Self {
            api_keys: raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_registered(&self, key: &str) -> bool {
        !key.is_empty() && self.api_keys.iter().any(|k| k == key)
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .finish()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

impl Default for Config {
    fn default() -> Self {
        let port = 3000;
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port,
                public_url: format!("http://localhost:{}", port),
            },
            storage: StorageConfig {
                permanent_dir: PathBuf::from("data/uploads"),
                temporary_dir: PathBuf::from("data/temp"),
                staging_dir: PathBuf::from("data/.staging"),
                index_path: PathBuf::from("data/checksums.json"),
            },
            limits: UploadLimits {
                max_permanent_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                max_temporary_bytes: DEFAULT_MAX_TEMP_UPLOAD_BYTES,
            },
            expiry: ExpiryConfig {
                ttl: Duration::from_secs(DEFAULT_TEMP_TTL_SECS),
                sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECS),
            },
            auth: AuthConfig::default(),
            adopt_untracked: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let port: u16 = parse_var("SERVER_PORT", defaults.server.port)?;

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port,
                public_url: env::var("PUBLIC_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            },
            storage: StorageConfig {
                permanent_dir: path_var("UPLOAD_DIR", defaults.storage.permanent_dir),
                temporary_dir: path_var("TEMP_UPLOAD_DIR", defaults.storage.temporary_dir),
                staging_dir: path_var("STAGING_DIR", defaults.storage.staging_dir),
                index_path: path_var("INDEX_PATH", defaults.storage.index_path),
            },
            limits: UploadLimits {
                max_permanent_bytes: parse_var(
                    "MAX_UPLOAD_BYTES",
                    defaults.limits.max_permanent_bytes,
                )?,
                max_temporary_bytes: parse_var(
                    "MAX_TEMP_UPLOAD_BYTES",
                    defaults.limits.max_temporary_bytes,
                )?,
            },
            expiry: ExpiryConfig {
                ttl: Duration::from_secs(parse_var("TEMP_TTL_SECS", DEFAULT_TEMP_TTL_SECS)?),
                sweep_interval: Duration::from_secs(
                    parse_var("EXPIRY_SWEEP_SECS", DEFAULT_SWEEP_SECS)?.max(1),
                ),
            },
            auth: AuthConfig::from_list(&env::var("REGISTERED_API_KEYS").unwrap_or_default()),
            adopt_untracked: parse_var("ADOPT_UNTRACKED", defaults.adopt_untracked)?,
        })
    }
}

fn path_var(var: &str, default: PathBuf) -> PathBuf {
    env::var_os(var).map(PathBuf::from).unwrap_or(default)
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => parse_value(var, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_list_parsing() {
        let auth = AuthConfig::from_list(" alpha, beta ,,gamma, ");
        assert_eq!(auth.api_keys, vec!["alpha", "beta", "gamma"]);
        assert!(auth.is_registered("beta"));
        assert!(!auth.is_registered("delta"));
        assert!(!auth.is_registered(""));

        let empty = AuthConfig::from_list("");
        assert!(empty.api_keys.is_empty());
        assert!(!empty.is_registered("anything"));
    }

    #[test]
    fn test_auth_debug_redacts_keys() {
        let auth = AuthConfig::from_list("secret-one,secret-two");
        let printed = format!("{:?}", auth);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("2 redacted"));
    }

    #[test]
    fn test_limits_per_kind() {
        let limits = Config::default().limits;
        assert_eq!(limits.max_for(EntryKind::Permanent), DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(limits.max_for(EntryKind::Temporary), DEFAULT_MAX_TEMP_UPLOAD_BYTES);
        assert_eq!(limits.largest(), DEFAULT_MAX_TEMP_UPLOAD_BYTES);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u64>("X", " 42 ").unwrap(), 42);
        assert!(parse_value::<bool>("X", "true").unwrap());
        assert!(matches!(
            parse_value::<u16>("SERVER_PORT", "not-a-port"),
            Err(ConfigError::Invalid { var: "SERVER_PORT", .. })
        ));
    }

    #[test]
    fn test_default_ttl_is_two_hours() {
        assert_eq!(Config::default().expiry.ttl, Duration::from_secs(7200));
    }
}
