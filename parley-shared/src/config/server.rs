use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;

/// Errors raised while resolving the server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unsupported configuration format for {0}; use 'toml' or 'json'")]
    UnsupportedFormat(PathBuf),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSection {
    /// Port for the HTTP server.
    pub port: u16,
    /// Header used to propagate request ids.
    pub request_id_header: String,
    pub cors: CorsSection,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8080,
            request_id_header: "x-request-id".to_string(),
            cors: CorsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorsSection {
    /// Exact origins allowed to call the API; empty means any origin.
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_seconds: u64,
}

impl Default for CorsSection {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 3600,
        }
    }
}

/// Database settings. An empty URL selects the in-process memory store,
/// which is how local development and the test profile run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Knobs for the conversation engine itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatSection {
    /// Messages per page in the log pagination.
    pub page_size: u32,
    /// Maximum message body length in characters.
    pub message_max_chars: usize,
    /// How long a typing signal stays fresh.
    pub typing_window_secs: u64,
    /// Cadence of the stale-typing-row reclamation job.
    pub typing_prune_interval_secs: u64,
    /// How long a socket may sit in Connecting before the attach frame
    /// must have arrived.
    pub handshake_timeout_secs: u64,
    /// Idle cutoff for attached sockets with no inbound frames.
    pub idle_timeout_secs: u64,
    /// Capacity of each connection's outbound event queue.
    pub outbound_capacity: usize,
    /// TTL for cached unseen counts.
    pub unseen_ttl_secs: u64,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            page_size: 50,
            message_max_chars: 4000,
            typing_window_secs: 5,
            typing_prune_interval_secs: 60,
            handshake_timeout_secs: 10,
            idle_timeout_secs: 300,
            outbound_capacity: 64,
            unseen_ttl_secs: 30,
        }
    }
}

impl ChatSection {
    #[must_use]
    pub const fn typing_window(&self) -> Duration {
        Duration::from_secs(self.typing_window_secs)
    }

    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// The main configuration structure for the Parley server.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub db: DatabaseSection,
    pub logging: LoggingSection,
    pub chat: ChatSection,
}

impl Config {
    /// Loads the configuration from defaults, an optional file, environment
    /// variables, and an optional CLI port override, in that order.
    ///
    /// Environment variables only fill values still at their defaults, so an
    /// explicit file setting wins over the environment; the CLI override wins
    /// over everything.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file cannot be read or parsed, or if
    /// the resolved configuration fails validation.
    pub fn load(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            Self::from_file(&path)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        if let Some(port) = port_override {
            config.server.port = port;
        }

        config.validate().map_err(|errors| {
            ConfigError::Invalid(errors.join("; "))
        })?;

        Ok(config)
    }

    fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|err| ConfigError::Parse {
                path: path.clone(),
                message: err.to_string(),
            }),
            Some("json") => serde_json::from_str(&content).map_err(|err| ConfigError::Parse {
                path: path.clone(),
                message: err.to_string(),
            }),
            _ => Err(ConfigError::UnsupportedFormat(path.clone())),
        }
    }

    fn apply_env_overrides(&mut self) {
        let defaults = Config::default();

        if self.server.port == defaults.server.port {
            if let Some(port) = env::var("PARLEY_SERVER_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
            {
                self.server.port = port;
            }
        }
        if self.db.url == defaults.db.url {
            if let Ok(url) = env::var("PARLEY_DATABASE_URL") {
                self.db.url = url;
            }
        }
        if self.logging.level == defaults.logging.level {
            if let Ok(level) = env::var("PARLEY_LOG_LEVEL") {
                self.logging.level = level;
            }
        }
        if self.logging.format == defaults.logging.format {
            match env::var("PARLEY_LOG_FORMAT").as_deref() {
                Ok("json") => self.logging.format = LogFormat::Json,
                Ok("text") => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }
    }

    /// Validates the resolved configuration, collecting every problem.
    ///
    /// # Errors
    /// Returns the list of validation failures.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if self.chat.page_size == 0 {
            errors.push("chat.page_size must be greater than 0".to_string());
        }
        if self.chat.message_max_chars == 0 {
            errors.push("chat.message_max_chars must be greater than 0".to_string());
        }
        if self.chat.outbound_capacity == 0 {
            errors.push("chat.outbound_capacity must be greater than 0".to_string());
        }
        if self.chat.typing_window_secs == 0 {
            errors.push("chat.typing_window_secs must be greater than 0".to_string());
        }
        if !self.db.url.is_empty() && self.db.max_connections == 0 {
            errors.push("db.max_connections must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("PARLEY_SERVER_PORT");
            env::remove_var("PARLEY_DATABASE_URL");
            env::remove_var("PARLEY_LOG_LEVEL");
            env::remove_var("PARLEY_LOG_FORMAT");
        }
    }

    #[test]
    #[serial]
    fn defaults_are_valid() {
        cleanup_env_vars();
        let config = Config::load(None, None).unwrap();

        assert_eq!(config.server.port, 8080);
        assert!(config.db.url.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.chat.page_size, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn port_override_wins() {
        cleanup_env_vars();
        let config = Config::load(None, Some(3000)).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    #[serial]
    fn env_vars_fill_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PARLEY_SERVER_PORT", "9090");
            env::set_var("PARLEY_DATABASE_URL", "postgres://parley:parley@db/parley");
            env::set_var("PARLEY_LOG_FORMAT", "json");
        }

        let config = Config::load(None, None).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.db.url, "postgres://parley:parley@db/parley");
        assert_eq!(config.logging.format, LogFormat::Json);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn file_settings_win_over_env() {
        cleanup_env_vars();
        unsafe {
            env::set_var("PARLEY_SERVER_PORT", "9090");
        }

        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[server]\nport = 4242").unwrap();

        let config = Config::load(Some(file.path().to_path_buf()), None).unwrap();
        assert_eq!(config.server.port, 4242);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn json_files_parse() {
        cleanup_env_vars();
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        write!(file, r#"{{"chat":{{"page_size":25}}}}"#).unwrap();

        let config = Config::load(Some(file.path().to_path_buf()), None).unwrap();
        assert_eq!(config.chat.page_size, 25);
    }

    #[test]
    #[serial]
    fn unsupported_extension_is_rejected() {
        cleanup_env_vars();
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let result = Config::load(Some(file.path().to_path_buf()), None);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    #[serial]
    fn zero_port_fails_validation() {
        cleanup_env_vars();
        let mut config = Config::default();
        config.server.port = 0;
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("server.port")));
    }
}
