//! Layered configuration for the taskdeck server.
//!
//! Values are resolved defaults → `taskdeck.toml` → `TASKDECK_*` environment
//! variables → CLI flags (applied by `main`).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! dev_mode = false
//! static_dir = "web/dist"
//!
//! [database]
//! path = "data/taskdeck.db"
//!
//! [auth]
//! token_ttl_hours = 168
//! min_password_length = 8
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//! directory = "logs"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "taskdeck.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a separately served front-end.
    #[serde(default)]
    pub dev_mode: bool,
    /// Directory holding a built single-page client, served for non-API paths.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/taskdeck.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u32,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

fn default_token_ttl_hours() -> u32 {
    24 * 7
}

fn default_min_password_length() -> usize {
    8
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: default_token_ttl_hours(),
            min_password_length: default_min_password_length(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily-rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskdeck configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `path` if it exists, otherwise start from defaults. An explicitly
    /// requested file that is missing is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Overlay `TASKDECK_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_env_from<F>(&mut self, get: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = get("TASKDECK_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("TASKDECK_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("TASKDECK_PORT is not a valid port: {}", port))?;
        }
        if let Some(dir) = get("TASKDECK_STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = get("TASKDECK_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(ttl) = get("TASKDECK_TOKEN_TTL_HOURS") {
            self.auth.token_ttl_hours = ttl
                .parse()
                .with_context(|| format!("TASKDECK_TOKEN_TTL_HOURS is not a number: {}", ttl))?;
        }
        if let Some(level) = get("TASKDECK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = get("TASKDECK_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Human-readable warnings about questionable settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        if self.auth.token_ttl_hours == 0 {
            warnings.push("auth.token_ttl_hours is 0; issued tokens expire immediately".to_string());
        }
        if self.auth.min_password_length < 8 {
            warnings.push(format!(
                "auth.min_password_length is {}; at least 8 is recommended",
                self.auth.min_password_length
            ));
        }
        if let Some(dir) = &self.server.static_dir {
            if !dir.join("index.html").exists() {
                warnings.push(format!(
                    "server.static_dir {} has no index.html",
                    dir.display()
                ));
            }
        }
        if self.server.dev_mode && self.server.host != "127.0.0.1" {
            warnings.push("dev_mode enables permissive CORS on a non-loopback host".to_string());
        }
        warnings
    }
}
