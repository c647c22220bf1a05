#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::error::{Result, SwarmError};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = ".erpswarm/config.toml";
pub const DEFAULT_CLOUD_API_URLS: &[&str] = &[
    "https://api.railway.app/graphql/v2",
    "https://backboard.railway.com/graphql/v2",
];

/// Runtime settings for decisions, builds and remote configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    pub work_dir: PathBuf,
    pub local_port: u16,
    pub database: String,
    pub admin_login: String,
    pub admin_password: String,
    pub health_interval: Duration,
    pub health_attempts: u32,
    pub cloud_ready_interval: Duration,
    pub cloud_ready_attempts: u32,
    pub install_poll_interval: Duration,
    pub install_timeout: Duration,
    pub login_attempts: u32,
    pub login_backoff: Duration,
    pub request_timeout: Duration,
    pub command_timeout: Duration,
    pub build_retention: Duration,
    pub max_build_duration: Duration,
    pub cloud_api_token: Option<String>,
    pub cloud_api_urls: Vec<String>,
    pub log_capacity: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("builds"),
            local_port: 8069,
            database: "odoo".to_string(),
            admin_login: "admin".to_string(),
            admin_password: "admin".to_string(),
            health_interval: Duration::from_secs(2),
            health_attempts: 30,
            cloud_ready_interval: Duration::from_secs(5),
            cloud_ready_attempts: 120,
            install_poll_interval: Duration::from_secs(3),
            install_timeout: Duration::from_secs(600),
            login_attempts: 10,
            login_backoff: Duration::from_secs(3),
            request_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(900),
            build_retention: Duration::from_secs(3600),
            max_build_duration: Duration::from_secs(15 * 60),
            cloud_api_token: None,
            cloud_api_urls: DEFAULT_CLOUD_API_URLS
                .iter()
                .map(ToString::to_string)
                .collect(),
            log_capacity: 200,
        }
    }
}

/// Defaults, then the config file (if present), then the process environment.
///
/// # Errors
/// Returns `ConfigError` if the file cannot be read or a value is malformed.
pub async fn load_config(path: Option<PathBuf>) -> Result<BuilderConfig> {
    let from_file = match resolve_config_path(path.as_deref()) {
        Some(config_path) => {
            let content = tokio::fs::read_to_string(&config_path).await.map_err(|e| {
                SwarmError::ConfigError(format!(
                    "Failed to read config {}: {e}",
                    config_path.display()
                ))
            })?;
            parse_config_content(&content, BuilderConfig::default())?
        }
        None => BuilderConfig::default(),
    };
    from_file.apply_env(|name| std::env::var(name).ok())
}

/// Applies `key = "value"` lines onto `base`. Values may reference
/// `${VAR:-default}`.
///
/// # Errors
/// Returns `ConfigError` for values that do not parse.
pub fn parse_config_content(content: &str, base: BuilderConfig) -> Result<BuilderConfig> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
        .filter_map(|line| {
            line.split_once('=')
                .map(|(key, _)| key.trim())
                .and_then(|key| parse_key_value(line, key).map(|value| (key, expand_env_vars(value))))
        })
        .try_fold(base, |config, (key, value)| config.with_setting(key, &value))
}

impl BuilderConfig {
    /// Environment overrides: `ERPSWARM_<KEY>`, plus `CLOUD_API_TOKEN` and a
    /// comma-separated `CLOUD_API_URL`.
    ///
    /// # Errors
    /// Returns `ConfigError` for values that do not parse.
    pub fn apply_env(self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = SETTING_KEYS.iter().try_fold(self, |config, key| {
            match non_empty(lookup(&format!("ERPSWARM_{}", key.to_ascii_uppercase()))) {
                Some(value) => config.with_setting(key, &value),
                None => Ok(config),
            }
        })?;
        if let Some(token) = non_empty(lookup("CLOUD_API_TOKEN")) {
            config.cloud_api_token = Some(token);
        }
        if let Some(urls) = non_empty(lookup("CLOUD_API_URL")) {
            config = config.with_setting("cloud_api_urls", &urls)?;
        }
        Ok(config)
    }

    fn with_setting(mut self, key: &str, value: &str) -> Result<Self> {
        match key {
            "work_dir" => self.work_dir = PathBuf::from(value),
            "local_port" => self.local_port = parse_value(key, value)?,
            "database" => self.database = value.to_string(),
            "admin_login" => self.admin_login = value.to_string(),
            "admin_password" => self.admin_password = value.to_string(),
            "health_interval_secs" => self.health_interval = parse_secs(key, value)?,
            "health_attempts" => self.health_attempts = parse_value(key, value)?,
            "cloud_ready_interval_secs" => self.cloud_ready_interval = parse_secs(key, value)?,
            "cloud_ready_attempts" => self.cloud_ready_attempts = parse_value(key, value)?,
            "install_poll_interval_secs" => self.install_poll_interval = parse_secs(key, value)?,
            "install_timeout_secs" => self.install_timeout = parse_secs(key, value)?,
            "login_attempts" => self.login_attempts = parse_value(key, value)?,
            "login_backoff_secs" => self.login_backoff = parse_secs(key, value)?,
            "request_timeout_secs" => self.request_timeout = parse_secs(key, value)?,
            "command_timeout_secs" => self.command_timeout = parse_secs(key, value)?,
            "build_retention_secs" => self.build_retention = parse_secs(key, value)?,
            "max_build_duration_secs" => self.max_build_duration = parse_secs(key, value)?,
            "cloud_api_token" => self.cloud_api_token = non_empty(Some(value.to_string())),
            "cloud_api_urls" => {
                self.cloud_api_urls = value
                    .split(',')
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                    .map(|url| {
                        Url::parse(url).map(|_| url.to_string()).map_err(|e| {
                            SwarmError::ConfigError(format!("Invalid value for {key}: '{url}' ({e})"))
                        })
                    })
                    .collect::<Result<_>>()?;
            }
            "log_capacity" => self.log_capacity = parse_value(key, value)?,
            _ => {}
        }
        Ok(self)
    }

    /// Token for the cloud control plane, required by cloud-PaaS builds.
    ///
    /// # Errors
    /// Returns `ConfigError` when no token is configured.
    pub fn require_cloud_token(&self) -> Result<&str> {
        self.cloud_api_token.as_deref().ok_or_else(|| {
            SwarmError::ConfigError(
                "CLOUD_API_TOKEN is not set; cloud-paas builds need a control-plane token"
                    .to_string(),
            )
        })
    }
}

const SETTING_KEYS: &[&str] = &[
    "work_dir",
    "local_port",
    "database",
    "admin_login",
    "admin_password",
    "health_interval_secs",
    "health_attempts",
    "cloud_ready_interval_secs",
    "cloud_ready_attempts",
    "install_poll_interval_secs",
    "install_timeout_secs",
    "login_attempts",
    "login_backoff_secs",
    "request_timeout_secs",
    "command_timeout_secs",
    "build_retention_secs",
    "max_build_duration_secs",
    "log_capacity",
];

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| SwarmError::ConfigError(format!("Invalid value for {key}: '{value}'")))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    parse_value::<u64>(key, value).map(Duration::from_secs)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn expand_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_part = &result[start + 2..start + end];
            let (var_name, default) = var_part.split_once(":-").unwrap_or((var_part, ""));
            let value = std::env::var(var_name).unwrap_or_else(|_| default.to_string());
            result.replace_range(start..=(start + end), &value);
        } else {
            break;
        }
    }
    result
}

#[must_use]
pub fn parse_key_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_once('=')
        .and_then(|(lhs, rhs)| (lhs.trim() == key).then_some(rhs.trim().trim_matches('"')))
}

/// Config file path when given, otherwise the default location if it exists.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit.map(Path::to_path_buf).or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        default.exists().then_some(default)
    })
}
