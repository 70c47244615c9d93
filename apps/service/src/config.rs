use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}")]
    ReadFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to write config file {0}")]
    WriteFailed(path::PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file {0}")]
    ParseFailed(path::PathBuf, #[source] toml::de::Error),
    #[error("failed to serialize config")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config directory available (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub alerts: AlertsConfig,
    pub retention: RetentionConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
}

/// Alert delivery. Without a webhook, alerts are logged and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_results_per_monitor: usize,
    pub interval_hours: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between store reconciliation passes; 0 disables them.
    pub reload_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: path::PathBuf::from("data/koala.db") }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { webhook_url: None, request_timeout_seconds: 10 }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_results_per_monitor: 10_000, interval_hours: 24 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { reload_interval_seconds: 30 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/koala/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("koala/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_title_1(f, "Alerts")?;
        write_1(f, "Webhook", &self.alerts.webhook_url.as_deref().unwrap_or("disabled"))?;
        write_1(f, "Request Timeout (s)", &self.alerts.request_timeout_seconds)?;
        write_title_1(f, "Retention")?;
        write_1(f, "Results Per Monitor", &self.retention.max_results_per_monitor)?;
        write_1(f, "Interval (h)", &self.retention.interval_hours)?;
        write_title_1(f, "Scheduler")?;
        write_1(f, "Reload Interval (s)", &self.scheduler.reload_interval_seconds)?;
        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/koala/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|err| ConfigError::ReadFailed(config_path.clone(), err))?;
            toml::from_str(raw_string.as_str()).map_err(|err| ConfigError::ParseFailed(config_path, err))
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::WriteFailed(parent.to_path_buf(), err))?;
        }

        fs::write(path, config_str).map_err(|err| ConfigError::WriteFailed(path.to_path_buf(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::from_config(Some(&path)).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[alerts]\nwebhook_url = \"https://hooks.example.com/koala\"\n\n[retention]\nmax_results_per_monitor = 500\n",
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config.alerts.webhook_url.as_deref(), Some("https://hooks.example.com/koala"));
        assert_eq!(config.alerts.request_timeout_seconds, 10);
        assert_eq!(config.retention.max_results_per_monitor, 500);
        assert_eq!(config.retention.interval_hours, 24);
        assert_eq!(config.scheduler.reload_interval_seconds, 30);
        assert_eq!(config.database.path, path::PathBuf::from("data/koala.db"));
    }

    #[test]
    fn test_extension_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        Config::from_config(Some(dir.path().join("koala"))).unwrap();
        assert!(dir.path().join("koala.toml").exists());
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scheduler]\nreload_interval_seconds = \"soon\"\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(ConfigError::ParseFailed(..))));
    }

    #[test]
    fn test_display_lists_sections() {
        let text = Config::default().to_string();
        assert!(text.contains("Webhook: disabled"));
        assert!(text.contains("Results Per Monitor: 10000"));
        assert!(text.contains("Reload Interval (s): 30"));
    }
}
