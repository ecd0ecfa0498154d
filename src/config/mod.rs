//! Configuration management for pagewatch.
//!
//! Configuration is read from `~/.config/pagewatch/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::Deserialize;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub night_mode: NightModeConfig,
    pub archive: ArchiveConfig,
    pub fetch: FetchConfig,
    pub delivery: DeliveryConfig,
    pub downloaders: DownloaderConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Minutes between scans (default: 30)
    pub interval_minutes: u64,
    /// Maximum concurrent check cycles (default: 10)
    pub workers: usize,
    /// Whether to scan immediately on daemon start
    pub check_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            workers: 10,
            check_on_start: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.max(1) * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NightModeConfig {
    /// First active hour, inclusive (default: 9)
    pub start_hour: u32,
    /// Last active hour, exclusive (default: 22)
    pub end_hour: u32,
    /// IANA time zone of the local clock, e.g. "Asia/Kolkata"
    pub timezone: String,
}

impl Default for NightModeConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 22,
            timezone: "Asia/Kolkata".to_string(),
        }
    }
}

impl NightModeConfig {
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        let raw = self.timezone.trim();
        raw.parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("timezone {:?}: {}", raw, e)))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Days to keep content snapshots (default: 30)
    pub retention_days: i64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { retention_days: 30 }
    }
}

impl ArchiveConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Page fetch timeout in seconds (default: 30)
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: "pagewatch/0.1.0".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub const GIB: u64 = 1024 * 1024 * 1024;
pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Largest file that will be delivered at all, in bytes (default: 4 GiB)
    pub max_file_size: u64,
    /// Files above this size are sent in parts (default: 2 GiB)
    pub split_threshold: u64,
    /// Size of each part (default: 2000 MiB)
    pub part_size: u64,
    /// Pause between consecutive text chunks (default: 500 ms)
    pub message_delay_ms: u64,
    /// Per-method download timeout in seconds (default: 600)
    pub download_timeout_secs: u64,
    /// Upper bound on a single transport call, uploads included (default: 900)
    pub send_timeout_secs: u64,
    /// Parent directory for per-delivery temp dirs (default: system temp)
    pub download_dir: Option<PathBuf>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_file_size: 4 * GIB,
            split_threshold: 2 * GIB,
            part_size: 2000 * MIB,
            message_delay_ms: 500,
            download_timeout_secs: 600,
            send_timeout_secs: 900,
            download_dir: None,
        }
    }
}

impl DeliveryConfig {
    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.message_delay_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Try yt-dlp before the plain HTTP download
    pub ytdlp: bool,
    pub ytdlp_path: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            ytdlp: true,
            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Environment variable holding the bot token
    pub token_env: String,
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token_env: "PAGEWATCH_BOT_TOKEN".to_string(),
            api_base: "https://api.telegram.org".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/pagewatch/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("pagewatch").join("config.toml"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let night = &self.night_mode;
        if night.start_hour > 23 || night.end_hour > 24 || night.start_hour >= night.end_hour {
            return Err(ConfigError::Invalid(format!(
                "night_mode window {}..{} must satisfy 0 <= start < end <= 24",
                night.start_hour, night.end_hour
            )));
        }
        night.tz()?;

        if self.scheduler.workers == 0 {
            return Err(ConfigError::Invalid("scheduler.workers must be at least 1".into()));
        }
        if self.delivery.part_size == 0 {
            return Err(ConfigError::Invalid("delivery.part_size must be positive".into()));
        }
        Ok(())
    }

    fn create_default_config(path: &PathBuf) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# pagewatch configuration

[scheduler]
# Minutes between scans of all tracked pages
interval_minutes = 30

# Maximum number of pages checked concurrently
workers = 10

# Run a scan as soon as the daemon starts
check_on_start = true

[night_mode]
# Pages with night mode enabled are only checked between these hours
start_hour = 9
end_hour = 22

# Local clock used for the window (IANA zone name, DST-aware)
timezone = "Asia/Kolkata"

[archive]
# Content snapshots older than this are deleted
retention_days = 30

[fetch]
timeout_secs = 30
user_agent = "pagewatch/0.1.0"

[delivery]
# Files above this size are never delivered (bytes)
max_file_size = 4294967296

# Files above this size are sent in numbered parts (bytes)
split_threshold = 2147483648
part_size = 2097152000

# Pause between consecutive message chunks
message_delay_ms = 500

download_timeout_secs = 600
send_timeout_secs = 900

[downloaders]
# Try yt-dlp first, then a plain HTTP download
ytdlp = true
ytdlp_path = "yt-dlp"

[telegram]
# The bot token is read from this environment variable
token_env = "PAGEWATCH_BOT_TOKEN"
api_base = "https://api.telegram.org"
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(&content).expect("Default config should be valid TOML");

        assert_eq!(config.scheduler.interval_minutes, 30);
        assert_eq!(config.night_mode.start_hour, 9);
        assert_eq!(config.night_mode.end_hour, 22);
        assert_eq!(config.delivery.split_threshold, 2 * GIB);
        assert_eq!(config.delivery.part_size, 2000 * MIB);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
[scheduler]
interval_minutes = 5

[archive]
retention_days = 7
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.scheduler.interval(), Duration::from_secs(300));
        assert_eq!(config.archive.retention(), chrono::Duration::days(7));
        // Default value
        assert_eq!(config.scheduler.workers, 10);
        assert_eq!(config.delivery.message_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config.fetch.timeout(), Duration::from_secs(30));
        assert!(config.downloaders.ytdlp);
    }

    #[test]
    fn test_timezone_parsing() {
        let config = NightModeConfig::default();
        assert_eq!(config.tz().unwrap(), chrono_tz::Asia::Kolkata);

        let utc = NightModeConfig {
            timezone: "UTC".into(),
            ..Default::default()
        };
        assert_eq!(utc.tz().unwrap(), chrono_tz::UTC);

        let bad = NightModeConfig {
            timezone: "Mars/Olympus".into(),
            ..Default::default()
        };
        assert!(bad.tz().is_err());

        let mut config = Config::default();
        config.night_mode.timezone = "+05:30".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_window_rejected() {
        let mut config = Config::default();
        config.night_mode.start_hour = 22;
        config.night_mode.end_hour = 9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scheduler]\nworkers = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.scheduler.workers, 3);

        fs::write(&path, "[scheduler]\nworkers = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
