use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booru::RateLimiterConfig;
use crate::sourcing::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE, SourcerConfig};

// Define error types for config loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// Result type alias for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub const DEFAULT_CONFIG_FILE: &str = "captchouli.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Paths {
    pub database_file: String,
    /// Empty means the OS temp directory
    pub temp_directory: String,
    pub log_file: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Booru {
    pub api_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub posts_per_page: u32,
    pub max_pages: u32,
    /// 0 ingests every post of a page
    pub max_posts_per_page: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Rate {
    pub base_delay_ms: u64,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub slow_request_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Logging {
    pub log_level: String,
    pub log_to_file: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Service {
    /// Character tags to source images for
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub paths: Paths,
    pub booru: Booru,
    pub rate: Rate,
    pub logging: Logging,
    pub service: Service,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: Paths {
                database_file: "./data/captchouli.sqlite".to_string(),
                temp_directory: String::new(),
                log_file: "captchouli.log".to_string(),
            },
            booru: Booru {
                api_url: "https://gelbooru.com/index.php".to_string(),
                user_agent: format!("captchouli/{}", env!("CARGO_PKG_VERSION")),
                request_timeout_secs: 30,
                posts_per_page: DEFAULT_PAGE_SIZE,
                max_pages: DEFAULT_MAX_PAGES,
                max_posts_per_page: 0,
            },
            rate: Rate {
                base_delay_ms: 500,
                min_delay_ms: 250,
                max_delay_ms: 10_000,
                slow_request_ms: 2_000,
            },
            logging: Logging {
                log_level: "info".to_string(),
                log_to_file: true,
            },
            service: Service {
                tags: vec![
                    "patchouli_knowledge".to_string(),
                    "cirno".to_string(),
                    "hakurei_reimu".to_string(),
                ],
            },
        }
    }
}

impl AppConfig {
    /// Loads `path`, writing defaults there if it does not exist.
    ///
    /// A file that no longer parses is moved aside to `.toml.backup` and
    /// replaced with defaults.
    pub fn load_or_create(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Config file not found, creating {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)?;
        match toml::from_str::<Self>(&content) {
            Ok(config) => {
                config.validate()?;
                Ok(config)
            }
            Err(e) => {
                log::error!("Failed to parse {}: {}", path.display(), e);
                log::info!("Backing up old config and creating new one with default values");
                if let Err(backup_err) = fs::rename(path, path.with_extension("toml.backup")) {
                    log::warn!("Failed to backup old config: {}", backup_err);
                }
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.booru.posts_per_page == 0 {
            return Err(ConfigError::Invalid("booru.posts_per_page must be positive".to_string()));
        }
        if self.booru.max_pages == 0 {
            return Err(ConfigError::Invalid("booru.max_pages must be positive".to_string()));
        }
        if self.rate.min_delay_ms > self.rate.max_delay_ms {
            return Err(ConfigError::Invalid(
                "rate.min_delay_ms exceeds rate.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sourcer_config(&self) -> SourcerConfig {
        SourcerConfig {
            max_pages: self.booru.max_pages,
            page_size: self.booru.posts_per_page,
            max_posts_per_page: match self.booru.max_posts_per_page {
                0 => None,
                n => Some(n),
            },
            temp_directory: match self.paths.temp_directory.trim() {
                "" => None,
                dir => Some(PathBuf::from(dir)),
            },
        }
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            base_delay: Duration::from_millis(self.rate.base_delay_ms),
            min_delay: Duration::from_millis(self.rate.min_delay_ms),
            max_delay: Duration::from_millis(self.rate.max_delay_ms),
            slow_request_threshold: Duration::from_millis(self.rate.slow_request_ms),
            ..RateLimiterConfig::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.booru.request_timeout_secs)
    }
}
