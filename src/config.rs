//! Configuration for the Tumblr exporter
//!
//! Loads configuration from config.yml file, with `${VAR}` values and a few
//! well-known environment variables taking precedence.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default constants (fallback if config.yml not found)
pub const BASE_URL: &str = "https://www.tumblr.com";
pub const BLOG_SUFFIX: &str = ".tumblr.com";
pub const LOCK_FILE: &str = "tumblr_chat_export.lock";
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;
pub const PAGE_RETRIES: u32 = 5;

/// YAML config structures
#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    tumblr: Option<TumblrConfig>,
    limits: Option<LimitsConfig>,
    output: Option<OutputConfig>,
}

#[derive(Debug, Deserialize)]
struct TumblrConfig {
    base_url: Option<String>,
    email: Option<String>,
    blog: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LimitsConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    max_login_attempts: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    page_retries: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    rate_limit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutputConfig {
    split: Option<bool>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub email: String,
    pub blog: String,
    pub max_login_attempts: u32,
    pub page_retries: u32,
    /// Requests per minute while paging messages.
    pub rate_limit: Option<u32>,
    pub split: bool,
    pub lock_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Load configuration from config.yml or use defaults
    pub fn new() -> Self {
        Self::load_from_file("config.yml")
            .or_else(|_| Self::load_from_file("../config.yml"))
            .unwrap_or_else(|_| {
                Self::load_dotenv();
                Self::from_env()
            })
    }

    /// Defaults overridden by the `TUMBLR_*` environment variables
    pub fn from_env() -> Self {
        Self::resolve(YamlConfig::default())
    }

    /// Resolve a value: prefer env var if config value looks like ${VAR}
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Some(ref v) = value {
            if let Some(var_name) = v.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
                if let Ok(env_val) = std::env::var(var_name) {
                    return Some(env_val);
                }
            }
        }
        if let Ok(env_val) = std::env::var(env_key) {
            return Some(env_val);
        }
        value.filter(|v| !v.starts_with("${"))
    }

    /// Resolve a u32 value from string config or env var
    fn resolve_env_u32(value: Option<String>, env_key: &str) -> Option<u32> {
        Self::resolve_env_string(value, env_key).and_then(|v| v.trim().parse::<u32>().ok())
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::from_yaml(&content)
    }

    /// Build configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, String> {
        let yaml: YamlConfig = serde_yaml::from_str(content)
            .map_err(|e| format!("Failed to parse config file: {}", e))?;

        Ok(Self::resolve(yaml))
    }

    fn resolve(yaml: YamlConfig) -> Self {
        let tumblr = yaml.tumblr.unwrap_or(TumblrConfig {
            base_url: None,
            email: None,
            blog: None,
        });

        let limits = yaml.limits.unwrap_or(LimitsConfig {
            max_login_attempts: None,
            page_retries: None,
            rate_limit: None,
        });

        let defaults = Self::defaults();

        Self {
            base_url: Self::resolve_env_string(tumblr.base_url, "TUMBLR_BASE_URL")
                .unwrap_or(defaults.base_url),
            email: Self::resolve_env_string(tumblr.email, "TUMBLR_EMAIL").unwrap_or_default(),
            blog: Self::resolve_env_string(tumblr.blog, "TUMBLR_BLOG").unwrap_or_default(),
            max_login_attempts: Self::resolve_env_u32(
                limits.max_login_attempts,
                "TUMBLR_MAX_LOGIN_ATTEMPTS",
            )
            .filter(|n| *n > 0)
            .unwrap_or(MAX_LOGIN_ATTEMPTS),
            page_retries: Self::resolve_env_u32(limits.page_retries, "TUMBLR_PAGE_RETRIES")
                .filter(|n| *n > 0)
                .unwrap_or(PAGE_RETRIES),
            rate_limit: Self::resolve_env_u32(limits.rate_limit, "TUMBLR_RATE_LIMIT")
                .filter(|n| *n > 0),
            split: yaml.output.and_then(|o| o.split).unwrap_or(false),
            lock_file: defaults.lock_file,
        }
    }

    /// Create config with empty defaults (fallback)
    pub fn defaults() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            email: String::new(),
            blog: String::new(),
            max_login_attempts: MAX_LOGIN_ATTEMPTS,
            page_retries: PAGE_RETRIES,
            rate_limit: None,
            split: false,
            lock_file: std::env::temp_dir().join(LOCK_FILE),
        }
    }
}

/// Strip a trailing `.tumblr.com` and surrounding whitespace from a blog name.
pub fn normalize_blog(name: &str) -> String {
    let name = name.trim();
    name.strip_suffix(BLOG_SUFFIX).unwrap_or(name).to_string()
}

/// Fully qualified blog host as the messaging service addresses participants.
pub fn blog_host(name: &str) -> String {
    format!("{}{}", normalize_blog(name), BLOG_SUFFIX)
}
