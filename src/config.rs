use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_merge_output_format")]
    pub merge_output_format: String,
    #[serde(default = "default_log_poll_interval_ms")]
    pub log_poll_interval_ms: u64,
    #[serde(default = "default_check_connectivity")]
    pub check_connectivity: bool,
    #[serde(default = "default_connectivity_url")]
    pub connectivity_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ytdlp_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Kept as text: a malformed value degrades to the default timeout
    /// when options are built instead of failing the config load.
    #[serde(
        default = "default_socket_timeout",
        deserialize_with = "deserialize_lenient_string"
    )]
    pub socket_timeout: String,
    #[serde(default)]
    pub force_ipv4: bool,
    #[serde(default)]
    pub proxy_mode: ProxyMode,
    #[serde(default = "default_proxy_address")]
    pub proxy_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub source: CookieSource,
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "default_browser")]
    pub browser: String,
    #[serde(default)]
    pub profile: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    None,
    System,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CookieSource {
    File,
    #[default]
    Browser,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::None => write!(f, "none"),
            ProxyMode::System => write!(f, "system"),
            ProxyMode::Manual => write!(f, "manual"),
        }
    }
}

pub const SECTIONS: &[&str] = &["general", "network", "cookies"];

// Default value functions
fn default_download_dir() -> String {
    UserDirs::new()
        .map(|dirs| {
            dirs.video_dir()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| dirs.home_dir().join("Videos"))
        })
        .unwrap_or_else(|| PathBuf::from("Videos"))
        .join("mediaq")
        .to_string_lossy()
        .into_owned()
}
fn default_merge_output_format() -> String {
    "mp4".to_string()
}
fn default_log_poll_interval_ms() -> u64 {
    100
}
fn default_check_connectivity() -> bool {
    true
}
fn default_connectivity_url() -> String {
    "https://www.youtube.com".to_string()
}
fn default_socket_timeout() -> String {
    "60".to_string()
}
fn default_proxy_address() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_browser() -> String {
    "chrome".to_string()
}

fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
        Raw::Bool(b) => b.to_string(),
    })
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            merge_output_format: default_merge_output_format(),
            log_poll_interval_ms: default_log_poll_interval_ms(),
            check_connectivity: default_check_connectivity(),
            connectivity_url: default_connectivity_url(),
            ytdlp_path: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            socket_timeout: default_socket_timeout(),
            force_ipv4: false,
            proxy_mode: ProxyMode::None,
            proxy_address: default_proxy_address(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: CookieSource::Browser,
            file_path: String::new(),
            browser: default_browser(),
            profile: String::new(),
        }
    }
}

pub struct ConfigManager {
    config_dir: PathBuf,
    config_file: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new ConfigManager and load existing config or create default
    pub fn new() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("", "", "mediaq").context("Failed to determine config directory")?;

        Self::with_path(project_dirs.config_dir().join("config.toml"))
    }

    /// Use an explicit config file instead of the platform location
    pub fn with_path(config_file: impl Into<PathBuf>) -> Result<Self> {
        let config_file = config_file.into();
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if !config_dir.as_os_str().is_empty() && !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
        }

        let config = if config_file.exists() {
            Self::load_config(&config_file)?
        } else {
            let default_config = Config::default();
            Self::save_config(&config_file, &default_config)?;
            default_config
        };

        Ok(Self {
            config_dir,
            config_file,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Save the current config to disk
    pub fn save(&self) -> Result<()> {
        Self::save_config(&self.config_file, &self.config)
    }

    /// Reload config from disk
    pub fn reload(&mut self) -> Result<()> {
        self.config = Self::load_config(&self.config_file)?;
        Ok(())
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Look up a value by dotted key, e.g. `network.proxy_mode`
    pub fn get(&self, key: &str) -> Result<toml::Value> {
        let root = toml::Value::try_from(&self.config).context("Failed to serialize config")?;

        let mut current = &root;
        for part in key.split('.') {
            current = current
                .get(part)
                .with_context(|| format!("Unknown config key: {}", key))?;
        }
        Ok(current.clone())
    }

    /// Set a value by dotted key. The raw text is parsed according to the
    /// type of the value it replaces, and the result must still form a
    /// valid config.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let (section, leaf) = key
            .split_once('.')
            .with_context(|| format!("Config key must look like section.field: {}", key))?;

        let mut root = toml::Value::try_from(&self.config).context("Failed to serialize config")?;
        let table = root
            .get_mut(section)
            .and_then(toml::Value::as_table_mut)
            .with_context(|| format!("Unknown config section: {}", section))?;

        let value = match table.get(leaf) {
            Some(toml::Value::Boolean(_)) => toml::Value::Boolean(
                raw.trim()
                    .parse()
                    .with_context(|| format!("{} expects true or false", key))?,
            ),
            Some(toml::Value::Integer(_)) => toml::Value::Integer(
                raw.trim()
                    .parse()
                    .with_context(|| format!("{} expects an integer", key))?,
            ),
            _ => toml::Value::String(raw.to_string()),
        };
        table.insert(leaf.to_string(), value);

        self.config = root
            .try_into()
            .with_context(|| format!("Invalid value for {}: {}", key, raw))?;
        Ok(())
    }

    /// Reset one section, or everything, to defaults
    pub fn reset(&mut self, section: Option<&str>) -> Result<()> {
        match section {
            None => self.config = Config::default(),
            Some("general") => self.config.general = GeneralConfig::default(),
            Some("network") => self.config.network = NetworkConfig::default(),
            Some("cookies") => self.config.cookies = CookieConfig::default(),
            Some(other) => anyhow::bail!("Unknown config section: {}", other),
        }
        Ok(())
    }

    fn load_config(config_file: &Path) -> Result<Config> {
        let content = fs::read_to_string(config_file)
            .with_context(|| format!("Failed to read config file: {:?}", config_file))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_file))?;

        Ok(config)
    }

    fn save_config(config_file: &Path, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

        fs::write(config_file, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

        Ok(())
    }

    /// Create a sample config file for user reference
    pub fn create_sample_config(&self) -> Result<PathBuf> {
        let sample_file = self.config_dir.join("config.sample.toml");
        Self::save_config(&sample_file, &Config::default())?;
        Ok(sample_file)
    }

    /// Validate the current configuration.
    ///
    /// `network.socket_timeout` is not checked; a bad value falls back to
    /// the default timeout when options are built.
    pub fn validate(&self) -> Result<()> {
        let general = &self.config.general;

        if general.download_dir.trim().is_empty() {
            anyhow::bail!("download_dir cannot be empty");
        }

        if general.merge_output_format.trim().is_empty() {
            anyhow::bail!("merge_output_format cannot be empty");
        }

        if general.log_poll_interval_ms == 0 {
            anyhow::bail!("log_poll_interval_ms must be greater than 0");
        }

        if general.check_connectivity && general.connectivity_url.trim().is_empty() {
            anyhow::bail!("connectivity_url cannot be empty while check_connectivity is on");
        }

        Ok(())
    }
}
