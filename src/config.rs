use crate::defaults;
use crate::settings::Settings;
use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub vad: VadConfig,
    pub wake: WakeConfig,
    pub audio: AudioConfig,
}

/// Server connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub device_name: String,
    pub auto_connect: bool,
    pub auto_connect_delay_ms: u64,
    pub address_change_delay_ms: u64,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    pub silence_threshold_ms: u64,
    pub volume_threshold: u32,
    pub check_interval_ms: u64,
}

/// Wake-word gate configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WakeConfig {
    pub enabled: bool,
    pub keyword: String,
    pub keyword_file: Option<PathBuf>,
    pub score_threshold: i32,
    pub rearm_delay_ms: u64,
}

/// Audio device selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
            device_name: defaults::DEVICE_NAME.to_string(),
            auto_connect: true,
            auto_connect_delay_ms: defaults::AUTO_CONNECT_DELAY_MS,
            address_change_delay_ms: defaults::ADDRESS_CHANGE_DELAY_MS,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold_ms: defaults::SILENCE_THRESHOLD_MS,
            volume_threshold: defaults::VOLUME_THRESHOLD,
            check_interval_ms: defaults::VAD_CHECK_INTERVAL_MS,
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keyword: defaults::WAKE_KEYWORD.to_string(),
            keyword_file: None,
            score_threshold: defaults::WAKE_SCORE_THRESHOLD,
            rearm_delay_ms: defaults::WAKE_REARM_DELAY_MS,
        }
    }
}

impl WakeConfig {
    /// Keyword resource path, falling back to the per-user data directory.
    pub fn keyword_path(&self) -> PathBuf {
        self.keyword_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("lumi")
                .join("keyword.txt")
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Write configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LUMI_SERVER_URL → server.url
    /// - LUMI_WAKE_KEYWORD → wake.keyword
    /// - LUMI_INPUT_DEVICE → audio.input_device
    /// - LUMI_OUTPUT_DEVICE → audio.output_device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("LUMI_SERVER_URL")
            && !url.is_empty()
        {
            self.server.url = url;
        }

        if let Ok(keyword) = std::env::var("LUMI_WAKE_KEYWORD")
            && !keyword.is_empty()
        {
            self.wake.keyword = keyword;
        }

        if let Ok(device) = std::env::var("LUMI_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("LUMI_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        self
    }

    /// Runtime settings carried by this configuration.
    pub fn settings(&self) -> Settings {
        Settings {
            silence_threshold_ms: self.vad.silence_threshold_ms,
            volume_threshold: self.vad.volume_threshold,
            server_url: self.server.url.clone(),
            wake_keyword: self.wake.keyword.clone(),
        }
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/lumi/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lumi")
            .join("config.toml")
    }

    /// Look up a dotted key such as `vad.volume_threshold`.
    pub fn get_value_by_path(&self, key: &str) -> anyhow::Result<String> {
        let root = toml::Value::try_from(self)?;
        let mut current = &root;
        for part in key.split('.') {
            current = current
                .get(part)
                .with_context(|| format!("Unknown config key: {}", key))?;
        }
        Ok(match current {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Set a dotted key in the file at `path` and save it.
    ///
    /// The value is parsed with the type of the existing field, so
    /// `vad.volume_threshold = abc` is rejected instead of written.
    pub fn set_value_by_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
        let config = Self::load_or_default(path)?;
        let mut root = toml::Value::try_from(&config)?;

        let parts: Vec<&str> = key.split('.').collect();
        let Some((last, parents)) = parts.split_last() else {
            bail!("Empty config key");
        };

        let mut table = &mut root;
        for part in parents {
            table = table
                .get_mut(*part)
                .with_context(|| format!("Unknown config key: {}", key))?;
        }
        let table = table
            .as_table_mut()
            .with_context(|| format!("Not a config section: {}", key))?;

        let new_value = match table.get(*last) {
            Some(toml::Value::Integer(_)) => toml::Value::Integer(
                value
                    .parse()
                    .with_context(|| format!("{} expects an integer", key))?,
            ),
            Some(toml::Value::Boolean(_)) => toml::Value::Boolean(
                value
                    .parse()
                    .with_context(|| format!("{} expects true or false", key))?,
            ),
            Some(toml::Value::String(_)) => toml::Value::String(value.to_string()),
            Some(_) => bail!("{} cannot be set from the command line", key),
            // Optional fields are omitted from the serialized form while unset.
            None if parents.len() == 1 && Self::is_optional_key(key) => {
                toml::Value::String(value.to_string())
            }
            None => bail!("Unknown config key: {}", key),
        };
        table.insert((*last).to_string(), new_value);

        let updated: Config = root.try_into()?;
        updated.save(path)
    }

    fn is_optional_key(key: &str) -> bool {
        matches!(
            key,
            "wake.keyword_file" | "audio.input_device" | "audio.output_device"
        )
    }
}
