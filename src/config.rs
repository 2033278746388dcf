use crate::gesture::GestureTrigger;
use crate::transform::{Language, TransformMode};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "CCAI_CONFIG";
/// Environment variable overriding the data directory (PID file, logs, crash log).
pub const DATA_DIR_ENV: &str = "CCAI_DATA_DIR";

/// Poll intervals above this add noticeable latency to the gesture.
const RECOMMENDED_MAX_POLL_MS: u64 = 150;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Persisted settings document, grouped by concern.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub gesture: GestureSettings,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub privacy: PrivacySettings,

    #[serde(default)]
    pub language: LanguageSettings,

    #[serde(default)]
    pub ui: UiSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Clipboard gesture timing and what each gesture does.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GestureSettings {
    /// Start the clipboard monitor with the daemon
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Which copy count fires: double_copy or triple_copy
    #[serde(default)]
    pub trigger: GestureTrigger,

    /// Maximum gap between copies that still continues a gesture
    #[serde(default = "default_copy_window_ms")]
    pub copy_window_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on a clipboard read after this long
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Mode run on a double copy ("none" = notify only)
    #[serde(default = "default_double_copy_mode", with = "mode_or_none")]
    pub double_copy_mode: Option<TransformMode>,

    /// Mode run on a triple copy
    #[serde(default, with = "mode_or_none")]
    pub triple_copy_mode: Option<TransformMode>,
}

impl Default for GestureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger: GestureTrigger::default(),
            copy_window_ms: default_copy_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            double_copy_mode: default_double_copy_mode(),
            triple_copy_mode: None,
        }
    }
}

/// Optional gesture mode stored as a plain string, with "none" for no action.
mod mode_or_none {
    use crate::transform::TransformMode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        mode: &Option<TransformMode>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(mode.map_or("none", TransformMode::as_str))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<TransformMode>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") | Some("none") | Some("off") => Ok(None),
            Some(other) => other.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ProviderSettings {
    /// OpenAI-compatible base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_request: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on a single transform call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens_per_request: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputSettings {
    /// Write transform results back to the clipboard
    #[serde(default = "default_true")]
    pub auto_clipboard: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            auto_clipboard: true,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PrivacySettings {
    /// Case-insensitive regular expressions; matching text is never sent
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,

    /// Applications (partial, case-insensitive names) where gestures are ignored
    #[serde(default)]
    pub excluded_apps: Vec<String>,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            exclude_patterns: default_exclude_patterns(),
            excluded_apps: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct LanguageSettings {
    #[serde(default)]
    pub default_input: Language,

    #[serde(default)]
    pub default_output: Language,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UiSettings {
    /// Desktop notifications for transform outcomes
    #[serde(default = "default_true")]
    pub notifications: bool,

    #[serde(default)]
    pub window_visible_on_start: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            notifications: true,
            window_visible_on_start: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write daily rolling log files to the data directory
    #[serde(default)]
    pub file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_copy_window_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_read_timeout_ms() -> u64 {
    250
}

fn default_double_copy_mode() -> Option<TransformMode> {
    Some(TransformMode::Translate)
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "password=".to_string(),
        "api_key".to_string(),
        "-----BEGIN".to_string(),
    ]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("com", "ccai", "ccai")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the data directory path (PID file, logs, crash reports)
    pub fn data_dir() -> Result<PathBuf, ConfigError> {
        if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        ProjectDirs::from("com", "ccai", "ccai")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path, honoring `CCAI_CONFIG`
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.gesture;
        if g.copy_window_ms == 0 || g.copy_window_ms > 10_000 {
            return Err(ConfigError::ValidationError(
                "copy_window_ms must be between 1 and 10000".into(),
            ));
        }
        if !(10..=1000).contains(&g.poll_interval_ms) {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be between 10 and 1000".into(),
            ));
        }
        if g.poll_interval_ms > RECOMMENDED_MAX_POLL_MS {
            warn!(
                "poll_interval_ms={} exceeds {}ms; gestures will feel sluggish",
                g.poll_interval_ms, RECOMMENDED_MAX_POLL_MS
            );
        }
        if g.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "read_timeout_ms must be positive".into(),
            ));
        }

        let p = &self.provider;
        if p.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if !(p.endpoint.starts_with("http://") || p.endpoint.starts_with("https://")) {
            return Err(ConfigError::ValidationError(
                "endpoint must be an http(s) URL".into(),
            ));
        }
        if p.max_tokens_per_request == 0 {
            return Err(ConfigError::ValidationError(
                "max_tokens_per_request must be positive".into(),
            ));
        }
        if !(0.0..=2.0).contains(&p.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if p.timeout_secs == 0 || p.timeout_secs > 600 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be between 1 and 600".into(),
            ));
        }

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging level '{}' is not one of {}",
                self.logging.level,
                LEVELS.join(", ")
            )));
        }

        Ok(())
    }
}

/// Read, create, and rewrite the settings document.
///
/// Holds the in-memory copy; every change is validated and then written out
/// as a whole document.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsStore {
    /// Open the store at the default location.
    pub fn open_default() -> Result<Self, ConfigError> {
        Self::open(Settings::config_path()?)
    }

    /// Open the store at `path`, creating a default document if missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let settings = Self::load_from(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(settings),
        })
    }

    /// Load settings from `path`, or write and return defaults if absent.
    pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            let settings: Settings = toml::from_str(&contents)?;
            settings.validate()?;
            debug!("Loaded settings from {}", path.display());
            Ok(settings)
        } else {
            let settings = Settings::default();
            write_document(path, &settings)?;
            Ok(settings)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current in-memory settings.
    pub fn get(&self) -> Settings {
        match self.current.read() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the whole document.
    pub fn save(&self, settings: Settings) -> Result<(), ConfigError> {
        let mut current = self.lock_current();
        self.commit(&mut current, settings)
    }

    /// Merge `patch` into the current settings and persist.
    ///
    /// `patch` is an object keyed by group name. Each group present replaces
    /// the whole group; groups absent are kept. Fields missing inside a given
    /// group take their defaults.
    pub fn save_partial(&self, patch: &serde_json::Value) -> Result<Settings, ConfigError> {
        let patch = patch.as_object().ok_or_else(|| {
            ConfigError::ValidationError("settings patch must be an object".into())
        })?;

        // Held through the write so concurrent patches merge in turn
        let mut current = self.lock_current();

        let mut merged = serde_json::to_value(&*current)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        let groups = merged.as_object_mut().ok_or_else(|| {
            ConfigError::ValidationError("settings did not serialize to an object".into())
        })?;

        for (group, value) in patch {
            match groups.get_mut(group) {
                Some(slot) => *slot = value.clone(),
                None => {
                    return Err(ConfigError::ValidationError(format!(
                        "unknown settings group '{}'",
                        group
                    )))
                }
            }
        }

        let settings: Settings = serde_json::from_value(merged)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        self.commit(&mut current, settings.clone())?;
        info!(
            "Settings updated ({})",
            patch.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(settings)
    }

    fn lock_current(&self) -> RwLockWriteGuard<'_, Settings> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn commit(&self, current: &mut Settings, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        write_document(&self.path, &settings)?;
        *current = settings;
        Ok(())
    }
}

fn write_document(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = toml::to_string_pretty(settings)?;
    fs::write(path, contents)?;
    info!("Config saved to: {}", path.display());
    Ok(())
}

/// Show current configuration
pub fn show() -> anyhow::Result<()> {
    let store = SettingsStore::open_default()?;

    println!("Config file: {}\n", store.path().display());
    println!("{}", toml::to_string_pretty(&store.get())?);

    Ok(())
}

/// Update configuration from CLI flags
pub fn update(
    window: Option<u64>,
    model: Option<String>,
    endpoint: Option<String>,
    mode: Option<String>,
    auto_clipboard: Option<bool>,
) -> anyhow::Result<()> {
    let store = SettingsStore::open_default()?;
    let mut settings = store.get();
    let mut changed = false;

    if let Some(ms) = window {
        settings.gesture.copy_window_ms = ms;
        changed = true;
    }

    if let Some(m) = model {
        settings.provider.model = m;
        changed = true;
    }

    if let Some(url) = endpoint {
        settings.provider.endpoint = url;
        changed = true;
    }

    if let Some(mode) = mode {
        settings.gesture.double_copy_mode = match mode.to_lowercase().as_str() {
            "none" | "off" => None,
            other => Some(other.parse::<TransformMode>().map_err(anyhow::Error::msg)?),
        };
        changed = true;
    }

    if let Some(enabled) = auto_clipboard {
        settings.output.auto_clipboard = enabled;
        changed = true;
    }

    if changed {
        store.save(settings)?;
        println!("Configuration updated.");
    } else {
        println!("No changes specified. Use --show to view current config.");
    }

    Ok(())
}
