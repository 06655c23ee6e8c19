//! Configuration loading and management
//!
//! Paths are derived from `$HOME`. Persisted settings live in
//! `settings.json` under the data directory; the file is written by an
//! external settings tool and only read here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which speech synthesizer backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesizerKind {
    /// Print utterances to stdout
    #[default]
    Console,
    /// Speak through the `espeak` binary
    Espeak,
}

const DEFAULT_VOLUME: u8 = 80;

/// Alias used by the local launch rule, matched as a substring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAlias {
    pub alias: String,
    pub app_id: String,
}

impl AppAlias {
    fn new(alias: &str, app_id: &str) -> Self {
        Self {
            alias: alias.to_string(),
            app_id: app_id.to_string(),
        }
    }
}

/// Persisted settings, each key falling back to a default when absent
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wake-word model identifier (the console backend uses it as the phrase)
    pub hotword_model: String,
    /// `host:port` of the PC that receives shutdown requests
    pub server_address: String,
    /// Credential sent with shutdown requests
    pub server_password: String,
    /// Access key for the wake-word engine
    #[serde(alias = "porcupine_api_key")]
    pub wake_access_key: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    /// Speak responses instead of only showing them
    pub voice_response: bool,
    /// Speech volume in percent (0-100)
    #[serde(deserialize_with = "volume_percent")]
    pub voice_volume: u8,
    /// MAC address targeted by Wake-on-LAN
    pub pc_mac_address: String,
    /// sysfs LED used as the torch, e.g. `white:flash`
    pub torch_led: Option<String>,
    pub synthesizer: SynthesizerKind,
    /// Ordered alias table for "open ..." / "launch ..." utterances
    pub app_aliases: Vec<AppAlias>,
    /// Override for the directories scanned for installed applications
    pub application_dirs: Option<Vec<PathBuf>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hotword_model: "ellie".to_string(),
            server_address: "192.168.1.1:5000".to_string(),
            server_password: String::new(),
            wake_access_key: String::new(),
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.5-flash".to_string(),
            voice_response: true,
            voice_volume: DEFAULT_VOLUME,
            pc_mac_address: "FF:FF:FF:FF:FF:FF".to_string(),
            torch_led: None,
            synthesizer: SynthesizerKind::default(),
            app_aliases: vec![
                AppAlias::new("setting", "com.android.settings"),
                AppAlias::new("chrome", "com.android.chrome"),
                AppAlias::new("youtube", "com.google.android.youtube"),
                AppAlias::new("gmail", "com.google.android.gm"),
            ],
            application_dirs: None,
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("hotword_model", &self.hotword_model)
            .field("server_address", &self.server_address)
            .field("server_password", &mask(&self.server_password))
            .field("wake_access_key", &mask(&self.wake_access_key))
            .field("gemini_api_key", &mask(&self.gemini_api_key))
            .field("gemini_model", &self.gemini_model)
            .field("voice_response", &self.voice_response)
            .field("voice_volume", &self.voice_volume)
            .field("pc_mac_address", &self.pc_mac_address)
            .field("torch_led", &self.torch_led)
            .field("synthesizer", &self.synthesizer)
            .field("app_aliases", &self.app_aliases.len())
            .finish()
    }
}

/// Clamp any number to 0-100; anything else keeps the default for this key only
fn volume_percent<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value.as_f64() {
        Some(volume) if volume.is_finite() => Ok(volume.round().clamp(0.0, 100.0) as u8),
        _ => {
            warn!(%value, "invalid voice_volume, using default");
            Ok(DEFAULT_VOLUME)
        }
    }
}

fn mask(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl Settings {
    /// Read settings from `path`, using defaults if the file is missing or invalid
    pub fn load(path: &Path) -> Self {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(settings) => {
                    info!(path = %path.display(), "loaded settings");
                    settings
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                    Settings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read settings file");
                Settings::default()
            }
        };

        if settings.gemini_api_key.is_empty() {
            if let Ok(key) = std::env::var("GEMINI_API_KEY") {
                settings.gemini_api_key = key;
            }
        }
        settings
    }
}

/// Every duration the pipeline relies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Capture is abandoned if speech has not begun within this window
    pub speech_onset: Duration,
    /// Trailing silence after which the recognizer ends the utterance
    pub recognizer_silence: Duration,
    /// Hard cap on a single capture session
    pub capture_guard: Duration,
    /// Hard cap on remote classification
    pub classify_guard: Duration,
    /// HTTP timeout for language-model calls
    pub llm_request: Duration,
    /// Connect and read timeout for the PC shutdown request
    pub shutdown_request: Duration,
    /// Visual indicator lifetime when voice feedback is disabled
    pub auto_hide: Duration,
    /// Delay between the end of a cycle and re-arming the wake detector
    pub rearm: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            speech_onset: Duration::from_millis(3000),
            recognizer_silence: Duration::from_millis(5000),
            capture_guard: Duration::from_secs(15),
            classify_guard: Duration::from_secs(20),
            llm_request: Duration::from_secs(15),
            shutdown_request: Duration::from_millis(5000),
            auto_hide: Duration::from_millis(3000),
            rearm: Duration::from_millis(250),
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Persisted settings file
    pub settings_path: PathBuf,

    pub settings: Settings,

    pub timings: Timings,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("ellie");

        Ok(Self::with_data_dir(data_dir))
    }

    /// Build a configuration rooted at `data_dir`
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let socket_path = data_dir.join("daemon.sock");
        let settings_path = data_dir.join("settings.json");
        let settings = Settings::load(&settings_path);

        Self {
            socket_path,
            data_dir,
            settings_path,
            settings,
            timings: Timings::default(),
        }
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
