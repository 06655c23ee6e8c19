//! Device capabilities used by command handlers
//!
//! The registry of installed applications is read once at startup. The
//! capability traits are implemented for a Linux desktop in [`desktop`].

pub mod desktop;

use std::collections::BTreeMap;

/// Errors reported by device capabilities
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("capability not supported on this device")]
    Unsupported,

    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("command `{program}` failed: {message}")]
    Command { program: String, message: String },
}

/// One installed application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    /// Stable identifier (package or desktop-entry id)
    pub id: String,
    /// Human readable name
    pub label: String,
}

impl AppEntry {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Installed applications, enumerated once
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    apps: BTreeMap<String, AppEntry>,
}

impl DeviceRegistry {
    pub fn new(apps: impl IntoIterator<Item = AppEntry>) -> Self {
        Self {
            apps: apps.into_iter().map(|a| (a.id.clone(), a)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Comma-joined identifiers, as embedded in the classifier prompt
    pub fn joined_ids(&self) -> String {
        self.apps.keys().map(String::as_str).collect::<Vec<_>>().join(",")
    }

    /// Find an application by identifier, then by case-insensitive label
    pub fn resolve(&self, name: &str) -> Option<&AppEntry> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.apps.get(name).or_else(|| {
            self.apps
                .values()
                .find(|a| a.label.eq_ignore_ascii_case(name))
        })
    }
}

/// Camera torch / flashlight
pub trait Torch: Send + Sync {
    fn set(&self, on: bool) -> Result<(), DeviceError>;
}

/// Starts installed applications
pub trait AppLauncher: Send + Sync {
    fn launch(&self, app: &AppEntry) -> Result<(), DeviceError>;

    /// Open the in-app search of `app` for `query`
    fn search(&self, app: &AppEntry, query: &str) -> Result<(), DeviceError>;
}

/// Opens URLs in the default handler
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), DeviceError>;
}

/// Reads the system clipboard. May block; callers run it off the async path.
pub trait Clipboard: Send + Sync {
    /// Plain-text clipboard content, `None` when empty or not text
    fn read_text(&self) -> Result<Option<String>, DeviceError>;
}
