//! Linux desktop implementations of the device capabilities

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::{debug, info, warn};

use super::{AppEntry, AppLauncher, Clipboard, DeviceError, DeviceRegistry, Torch, UrlOpener};

/// XDG directories that hold `.desktop` entries
pub fn default_application_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![
        PathBuf::from("/usr/share/applications"),
        PathBuf::from("/usr/local/share/applications"),
    ];
    if let Ok(home) = std::env::var("HOME") {
        dirs.push(PathBuf::from(home).join(".local/share/applications"));
    }
    dirs
}

/// Enumerate launchable applications under `dirs`
///
/// Missing or unreadable directories are skipped.
pub fn scan_applications(dirs: &[PathBuf]) -> DeviceRegistry {
    let mut apps = Vec::new();

    for dir in dirs {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping application directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("desktop") {
                continue;
            }
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    if let Some(app) = parse_desktop_entry(&path, &content) {
                        apps.push(app);
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable desktop entry"),
            }
        }
    }

    let registry = DeviceRegistry::new(apps);
    info!(count = registry.len(), "installed applications enumerated");
    registry
}

fn parse_desktop_entry(path: &Path, content: &str) -> Option<AppEntry> {
    let id = path.file_stem()?.to_str()?.to_string();
    let mut in_main_group = false;
    let mut label = None;
    let mut is_application = false;

    for line in content.lines().map(str::trim) {
        if line.starts_with('[') {
            in_main_group = line == "[Desktop Entry]";
            continue;
        }
        if !in_main_group {
            continue;
        }
        match line.split_once('=') {
            Some(("Name", value)) if label.is_none() => label = Some(value.trim().to_string()),
            Some(("Type", value)) => is_application = value.trim() == "Application",
            Some(("NoDisplay", value)) if value.trim() == "true" => return None,
            _ => {}
        }
    }

    is_application.then(|| AppEntry {
        label: label.unwrap_or_else(|| id.clone()),
        id,
    })
}

fn spawn_detached(program: &str, args: &[&str]) -> Result<(), DeviceError> {
    tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|e| DeviceError::Command {
            program: program.to_string(),
            message: e.to_string(),
        })
}

/// Launches desktop entries through `gtk-launch`
#[derive(Debug, Default)]
pub struct DesktopLauncher;

impl AppLauncher for DesktopLauncher {
    fn launch(&self, app: &AppEntry) -> Result<(), DeviceError> {
        spawn_detached("gtk-launch", &[&app.id])
    }

    fn search(&self, _app: &AppEntry, _query: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

/// Opens URLs through `xdg-open`
#[derive(Debug, Default)]
pub struct XdgOpener;

impl UrlOpener for XdgOpener {
    fn open(&self, url: &str) -> Result<(), DeviceError> {
        spawn_detached("xdg-open", &[url])
    }
}

/// Reads the clipboard with `wl-paste`, falling back to `xclip`
#[derive(Debug)]
pub struct CommandClipboard {
    readers: Vec<(String, Vec<String>)>,
}

impl CommandClipboard {
    /// Try each `(program, args)` in order
    pub fn with_readers<I, P, A>(readers: I) -> Self
    where
        I: IntoIterator<Item = (P, Vec<A>)>,
        P: Into<String>,
        A: Into<String>,
    {
        Self {
            readers: readers
                .into_iter()
                .map(|(program, args)| (program.into(), args.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }
}

impl Default for CommandClipboard {
    fn default() -> Self {
        Self::with_readers([
            ("wl-paste", vec!["--no-newline", "--type", "text/plain"]),
            ("xclip", vec!["-selection", "clipboard", "-o"]),
        ])
    }
}

impl Clipboard for CommandClipboard {
    fn read_text(&self) -> Result<Option<String>, DeviceError> {
        let mut last_error = None;
        let mut any_ran = false;

        for (program, args) in &self.readers {
            match std::process::Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
            {
                Ok(output) if output.status.success() => {
                    // Non-UTF-8 content is not text
                    return Ok(String::from_utf8(output.stdout)
                        .ok()
                        .filter(|s| !s.trim().is_empty()));
                }
                Ok(output) => {
                    // Empty clipboard or no display server for this reader
                    debug!(%program, status = ?output.status, "clipboard reader failed, trying next");
                    any_ran = true;
                }
                Err(e) => {
                    last_error = Some(DeviceError::Command {
                        program: program.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if any_ran {
            return Ok(None);
        }
        Err(last_error.unwrap_or(DeviceError::Unsupported))
    }
}

/// Torch backed by a sysfs LED
#[derive(Debug)]
pub struct SysfsTorch {
    led_dir: PathBuf,
}

impl SysfsTorch {
    pub fn new(led: &str) -> Self {
        Self::with_dir(Path::new("/sys/class/leds").join(led))
    }

    pub fn with_dir(led_dir: PathBuf) -> Self {
        Self { led_dir }
    }

    fn max_brightness(&self) -> Result<String, DeviceError> {
        let raw = std::fs::read_to_string(self.led_dir.join("max_brightness"))?;
        Ok(raw.trim().to_string())
    }
}

impl Torch for SysfsTorch {
    fn set(&self, on: bool) -> Result<(), DeviceError> {
        let value = if on {
            self.max_brightness()?
        } else {
            "0".to_string()
        };
        std::fs::write(self.led_dir.join("brightness"), value)?;
        Ok(())
    }
}
