// Evscan Settings Module
// User-configurable defaults for enumeration and streaming

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enumerate::DEFAULT_GLOB;

/// Readiness wait used when the settings file does not give one.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Settings for evscan
///
/// Loaded from a TOML file (default: ~/.config/evscan/settings.toml).
/// Command-line flags take precedence over anything set here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Pattern used to enumerate device nodes
    pub glob: String,

    /// Grab the device while streaming
    pub grab: bool,

    /// Read one event at a time instead of whole batches
    pub single: bool,

    /// How long to wait for readiness before re-checking for shutdown
    pub poll_timeout_ms: u64,

    /// Path to the settings file (for reload)
    source_path: Option<PathBuf>,
}

/// Result type for settings operations
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    #[serde(default)]
    devices: Option<DeviceSettings>,

    #[serde(default)]
    stream: Option<StreamSettings>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DeviceSettings {
    #[serde(default)]
    glob: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamSettings {
    #[serde(default)]
    grab: Option<bool>,

    #[serde(default)]
    single: Option<bool>,

    #[serde(default)]
    poll_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self {
            glob: DEFAULT_GLOB.to_string(),
            grab: false,
            single: false,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            source_path: None,
        }
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.as_ref().to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> SettingsResult<Self> {
        let toml_settings: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::new();

        if let Some(devices) = toml_settings.devices {
            if let Some(glob) = devices.glob {
                if glob.trim().is_empty() {
                    return Err(SettingsError::InvalidValue(
                        "devices.glob must not be empty".to_string(),
                    ));
                }
                settings.glob = glob;
            }
        }

        if let Some(stream) = toml_settings.stream {
            if let Some(grab) = stream.grab {
                settings.grab = grab;
            }
            if let Some(single) = stream.single {
                settings.single = single;
            }
            if let Some(timeout) = stream.poll_timeout_ms {
                if timeout == 0 {
                    return Err(SettingsError::InvalidValue(
                        "stream.poll_timeout_ms must be greater than zero".to_string(),
                    ));
                }
                settings.poll_timeout_ms = timeout;
            }
        }

        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("evscan").join("settings.toml"))
    }

    /// Load from default location (~/.config/evscan/settings.toml)
    pub fn load_default() -> SettingsResult<Self> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::new())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    /// Re-read the file these settings were loaded from
    pub fn reload(&mut self) -> SettingsResult<()> {
        if let Some(ref path) = self.source_path {
            *self = Self::from_file(path)?;
            Ok(())
        } else {
            Err(SettingsError::InvalidValue("No source path set".to_string()))
        }
    }
}

/// Create default settings content for a new installation
pub fn default_settings_content() -> &'static str {
    r#"# Evscan Settings
# Place this file at: ~/.config/evscan/settings.toml

[devices]
# Device nodes considered by --list
glob = "/dev/input/event*"

[stream]
# Take exclusive delivery while streaming
grab = false

# Read one event per call instead of batches of 16
single = false

# Milliseconds to wait for input before checking for shutdown
poll_timeout_ms = 100
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let settings = Settings::new();
        assert_eq!(settings.glob, "/dev/input/event*");
        assert!(!settings.grab);
        assert!(!settings.single);
        assert_eq!(settings.poll_timeout(), Duration::from_millis(100));
        assert!(settings.source_path().is_none());
    }

    #[test]
    fn test_settings_from_toml() {
        let toml = r#"
[devices]
glob = "/dev/input/by-id/*-event-kbd"

[stream]
grab = true
poll_timeout_ms = 250
"#;

        let settings = Settings::from_toml(toml).unwrap();
        assert_eq!(settings.glob, "/dev/input/by-id/*-event-kbd");
        assert!(settings.grab);
        assert!(!settings.single);
        assert_eq!(settings.poll_timeout_ms, 250);
    }

    #[test]
    fn test_default_content_parses_to_defaults() {
        let settings = Settings::from_toml(default_settings_content()).unwrap();
        assert_eq!(settings, Settings::new());
    }

    #[test]
    fn test_settings_invalid_values() {
        let err = Settings::from_toml("[stream]\npoll_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));

        let err = Settings::from_toml("[devices]\nglob = \"  \"\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));

        let err = Settings::from_toml("[stream]\ngrab = \"maybe\"\n").unwrap_err();
        assert!(matches!(err, SettingsError::TomlParse(_)));

        let err = Settings::from_toml("[stream]\nbatch = 4\n").unwrap_err();
        assert!(matches!(err, SettingsError::TomlParse(_)));
    }

    #[test]
    fn test_reload_without_source() {
        let mut settings = Settings::new();
        assert!(matches!(
            settings.reload(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_from_file_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "evscan-settings-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[stream]\nsingle = true\n").unwrap();

        let mut settings = Settings::from_file(&path).unwrap();
        assert!(settings.single);
        assert_eq!(settings.source_path(), Some(path.as_path()));

        std::fs::write(&path, "[stream]\nsingle = false\ngrab = true\n").unwrap();
        settings.reload().unwrap();
        assert!(!settings.single);
        assert!(settings.grab);

        std::fs::remove_file(&path).unwrap();
    }
}
