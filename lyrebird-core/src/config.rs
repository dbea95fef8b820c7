use crate::error::{CoreError, Result};
use crate::queue::RepeatMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LyrebirdConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub lyrics: LyricsConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// How often the position clock samples the decoder while playing
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Start playing as soon as a loaded track is ready
    #[serde(default = "default_true")]
    pub autoplay: bool,
    /// Past this position, "previous" restarts the current track instead
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold_ms: u64,
    #[serde(default = "default_volume")]
    pub initial_volume: f32,
    #[serde(default)]
    pub default_repeat: RepeatMode,
}

const fn default_tick_interval() -> u64 {
    1000
}

const fn default_true() -> bool {
    true
}

const fn default_restart_threshold() -> u64 {
    3000
}

const fn default_volume() -> f32 {
    1.0
}

impl PlaybackConfig {
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn restart_threshold(&self) -> Duration {
        Duration::from_millis(self.restart_threshold_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            autoplay: true,
            restart_threshold_ms: default_restart_threshold(),
            initial_volume: default_volume(),
            default_repeat: RepeatMode::Off,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsConfig {
    /// Delay after a manual scroll before the view follows playback again
    #[serde(default = "default_grace")]
    pub manual_scroll_grace_ms: u64,
    /// Look for `<media>.lrc` next to the media file when the catalog has none
    #[serde(default = "default_true")]
    pub sidecar: bool,
    #[serde(default = "default_visible_before")]
    pub visible_before: usize,
    #[serde(default = "default_visible_after")]
    pub visible_after: usize,
}

const fn default_grace() -> u64 {
    5000
}

const fn default_visible_before() -> usize {
    1
}

const fn default_visible_after() -> usize {
    2
}

impl LyricsConfig {
    #[must_use]
    pub const fn manual_scroll_grace(&self) -> Duration {
        Duration::from_millis(self.manual_scroll_grace_ms)
    }
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            manual_scroll_grace_ms: default_grace(),
            sidecar: true,
            visible_before: default_visible_before(),
            visible_after: default_visible_after(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Catalog database location; defaults to the data directory
    pub database: Option<PathBuf>,
}

impl LibraryConfig {
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(crate::paths::catalog_db_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `lyrebird.log` in the data directory
    #[serde(default)]
    pub file: bool,
}

impl LyrebirdConfig {
    /// Parse and validate configuration text
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is out of range.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load config from the default path, writing a template on first run.
    ///
    /// A freshly written template yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written, read or parsed.
    pub fn load_or_create() -> Result<Self> {
        let config_path = crate::paths::config_path();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_path, CONFIG_TEMPLATE)?;
            info!("Wrote config template to {:?}", config_path);
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Check ranges that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigInvalid`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.playback.tick_interval_ms == 0 {
            return Err(CoreError::ConfigInvalid {
                message: "playback.tick_interval_ms must be greater than 0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.playback.initial_volume) {
            return Err(CoreError::ConfigInvalid {
                message: format!(
                    "playback.initial_volume must be between 0.0 and 1.0, got {}",
                    self.playback.initial_volume
                ),
            });
        }
        Ok(())
    }
}

const CONFIG_TEMPLATE: &str = r#"# Lyrebird Configuration
# ~/.config/lyrebird/config.toml

[playback]
# How often the playback position is sampled while playing
tick_interval_ms = 1000
# Start playing as soon as a track is loaded
autoplay = true
# "Previous" restarts the current track once this much has played
restart_threshold_ms = 3000
initial_volume = 1.0
# "off", "one" or "all"
default_repeat = "off"

[lyrics]
# After scrolling lyrics by hand, follow playback again after this delay
manual_scroll_grace_ms = 5000
# Load "<track>.lrc" from next to the media file when no lyrics are stored
sidecar = true
# Lines shown around the current lyric line
visible_before = 1
visible_after = 2

[library]
# Catalog database location (defaults to the platform data directory)
# database = "/path/to/catalog.db"

[logging]
# Also write logs to lyrebird.log in the data directory
file = false
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_parses_to_defaults() {
        let config = LyrebirdConfig::from_toml_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config, LyrebirdConfig::default());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LyrebirdConfig::from_toml_str("").unwrap();
        assert_eq!(config.playback.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.playback.restart_threshold(), Duration::from_secs(3));
        assert!(config.playback.autoplay);
        assert_eq!(config.lyrics.manual_scroll_grace(), Duration::from_secs(5));
        assert!(config.lyrics.sidecar);
        assert!(!config.logging.file);
        assert!(config.library.database.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = LyrebirdConfig::from_toml_str(
            r#"
            [playback]
            tick_interval_ms = 250
            default_repeat = "all"
            "#,
        )
        .unwrap();
        assert_eq!(config.playback.tick_interval_ms, 250);
        assert_eq!(config.playback.default_repeat, RepeatMode::All);
        assert_eq!(config.playback.restart_threshold_ms, 3000);
        assert_eq!(config.lyrics, LyricsConfig::default());
    }

    #[test]
    fn test_library_database_override() {
        let config = LyrebirdConfig::from_toml_str(
            r#"
            [library]
            database = "/tmp/lyrebird-test.db"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.library.database_path(),
            PathBuf::from("/tmp/lyrebird-test.db")
        );
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = LyrebirdConfig::from_toml_str("[playback\nautoplay = ").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParseError(_)));
    }

    #[test]
    fn test_unknown_repeat_mode_is_parse_error() {
        let err = LyrebirdConfig::from_toml_str("[playback]\ndefault_repeat = \"twice\"").unwrap_err();
        assert!(matches!(err, CoreError::ConfigParseError(_)));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let err = LyrebirdConfig::from_toml_str("[playback]\ntick_interval_ms = 0").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_volume_out_of_range_rejected() {
        let err = LyrebirdConfig::from_toml_str("[playback]\ninitial_volume = 1.5").unwrap_err();
        assert!(matches!(err, CoreError::ConfigInvalid { .. }));
    }
}
