//! Path constants for configuration, catalog and session files.

use std::path::PathBuf;

/// The name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "lyrebird";

/// The name of the main configuration file
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// The name of the catalog database file
pub const CATALOG_DB_FILE_NAME: &str = "catalog.db";

/// The name of the saved playback session file
pub const SESSION_FILE_NAME: &str = "session.json";

/// The name of the log file written when file logging is enabled
pub const LOG_FILE_NAME: &str = "lyrebird.log";

/// Get the configuration directory path (~/.config/lyrebird/)
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(CONFIG_DIR_NAME)
}

/// Get the config file path (~/.config/lyrebird/config.toml)
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Get the data directory (`~/.local/share/lyrebird` on Linux)
#[must_use]
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(config_dir)
        .join(CONFIG_DIR_NAME)
}

/// Get the default catalog database path
#[must_use]
pub fn catalog_db_path() -> PathBuf {
    data_dir().join(CATALOG_DB_FILE_NAME)
}

/// Get the saved session path
#[must_use]
pub fn session_path() -> PathBuf {
    data_dir().join(SESSION_FILE_NAME)
}

/// Get the log file path
#[must_use]
pub fn log_file_path() -> PathBuf {
    data_dir().join(LOG_FILE_NAME)
}
