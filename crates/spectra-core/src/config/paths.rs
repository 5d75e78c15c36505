//! Standard locations for spectra configuration files

use std::path::PathBuf;

/// Directory holding spectra's config files
///
/// `$XDG_CONFIG_HOME/spectra` on Linux, the platform equivalent elsewhere,
/// or `./spectra` when no config directory can be determined.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spectra")
}

/// Path of a named config file inside [`config_dir`]
pub fn default_config_path(filename: &str) -> PathBuf {
    config_dir().join(filename)
}
