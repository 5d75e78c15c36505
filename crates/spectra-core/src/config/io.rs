//! YAML load/save for any serde configuration type

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read a YAML config, falling back to `T::default()`
///
/// A missing file is normal on first run and logged at info; an unreadable
/// or malformed file is logged as a warning. Neither is fatal.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::info!("No config at {:?}, using defaults", path);
            return T::default();
        }
        Err(e) => {
            log::warn!("Could not read config {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Invalid config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write `config` as YAML, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::types::{CanvasScale, WindowFunction};

    #[test]
    fn test_missing_file_gives_defaults() {
        let config: PipelineConfig = load_config(Path::new("/nonexistent/spectra/config.yaml"));
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "segment_size: [not, a, number]").unwrap();

        let config: PipelineConfig = load_config(&path);
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_save_then_load_into_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spectra.yaml");

        let mut config = PipelineConfig::default();
        config.ring_segments = 8;
        config.default_scale = CanvasScale::Original;
        config.default_options.window_function = WindowFunction::Welch;

        save_config(&config, &path).unwrap();
        let loaded: PipelineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
