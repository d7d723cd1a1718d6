//! YAML loading and saving for any serde configuration type

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read configuration from a YAML file
///
/// `Ok(None)` when the file doesn't exist; read and parse failures are errors.
pub fn read_config<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let config = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(Some(config))
}

/// Load configuration, falling back to `T::default()`
///
/// Used at startup, where a broken config file should not keep the desk
/// from running. Failures are logged.
///
/// ```ignore
/// let config: DeskConfig = load_config(&default_config_path());
/// ```
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match read_config(path) {
        Ok(Some(config)) => {
            log::info!("Loaded config from {:?}", path);
            config
        }
        Ok(None) => {
            log::info!("No config at {:?}, using defaults", path);
            T::default()
        }
        Err(e) => {
            log::warn!("{:#}, using defaults", e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("Saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeskConfig, StemEntry};

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: DeskConfig = load_config(Path::new("/nonexistent/stemdesk/config.yaml"));
        assert_eq!(config, DeskConfig::default());
    }

    #[test]
    fn test_invalid_yaml_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "stems: [this is: not: valid").unwrap();

        assert!(read_config::<DeskConfig>(&path).is_err());
        let config: DeskConfig = load_config(&path);
        assert_eq!(config, DeskConfig::default());
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_config::<DeskConfig>(&dir.path().join("config.yaml")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_roundtrip_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = DeskConfig::default();
        config.stems = vec![StemEntry::new("keys", "Keys.wav")];
        config.retrigger_divisions = 8;

        save_config(&config, &path).unwrap();
        let loaded: DeskConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
