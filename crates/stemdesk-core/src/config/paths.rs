//! Standard locations for stemdesk files

use std::path::PathBuf;

/// Directory holding stemdesk's configuration
///
/// Returns: `<config dir>/stemdesk`, or `./stemdesk` when the platform has
/// no config directory.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stemdesk")
}

/// Returns: `<config dir>/stemdesk/config.yaml`
pub fn default_config_path() -> PathBuf {
    config_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("stemdesk/config.yaml"));
        assert!(path.starts_with(config_dir()));
    }
}
