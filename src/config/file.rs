//! Configuration file discovery

use std::path::PathBuf;

/// Configuration file locations (in order of precedence)
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./test-orchestrator.yaml",
    "./test-orchestrator.yml",
    "./.test-orchestrator.yaml",
    "~/.config/test-orchestrator/config.yaml",
    "~/.test-orchestrator.yaml",
];

/// First existing configuration file in the standard locations
pub fn find_config() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Expand ~ to home directory
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("./test.yaml"), PathBuf::from("./test.yaml"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/x.yaml"), home.join("x.yaml"));
        }
    }

    #[test]
    fn test_locations_are_yaml() {
        assert!(CONFIG_LOCATIONS
            .iter()
            .all(|l| l.ends_with(".yaml") || l.ends_with(".yml")));
    }
}
