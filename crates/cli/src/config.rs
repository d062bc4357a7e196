//! Configuration management for the CLI

use advisor_lib::AdvisorConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path overrides given on the command line
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub model_path: Option<PathBuf>,
    pub metrics_path: Option<PathBuf>,
    pub history_path: Option<PathBuf>,
}

/// Resolve the advisor configuration.
///
/// An explicit `--config` file must exist; otherwise the per-user file is
/// used when present. Environment variables and flags are layered on top.
pub fn load(explicit: Option<&Path>, overrides: &PathOverrides) -> Result<AdvisorConfig> {
    let file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => user_config_path().filter(|p| p.exists()),
    };

    let mut config = AdvisorConfig::load(file.as_deref()).with_context(|| match &file {
        Some(path) => format!("Failed to load config file {}", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })?;

    if let Some(path) = &overrides.model_path {
        config.model_path = path.clone();
    }
    if let Some(path) = &overrides.metrics_path {
        config.metrics_path = path.clone();
    }
    if let Some(path) = &overrides.history_path {
        config.history_path = path.clone();
    }
    debug!(
        file = ?file,
        model = %config.model_path.display(),
        history = %config.history_path.display(),
        "Configuration resolved"
    );
    Ok(config)
}

/// Per-user config file location
fn user_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".config").join("crop-advisor").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("advisor.toml");
        std::fs::write(
            &path,
            "model_path = \"from-file.json\"\nhistory_path = \"history-from-file.csv\"\n",
        )
        .unwrap();

        let overrides = PathOverrides {
            model_path: Some(PathBuf::from("from-flag.json")),
            ..Default::default()
        };
        let config = load(Some(&path), &overrides).unwrap();
        assert_eq!(config.model_path, PathBuf::from("from-flag.json"));
        assert_eq!(config.history_path, PathBuf::from("history-from-file.csv"));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = load(Some(&dir.path().join("nope.toml")), &PathOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("nope.toml"));
    }
}
