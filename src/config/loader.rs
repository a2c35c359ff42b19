use std::path::{Path, PathBuf};

use crate::config::types::JudgeletConfig;
use crate::error::{JudgeletError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "judgelet", "judgelet") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".judgelet").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<JudgeletConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // An explicitly named file must exist
        if config_path.is_some() {
            return Err(JudgeletError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        return Ok(JudgeletConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: JudgeletConfig =
        toml::from_str(&content).map_err(|e| JudgeletError::TomlParse(e.to_string()))?;
    validate(&config)?;

    Ok(config)
}

fn validate(config: &JudgeletConfig) -> Result<()> {
    let exec = &config.execution;
    if exec.run_timeout_ms == 0 || exec.test_timeout_ms == 0 {
        return Err(JudgeletError::Config(
            "execution timeouts must be greater than zero".to_string(),
        ));
    }
    if config.sandbox.host_origin.is_empty() || config.sandbox.host_origin == "null" {
        return Err(JudgeletError::Config(
            "sandbox.host_origin must be a non-opaque origin".to_string(),
        ));
    }
    Ok(())
}
