use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILENAME: &str = ".vhd2vm.toml";

/// Per-directory defaults. Command-line flags and environment variables win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub uploader_threads: Option<usize>,
    #[serde(default)]
    pub arm_endpoint: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_config_from_path(CONFIG_FILENAME)
    }

    /// The config in the working directory, or defaults when there is none.
    pub fn load_or_default() -> Result<Self> {
        if Path::new(CONFIG_FILENAME).exists() {
            Self::load()
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(CONFIG_FILENAME)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write {}", path.as_ref().display()))?;
        Ok(())
    }
}

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
subscription_id = "00000000-0000-0000-0000-000000000001"
location = "westus"
uploader_threads = 8
arm_endpoint = "https://management.usgovcloudapi.net"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.location.as_deref(), Some("westus"));
        assert_eq!(config.uploader_threads, Some(8));
        assert_eq!(
            config.arm_endpoint.as_deref(),
            Some("https://management.usgovcloudapi.net")
        );
    }

    #[test]
    fn test_load_config_not_found() {
        let result = load_config_from_path("/nonexistent/.vhd2vm.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        let config = Config {
            subscription_id: Some("sub1".into()),
            location: Some("westeurope".into()),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(load_config_from_path(&path).unwrap(), config);
    }
}
