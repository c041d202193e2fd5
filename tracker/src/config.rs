use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Environment variable holding the WebDAV password. Never stored in the config file.
pub const PASSWORD_ENV: &str = "TRACKER_WEBDAV_PASSWORD";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    /// WebDAV URL or local directory for backups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Remote backup root directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<usize>,
}

impl TrackerConfig {
    pub fn path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("tracker").join("config.json")
    }

    /// Default location of the local state file.
    pub fn default_state_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("tracker").join("state.json")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let config = serde_json::from_str(&data).context("parse tracker config")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self).context("serialize tracker config")?;
        fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    /// Password for the WebDAV target, from the environment.
    pub fn password() -> Option<String> {
        std::env::var(PASSWORD_ENV).ok().filter(|p| !p.is_empty())
    }
}

/// True if `target` should be treated as a WebDAV URL rather than a directory.
pub fn is_url(target: &str) -> bool {
    let lower = target.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let temp = tempfile::tempdir().unwrap();
        let config = TrackerConfig::load_from(&temp.path().join("config.json")).unwrap();
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn save_and_load() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("tracker").join("config.json");
        let config = TrackerConfig {
            target: Some("https://dav.example.com/files/me".to_string()),
            username: Some("me".to_string()),
            root: None,
            retention: Some(6),
        };
        config.save_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("root"));
        assert_eq!(TrackerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn url_detection() {
        assert!(is_url("https://dav.example.com"));
        assert!(is_url(" HTTP://nas.local/dav"));
        assert!(!is_url("/mnt/nas/backups"));
    }
}
