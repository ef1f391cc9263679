use crate::utils::normalize_url;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Connection settings for a Wavery deployment. The bearer token is issued by
/// the auth flow, which lives outside this crate; we only carry it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: normalize_url(&base_url.into()),
            token: token.into(),
        }
    }

    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("wavery.toml"))
    }

    /// Loads the saved config, letting `WAVERY_BASE_URL` / `WAVERY_TOKEN`
    /// override individual fields (headless deployments set only the env).
    pub fn load() -> Self {
        let mut config = Self::toml_path()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|text| toml::from_str::<ClientConfig>(&text).ok())
            .unwrap_or_default();

        if let Ok(url) = std::env::var("WAVERY_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(token) = std::env::var("WAVERY_TOKEN") {
            config.token = token;
        }
        config.base_url = normalize_url(&config.base_url);
        config
    }

    pub fn save(&self) -> std::io::Result<()> {
        if let Some(path) = Self::toml_path() {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let toml = toml::to_string_pretty(self)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            fs::write(path, toml)
        } else {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "No config dir"))
        }
    }
}
