//! Hosted media API settings, read from the environment or a TOML file.

use std::fs;
use std::path::Path;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

pub const ENV_CLOUD_NAME: &str = "CLOUDINARY_CLOUD_NAME";
pub const ENV_UPLOAD_PRESET: &str = "CLOUDINARY_UPLOAD_PRESET";
pub const ENV_FOLDER: &str = "CLOUDINARY_FOLDER";
pub const ENV_API_BASE: &str = "CLOUDINARY_API_BASE";

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is not defined in environment variables")]
    MissingVar(&'static str),

    #[error("Invalid upload URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Can't parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub cloud_name: String,
    pub upload_preset: String,
    /// Destination folder, empty for the root
    #[serde(default)]
    pub folder: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl CloudConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            cloud_name: get(ENV_CLOUD_NAME).ok_or(ConfigError::MissingVar(ENV_CLOUD_NAME))?,
            upload_preset: get(ENV_UPLOAD_PRESET).ok_or(ConfigError::MissingVar(ENV_UPLOAD_PRESET))?,
            folder: get(ENV_FOLDER).unwrap_or_default(),
            api_base: get(ENV_API_BASE).unwrap_or_else(default_api_base),
        };

        config.upload_url()?;
        Ok(config)
    }

    /// Dev only: read a `config.toml` style file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&config_str)?;

        if config.cloud_name.trim().is_empty() {
            return Err(ConfigError::MissingVar(ENV_CLOUD_NAME));
        }
        if config.upload_preset.trim().is_empty() {
            return Err(ConfigError::MissingVar(ENV_UPLOAD_PRESET));
        }

        config.upload_url()?;
        Ok(config)
    }

    pub fn upload_url(&self) -> Result<Url, ConfigError> {
        let base = self.api_base.trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}/image/upload", base, self.cloud_name))?)
    }
}

/// Every problem with the environment at once, rather than the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigReport {
    pub errors: Vec<String>,
}

impl ConfigReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate_config<F>(lookup: F) -> ConfigReport
where
    F: Fn(&str) -> Option<String>,
{
    let errors = [ENV_CLOUD_NAME, ENV_UPLOAD_PRESET]
        .into_iter()
        .filter(|key| lookup(key).filter(|v| !v.trim().is_empty()).is_none())
        .map(|key| format!("Missing {}", key))
        .collect();

    ConfigReport { errors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup() {
        let config = CloudConfig::from_lookup(lookup(&[
            (ENV_CLOUD_NAME, "demo"),
            (ENV_UPLOAD_PRESET, "unsigned"),
        ])).unwrap();

        assert_eq!(config.folder, "");
        assert_eq!(config.upload_url().unwrap().as_str(), "https://api.cloudinary.com/v1_1/demo/image/upload");
    }

    #[test]
    fn test_missing_required_is_fatal() {
        let err = CloudConfig::from_lookup(lookup(&[(ENV_UPLOAD_PRESET, "unsigned")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ENV_CLOUD_NAME)));

        let err = CloudConfig::from_lookup(lookup(&[(ENV_CLOUD_NAME, "demo"), (ENV_UPLOAD_PRESET, " ")])).unwrap_err();
        assert_eq!(err.to_string(), "CLOUDINARY_UPLOAD_PRESET is not defined in environment variables");
    }

    #[test]
    fn test_custom_api_base() {
        let config = CloudConfig::from_lookup(lookup(&[
            (ENV_CLOUD_NAME, "demo"),
            (ENV_UPLOAD_PRESET, "unsigned"),
            (ENV_FOLDER, "avatars"),
            (ENV_API_BASE, "http://127.0.0.1:9000/"),
        ])).unwrap();

        assert_eq!(config.folder, "avatars");
        assert_eq!(config.upload_url().unwrap().as_str(), "http://127.0.0.1:9000/demo/image/upload");
    }

    #[test]
    fn test_validate_config_reports_all() {
        let report = validate_config(lookup(&[]));

        assert!(!report.is_valid());
        assert_eq!(report.errors, vec![
            "Missing CLOUDINARY_CLOUD_NAME".to_string(),
            "Missing CLOUDINARY_UPLOAD_PRESET".to_string(),
        ]);
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("imgdrop-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "cloud_name = \"demo\"\nupload_preset = \"unsigned\"\n").unwrap();

        let config = CloudConfig::load_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(config.cloud_name, "demo");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
    }
}
