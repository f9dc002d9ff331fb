use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::signing::Credentials;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Object storage settings
    pub storage: StorageConfig,

    /// Request-signing credentials and region
    pub signing: SigningConfig,

    /// Burn-in backend settings
    pub burn: BurnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base URL of the storage server
    pub endpoint: String,

    /// Bucket holding uploaded videos
    pub bucket: String,

    /// Owner id used as the key prefix for uploads
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    pub access_key: String,
    pub secret_key: String,

    /// Signing region
    pub region: String,

    /// Override for the invocation host; derived from the region if unset
    pub lambda_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnConfig {
    /// Name of the remote burn-in function
    pub function_name: String,

    /// Default style prompt when the CLI does not pass one
    pub default_style: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                endpoint: "http://localhost:9000".to_string(),
                bucket: "videos".to_string(),
                owner_id: "default".to_string(),
            },
            signing: SigningConfig {
                access_key: String::new(),
                secret_key: String::new(),
                region: "us-east-1".to_string(),
                lambda_host: None,
            },
            burn: BurnConfig {
                function_name: "burn-captions".to_string(),
                default_style: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from file or create default
    pub async fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        serde_yaml::from_str(&content).context("Failed to parse config file")
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs_err::write(path, content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?;

        Ok(config_dir.join("capburn").join("config.yaml"))
    }

    /// Validate configuration.
    ///
    /// Missing credentials are a configuration fault and fail here, before
    /// any network call is attempted.
    pub fn validate(&self) -> Result<()> {
        if self.storage.endpoint.is_empty() {
            anyhow::bail!("Storage endpoint must be configured");
        }
        if self.storage.bucket.is_empty() {
            anyhow::bail!("Storage bucket must be configured");
        }

        self.credentials().validate()?;

        Ok(())
    }

    /// Signing credentials from the config
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.signing.access_key.clone(),
            self.signing.secret_key.clone(),
        )
    }

    /// Host the signed invocations are sent to
    pub fn lambda_host(&self) -> String {
        self.signing
            .lambda_host
            .clone()
            .unwrap_or_else(|| format!("lambda.{}.amazonaws.com", self.signing.region))
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Storage Endpoint: {}", self.storage.endpoint);
        println!("  Bucket: {}", self.storage.bucket);
        println!("  Owner: {}", self.storage.owner_id);
        println!("  Region: {}", self.signing.region);
        println!("  Invocation Host: {}", self.lambda_host());
        println!("  Burn Function: {}", self.burn.function_name);
        if let Some(style) = &self.burn.default_style {
            println!("  Default Style: {}", style);
        }
        let credentials = if self.signing.access_key.is_empty() {
            "not set"
        } else {
            "set"
        };
        println!("  Credentials: {}", credentials);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let mut config = Config::default();
        config.signing.access_key = "AKIDEXAMPLE".to_string();
        config.signing.secret_key = "secret".to_string();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.storage.bucket, config.storage.bucket);
        assert_eq!(parsed.signing.access_key, "AKIDEXAMPLE");
        assert_eq!(parsed.burn.function_name, "burn-captions");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = Config::default();
        config.storage.owner_id = "user-42".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.storage.owner_id, "user-42");
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.signing.access_key = "AKIDEXAMPLE".to_string();
        config.signing.secret_key = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lambda_host_derived_from_region() {
        let mut config = Config::default();
        assert_eq!(config.lambda_host(), "lambda.us-east-1.amazonaws.com");

        config.signing.lambda_host = Some("lambda.local:8080".to_string());
        assert_eq!(config.lambda_host(), "lambda.local:8080");
    }
}
