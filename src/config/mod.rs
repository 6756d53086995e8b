// Required external crates for configuration management and serialization
use serde::Deserialize;
use std::path::{Path, PathBuf};
use config::{Config, ConfigError, Environment, File};

use crate::inference::registry::ArtifactNaming;
use crate::inference::preprocess::Preprocessor;

/// Where the model artifacts live and what they are called
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// Directory holding the router and domain artifacts
    pub directory: PathBuf,
    /// File name of the router artifact
    pub router_file: String,
    /// Suffix appended to a domain name to form its artifact file name
    pub domain_file_suffix: String,
}

impl ModelConfig {
    pub fn naming(&self) -> ArtifactNaming {
        ArtifactNaming {
            router_file: self.router_file.clone(),
            domain_suffix: self.domain_file_suffix.clone(),
        }
    }
}

/// Input transform applied before both cascade stages
#[derive(Debug, Deserialize, Clone)]
pub struct PreprocessingConfig {
    /// Square resolution images are stretched to
    pub image_size: u32,
    /// Normalization mean, applied after scaling to [0, 1]
    pub mean: f32,
    /// Normalization standard deviation
    pub std: f32,
    /// Largest encoded image accepted
    pub max_image_bytes: usize,
}

impl PreprocessingConfig {
    pub fn preprocessor(&self) -> Preprocessor {
        Preprocessor::new(self.image_size, self.mean, self.std, self.max_image_bytes)
    }
}

/// Configuration for the HTTP server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port number to listen on
    pub port: u16,
    /// Request body limit for uploads
    pub max_upload_bytes: usize,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level or filter directive (e.g. "info", "medcascade=debug")
    pub level: String,
    /// Directory for daily rolling log files; stdout when unset
    pub file: Option<PathBuf>,
    /// Emit JSON lines instead of human-readable text
    #[serde(default)]
    pub json: bool,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub models: ModelConfig,
    pub preprocessing: PreprocessingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from `./config`.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");
        Self::from_dir(&config_dir)
    }

    /// Loads settings from `config_dir`, in the following order of
    /// precedence (highest to lowest):
    /// 1. Environment variables prefixed with MEDCASCADE__ (e.g. MEDCASCADE__SERVER__PORT)
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        if !config_dir.exists() {
            return Err(ConfigError::Message(
                format!("Config directory not found at: {}", config_dir.display())
            ));
        }

        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(
                format!("Default configuration file not found at: {}", default_config.display())
            ));
        }
        let local_config = config_dir.join("local.toml");

        let settings = Config::builder()
            .add_source(File::from(default_config))
            .add_source(File::from(local_config).required(false))
            .add_source(Environment::with_prefix("MEDCASCADE").separator("__"))
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if self.models.router_file.trim().is_empty() {
            return Err(ConfigError::Message("models.router_file must not be empty".to_string()));
        }
        if self.models.domain_file_suffix.trim().is_empty() {
            return Err(ConfigError::Message("models.domain_file_suffix must not be empty".to_string()));
        }

        if self.preprocessing.image_size == 0 {
            return Err(ConfigError::Message(
                "preprocessing.image_size must be greater than 0".to_string()
            ));
        }
        if !(self.preprocessing.std.is_finite() && self.preprocessing.std > 0.0) {
            return Err(ConfigError::Message(
                format!("preprocessing.std must be a positive number, got: {}", self.preprocessing.std)
            ));
        }
        if !self.preprocessing.mean.is_finite() {
            return Err(ConfigError::Message(
                format!("preprocessing.mean must be finite, got: {}", self.preprocessing.mean)
            ));
        }
        if self.preprocessing.max_image_bytes == 0 {
            return Err(ConfigError::Message(
                "preprocessing.max_image_bytes must be greater than 0".to_string()
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::Message(
                format!("Port must be between 1 and 65535, got: {}", self.server.port)
            ));
        }
        // Multipart framing needs room on top of the image itself
        if self.server.max_upload_bytes < self.preprocessing.max_image_bytes {
            return Err(ConfigError::Message(format!(
                "server.max_upload_bytes ({}) must be at least preprocessing.max_image_bytes ({})",
                self.server.max_upload_bytes, self.preprocessing.max_image_bytes
            )));
        }

        // Plain levels are checked here; filter directives are left to the subscriber
        if !self.logging.level.contains('=') {
            match self.logging.level.to_lowercase().as_str() {
                "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
                _ => Err(ConfigError::Message(
                    format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                        self.logging.level)
                )),
            }?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const DEFAULTS: &str = r#"
[models]
directory = "models"
router_file = "General_Model.gguf"
domain_file_suffix = "_Model.gguf"

[preprocessing]
image_size = 224
mean = 0.5
std = 0.5
max_image_bytes = 20971520

[server]
host = "127.0.0.1"
port = 3000
max_upload_bytes = 26214400

[logging]
level = "info"
"#;

    fn config_dir(local: Option<&str>) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), DEFAULTS).unwrap();
        if let Some(local) = local {
            fs::write(dir.path().join("local.toml"), local).unwrap();
        }
        dir
    }

    #[test]
    fn defaults_load() {
        let dir = config_dir(None);
        let settings = Settings::from_dir(dir.path()).unwrap();
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.preprocessing.image_size, 224);
        assert!(!settings.logging.json);
        assert!(settings.logging.file.is_none());
        assert_eq!(settings.models.naming(), ArtifactNaming::default());
        assert_eq!(settings.preprocessing.preprocessor(), Preprocessor::default());
    }

    #[test]
    fn local_file_overrides_defaults() {
        let dir = config_dir(Some("[server]\nport = 8088\n\n[logging]\nlevel = \"debug\"\njson = true\n"));
        let settings = Settings::from_dir(dir.path()).unwrap();
        assert_eq!(settings.server.port, 8088);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for local in [
            "[preprocessing]\nstd = 0.0\n",
            "[preprocessing]\nimage_size = 0\n",
            "[server]\nport = 0\n",
            "[server]\nmax_upload_bytes = 10\n",
            "[logging]\nlevel = \"loud\"\n",
        ] {
            let dir = config_dir(Some(local));
            assert!(Settings::from_dir(dir.path()).is_err(), "accepted {:?}", local);
        }
    }

    #[test]
    fn missing_directory_or_defaults_is_an_error() {
        assert!(Settings::from_dir(Path::new("/nonexistent/medcascade/config")).is_err());
        let empty = tempfile::tempdir().unwrap();
        assert!(Settings::from_dir(empty.path()).is_err());
    }
}
