//! Server configuration

use plantdoc_vision::VisionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chat::ChatConfig;

/// Complete service configuration, read from `plantdoc.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP listener and request handling
    #[serde(default)]
    pub server: ServerConfig,

    /// Model, quality gate, decision and saliency sections
    #[serde(flatten)]
    pub vision: VisionConfig,

    /// Chat collaborator
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Command-line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub listen: Option<String>,
    pub port: Option<u16>,
    pub weights: Option<PathBuf>,
    pub labels: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from file and CLI overrides
    pub fn load(config_path: impl AsRef<Path>, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let config_path = config_path.as_ref();

        // Try to load from file, or use defaults
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            Self::from_yaml_str(&content)?
        } else {
            tracing::info!(
                "No configuration file at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.apply(overrides);
        Ok(config)
    }

    /// Parse YAML
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply CLI overrides
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(listen) = &overrides.listen {
            self.server.listen = listen.clone();
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(weights) = &overrides.weights {
            self.vision.model.weights_path = weights.clone();
        }
        if let Some(labels) = &overrides.labels {
            self.vision.model.labels_path = labels.clone();
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Concurrent forward/backward passes
    #[serde(default = "default_inference_workers")]
    pub inference_workers: usize,

    /// Request body limit for uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Allow any CORS origin
    #[serde(default = "default_true")]
    pub cors_allow_any: bool,

    /// Origins allowed when `cors_allow_any` is off
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            inference_workers: default_inference_workers(),
            max_upload_bytes: default_max_upload_bytes(),
            cors_allow_any: true,
            cors_origins: Vec::new(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_inference_workers() -> usize {
    num_cpus::get()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert!(config.server.cors_allow_any);
        assert!(config.server.inference_workers >= 1);
        assert_eq!(config.chat.model, "gemini-2.5-flash");
        assert_eq!(config.chat.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.vision.quality.blur_threshold, 100.0);
    }

    #[test]
    fn test_flattened_vision_sections() {
        let yaml = r#"
server:
  port: 9100
  inference_workers: 2
model:
  weights_path: weights/plantdoc.safetensors
decision:
  confidence_threshold: 0.6
chat:
  model: gemini-2.0-flash
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.inference_workers, 2);
        assert_eq!(config.server.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(
            config.vision.model.weights_path,
            PathBuf::from("weights/plantdoc.safetensors")
        );
        assert_eq!(config.vision.decision.confidence_threshold, 0.6);
        assert_eq!(config.chat.model, "gemini-2.0-flash");
        assert_eq!(config.chat.timeout_secs, 30);
    }

    #[test]
    fn test_load_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  port: 9100\nmodel:\n  labels_path: a.txt").unwrap();

        let overrides = ConfigOverrides {
            port: Some(7000),
            labels: Some(PathBuf::from("b.txt")),
            ..Default::default()
        };
        let config = AppConfig::load(file.path(), &overrides).unwrap();
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.listen, "0.0.0.0");
        assert_eq!(config.vision.model.labels_path, PathBuf::from("b.txt"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(dir.path().join("plantdoc.yaml"), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.server.port, 8000);
    }
}
