use serde::{Deserialize, Serialize};

/// Pipeline configuration loaded from `config/pipeline.yaml`.
///
/// Deployment settings (table names, bucket, secrets) come from the
/// environment; this file only carries the knobs of the diagnosis pipeline
/// itself so they can be tuned without touching deployment manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub limits: UploadLimits,
    #[serde(default)]
    pub classification: ClassificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Square spatial resolution expected by the model.
    #[serde(default = "default_image_size")]
    pub size: u32,
    /// Channel count of the deployed model variant. 1 = grayscale.
    #[serde(default = "default_channels")]
    pub channels: u32,
    #[serde(default = "default_resize_method")]
    pub resize_method: String,
    /// "unit" scales intensities into [0, 1].
    #[serde(default = "default_normalization")]
    pub normalization: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadLimits {
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Raw-score cut above which the positive class wins.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Confidence percentage at or above which a result is HIGH.
    #[serde(default = "default_high_cutoff")]
    pub high_confidence_cutoff: f32,
    /// Confidence percentage at or above which a result is MODERATE.
    #[serde(default = "default_moderate_cutoff")]
    pub moderate_confidence_cutoff: f32,
}

fn default_image_size() -> u32 {
    224
}

fn default_channels() -> u32 {
    1
}

fn default_resize_method() -> String {
    "lanczos".to_string()
}

fn default_normalization() -> String {
    "unit".to_string()
}

fn default_max_upload_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()]
}

fn default_threshold() -> f32 {
    0.5
}

fn default_high_cutoff() -> f32 {
    95.0
}

fn default_moderate_cutoff() -> f32 {
    80.0
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            size: default_image_size(),
            channels: default_channels(),
            resize_method: default_resize_method(),
            normalization: default_normalization(),
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            high_confidence_cutoff: default_high_cutoff(),
            moderate_confidence_cutoff: default_moderate_cutoff(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image: ImageConfig::default(),
            limits: UploadLimits::default(),
            classification: ClassificationConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load the pipeline config, honoring a `PIPELINE_CONFIG` path override.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = match std::env::var("PIPELINE_CONFIG") {
            Ok(path) => path,
            Err(_) => {
                let manifest_dir = std::env::var("CARGO_MANIFEST_DIR")
                    .map_err(|_| "Failed to get manifest directory")?;
                format!("{}/../config/pipeline.yaml", manifest_dir)
            }
        };
        let config_str = std::fs::read_to_string(&config_path)?;
        let config: PipelineConfig = serde_yaml::from_str(&config_str)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_falls_back_to_defaults() {
        let config: PipelineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.image.size, 224);
        assert_eq!(config.image.channels, 1);
        assert_eq!(config.limits.max_upload_bytes, 16 * 1024 * 1024);
        assert_eq!(
            config.limits.allowed_extensions,
            vec!["png", "jpg", "jpeg"]
        );
        assert_eq!(config.classification.threshold, 0.5);
        assert_eq!(config.classification.high_confidence_cutoff, 95.0);
        assert_eq!(config.classification.moderate_confidence_cutoff, 80.0);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
image:
  size: 299
  channels: 3
limits:
  max_upload_bytes: 1048576
classification:
  threshold: 0.6
"#;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.image.size, 299);
        assert_eq!(config.image.channels, 3);
        assert_eq!(config.limits.max_upload_bytes, 1024 * 1024);
        assert_eq!(config.classification.threshold, 0.6);
        // untouched sections keep their defaults
        assert_eq!(config.classification.high_confidence_cutoff, 95.0);
        assert_eq!(config.image.resize_method, "lanczos");
    }
}
