use std::sync::Arc;
use tch::{Kind, Tensor};

use crate::config::ClassificationConfig;
use crate::pipeline::registry::{ModelLoadError, ModelRegistry};
use shared::{ConfidenceLevel, Label};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(#[from] ModelLoadError),
    #[error("forward pass failed: {0}")]
    Forward(tch::TchError),
    #[error("unexpected model output: {0}")]
    BadOutput(String),
}

/// Outcome of one forward pass, fully derived: winning label, the raw
/// sigmoid score, the confidence of the predicted class as a percentage,
/// its coarse level, and the per-class vector [p_normal, p_pneumonia].
#[derive(Debug, Clone)]
pub struct Prediction {
    pub label: Label,
    pub raw_score: f32,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub scores: Vec<f32>,
}

/// App-wide decision constants. Loaded once from configuration, never
/// varied per request.
#[derive(Debug, Clone, Copy)]
pub struct DecisionThresholds {
    pub classification: f32,
    pub high_cutoff: f32,
    pub moderate_cutoff: f32,
}

impl From<&ClassificationConfig> for DecisionThresholds {
    fn from(config: &ClassificationConfig) -> Self {
        Self {
            classification: config.threshold,
            high_cutoff: config.high_confidence_cutoff,
            moderate_cutoff: config.moderate_confidence_cutoff,
        }
    }
}

impl DecisionThresholds {
    pub fn level_for(&self, confidence_pct: f32) -> ConfidenceLevel {
        if confidence_pct >= self.high_cutoff {
            ConfidenceLevel::High
        } else if confidence_pct >= self.moderate_cutoff {
            ConfidenceLevel::Moderate
        } else {
            ConfidenceLevel::Low
        }
    }
}

/// The deployed artifact ends in a single sigmoid unit: one scalar, the
/// probability of PNEUMONIA. The winning class and its confidence are both
/// derived from that scalar; a two-element output means the wrong artifact
/// was deployed and is rejected rather than reinterpreted.
pub fn derive_label(raw_score: f32, threshold: f32) -> Label {
    if raw_score >= threshold {
        Label::Pneumonia
    } else {
        Label::Normal
    }
}

/// Probability of the predicted class, as a percentage.
pub fn derive_confidence(raw_score: f32, label: Label) -> f32 {
    match label {
        Label::Pneumonia => raw_score * 100.0,
        Label::Normal => (1.0 - raw_score) * 100.0,
    }
}

#[derive(Clone)]
pub struct InferenceService {
    registry: Arc<ModelRegistry>,
    thresholds: DecisionThresholds,
}

impl InferenceService {
    pub fn new(registry: Arc<ModelRegistry>, thresholds: DecisionThresholds) -> Self {
        Self {
            registry,
            thresholds,
        }
    }

    pub fn model_tag(&self) -> String {
        self.registry.meta().tag()
    }

    /// One forward pass over a prepared batch-of-one tensor.
    pub fn predict(&self, input: &Tensor) -> Result<Prediction, InferenceError> {
        let module = self.registry.current()?;

        let output = module.forward(input).map_err(|e| {
            log::error!(
                "forward pass failed for input shape {:?}: {:?}",
                input.size(),
                e
            );
            InferenceError::Forward(e)
        })?;

        let flat = output.to_kind(Kind::Float).view([-1]);
        let num_elements = flat.size()[0] as usize;
        if num_elements != 1 {
            return Err(InferenceError::BadOutput(format!(
                "expected a single sigmoid scalar, got {} elements for input shape {:?}",
                num_elements,
                input.size()
            )));
        }
        let mut output_vec = vec![0.0f32; num_elements];
        flat.copy_data(&mut output_vec, num_elements);
        let raw_score = output_vec[0].clamp(0.0, 1.0);

        let prediction = self.derive(raw_score);
        log::info!(
            "prediction: {} (confidence {:.2}%, raw score {:.4})",
            prediction.label,
            prediction.confidence,
            raw_score
        );
        Ok(prediction)
    }

    fn derive(&self, raw_score: f32) -> Prediction {
        let label = derive_label(raw_score, self.thresholds.classification);
        let confidence = derive_confidence(raw_score, label);
        Prediction {
            label,
            raw_score,
            confidence,
            confidence_level: self.thresholds.level_for(confidence),
            scores: vec![1.0 - raw_score, raw_score],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: DecisionThresholds = DecisionThresholds {
        classification: 0.5,
        high_cutoff: 95.0,
        moderate_cutoff: 80.0,
    };

    #[test]
    fn threshold_decides_the_label() {
        assert_eq!(derive_label(0.5, 0.5), Label::Pneumonia);
        assert_eq!(derive_label(0.4999, 0.5), Label::Normal);
        assert_eq!(derive_label(0.0, 0.5), Label::Normal);
        assert_eq!(derive_label(1.0, 0.5), Label::Pneumonia);
    }

    #[test]
    fn confidence_tracks_the_predicted_class() {
        assert_eq!(derive_confidence(0.925, Label::Pneumonia), 92.5);
        assert!((derive_confidence(0.1, Label::Normal) - 90.0).abs() < 1e-4);
    }

    #[test]
    fn confidence_stays_within_fifty_and_hundred() {
        for i in 0..=1000 {
            let raw = i as f32 / 1000.0;
            let label = derive_label(raw, 0.5);
            let confidence = derive_confidence(raw, label);
            assert!(
                (50.0..=100.0).contains(&confidence),
                "raw {} gave confidence {}",
                raw,
                confidence
            );
        }
    }

    #[test]
    fn levels_follow_the_fixed_cut_points() {
        assert_eq!(THRESHOLDS.level_for(100.0), ConfidenceLevel::High);
        assert_eq!(THRESHOLDS.level_for(95.0), ConfidenceLevel::High);
        assert_eq!(THRESHOLDS.level_for(94.99), ConfidenceLevel::Moderate);
        assert_eq!(THRESHOLDS.level_for(80.0), ConfidenceLevel::Moderate);
        assert_eq!(THRESHOLDS.level_for(79.99), ConfidenceLevel::Low);
        assert_eq!(THRESHOLDS.level_for(0.0), ConfidenceLevel::Low);
    }

    #[test]
    fn per_class_scores_complement_each_other() {
        let service = InferenceService::new(
            Arc::new(crate::pipeline::registry::ModelRegistry::new(
                "/nonexistent/model.pt",
                crate::pipeline::registry::ModelMeta {
                    name: "test".to_string(),
                    version: "0".to_string(),
                    input_size: "224x224".to_string(),
                },
            )),
            THRESHOLDS,
        );
        let prediction = service.derive(0.7);
        assert_eq!(prediction.label, Label::Pneumonia);
        assert_eq!(prediction.scores.len(), 2);
        assert!((prediction.scores[0] + prediction.scores[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn missing_model_surfaces_unavailable_not_numbers() {
        let service = InferenceService::new(
            Arc::new(crate::pipeline::registry::ModelRegistry::new(
                "/nonexistent/model.pt",
                crate::pipeline::registry::ModelMeta {
                    name: "test".to_string(),
                    version: "0".to_string(),
                    input_size: "224x224".to_string(),
                },
            )),
            THRESHOLDS,
        );
        let input = Tensor::zeros([1, 1, 224, 224], (Kind::Float, tch::Device::Cpu));
        assert!(matches!(
            service.predict(&input),
            Err(InferenceError::ModelUnavailable(_))
        ));
    }
}
