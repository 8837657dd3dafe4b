use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Classification outcome for a single chest X-ray.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Label {
    #[serde(rename = "NORMAL")]
    #[strum(serialize = "NORMAL")]
    Normal,
    #[serde(rename = "PNEUMONIA")]
    #[strum(serialize = "PNEUMONIA")]
    Pneumonia,
}

/// Coarse confidence bucket derived from the confidence percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ConfidenceLevel {
    #[serde(rename = "HIGH")]
    #[strum(serialize = "HIGH")]
    High,
    #[serde(rename = "MODERATE")]
    #[strum(serialize = "MODERATE")]
    Moderate,
    #[serde(rename = "LOW")]
    #[strum(serialize = "LOW")]
    Low,
}

/// Container format of an accepted upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ImageKind {
    #[serde(rename = "PNG")]
    #[strum(serialize = "PNG")]
    Png,
    #[serde(rename = "JPEG")]
    #[strum(serialize = "JPEG")]
    Jpeg,
}

impl ImageKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
        }
    }
}

/// Audit-trail action recorded for every user-visible operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ActivityKind {
    #[serde(rename = "UPLOAD")]
    #[strum(serialize = "UPLOAD")]
    Upload,
    #[serde(rename = "ANALYZE")]
    #[strum(serialize = "ANALYZE")]
    Analyze,
    #[serde(rename = "VIEW_RESULT")]
    #[strum(serialize = "VIEW_RESULT")]
    ViewResult,
    #[serde(rename = "DELETE_RESULT")]
    #[strum(serialize = "DELETE_RESULT")]
    DeleteResult,
    #[serde(rename = "LOGIN")]
    #[strum(serialize = "LOGIN")]
    Login,
    #[serde(rename = "LOGOUT")]
    #[strum(serialize = "LOGOUT")]
    Logout,
}

/// Full payload returned by `POST /api/diagnoses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisResponse {
    pub image_id: Uuid,
    pub prediction_id: Uuid,
    pub label: Label,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub raw_score: f32,
    pub scores: Vec<f32>,
    pub processing_time_ms: u64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the paginated results listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisSummary {
    pub prediction_id: Uuid,
    pub image_id: Uuid,
    pub file_name: String,
    pub label: Label,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisListResponse {
    pub items: Vec<DiagnosisSummary>,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
}

/// Aggregates over a user's stored predictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsResponse {
    pub total_predictions: usize,
    pub pneumonia_count: usize,
    pub normal_count: usize,
    pub average_confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub action: ActivityKind,
    pub image_id: Option<Uuid>,
    pub prediction_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_uploads: usize,
    pub total_analyses: usize,
    pub total_views: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Metadata of the model version that produced a prediction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub input_size: String,
    pub accuracy: Option<f32>,
    pub precision: Option<f32>,
    pub recall: Option<f32>,
    pub f1_score: Option<f32>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn labels_round_trip_through_strings() {
        assert_eq!(Label::Pneumonia.to_string(), "PNEUMONIA");
        assert_eq!(Label::from_str("NORMAL").unwrap(), Label::Normal);
        assert_eq!(
            ConfidenceLevel::from_str("MODERATE").unwrap(),
            ConfidenceLevel::Moderate
        );
        assert!(Label::from_str("normal").is_err());
    }

    #[test]
    fn image_kinds_map_to_extensions_and_mime_types() {
        assert_eq!(ImageKind::Png.extension(), "png");
        assert_eq!(ImageKind::Jpeg.extension(), "jpg");
        assert_eq!(ImageKind::Jpeg.mime_type(), "image/jpeg");
        assert_eq!(ImageKind::from_str("PNG").unwrap(), ImageKind::Png);
    }

    #[test]
    fn activity_kinds_serialize_like_the_audit_schema() {
        let json = serde_json::to_string(&ActivityKind::ViewResult).unwrap();
        assert_eq!(json, "\"VIEW_RESULT\"");
    }
}
