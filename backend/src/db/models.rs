use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ActivityKind, ConfidenceLevel, ImageKind, Label};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_digest: String,
    pub password_salt: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl UserRecord {
    pub fn new(
        username: String,
        email: String,
        password_digest: String,
        password_salt: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            email,
            password_digest,
            password_salt,
            created_at: Utc::now(),
            last_login: None,
            is_active: true,
        }
    }

    pub fn update_last_login(&mut self) {
        self.last_login = Some(Utc::now());
    }
}

/// One uploaded X-ray. Immutable after creation except the `analyzed` flag,
/// which flips once its prediction has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_hash: String,
    pub file_name: String,
    pub file_size: i64,
    pub width: u32,
    pub height: u32,
    pub format: ImageKind,
    pub storage_key: String,
    pub storage_bucket: String,
    pub analyzed: bool,
    pub uploaded_at: DateTime<Utc>,
}

impl ImageRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        content_hash: String,
        file_name: String,
        file_size: i64,
        width: u32,
        height: u32,
        format: ImageKind,
        storage_key: String,
        storage_bucket: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            content_hash,
            file_name,
            file_size,
            width,
            height,
            format,
            storage_key,
            storage_bucket,
            analyzed: false,
            uploaded_at: Utc::now(),
        }
    }
}

/// One inference outcome for one image. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub image_id: Uuid,
    pub user_id: Uuid,
    pub label: Label,
    pub raw_score: f32,
    pub confidence: f32,
    pub confidence_level: ConfidenceLevel,
    pub scores: Vec<f32>,
    pub processing_time_ms: u64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub action: ActivityKind,
    pub image_id: Option<Uuid>,
    pub prediction_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        user_id: Uuid,
        action: ActivityKind,
        image_id: Option<Uuid>,
        prediction_id: Option<Uuid>,
        ip_address: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            action,
            image_id,
            prediction_id,
            ip_address,
            timestamp: Utc::now(),
        }
    }
}

/// Metadata of a trained model artifact. Keyed by name; at most one row is
/// active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersionRecord {
    pub name: String,
    pub version: String,
    pub artifact_path: String,
    pub input_size: String,
    pub accuracy: Option<f32>,
    pub precision: Option<f32>,
    pub recall: Option<f32>,
    pub f1_score: Option<f32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ModelVersionRecord {
    pub fn new(name: String, version: String, artifact_path: String, input_size: String) -> Self {
        Self {
            name,
            version,
            artifact_path,
            input_size,
            accuracy: None,
            precision: None,
            recall: None,
            f1_score: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }
}
