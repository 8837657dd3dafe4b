use chrono::{DateTime, Utc};
use std::time::Instant;
use uuid::Uuid;

use crate::db::models::{ActivityRecord, ImageRecord, PredictionRecord};
use crate::db::repository::{DiagnosisRepository, RepositoryError};
use crate::pipeline::inference::{InferenceError, InferenceService};
use crate::pipeline::preprocess::{ImagePreprocessor, ValidationError};
use crate::storage::image_store::{ImageStore, ImageStoreError};
use shared::{
    ActivityKind, ActivityEntry, ConfidenceLevel, DiagnosisResponse, DiagnosisSummary,
    HistorySummary, Label, StatisticsResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("storage error: {0}")]
    Storage(#[from] ImageStoreError),
    #[error("diagnosis computed but not saved: {0}")]
    Persistence(#[from] RepositoryError),
    #[error("result not found")]
    NotFound,
}

/// Listing filters for `GET /api/diagnoses`.
#[derive(Debug, Clone, Default)]
pub struct DiagnosisFilter {
    pub label: Option<Label>,
    pub confidence_level: Option<ConfidenceLevel>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: usize,
    pub page_size: usize,
}

/// Ties the pipeline together: validate, preprocess, infer, persist, audit.
/// Everything runs synchronously inside the handling request; nothing is
/// written until inference has succeeded, so a failed diagnosis leaves no
/// partial rows behind.
#[derive(Clone)]
pub struct DiagnosisService {
    preprocessor: ImagePreprocessor,
    inference: InferenceService,
    repository: DiagnosisRepository,
    image_store: ImageStore,
}

impl DiagnosisService {
    pub fn new(
        preprocessor: ImagePreprocessor,
        inference: InferenceService,
        repository: DiagnosisRepository,
        image_store: ImageStore,
    ) -> Self {
        Self {
            preprocessor,
            inference,
            repository,
            image_store,
        }
    }

    pub async fn diagnose(
        &self,
        user_id: Uuid,
        file_name: &str,
        data: &[u8],
        source_ip: Option<String>,
    ) -> Result<DiagnosisResponse, DiagnosisError> {
        let format = self.preprocessor.validate(file_name, data)?;

        // processing time covers preprocess + forward pass only; upload and
        // persistence I/O are excluded
        let started = Instant::now();
        let prepared = self.preprocessor.prepare(data)?;
        let prediction = self.inference.predict(&prepared.tensor)?;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let content_hash = ImageStore::content_hash(data);
        let storage_key = ImageStore::object_key(user_id, &content_hash, format.extension());
        self.image_store
            .upload(data, &storage_key, format.mime_type())
            .await?;

        let image = ImageRecord::new(
            user_id,
            content_hash,
            file_name.to_string(),
            data.len() as i64,
            prepared.width,
            prepared.height,
            format,
            storage_key,
            self.image_store.bucket_name().to_string(),
        );
        self.repository.create_image(&image).await?;

        let record = PredictionRecord {
            id: Uuid::new_v4(),
            image_id: image.id,
            user_id,
            label: prediction.label,
            raw_score: prediction.raw_score,
            confidence: prediction.confidence,
            confidence_level: prediction.confidence_level,
            scores: prediction.scores.clone(),
            processing_time_ms,
            model_version: self.inference.model_tag(),
            created_at: Utc::now(),
        };
        self.repository.create_prediction(&record).await?;
        self.repository.mark_image_analyzed(image.id).await?;

        self.repository
            .create_activity(&ActivityRecord::new(
                user_id,
                ActivityKind::Upload,
                Some(image.id),
                None,
                source_ip.clone(),
            ))
            .await?;
        self.repository
            .create_activity(&ActivityRecord::new(
                user_id,
                ActivityKind::Analyze,
                Some(image.id),
                Some(record.id),
                source_ip,
            ))
            .await?;

        Ok(Self::to_response(&record))
    }

    pub async fn get_diagnosis(
        &self,
        user_id: Uuid,
        prediction_id: Uuid,
        source_ip: Option<String>,
    ) -> Result<DiagnosisResponse, DiagnosisError> {
        let record = self.owned_prediction(user_id, prediction_id).await?;

        self.repository
            .create_activity(&ActivityRecord::new(
                user_id,
                ActivityKind::ViewResult,
                Some(record.image_id),
                Some(record.id),
                source_ip,
            ))
            .await?;

        Ok(Self::to_response(&record))
    }

    pub async fn list_diagnoses(
        &self,
        user_id: Uuid,
        filter: &DiagnosisFilter,
    ) -> Result<(Vec<DiagnosisSummary>, usize), DiagnosisError> {
        let mut records = self.repository.list_user_predictions(user_id).await?;
        records.retain(|r| {
            filter.label.is_none_or(|l| r.label == l)
                && filter.confidence_level.is_none_or(|c| r.confidence_level == c)
                && filter.from.is_none_or(|from| r.created_at >= from)
                && filter.to.is_none_or(|to| r.created_at <= to)
        });
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = records.len();

        let page = filter.page.max(1);
        let page_size = filter.page_size.clamp(1, 100);
        let start = (page - 1) * page_size;

        let mut items = Vec::new();
        for record in records.into_iter().skip(start).take(page_size) {
            let file_name = self
                .repository
                .get_image(record.image_id)
                .await?
                .map(|image| image.file_name)
                .unwrap_or_default();
            items.push(DiagnosisSummary {
                prediction_id: record.id,
                image_id: record.image_id,
                file_name,
                label: record.label,
                confidence: record.confidence,
                confidence_level: record.confidence_level,
                created_at: record.created_at,
            });
        }

        Ok((items, total))
    }

    /// Remove a prediction together with its image record and stored bytes.
    pub async fn delete_diagnosis(
        &self,
        user_id: Uuid,
        prediction_id: Uuid,
        source_ip: Option<String>,
    ) -> Result<(), DiagnosisError> {
        let record = self.owned_prediction(user_id, prediction_id).await?;

        if let Some(image) = self.repository.get_image(record.image_id).await? {
            self.image_store.delete(&image.storage_key).await?;
            self.repository.delete_image(image.id).await?;
        }
        self.repository.delete_prediction(record.id).await?;

        self.repository
            .create_activity(&ActivityRecord::new(
                user_id,
                ActivityKind::DeleteResult,
                Some(record.image_id),
                Some(record.id),
                source_ip,
            ))
            .await?;

        Ok(())
    }

    pub async fn statistics(&self, user_id: Uuid) -> Result<StatisticsResponse, DiagnosisError> {
        let records = self.repository.list_user_predictions(user_id).await?;
        let total_predictions = records.len();
        let pneumonia_count = records
            .iter()
            .filter(|r| r.label == Label::Pneumonia)
            .count();
        let normal_count = total_predictions - pneumonia_count;
        let average_confidence = if total_predictions > 0 {
            let sum: f32 = records.iter().map(|r| r.confidence).sum();
            (sum / total_predictions as f32 * 100.0).round() / 100.0
        } else {
            0.0
        };

        Ok(StatisticsResponse {
            total_predictions,
            pneumonia_count,
            normal_count,
            average_confidence,
        })
    }

    pub async fn history(&self, user_id: Uuid) -> Result<Vec<ActivityEntry>, DiagnosisError> {
        let mut entries = self.repository.list_user_activity(user_id).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries
            .into_iter()
            .map(|e| ActivityEntry {
                id: e.id,
                action: e.action,
                image_id: e.image_id,
                prediction_id: e.prediction_id,
                ip_address: e.ip_address,
                timestamp: e.timestamp,
            })
            .collect())
    }

    pub async fn history_summary(&self, user_id: Uuid) -> Result<HistorySummary, DiagnosisError> {
        let entries = self.repository.list_user_activity(user_id).await?;
        let count = |kind: ActivityKind| entries.iter().filter(|e| e.action == kind).count();

        Ok(HistorySummary {
            total_uploads: count(ActivityKind::Upload),
            total_analyses: count(ActivityKind::Analyze),
            total_views: count(ActivityKind::ViewResult),
            last_activity: entries.iter().map(|e| e.timestamp).max(),
        })
    }

    async fn owned_prediction(
        &self,
        user_id: Uuid,
        prediction_id: Uuid,
    ) -> Result<PredictionRecord, DiagnosisError> {
        match self.repository.get_prediction(prediction_id).await? {
            // a foreign record is indistinguishable from a missing one
            Some(record) if record.user_id == user_id => Ok(record),
            _ => Err(DiagnosisError::NotFound),
        }
    }

    fn to_response(record: &PredictionRecord) -> DiagnosisResponse {
        DiagnosisResponse {
            image_id: record.image_id,
            prediction_id: record.id,
            label: record.label,
            confidence: record.confidence,
            confidence_level: record.confidence_level,
            raw_score: record.raw_score,
            scores: record.scores.clone(),
            processing_time_ms: record.processing_time_ms,
            model_version: record.model_version.clone(),
            created_at: record.created_at,
        }
    }
}
