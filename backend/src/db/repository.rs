use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::db::models::{
    ActivityRecord, ImageRecord, ModelVersionRecord, PredictionRecord, UserRecord,
};
use shared::{ActivityKind, ConfidenceLevel, ImageKind, Label};

/// DynamoDB-backed store for users, images, predictions, the activity trail,
/// and model version metadata. One table per record family.
#[derive(Clone)]
pub struct DiagnosisRepository {
    client: Client,
    users_table: String,
    images_table: String,
    predictions_table: String,
    activity_table: String,
    models_table: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Item not found")]
    NotFound,
    #[error("Invalid data format: {0}")]
    InvalidData(String),
}

impl DiagnosisRepository {
    pub fn new(
        client: Client,
        users_table: String,
        images_table: String,
        predictions_table: String,
        activity_table: String,
        models_table: String,
    ) -> Self {
        Self {
            client,
            users_table,
            images_table,
            predictions_table,
            activity_table,
            models_table,
        }
    }

    // User operations

    pub async fn create_user(&self, user: &UserRecord) -> Result<(), RepositoryError> {
        log::info!(
            "Writing user record to table '{}': {}",
            self.users_table,
            user.username
        );

        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(user.id.to_string()));
        item.insert(
            "username".to_string(),
            AttributeValue::S(user.username.clone()),
        );
        item.insert("email".to_string(), AttributeValue::S(user.email.clone()));
        item.insert(
            "password_digest".to_string(),
            AttributeValue::S(user.password_digest.clone()),
        );
        item.insert(
            "password_salt".to_string(),
            AttributeValue::S(user.password_salt.clone()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(user.created_at.to_rfc3339()),
        );
        if let Some(last_login) = &user.last_login {
            item.insert(
                "last_login".to_string(),
                AttributeValue::S(last_login.to_rfc3339()),
            );
        }
        item.insert(
            "is_active".to_string(),
            AttributeValue::Bool(user.is_active),
        );

        self.client
            .put_item()
            .table_name(&self.users_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| {
                log::error!("put_item failed for user {}: {:?}", user.username, e);
                RepositoryError::DynamoDb(e.to_string())
            })?;

        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(user_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.item {
            Ok(Some(self.parse_user_from_item(item)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.users_table)
            .filter_expression("username = :username")
            .expression_attribute_values(":username", AttributeValue::S(username.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(items) = result.items {
            if let Some(item) = items.into_iter().next() {
                return Ok(Some(self.parse_user_from_item(item)?));
            }
        }
        Ok(None)
    }

    /// Full-row overwrite; the record is small and versionless.
    pub async fn update_user(&self, user: &UserRecord) -> Result<(), RepositoryError> {
        self.create_user(user).await
    }

    // Image operations

    pub async fn create_image(&self, image: &ImageRecord) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(image.id.to_string()));
        item.insert(
            "user_id".to_string(),
            AttributeValue::S(image.user_id.to_string()),
        );
        item.insert(
            "content_hash".to_string(),
            AttributeValue::S(image.content_hash.clone()),
        );
        item.insert(
            "file_name".to_string(),
            AttributeValue::S(image.file_name.clone()),
        );
        item.insert(
            "file_size".to_string(),
            AttributeValue::N(image.file_size.to_string()),
        );
        item.insert(
            "width".to_string(),
            AttributeValue::N(image.width.to_string()),
        );
        item.insert(
            "height".to_string(),
            AttributeValue::N(image.height.to_string()),
        );
        item.insert(
            "format".to_string(),
            AttributeValue::S(image.format.to_string()),
        );
        item.insert(
            "storage_key".to_string(),
            AttributeValue::S(image.storage_key.clone()),
        );
        item.insert(
            "storage_bucket".to_string(),
            AttributeValue::S(image.storage_bucket.clone()),
        );
        item.insert(
            "analyzed".to_string(),
            AttributeValue::Bool(image.analyzed),
        );
        item.insert(
            "uploaded_at".to_string(),
            AttributeValue::S(image.uploaded_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.images_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn get_image(&self, image_id: Uuid) -> Result<Option<ImageRecord>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(image_id.to_string()));

        let result = self
            .client
            .get_item()
            .table_name(&self.images_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.item {
            Ok(Some(self.parse_image_from_item(item)?))
        } else {
            Ok(None)
        }
    }

    pub async fn mark_image_analyzed(&self, image_id: Uuid) -> Result<(), RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(image_id.to_string()));

        self.client
            .update_item()
            .table_name(&self.images_table)
            .set_key(Some(key))
            .update_expression("SET analyzed = :analyzed")
            .expression_attribute_values(":analyzed", AttributeValue::Bool(true))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn delete_image(&self, image_id: Uuid) -> Result<(), RepositoryError> {
        let mut key = HashMap::new();
        key.insert("id".to_string(), AttributeValue::S(image_id.to_string()));

        self.client
            .delete_item()
            .table_name(&self.images_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    // Prediction operations

    pub async fn create_prediction(
        &self,
        prediction: &PredictionRecord,
    ) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert(
            "id".to_string(),
            AttributeValue::S(prediction.id.to_string()),
        );
        item.insert(
            "image_id".to_string(),
            AttributeValue::S(prediction.image_id.to_string()),
        );
        item.insert(
            "user_id".to_string(),
            AttributeValue::S(prediction.user_id.to_string()),
        );
        item.insert(
            "label".to_string(),
            AttributeValue::S(prediction.label.to_string()),
        );
        item.insert(
            "raw_score".to_string(),
            AttributeValue::N(prediction.raw_score.to_string()),
        );
        item.insert(
            "confidence".to_string(),
            AttributeValue::N(prediction.confidence.to_string()),
        );
        item.insert(
            "confidence_level".to_string(),
            AttributeValue::S(prediction.confidence_level.to_string()),
        );
        item.insert(
            "scores".to_string(),
            AttributeValue::S(serde_json::to_string(&prediction.scores)?),
        );
        item.insert(
            "processing_time_ms".to_string(),
            AttributeValue::N(prediction.processing_time_ms.to_string()),
        );
        item.insert(
            "model_version".to_string(),
            AttributeValue::S(prediction.model_version.clone()),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(prediction.created_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.predictions_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn get_prediction(
        &self,
        prediction_id: Uuid,
    ) -> Result<Option<PredictionRecord>, RepositoryError> {
        let mut key = HashMap::new();
        key.insert(
            "id".to_string(),
            AttributeValue::S(prediction_id.to_string()),
        );

        let result = self
            .client
            .get_item()
            .table_name(&self.predictions_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(item) = result.item {
            Ok(Some(self.parse_prediction_from_item(item)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_prediction_for_image(
        &self,
        image_id: Uuid,
    ) -> Result<Option<PredictionRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.predictions_table)
            .filter_expression("image_id = :image_id")
            .expression_attribute_values(":image_id", AttributeValue::S(image_id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        if let Some(items) = result.items {
            if let Some(item) = items.into_iter().next() {
                return Ok(Some(self.parse_prediction_from_item(item)?));
            }
        }
        Ok(None)
    }

    pub async fn list_user_predictions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<PredictionRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.predictions_table)
            .filter_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut records = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                records.push(self.parse_prediction_from_item(item)?);
            }
        }
        Ok(records)
    }

    pub async fn delete_prediction(&self, prediction_id: Uuid) -> Result<(), RepositoryError> {
        let mut key = HashMap::new();
        key.insert(
            "id".to_string(),
            AttributeValue::S(prediction_id.to_string()),
        );

        self.client
            .delete_item()
            .table_name(&self.predictions_table)
            .set_key(Some(key))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    // Activity trail operations

    pub async fn create_activity(&self, entry: &ActivityRecord) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("id".to_string(), AttributeValue::S(entry.id.to_string()));
        item.insert(
            "user_id".to_string(),
            AttributeValue::S(entry.user_id.to_string()),
        );
        item.insert(
            "action".to_string(),
            AttributeValue::S(entry.action.to_string()),
        );
        if let Some(image_id) = &entry.image_id {
            item.insert(
                "image_id".to_string(),
                AttributeValue::S(image_id.to_string()),
            );
        }
        if let Some(prediction_id) = &entry.prediction_id {
            item.insert(
                "prediction_id".to_string(),
                AttributeValue::S(prediction_id.to_string()),
            );
        }
        if let Some(ip_address) = &entry.ip_address {
            item.insert(
                "ip_address".to_string(),
                AttributeValue::S(ip_address.clone()),
            );
        }
        item.insert(
            "timestamp".to_string(),
            AttributeValue::S(entry.timestamp.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.activity_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn list_user_activity(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ActivityRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.activity_table)
            .filter_expression("user_id = :user_id")
            .expression_attribute_values(":user_id", AttributeValue::S(user_id.to_string()))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut entries = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                entries.push(self.parse_activity_from_item(item)?);
            }
        }
        Ok(entries)
    }

    // Model version operations

    /// Register a model version and make it the single active row.
    pub async fn activate_model_version(
        &self,
        record: &ModelVersionRecord,
    ) -> Result<(), RepositoryError> {
        log::info!(
            "Registering active model version {} v{}",
            record.name,
            record.version
        );

        for mut existing in self.list_model_versions().await? {
            if existing.is_active && existing.name != record.name {
                existing.is_active = false;
                self.put_model_version(&existing).await?;
            }
        }
        self.put_model_version(record).await
    }

    async fn put_model_version(
        &self,
        record: &ModelVersionRecord,
    ) -> Result<(), RepositoryError> {
        let mut item = HashMap::new();
        item.insert("name".to_string(), AttributeValue::S(record.name.clone()));
        item.insert(
            "version".to_string(),
            AttributeValue::S(record.version.clone()),
        );
        item.insert(
            "artifact_path".to_string(),
            AttributeValue::S(record.artifact_path.clone()),
        );
        item.insert(
            "input_size".to_string(),
            AttributeValue::S(record.input_size.clone()),
        );
        if let Some(accuracy) = record.accuracy {
            item.insert(
                "accuracy".to_string(),
                AttributeValue::N(accuracy.to_string()),
            );
        }
        if let Some(precision) = record.precision {
            item.insert(
                "precision".to_string(),
                AttributeValue::N(precision.to_string()),
            );
        }
        if let Some(recall) = record.recall {
            item.insert("recall".to_string(), AttributeValue::N(recall.to_string()));
        }
        if let Some(f1_score) = record.f1_score {
            item.insert(
                "f1_score".to_string(),
                AttributeValue::N(f1_score.to_string()),
            );
        }
        item.insert(
            "is_active".to_string(),
            AttributeValue::Bool(record.is_active),
        );
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(record.created_at.to_rfc3339()),
        );

        self.client
            .put_item()
            .table_name(&self.models_table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        Ok(())
    }

    pub async fn get_active_model_version(
        &self,
    ) -> Result<Option<ModelVersionRecord>, RepositoryError> {
        let versions = self.list_model_versions().await?;
        Ok(versions.into_iter().find(|v| v.is_active))
    }

    pub async fn list_model_versions(&self) -> Result<Vec<ModelVersionRecord>, RepositoryError> {
        let result = self
            .client
            .scan()
            .table_name(&self.models_table)
            .send()
            .await
            .map_err(|e| RepositoryError::DynamoDb(e.to_string()))?;

        let mut versions = Vec::new();
        if let Some(items) = result.items {
            for item in items {
                versions.push(self.parse_model_version_from_item(item)?);
            }
        }
        Ok(versions)
    }

    // Helper methods for parsing DynamoDB items

    fn parse_user_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<UserRecord, RepositoryError> {
        let id = parse_uuid(&item, "id")?;
        let username = parse_string(&item, "username")?;
        let email = parse_string(&item, "email")?;
        let password_digest = parse_string(&item, "password_digest")?;
        let password_salt = parse_string(&item, "password_salt")?;
        let created_at = parse_datetime(&item, "created_at")?;
        let last_login = parse_optional_datetime(&item, "last_login");
        let is_active = *item
            .get("is_active")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(&true);

        Ok(UserRecord {
            id,
            username,
            email,
            password_digest,
            password_salt,
            created_at,
            last_login,
            is_active,
        })
    }

    fn parse_image_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<ImageRecord, RepositoryError> {
        let id = parse_uuid(&item, "id")?;
        let user_id = parse_uuid(&item, "user_id")?;
        let content_hash = parse_string(&item, "content_hash")?;
        let file_name = parse_string(&item, "file_name")?;
        let file_size = parse_number::<i64>(&item, "file_size")?;
        let width = parse_number::<u32>(&item, "width")?;
        let height = parse_number::<u32>(&item, "height")?;
        let format = ImageKind::from_str(&parse_string(&item, "format")?)
            .map_err(|_| RepositoryError::InvalidData("Invalid format".to_string()))?;
        let storage_key = parse_string(&item, "storage_key")?;
        let storage_bucket = parse_string(&item, "storage_bucket")?;
        let analyzed = *item
            .get("analyzed")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(&false);
        let uploaded_at = parse_datetime(&item, "uploaded_at")?;

        Ok(ImageRecord {
            id,
            user_id,
            content_hash,
            file_name,
            file_size,
            width,
            height,
            format,
            storage_key,
            storage_bucket,
            analyzed,
            uploaded_at,
        })
    }

    fn parse_prediction_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<PredictionRecord, RepositoryError> {
        let id = parse_uuid(&item, "id")?;
        let image_id = parse_uuid(&item, "image_id")?;
        let user_id = parse_uuid(&item, "user_id")?;
        let label = Label::from_str(&parse_string(&item, "label")?)
            .map_err(|_| RepositoryError::InvalidData("Invalid label".to_string()))?;
        let raw_score = parse_number::<f32>(&item, "raw_score")?;
        let confidence = parse_number::<f32>(&item, "confidence")?;
        let confidence_level = ConfidenceLevel::from_str(&parse_string(&item, "confidence_level")?)
            .map_err(|_| RepositoryError::InvalidData("Invalid confidence_level".to_string()))?;
        let scores: Vec<f32> = item
            .get("scores")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| serde_json::from_str(s).ok())
            .ok_or_else(|| RepositoryError::InvalidData("Invalid scores".to_string()))?;
        let processing_time_ms = parse_number::<u64>(&item, "processing_time_ms")?;
        let model_version = parse_string(&item, "model_version")?;
        let created_at = parse_datetime(&item, "created_at")?;

        Ok(PredictionRecord {
            id,
            image_id,
            user_id,
            label,
            raw_score,
            confidence,
            confidence_level,
            scores,
            processing_time_ms,
            model_version,
            created_at,
        })
    }

    fn parse_activity_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<ActivityRecord, RepositoryError> {
        let id = parse_uuid(&item, "id")?;
        let user_id = parse_uuid(&item, "user_id")?;
        let action = ActivityKind::from_str(&parse_string(&item, "action")?)
            .map_err(|_| RepositoryError::InvalidData("Invalid action".to_string()))?;
        let image_id = item
            .get("image_id")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| Uuid::parse_str(s).ok());
        let prediction_id = item
            .get("prediction_id")
            .and_then(|v| v.as_s().ok())
            .and_then(|s| Uuid::parse_str(s).ok());
        let ip_address = item.get("ip_address").and_then(|v| v.as_s().ok()).cloned();
        let timestamp = parse_datetime(&item, "timestamp")?;

        Ok(ActivityRecord {
            id,
            user_id,
            action,
            image_id,
            prediction_id,
            ip_address,
            timestamp,
        })
    }

    fn parse_model_version_from_item(
        &self,
        item: HashMap<String, AttributeValue>,
    ) -> Result<ModelVersionRecord, RepositoryError> {
        let name = parse_string(&item, "name")?;
        let version = parse_string(&item, "version")?;
        let artifact_path = parse_string(&item, "artifact_path")?;
        let input_size = parse_string(&item, "input_size")?;
        let accuracy = parse_optional_number::<f32>(&item, "accuracy");
        let precision = parse_optional_number::<f32>(&item, "precision");
        let recall = parse_optional_number::<f32>(&item, "recall");
        let f1_score = parse_optional_number::<f32>(&item, "f1_score");
        let is_active = *item
            .get("is_active")
            .and_then(|v| v.as_bool().ok())
            .unwrap_or(&false);
        let created_at = parse_datetime(&item, "created_at")?;

        Ok(ModelVersionRecord {
            name,
            version,
            artifact_path,
            input_size,
            accuracy,
            precision,
            recall,
            f1_score,
            is_active,
            created_at,
        })
    }
}

fn parse_string(
    item: &HashMap<String, AttributeValue>,
    attr: &str,
) -> Result<String, RepositoryError> {
    item.get(attr)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {attr}")))
}

fn parse_uuid(item: &HashMap<String, AttributeValue>, attr: &str) -> Result<Uuid, RepositoryError> {
    item.get(attr)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {attr}")))
}

fn parse_number<T: FromStr>(
    item: &HashMap<String, AttributeValue>,
    attr: &str,
) -> Result<T, RepositoryError> {
    item.get(attr)
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {attr}")))
}

fn parse_optional_number<T: FromStr>(
    item: &HashMap<String, AttributeValue>,
    attr: &str,
) -> Option<T> {
    item.get(attr)
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<T>().ok())
}

fn parse_datetime(
    item: &HashMap<String, AttributeValue>,
    attr: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    item.get(attr)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| RepositoryError::InvalidData(format!("Invalid {attr}")))
}

fn parse_optional_datetime(
    item: &HashMap<String, AttributeValue>,
    attr: &str,
) -> Option<DateTime<Utc>> {
    item.get(attr)
        .and_then(|v| v.as_s().ok())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
