use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// S3-backed store for the raw bytes of uploaded X-rays. Objects are keyed
/// by owner and content hash, so re-uploading identical bytes overwrites in
/// place instead of accumulating copies.
#[derive(Clone)]
pub struct ImageStore {
    client: Client,
    bucket_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageStoreError {
    #[error("S3 error: {0}")]
    S3(String),
}

impl ImageStore {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self {
            client,
            bucket_name,
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn content_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    pub fn object_key(user_id: Uuid, content_hash: &str, extension: &str) -> String {
        format!("xrays/{}/{}.{}", user_id, content_hash, extension)
    }

    pub async fn upload(
        &self,
        data: &[u8],
        key: &str,
        content_type: &str,
    ) -> Result<(), ImageStoreError> {
        let body = ByteStream::from(data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| ImageStoreError::S3(e.to_string()))?;

        Ok(())
    }

    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, ImageStoreError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| ImageStoreError::S3(e.to_string()))?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| ImageStoreError::S3(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    pub async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| ImageStoreError::S3(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_content_addressed() {
        let a = ImageStore::content_hash(b"xray bytes");
        let b = ImageStore::content_hash(b"xray bytes");
        let c = ImageStore::content_hash(b"other bytes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn object_keys_are_scoped_by_owner() {
        let user = Uuid::new_v4();
        let key = ImageStore::object_key(user, "cafe", "png");
        assert_eq!(key, format!("xrays/{}/cafe.png", user));
    }
}
