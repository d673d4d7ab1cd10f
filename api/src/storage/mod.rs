use async_trait::async_trait;
use aws_sdk_s3::Client;

use crate::config::AppConfig;
use crate::error::AppError;

/// 画像アップロード上限: 10MB
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Turns raw image bytes into a durable, publicly reachable URL.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, data: Vec<u8>, content_type: &str) -> Result<String, AppError>;
}

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl S3Storage {
    pub async fn new(config: &AppConfig) -> Self {
        let mut s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(endpoint) = &config.s3_endpoint {
            s3_config = s3_config.endpoint_url(endpoint);
        }
        let sdk_config = s3_config
            .region(aws_config::Region::new(config.s3_region.clone()))
            .load()
            .await;

        let client = Client::new(&sdk_config);
        Self {
            client,
            bucket: config.s3_bucket.clone(),
            public_base_url: config.media_public_base_url.clone(),
        }
    }

    pub async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<(), String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(data.into())
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[async_trait]
impl MediaUploader for S3Storage {
    async fn upload(&self, data: Vec<u8>, content_type: &str) -> Result<String, AppError> {
        let key = object_key(content_type);
        self.put_object(&key, data, content_type)
            .await
            .map_err(AppError::Upstream)?;
        tracing::debug!(key = %key, "image uploaded");
        Ok(format!("{}/{key}", self.public_base_url))
    }
}

/// 画像をアップロード可能か検証する。
pub fn validate_image(data: &[u8], content_type: &str) -> Result<(), AppError> {
    if !content_type.starts_with("image/") {
        return Err(AppError::BadRequest("only image uploads are accepted".into()));
    }
    if data.is_empty() {
        return Err(AppError::BadRequest("image is empty".into()));
    }
    if data.len() > MAX_IMAGE_SIZE {
        return Err(AppError::PayloadTooLarge(
            "image must be 10 MB or smaller".into(),
        ));
    }
    Ok(())
}

fn object_key(content_type: &str) -> String {
    let ext = match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/heic" => "heic",
        _ => "bin",
    };
    format!("media/{}.{ext}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_unique_and_typed() {
        let a = object_key("image/png");
        let b = object_key("image/png");
        assert_ne!(a, b);
        assert!(a.starts_with("media/") && a.ends_with(".png"));
        assert!(object_key("image/x-unknown").ends_with(".bin"));
    }

    #[test]
    fn image_validation() {
        assert!(validate_image(b"\x89PNG", "image/png").is_ok());
        assert!(matches!(
            validate_image(b"text", "text/plain"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            validate_image(&[], "image/png"),
            Err(AppError::BadRequest(_))
        ));
        let big = vec![0u8; MAX_IMAGE_SIZE + 1];
        assert!(matches!(
            validate_image(&big, "image/jpeg"),
            Err(AppError::PayloadTooLarge(_))
        ));
    }
}
