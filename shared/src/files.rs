use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use base64::Engine;
use image::ImageFormat;

use crate::error::AppError;
use crate::types::ReceiptFile;

const MAX_RECEIPT_BYTES: usize = 5 * 1024 * 1024; // 5MB

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("upload failed: {0}")]
    Upload(String),
}

/// Receipt image decoded from a request and checked to be an image.
#[derive(Debug, Clone)]
pub struct ReceiptUpload {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub content_type: &'static str,
}

impl ReceiptUpload {
    pub fn from_file(file: &ReceiptFile) -> Result<Self, AppError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(file.data.trim())
            .map_err(|e| AppError::validation(format!("Receipt file is not valid base64: {}", e)))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AppError> {
        if bytes.is_empty() {
            return Err(AppError::validation("Receipt file is empty."));
        }
        if bytes.len() > MAX_RECEIPT_BYTES {
            return Err(AppError::validation("Receipt file exceeds the 5MB limit."));
        }

        let format = image::guess_format(&bytes)
            .map_err(|_| AppError::validation("Receipt file must be an image."))?;
        let (extension, content_type) = match format {
            ImageFormat::Png => ("png", "image/png"),
            ImageFormat::Jpeg => ("jpg", "image/jpeg"),
            ImageFormat::Gif => ("gif", "image/gif"),
            ImageFormat::WebP => ("webp", "image/webp"),
            ImageFormat::Bmp => ("bmp", "image/bmp"),
            ImageFormat::Tiff => ("tiff", "image/tiff"),
            _ => return Err(AppError::validation("Unsupported receipt image format.")),
        };

        Ok(Self {
            bytes,
            extension,
            content_type,
        })
    }
}

/// Opaque "store bytes, get URL" service for receipt images.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, upload: &ReceiptUpload) -> Result<String, FileStoreError>;
}

pub struct S3FileStore {
    client: S3Client,
    bucket: String,
    public_base_url: Option<String>,
}

impl S3FileStore {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            public_base_url,
        }
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), key),
            None => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
        }
    }
}

#[async_trait]
impl FileStore for S3FileStore {
    async fn store(&self, upload: &ReceiptUpload) -> Result<String, FileStoreError> {
        // S3 key: receipts/{uuid}.{ext}
        let key = format!("receipts/{}.{}", uuid::Uuid::new_v4(), upload.extension);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(upload.bytes.clone()))
            .content_type(upload.content_type)
            .send()
            .await
            .map_err(|e| {
                FileStoreError::Upload(format!(
                    "s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        tracing::info!("Receipt uploaded to s3://{}/{}", self.bucket, key);
        Ok(self.public_url(&key))
    }
}

/// In-process file store for tests and local runs.
#[derive(Default)]
pub struct MemoryFileStore {
    stored: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored_urls(&self) -> Vec<String> {
        self.stored.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn store(&self, upload: &ReceiptUpload) -> Result<String, FileStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FileStoreError::Upload("memory file store is set to fail".to_string()));
        }
        let url = format!("memory://receipts/{}.{}", uuid::Uuid::new_v4(), upload.extension);
        self.stored
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url.clone());
        Ok(url)
    }
}
