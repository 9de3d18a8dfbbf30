//! S3 object-store backend using the AWS SDK.
//!
//! Buckets map to real S3 buckets. `compose` uses a multipart upload with
//! `upload_part_copy` so chunk assembly never round-trips bytes through
//! the proxy.

use super::traits::{ObjectStore, StoreError};
use crate::config::BackendConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::debug;

pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Create a new S3 backend from configuration
    pub async fn new(config: &BackendConfig) -> Result<Self, StoreError> {
        let (endpoint, region, force_path_style, access_key_id, secret_access_key) = match config {
            BackendConfig::S3 {
                endpoint,
                region,
                force_path_style,
                access_key_id,
                secret_access_key,
            } => (
                endpoint.clone(),
                region.clone(),
                *force_path_style,
                access_key_id.clone(),
                secret_access_key.clone(),
            ),
            _ => {
                return Err(StoreError::Other(
                    "S3Store requires S3 configuration".to_string(),
                ))
            }
        };

        let mut config_loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));

        // Custom endpoint for MinIO, LocalStack, etc.
        if let Some(ref ep) = endpoint {
            config_loader = config_loader.endpoint_url(ep);
        }

        // Explicit credentials if provided, otherwise the default chain
        if let (Some(ref key_id), Some(ref secret)) = (access_key_id, secret_access_key) {
            let credentials = Credentials::new(key_id, secret, None, None, "blobgate-config");
            config_loader = config_loader.credentials_provider(credentials);
        }

        let sdk_config = config_loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(force_path_style)
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
        })
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(service_error)) => {
                let err = service_error.err();
                if err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists() {
                    Ok(())
                } else {
                    Err(StoreError::S3(format!("create_bucket failed: {err}")))
                }
            }
            Err(e) => Err(StoreError::S3(format!("create_bucket failed: {e}"))),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        object: &str,
        local_path: &Path,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StoreError::Other(format!("read {local_path:?} failed: {e}")))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(object)
            .content_type(content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("put_object failed: {e}")))?;
        debug!("S3 PUT {}/{}", bucket, object);
        Ok(())
    }

    async fn get_object(
        &self,
        bucket: &str,
        object: &str,
        offset: i64,
        length: i64,
    ) -> Result<Vec<u8>, StoreError> {
        let range = if length < 0 {
            format!("bytes={offset}-")
        } else {
            format!("bytes={}-{}", offset, offset + length - 1)
        };
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object)
            .range(range)
            .send()
            .await
            .map_err(|e| {
                if let SdkError::ServiceError(service_error) = &e {
                    if matches!(
                        service_error.err(),
                        aws_sdk_s3::operation::get_object::GetObjectError::NoSuchKey(_)
                    ) {
                        return StoreError::NotFound(format!("{bucket}/{object}"));
                    }
                }
                StoreError::S3(format!("get_object failed: {e}"))
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StoreError::S3(format!("Failed to read response body: {e}")))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    async fn stat_object(&self, bucket: &str, object: &str) -> Result<Option<u64>, StoreError> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await
        {
            Ok(head) => Ok(head.content_length().map(|l| l as u64)),
            Err(SdkError::ServiceError(service_error))
                if service_error.err().is_not_found() =>
            {
                Ok(None)
            }
            Err(e) => Err(StoreError::S3(format!("head_object failed: {e}"))),
        }
    }

    async fn delete_object(&self, bucket: &str, object: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("delete_object failed: {e}")))?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let page = req
                .send()
                .await
                .map_err(|e| StoreError::S3(format!("list_objects failed: {e}")))?;
            for obj in page.contents() {
                if let Some(key) = obj.key() {
                    names.push(key.to_string());
                }
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(names)
    }

    async fn compose(
        &self,
        bucket: &str,
        target: &str,
        parts: &[String],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(target)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("create_multipart_upload failed: {e}")))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StoreError::S3("multipart upload has no id".to_string()))?
            .to_string();

        let mut completed = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let part_number = (i + 1) as i32;
            let copy = self
                .client
                .upload_part_copy()
                .bucket(bucket)
                .key(target)
                .upload_id(&upload_id)
                .part_number(part_number)
                .copy_source(format!("{bucket}/{part}"))
                .send()
                .await
                .map_err(|e| StoreError::S3(format!("upload_part_copy failed: {e}")))?;
            let etag = copy
                .copy_part_result()
                .and_then(|r| r.e_tag())
                .ok_or_else(|| StoreError::S3("upload_part_copy returned no etag".to_string()))?
                .to_string();
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
        }

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(target)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StoreError::S3(format!("complete_multipart_upload failed: {e}")))?;
        debug!("S3 COMPOSE {}/{} from {} parts", bucket, target, parts.len());
        Ok(())
    }
}
