use crate::error::{MoverError, Result};
use crate::models::{CompletedPartInfo, ObjectLocation};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::operation::upload_part_copy::UploadPartCopyOutput;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters left untouched in the `x-amz-copy-source` header.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// One ranged part copy inside an open multipart session.
#[derive(Debug, Clone)]
pub struct PartCopyRequest<'a> {
    pub source: &'a ObjectLocation,
    pub destination: &'a ObjectLocation,
    pub upload_id: &'a str,
    pub part_number: i32,
    /// HTTP style range, `bytes=start-end`, both ends inclusive.
    pub range: String,
}

/// Server-side copy operations of a region-bound object store client.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn object_size(&self, location: &ObjectLocation) -> Result<i64>;
    async fn copy_object(&self, source: &ObjectLocation, destination: &ObjectLocation)
    -> Result<()>;
    /// Returns the session id issued by the store, if it issued one.
    async fn create_multipart_upload(&self, destination: &ObjectLocation)
    -> Result<Option<String>>;
    /// Returns the part's ETag exactly as the store reported it.
    async fn upload_part_copy(&self, request: &PartCopyRequest<'_>) -> Result<String>;
    async fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<()>;
    async fn abort_multipart_upload(&self, destination: &ObjectLocation, upload_id: &str)
    -> Result<()>;
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn copy_source(location: &ObjectLocation) -> String {
    format!(
        "{}/{}",
        location.bucket,
        utf8_percent_encode(&location.key, COPY_SOURCE)
    )
}

/// A part without an ETag cannot be finalized, so it fails the part here.
fn part_etag(output: &UploadPartCopyOutput, request: &PartCopyRequest<'_>) -> Result<String> {
    output
        .copy_part_result()
        .and_then(|r| r.e_tag())
        .filter(|e_tag| !e_tag.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MoverError::ObjectStore {
            operation: "UploadPartCopy",
            bucket: request.destination.bucket.clone(),
            key: request.destination.key.clone(),
            message: format!("no ETag returned for part {}", request.part_number),
        })
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn object_size(&self, location: &ObjectLocation) -> Result<i64> {
        let res = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| MoverError::object_store("HeadObject", &location.bucket, &location.key, e))?;

        Ok(res.content_length().unwrap_or(0))
    }

    async fn copy_object(
        &self,
        source: &ObjectLocation,
        destination: &ObjectLocation,
    ) -> Result<()> {
        let res = self
            .client
            .copy_object()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .copy_source(copy_source(source))
            .send()
            .await;

        if let Err(e) = res {
            tracing::error!(
                "S3 copy_object failed: source={}, dest={}, error={:?}",
                source,
                destination,
                e
            );
            return Err(MoverError::object_store(
                "CopyObject",
                &destination.bucket,
                &destination.key,
                e,
            ));
        }
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        destination: &ObjectLocation,
    ) -> Result<Option<String>> {
        let res = self
            .client
            .create_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .send()
            .await
            .map_err(|e| {
                MoverError::object_store(
                    "CreateMultipartUpload",
                    &destination.bucket,
                    &destination.key,
                    e,
                )
            })?;

        Ok(res.upload_id().map(str::to_string))
    }

    async fn upload_part_copy(&self, request: &PartCopyRequest<'_>) -> Result<String> {
        let res = self
            .client
            .upload_part_copy()
            .bucket(&request.destination.bucket)
            .key(&request.destination.key)
            .upload_id(request.upload_id)
            .part_number(request.part_number)
            .copy_source(copy_source(request.source))
            .copy_source_range(&request.range)
            .send()
            .await
            .map_err(|e| {
                MoverError::object_store(
                    "UploadPartCopy",
                    &request.destination.bucket,
                    &request.destination.key,
                    e,
                )
            })?;

        part_etag(&res, request)
    }

    async fn complete_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPartInfo],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .e_tag(&p.e_tag)
                    .part_number(p.part_number)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_multipart_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(|e| {
                MoverError::object_store(
                    "CompleteMultipartUpload",
                    &destination.bucket,
                    &destination.key,
                    e,
                )
            })?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        destination: &ObjectLocation,
        upload_id: &str,
    ) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                MoverError::object_store(
                    "AbortMultipartUpload",
                    &destination.bucket,
                    &destination.key,
                    e,
                )
            })?;
        Ok(())
    }
}
