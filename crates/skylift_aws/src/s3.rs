//! S3 implementation of the part-store seam.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use skylift_core::upload::{CompletedPartRecord, PartStore};
use skylift_core::BoxError;

/// [`PartStore`] over an S3 bucket.
#[derive(Clone)]
pub struct S3PartStore {
    client: aws_sdk_s3::Client,
}

impl S3PartStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Builds a store from the ambient AWS configuration.
    pub async fn from_env() -> Self {
        Self::new(crate::client::s3_client().await)
    }
}

#[async_trait]
impl PartStore for S3PartStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), BoxError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await?;
        Ok(())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> Result<String, BoxError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| BoxError::from("upload id missing in create-multipart response"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<Option<String>, BoxError> {
        let uploaded = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await?;
        Ok(uploaded.e_tag().map(str::to_string))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPartRecord>,
    ) -> Result<(), BoxError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts(parts)))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await?;
        Ok(())
    }
}

fn completed_parts(records: Vec<CompletedPartRecord>) -> Vec<CompletedPart> {
    records
        .into_iter()
        .map(|record| {
            CompletedPart::builder()
                .part_number(record.part_number)
                .set_e_tag(record.etag)
                .build()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_parts_preserve_order_and_tags() {
        let records = vec![
            CompletedPartRecord {
                part_number: 1,
                etag: Some("etag-1".to_string()),
            },
            CompletedPartRecord {
                part_number: 2,
                etag: None,
            },
        ];

        let parts = completed_parts(records);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].part_number(), Some(1));
        assert_eq!(parts[0].e_tag(), Some("etag-1"));
        assert_eq!(parts[1].part_number(), Some(2));
        assert_eq!(parts[1].e_tag(), None);
    }
}
