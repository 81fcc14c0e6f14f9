use std::io::{Error, ErrorKind};

use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::aws::aws_sdk_config;

use super::{BlobBackend, WriteOutcome};

/// S3-backed blob backend. The version tag is the object's `ETag`; optimistic
/// concurrency rides on S3's real conditional-write support (`If-Match` /
/// `If-None-Match`) rather than the local backend's process-local simulation.
pub(crate) struct S3Backend {
    bucket: String,
    prefix: String,
}

impl S3Backend {
    pub fn new(bucket_and_prefix: &str) -> Self {
        let (bucket, prefix) = match bucket_and_prefix.split_once('/') {
            Some((bucket, prefix)) => (bucket.to_string(), format!("{prefix}/")),
            None => (bucket_and_prefix.to_string(), String::new()),
        };

        Self { bucket, prefix }
    }

    fn client(&self) -> std::io::Result<Client> {
        Ok(Client::new(aws_sdk_config()?))
    }

    fn key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

impl BlobBackend for S3Backend {
    async fn read_raw(&self, path: &str) -> std::io::Result<Option<(Vec<u8>, String)>> {
        let client = self.client()?;

        let result = client.get_object().bucket(&self.bucket).key(self.key(path)).send().await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| Error::new(ErrorKind::Other, format!("failed to read S3 object body: {e}")))?
                    .into_bytes()
                    .to_vec();

                Ok(Some((bytes, etag)))
            }
            Err(SdkError::ServiceError(e)) if e.err().is_no_such_key() => Ok(None),
            Err(e) => Err(Error::new(ErrorKind::Other, format!("S3 get_object failed: {e}"))),
        }
    }

    async fn write_raw(&self, path: &str, buf: &[u8], expected_version: Option<&str>) -> std::io::Result<WriteOutcome> {
        let client = self.client()?;
        let mut request = client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(buf.to_vec()));

        request = match expected_version {
            Some(etag) => request.if_match(etag.to_string()),
            None => request.if_none_match("*"),
        };

        match request.send().await {
            Ok(output) => {
                let version = output.e_tag().unwrap_or_default().trim_matches('"').to_string();
                Ok(WriteOutcome::Written { version })
            }
            Err(SdkError::ServiceError(e)) if e.raw().status().as_u16() == 412 => Ok(WriteOutcome::Conflict),
            Err(e) => Err(Error::new(ErrorKind::Other, format!("S3 put_object failed: {e}"))),
        }
    }
}
