//! A simplified S3 client that supports downloading extract objects to local files.
//! It attempts to hide the complexities of working with the AWS SDK for S3.

use crate::error::MatrixStoreError;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{event, Instrument, Level};
use url::Url;

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum S3Credentials {
    AccessKey {
        access_key: String,
        secret_key: String,
    },
    None,
}

impl S3Credentials {
    /// Create an access key credential.
    pub fn access_key(access_key: &str, secret_key: &str) -> Self {
        S3Credentials::AccessKey {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }
}

/// S3 client object.
#[derive(Clone, Debug)]
pub struct S3Client {
    /// Underlying AWS SDK S3 client object.
    client: Client,
}

impl S3Client {
    /// Creates an S3Client object
    ///
    /// # Arguments
    ///
    /// * `url`: Object storage API URL
    /// * `credentials`: Object storage account credentials
    pub fn new(url: &Url, credentials: S3Credentials) -> Self {
        let region = Region::new("us-east-1");
        let builder = aws_sdk_s3::Config::builder().behavior_version(BehaviorVersion::latest());
        let builder = match credentials {
            S3Credentials::AccessKey {
                access_key,
                secret_key,
            } => {
                let credentials = Credentials::from_keys(access_key, secret_key, None);
                builder.credentials_provider(credentials)
            }
            S3Credentials::None => builder,
        };
        let s3_config = builder
            .region(Some(region))
            .endpoint_url(url.to_string())
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(s3_config),
        }
    }

    /// Downloads an object from object storage into a local file, returning its size in bytes.
    ///
    /// The body is streamed to disk, so extracts larger than memory can be fetched.
    ///
    /// # Arguments
    ///
    /// * `bucket`: Name of the bucket
    /// * `key`: Name of the object in the bucket
    /// * `destination`: File to create or truncate
    pub async fn download_to_file(
        &self,
        bucket: &str,
        key: &str,
        destination: &Path,
    ) -> Result<u64, MatrixStoreError> {
        let mut response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .instrument(tracing::Span::current())
            .await?;
        // Fail if the content length header is missing.
        let content_length: u64 = response
            .content_length()
            .ok_or(MatrixStoreError::S3ContentLengthMissing)?
            .try_into()?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0_u64;
        // Iterate over the streaming response, copying data into the file.
        while let Some(bytes) = response
            .body
            .try_next()
            .instrument(tracing::Span::current())
            .await?
        {
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        file.flush().await?;
        if written != content_length {
            event!(
                Level::WARN,
                "s3://{}/{}: expected {} bytes, received {}",
                bucket,
                key,
                content_length,
                written
            );
        }
        Ok(written)
    }
}
