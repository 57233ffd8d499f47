use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use common::Result;
use common::config::Settings;
use tracing::info;

/// Minimal view of a bucket: what the pipeline lists, reads and purges.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete_object(&self, key: &str) -> Result<()>;
    fn bucket(&self) -> &str;
}

pub struct S3Storage {
    bucket: String,
    client: S3Client,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    /// Builds a client from static keys when configured, otherwise from the
    /// default AWS provider chain.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let client = match settings.static_credentials() {
            Some((access_key, secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "static");

                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new(settings.region.clone()))
                    .credentials_provider(credentials);

                if let Some(endpoint) = &settings.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }

                S3Client::from_conf(builder.build())
            }
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(settings.region.clone()))
                    .load()
                    .await;

                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &settings.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }

                S3Client::from_conf(builder.build())
            }
        };

        info!(bucket = %settings.bucket, "S3 client initialised");
        Ok(Self::new(client, &settings.bucket))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| common::Error::Listing {
                prefix: prefix.to_string(),
                message: match e {
                    SdkError::ServiceError(err) => err.into_err().to_string(),
                    other => other.to_string(),
                },
            })?;

            if let Some(contents) = response.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            continuation_token = response.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| common::Error::Download {
                key: key.to_string(),
                message: match e {
                    SdkError::ServiceError(err) if err.err().is_no_such_key() => {
                        format!("Object not found in bucket {}", self.bucket)
                    }
                    SdkError::ServiceError(err) => err.into_err().to_string(),
                    other => other.to_string(),
                },
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| common::Error::Download {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(err) => common::Error::Storage(err.into_err().to_string()),
                _ => common::Error::Storage(e.to_string()),
            })?;

        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
