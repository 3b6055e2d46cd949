use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use std::env;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::{
    collect_stream, ByteStream, ObjectStore, UploadCtx, UploadError, UploadResult, WriteOptions,
};

const DEFAULT_REGION: &str = "us-east-1";

/// Error code S3 returns when an append's write offset is not the object size
const INVALID_WRITE_OFFSET: &str = "InvalidWriteOffset";

/// Connection settings for [`S3ObjectStore`]
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    /// Create the bucket on connect when it does not exist
    pub create_bucket: bool,
}

impl S3Config {
    pub fn new<S: Into<String>>(bucket: S) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            create_bucket: false,
        }
    }

    /// Read settings from `DOG_UPLOAD_S3_*` environment variables
    pub fn from_env() -> UploadResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> UploadResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bucket = lookup("DOG_UPLOAD_S3_BUCKET")
            .ok_or_else(|| UploadError::invalid("DOG_UPLOAD_S3_BUCKET environment variable required"))?;

        let mut config = Self::new(bucket);
        if let Some(region) = lookup("DOG_UPLOAD_S3_REGION") {
            config.region = region;
        }
        config.endpoint_url = lookup("DOG_UPLOAD_S3_ENDPOINT");
        config.access_key_id = lookup("DOG_UPLOAD_S3_ACCESS_KEY_ID");
        config.secret_access_key = lookup("DOG_UPLOAD_S3_SECRET_ACCESS_KEY");
        // Custom endpoints (MinIO, RustFS, ...) generally need path-style addressing
        config.force_path_style = config.endpoint_url.is_some();

        if config.access_key_id.is_some() != config.secret_access_key.is_some() {
            return Err(UploadError::invalid(
                "DOG_UPLOAD_S3_ACCESS_KEY_ID and DOG_UPLOAD_S3_SECRET_ACCESS_KEY must be set together",
            ));
        }

        Ok(config)
    }

    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint<S: Into<String>>(mut self, endpoint_url: S) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self.force_path_style = true;
        self
    }

    pub fn with_credentials<A: Into<String>, S: Into<String>>(mut self, access_key_id: A, secret_access_key: S) -> Self {
        self.access_key_id = Some(access_key_id.into());
        self.secret_access_key = Some(secret_access_key.into());
        self
    }

    pub fn with_create_bucket(mut self) -> Self {
        self.create_bucket = true;
        self
    }
}

/// Object store backed by an S3 bucket with append support
/// (`PutObject` + `WriteOffsetBytes`).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from `config`, provisioning the bucket if asked to
    pub async fn connect(config: S3Config) -> UploadResult<Self> {
        let client = Self::create_client(&config).await;
        let store = Self::from_client(client, config.bucket.clone());

        if config.create_bucket {
            store.ensure_bucket(&config.region).await?;
        }

        Ok(store)
    }

    pub async fn from_env() -> UploadResult<Self> {
        Self::connect(S3Config::from_env()?).await
    }

    /// Wrap an already configured client
    pub fn from_client<S: Into<String>>(client: Client, bucket: S) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn create_client(config: &S3Config) -> Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                None,
                None,
                "dog-upload",
            ));
        }

        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url.clone());
        }

        let shared = loader.load().await;
        Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.force_path_style)
                .build(),
        )
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn ensure_bucket(&self, region: &str) -> UploadResult<()> {
        if let Err(err) = self.client.head_bucket().bucket(&self.bucket).send().await {
            if !err.as_service_error().is_some_and(|e| e.is_not_found()) {
                return Err(backend_error(err));
            }
        } else {
            return Ok(());
        }

        let mut request = self.client.create_bucket().bucket(&self.bucket);
        if region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request.send().await.map_err(backend_error)?;

        info!("Created bucket {}", self.bucket);
        Ok(())
    }
}

fn backend_error<E, R>(err: SdkError<E, R>) -> UploadError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    UploadError::backend(err)
}

/// Translate a rejected append. A wrong offset and a missing object are both
/// position conflicts; S3 does not say how long the object really is.
fn append_error<E, R>(err: SdkError<E, R>, key: &str, offset: u64) -> UploadError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.as_service_error().and_then(|e| e.code()).map(str::to_owned);
    match code.as_deref() {
        Some(INVALID_WRITE_OFFSET) => UploadError::offset_conflict(key, offset, None),
        Some("NoSuchKey") | Some("NotFound") => UploadError::offset_conflict(key, offset, Some(0)),
        _ => backend_error(err),
    }
}

/// Bytes an append added: the reported object size past `offset`, or the
/// request length when the backend does not report a size
fn appended_bytes(reported_size: Option<i64>, offset: u64, length: u64) -> u64 {
    reported_size
        .and_then(|total| u64::try_from(total).ok())
        .map(|total| total.saturating_sub(offset))
        .unwrap_or(length)
}

fn undeleted_keys(errors: &[aws_sdk_s3::types::Error]) -> Vec<String> {
    errors
        .iter()
        .map(|e| e.key().unwrap_or("<unknown>").to_string())
        .collect()
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn backend_name(&self) -> &'static str {
        "s3store"
    }

    async fn read(&self, ctx: &UploadCtx, key: &str) -> UploadResult<ByteStream> {
        ctx.run(async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| {
                    if err.as_service_error().is_some_and(|e| e.is_no_such_key()) {
                        UploadError::not_found(key)
                    } else {
                        backend_error(err)
                    }
                })?;

            let mut body = output.body;
            let stream = async_stream::stream! {
                loop {
                    match body.try_next().await {
                        Ok(Some(chunk)) => yield Ok(chunk),
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                            break;
                        }
                    }
                }
            };

            Ok(Box::pin(stream) as ByteStream)
        })
        .await
    }

    async fn size(&self, ctx: &UploadCtx, key: &str) -> UploadResult<u64> {
        ctx.run(async {
            let output = self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| {
                    if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                        UploadError::not_found(key)
                    } else {
                        backend_error(err)
                    }
                })?;

            let length = output
                .content_length()
                .ok_or_else(|| UploadError::invalid(format!("No content length reported for {}", key)))?;
            u64::try_from(length)
                .map_err(|_| UploadError::invalid(format!("Negative content length reported for {}", key)))
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(bucket = %self.bucket, request_id = %ctx.request_id))]
    async fn delete(&self, ctx: &UploadCtx, keys: &[String]) -> UploadResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        ctx.run(async {
            let objects = keys
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build().map_err(UploadError::backend))
                .collect::<UploadResult<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(UploadError::backend)?;

            let output = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(backend_error)?;

            let failed = undeleted_keys(output.errors());
            if !failed.is_empty() {
                return Err(UploadError::PartialFailure { failed });
            }

            debug!("Deleted {} objects", keys.len());
            Ok(())
        })
        .await
    }

    async fn write(
        &self,
        ctx: &UploadCtx,
        key: &str,
        stream: ByteStream,
        opts: WriteOptions,
    ) -> UploadResult<()> {
        ctx.run(async {
            let data = collect_stream(stream).await?;
            let length = data.len() as i64;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_length(length)
                .set_content_type(opts.content_type)
                .set_content_disposition(opts.content_disposition)
                .body(AwsByteStream::from(data))
                .send()
                .await
                .map_err(backend_error)?;

            debug!(key, bytes = length, "Wrote object");
            Ok(())
        })
        .await
    }

    async fn append(
        &self,
        ctx: &UploadCtx,
        key: &str,
        stream: ByteStream,
        offset: u64,
        opts: WriteOptions,
    ) -> UploadResult<u64> {
        let write_offset = i64::try_from(offset)
            .map_err(|_| UploadError::invalid(format!("Append offset {} out of range", offset)))?;

        ctx.run(async {
            let data = collect_stream(stream).await?;
            let length = data.len() as u64;

            let mut request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .content_length(length as i64)
                .write_offset_bytes(write_offset)
                .body(AwsByteStream::from(data));

            // Object headers are fixed by the request that creates the object
            if offset == 0 {
                request = request
                    .set_content_type(opts.content_type)
                    .set_content_disposition(opts.content_disposition);
            }

            let output = request
                .send()
                .await
                .map_err(|err| append_error(err, key, offset))?;
            let written = appended_bytes(output.size(), offset, length);

            debug!(key, offset, bytes = written, "Appended to object");
            Ok(written)
        })
        .await
    }

    async fn sign_url(&self, ctx: &UploadCtx, key: &str, ttl: Duration) -> UploadResult<String> {
        ctx.run(async {
            let presigning = PresigningConfig::expires_in(ttl).map_err(UploadError::backend)?;
            let request = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(backend_error)?;

            Ok(request.uri().to_string())
        })
        .await
    }
}
