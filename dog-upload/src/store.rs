use async_trait::async_trait;
use std::time::Duration;

use crate::{ByteStream, UploadCtx, UploadResult};

/// Object operations every storage backend must provide.
///
/// Each call maps to one backend request. Sizes come from backend metadata
/// and appends are position-checked by the backend, so callers never need to
/// re-read earlier content to know how much has landed.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend label recorded in an upload's storage locator
    fn backend_name(&self) -> &'static str;

    /// Open an object for reading from offset 0.
    ///
    /// Fails with `NotFound` when the key does not exist. The backend
    /// connection is released when the stream is dropped.
    async fn read(&self, ctx: &UploadCtx, key: &str) -> UploadResult<ByteStream>;

    /// Current byte length of an object, from backend metadata
    async fn size(&self, ctx: &UploadCtx, key: &str) -> UploadResult<u64>;

    /// Remove several keys in one request.
    ///
    /// Missing keys are not an error. If the backend reports any key as not
    /// deleted the whole call fails with `PartialFailure`.
    async fn delete(&self, ctx: &UploadCtx, keys: &[String]) -> UploadResult<()>;

    /// Create or overwrite an object
    async fn write(
        &self,
        ctx: &UploadCtx,
        key: &str,
        stream: ByteStream,
        opts: WriteOptions,
    ) -> UploadResult<()>;

    /// Append to an object whose current length must equal `offset`.
    ///
    /// A missing object is created when `offset` is 0. Any other mismatch
    /// fails with `OffsetConflict` and leaves the object untouched. Returns
    /// the number of bytes appended.
    async fn append(
        &self,
        ctx: &UploadCtx,
        key: &str,
        stream: ByteStream,
        offset: u64,
        opts: WriteOptions,
    ) -> UploadResult<u64>;

    /// Time-limited URL for unauthenticated reads. Never cached.
    async fn sign_url(&self, ctx: &UploadCtx, key: &str, ttl: Duration) -> UploadResult<String>;
}

/// Object headers applied on write/append
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_disposition<S: Into<String>>(mut self, disposition: S) -> Self {
        self.content_disposition = Some(disposition.into());
        self
    }

    /// `attachment; filename=<name>`, with an empty name when none is known
    pub fn attachment(filename: Option<&str>) -> Self {
        Self::new().with_content_disposition(format!(
            "attachment; filename={}",
            filename.unwrap_or_default()
        ))
    }
}

/// Strategy for mapping an upload id onto its two storage keys
pub trait UploadKeyStrategy: Send + Sync {
    /// Key of the object holding the appended payload
    fn data_key(&self, id: &str) -> String;

    /// Key of the object holding the JSON info snapshot
    fn info_key(&self, id: &str) -> String {
        format!("{}.info", self.data_key(id))
    }
}

/// Default layout: payload at `<id>`, info at `<id>.info`
#[derive(Debug, Clone, Default)]
pub struct DefaultKeyStrategy;

impl UploadKeyStrategy for DefaultKeyStrategy {
    fn data_key(&self, id: &str) -> String {
        id.to_string()
    }
}

/// Default layout placed under a fixed namespace, e.g. `uploads/<id>`
#[derive(Debug, Clone)]
pub struct PrefixedKeyStrategy {
    prefix: String,
}

impl PrefixedKeyStrategy {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        Self { prefix }
    }
}

impl UploadKeyStrategy for PrefixedKeyStrategy {
    fn data_key(&self, id: &str) -> String {
        if self.prefix.is_empty() {
            id.to_string()
        } else {
            format!("{}/{}", self.prefix, id)
        }
    }
}
