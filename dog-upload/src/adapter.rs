use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::{
    bytes_stream, collect_stream, ByteStream, ConcatableUpload, DataStore, DefaultKeyStrategy,
    FileInfo, LengthDeclarableUpload, ObjectStore, StoreCapabilities, TerminatableUpload, Upload,
    UploadConfig, UploadCtx, UploadError, UploadKeyStrategy, UploadResult, WriteOptions,
};

/// Storage locator keys recorded in [`FileInfo::storage`]
pub const STORAGE_TYPE: &str = "Type";
pub const STORAGE_KEY: &str = "Key";

/// Resumable upload store over an append-capable [`ObjectStore`].
///
/// Every upload is two objects: a JSON info snapshot written once at creation
/// and a data object that grows with each appended chunk. The snapshot's
/// offset is never trusted; it is re-measured from the data object's size on
/// every resume.
#[derive(Clone)]
pub struct ResumableStore {
    store: Arc<dyn ObjectStore>,
    keys: Arc<dyn UploadKeyStrategy>,
    config: Arc<UploadConfig>,
}

impl ResumableStore {
    /// Create a new store with the default `<id>` / `<id>.info` layout
    pub fn new<S: ObjectStore + 'static>(store: S, config: UploadConfig) -> Self {
        Self::with_key_strategy(store, DefaultKeyStrategy, config)
    }

    /// Create with custom key strategy
    pub fn with_key_strategy<S: ObjectStore + 'static, K: UploadKeyStrategy + 'static>(
        store: S,
        keys: K,
        config: UploadConfig,
    ) -> Self {
        Self {
            store: Arc::new(store),
            keys: Arc::new(keys),
            config: Arc::new(config),
        }
    }

    /// Share an object store that is also used elsewhere
    pub fn from_shared(store: Arc<dyn ObjectStore>, config: UploadConfig) -> Self {
        Self {
            store,
            keys: Arc::new(DefaultKeyStrategy),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn data_key(&self, id: &str) -> String {
        self.keys.data_key(id)
    }

    pub fn info_key(&self, id: &str) -> String {
        self.keys.info_key(id)
    }

    /// Start a new upload.
    ///
    /// The id is taken from the identity attribute of `info.metadata`; nothing
    /// is written when it is absent. Two creates with the same identity write
    /// the same info object, last one wins.
    #[instrument(skip(self, ctx, info), fields(request_id = %ctx.request_id))]
    pub async fn create(&self, ctx: &UploadCtx, mut info: FileInfo) -> UploadResult<ResumableUpload> {
        let id = match info.meta(&self.config.identity_attribute) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(UploadError::missing_identity(&self.config.identity_attribute)),
        };

        let data_key = self.keys.data_key(&id);
        info.id = id;
        info.offset = 0;
        info.storage = BTreeMap::from([
            (STORAGE_TYPE.to_string(), self.store.backend_name().to_string()),
            (STORAGE_KEY.to_string(), data_key),
        ]);

        let json = serde_json::to_vec(&info)?;
        let info_key = self.keys.info_key(&info.id);
        self.store
            .write(
                ctx,
                &info_key,
                bytes_stream(json),
                WriteOptions::new().with_content_type("application/json"),
            )
            .await?;

        info!(upload_id = %info.id, "Created upload");
        Ok(ResumableUpload::new(self.clone(), info))
    }

    /// Look up an upload and re-measure its offset from the backend
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn resume(&self, ctx: &UploadCtx, id: &str) -> UploadResult<ResumableUpload> {
        let stream = self.store.read(ctx, &self.keys.info_key(id)).await?;
        // The body arrives after the headers; draining it is bounded by the
        // same cancellation and deadline as the request.
        let raw = ctx.run(collect_stream(stream)).await?;
        let mut info: FileInfo = serde_json::from_slice(&raw)?;

        info.offset = self.measured_offset(ctx, id).await?;

        debug!(upload_id = %id, offset = info.offset, "Resumed upload");
        Ok(ResumableUpload::new(self.clone(), info))
    }

    /// Bytes that have actually landed for `id`: the data object's size, or 0
    /// when nothing has been appended yet
    pub async fn measured_offset(&self, ctx: &UploadCtx, id: &str) -> UploadResult<u64> {
        match self.store.size(ctx, &self.keys.data_key(id)).await {
            Ok(size) => Ok(size),
            Err(UploadError::NotFound { .. }) => Ok(0),
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for ResumableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableStore")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl DataStore for ResumableStore {
    type Upload = ResumableUpload;

    async fn new_upload(&self, ctx: &UploadCtx, info: FileInfo) -> UploadResult<ResumableUpload> {
        self.create(ctx, info).await
    }

    async fn get_upload(&self, ctx: &UploadCtx, id: &str) -> UploadResult<ResumableUpload> {
        self.resume(ctx, id).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::basic().with_terminate()
    }
}

/// Live handle on one upload.
///
/// The offset is cached: it advances after each successful append and is only
/// re-checked against the backend by [`ResumableStore::resume`].
pub struct ResumableUpload {
    store: ResumableStore,
    info: FileInfo,
}

impl ResumableUpload {
    fn new(store: ResumableStore, info: FileInfo) -> Self {
        Self { store, info }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn offset(&self) -> u64 {
        self.info.offset
    }

    pub fn info(&self) -> &FileInfo {
        &self.info
    }

    pub fn data_key(&self) -> String {
        self.store.data_key(&self.info.id)
    }

    pub fn info_key(&self) -> String {
        self.store.info_key(&self.info.id)
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions::attachment(self.info.meta(&self.store.config.filename_attribute))
    }

    /// Append `src` at `offset`.
    ///
    /// On success the cached offset becomes `offset + written`, the position
    /// the backend just confirmed; when `offset` equals the cached offset this
    /// is the same as advancing it by `written`. Any failure, including an
    /// offset the backend disagrees with, is returned as is and the cached
    /// offset stays put.
    #[instrument(skip(self, ctx, src), fields(upload_id = %self.info.id, request_id = %ctx.request_id))]
    pub async fn append_chunk(&mut self, ctx: &UploadCtx, offset: u64, src: ByteStream) -> UploadResult<u64> {
        let data_key = self.data_key();
        let written = self
            .store
            .store
            .append(ctx, &data_key, src, offset, self.write_options())
            .await
            .map_err(|err| {
                warn!(offset, error = %err, "Append rejected");
                err
            })?;

        self.info.offset = offset + written;
        debug!(offset = self.info.offset, bytes = written, "Appended chunk");
        Ok(written)
    }

    /// Fresh stream over the whole payload
    pub async fn read_all(&self, ctx: &UploadCtx) -> UploadResult<ByteStream> {
        self.store.store.read(ctx, &self.data_key()).await
    }

    /// Delete both objects in one request. On failure the upload stays usable.
    #[instrument(skip(self, ctx), fields(upload_id = %self.info.id, request_id = %ctx.request_id))]
    pub async fn terminate(&self, ctx: &UploadCtx) -> UploadResult<()> {
        let keys = [self.info_key(), self.data_key()];
        self.store.store.delete(ctx, &keys).await.map_err(|err| {
            warn!(error = %err, "Terminate failed");
            err
        })?;

        info!("Terminated upload");
        Ok(())
    }

    /// Time-limited download URL for the payload; `None` uses the configured TTL
    pub async fn signed_url(&self, ctx: &UploadCtx, ttl: Option<Duration>) -> UploadResult<String> {
        let ttl = ttl.unwrap_or(self.store.config.signed_url_ttl);
        self.store.store.sign_url(ctx, &self.data_key(), ttl).await
    }
}

impl fmt::Debug for ResumableUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumableUpload").field("info", &self.info).finish()
    }
}

#[async_trait]
impl Upload for ResumableUpload {
    async fn get_info(&self, _ctx: &UploadCtx) -> UploadResult<FileInfo> {
        Ok(self.info.clone())
    }

    async fn write_chunk(&mut self, ctx: &UploadCtx, offset: u64, src: ByteStream) -> UploadResult<u64> {
        self.append_chunk(ctx, offset, src).await
    }

    async fn get_reader(&self, ctx: &UploadCtx) -> UploadResult<ByteStream> {
        self.read_all(ctx).await
    }
}

#[async_trait]
impl TerminatableUpload for ResumableUpload {
    async fn terminate(&self, ctx: &UploadCtx) -> UploadResult<()> {
        ResumableUpload::terminate(self, ctx).await
    }
}

// Deferred length and concatenation are not supported; the capability
// defaults accept the calls and change nothing.
impl LengthDeclarableUpload for ResumableUpload {}

impl ConcatableUpload for ResumableUpload {}
