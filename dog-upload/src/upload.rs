use async_trait::async_trait;
use crate::{ByteStream, FileInfo, UploadCtx, UploadResult};

/// Entry point an upload-handling framework drives: create and look up uploads
#[async_trait]
pub trait DataStore: Send + Sync {
    type Upload: Upload;

    /// Start a new upload described by `info`
    async fn new_upload(&self, ctx: &UploadCtx, info: FileInfo) -> UploadResult<Self::Upload>;

    /// Resume an existing upload by id
    async fn get_upload(&self, ctx: &UploadCtx, id: &str) -> UploadResult<Self::Upload>;

    /// Extended capabilities this store actually supports
    fn capabilities(&self) -> StoreCapabilities;
}

/// Core operations on a single upload.
///
/// Callers must not run two `write_chunk` calls for the same upload at the
/// same time; the backend accepts only one append per offset.
#[async_trait]
pub trait Upload: Send + Sync {
    /// Current view of the upload, including the cached offset
    async fn get_info(&self, ctx: &UploadCtx) -> UploadResult<FileInfo>;

    /// Append `src` at `offset` and return the number of bytes written
    async fn write_chunk(&mut self, ctx: &UploadCtx, offset: u64, src: ByteStream) -> UploadResult<u64>;

    /// Stream of the full payload written so far
    async fn get_reader(&self, ctx: &UploadCtx) -> UploadResult<ByteStream>;

    /// Called once the last byte has arrived
    async fn finish_upload(&mut self, _ctx: &UploadCtx) -> UploadResult<()> {
        Ok(())
    }
}

/// Uploads that can be deleted before or after completion
#[async_trait]
pub trait TerminatableUpload: Upload {
    async fn terminate(&self, ctx: &UploadCtx) -> UploadResult<()>;
}

/// Uploads whose total length may be declared after creation.
///
/// The default accepts and ignores the length.
#[async_trait]
pub trait LengthDeclarableUpload: Upload {
    async fn declare_length(&mut self, _ctx: &UploadCtx, _length: u64) -> UploadResult<()> {
        Ok(())
    }
}

/// Uploads assembled from several partial uploads.
///
/// The default accepts and ignores the partial upload ids.
#[async_trait]
pub trait ConcatableUpload: Upload {
    async fn concat_uploads(&mut self, _ctx: &UploadCtx, _partial_ids: &[String]) -> UploadResult<()> {
        Ok(())
    }
}

/// Extended capabilities advertised by a [`DataStore`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub terminate: bool,
    pub declare_length: bool,
    pub concatenate: bool,
}

impl StoreCapabilities {
    /// Core operations only
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn with_terminate(mut self) -> Self {
        self.terminate = true;
        self
    }

    pub fn with_declare_length(mut self) -> Self {
        self.declare_length = true;
        self
    }

    pub fn with_concatenate(mut self) -> Self {
        self.concatenate = true;
        self
    }
}
