//! # dog-upload: Resumable uploads on append-only object storage
//!
//! `dog-upload` maps a chunked, resumable upload protocol onto an object store
//! that supports position-checked appends. An upload-handling framework drives
//! it through the [`DataStore`] / [`Upload`] traits without knowing anything
//! about the storage model underneath.
//!
//! ## Storage layout
//!
//! Each upload is exactly two objects:
//!
//! ```text
//! <id>        raw payload, grown by one append per chunk
//! <id>.info   JSON snapshot of the upload, written once at creation
//! ```
//!
//! The id comes from the caller's `filehash` metadata attribute. The offset in
//! the snapshot is never trusted: resuming an upload re-measures it from the
//! payload object's size.
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let store = ResumableStore::new(MemoryObjectStore::new(), UploadConfig::default());
//! let ctx = UploadCtx::new();
//!
//! let info = FileInfo::new()
//!     .with_size(11)
//!     .with_metadata("filehash", "abc")
//!     .with_metadata("filename", "hello.txt");
//! let mut upload = store.create(&ctx, info).await?;
//!
//! upload.append_chunk(&ctx, 0, dog_upload::bytes_stream("hello")).await?;
//! upload.append_chunk(&ctx, 5, dog_upload::bytes_stream(" world")).await?;
//!
//! // Later, possibly from another process
//! let resumed = store.resume(&ctx, "abc").await?;
//! assert_eq!(resumed.offset(), 11);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ Upload framework │  ← protocol, HTTP, per-upload locking
//! ├──────────────────┤
//! │ ResumableStore   │  ← key derivation, offset re-measurement
//! ├──────────────────┤
//! │ ObjectStore      │  ← read / size / delete / write / append / sign
//! └──────────────────┘
//! ```

pub mod adapter;
mod config;
mod error;
mod memory_store;
mod s3_store;
pub mod store;
mod types;
mod upload;

// Re-export main types for clean API
pub use adapter::{ResumableStore, ResumableUpload};
pub use config::UploadConfig;
pub use error::{UploadError, UploadResult};
pub use memory_store::{MemoryObjectStore, StoredObject};
pub use s3_store::{S3Config, S3ObjectStore};
pub use store::{DefaultKeyStrategy, ObjectStore, PrefixedKeyStrategy, UploadKeyStrategy, WriteOptions};
pub use types::{bytes_stream, collect_stream, ByteStream, FileInfo, UploadCtx};
pub use upload::{
    ConcatableUpload, DataStore, LengthDeclarableUpload, StoreCapabilities, TerminatableUpload,
    Upload,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteStream, DataStore, FileInfo, MemoryObjectStore, ObjectStore, ResumableStore,
        ResumableUpload, TerminatableUpload, Upload, UploadConfig, UploadCtx, UploadError,
        UploadResult,
    };
}
