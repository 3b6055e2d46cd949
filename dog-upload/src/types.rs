use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{UploadError, UploadResult};

/// Stream of bytes for upload content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Build a [`ByteStream`] from an in-memory buffer
pub fn bytes_stream<B: Into<Bytes>>(data: B) -> ByteStream {
    let data = data.into();
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into a contiguous buffer
pub async fn collect_stream(mut stream: ByteStream) -> UploadResult<Bytes> {
    use futures_util::StreamExt;

    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Per-call context for upload operations (request id, cancellation, deadline)
#[derive(Debug, Clone)]
pub struct UploadCtx {
    pub request_id: String,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
}

impl Default for UploadCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadCtx {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` to completion unless the context is cancelled or its
    /// deadline passes first. A context that is already cancelled never
    /// polls `fut`.
    pub async fn run<F, T>(&self, fut: F) -> UploadResult<T>
    where
        F: Future<Output = UploadResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
                result = fut => result,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .map_err(|_| UploadError::DeadlineExceeded)?,
            None => guarded.await,
        }
    }
}

/// Snapshot of one logical upload, persisted as `<id>.info`.
///
/// Field names follow the established `.info` JSON layout so existing
/// objects stay readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(rename = "ID")]
    pub id: String,

    /// Declared total length; `None` while the length is deferred
    #[serde(rename = "Size", default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(rename = "SizeIsDeferred", default)]
    pub size_is_deferred: bool,

    /// Creation-time value only. Resume re-measures it from the backend.
    #[serde(rename = "Offset", default)]
    pub offset: u64,

    #[serde(rename = "MetaData", default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(rename = "IsPartial", default)]
    pub is_partial: bool,

    #[serde(rename = "IsFinal", default)]
    pub is_final: bool,

    #[serde(rename = "PartialUploads", default)]
    pub partial_uploads: Vec<String>,

    /// Backend locator: `Type` and `Key` of the data object
    #[serde(rename = "Storage", default)]
    pub storage: BTreeMap<String, String>,
}

impl FileInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self.size_is_deferred = false;
        self
    }

    pub fn with_deferred_size(mut self) -> Self {
        self.size = None;
        self.size_is_deferred = true;
        self
    }

    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Bytes still expected, when the total size is known
    pub fn remaining(&self) -> Option<u64> {
        self.size.map(|size| size.saturating_sub(self.offset))
    }
}
