use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::{
    bytes_stream, collect_stream, ByteStream, ObjectStore, UploadCtx, UploadError, UploadResult,
    WriteOptions,
};

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// In-process object store with append-position semantics.
///
/// Used for tests and local development. Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    failing_deletes: Arc<RwLock<HashSet<String>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later delete request that includes `key` report it as failed
    pub async fn fail_deletes_for<S: Into<String>>(&self, key: S) {
        self.failing_deletes.write().await.insert(key.into());
    }

    /// Stop failing deletes for `key`
    pub async fn clear_delete_failure(&self, key: &str) {
        self.failing_deletes.write().await.remove(key);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend_name(&self) -> &'static str {
        "memorystore"
    }

    async fn read(&self, ctx: &UploadCtx, key: &str) -> UploadResult<ByteStream> {
        ctx.run(async {
            let objects = self.objects.read().await;
            let object = objects.get(key).ok_or_else(|| UploadError::not_found(key))?;
            Ok(bytes_stream(Bytes::copy_from_slice(&object.data)))
        })
        .await
    }

    async fn size(&self, ctx: &UploadCtx, key: &str) -> UploadResult<u64> {
        ctx.run(async {
            let objects = self.objects.read().await;
            objects
                .get(key)
                .map(|object| object.data.len() as u64)
                .ok_or_else(|| UploadError::not_found(key))
        })
        .await
    }

    async fn delete(&self, ctx: &UploadCtx, keys: &[String]) -> UploadResult<()> {
        ctx.run(async {
            let failing = self.failing_deletes.read().await;
            let mut objects = self.objects.write().await;

            let mut failed = Vec::new();
            for key in keys {
                if failing.contains(key) {
                    failed.push(key.clone());
                } else {
                    objects.remove(key);
                }
            }

            if failed.is_empty() {
                Ok(())
            } else {
                Err(UploadError::PartialFailure { failed })
            }
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
            let object = StoredObject {
                data: data.to_vec(),
                content_type: opts.content_type,
                content_disposition: opts.content_disposition,
            };
            self.objects.write().await.insert(key.to_string(), object);
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
        ctx.run(async {
            // Drain the body before taking the lock; the position check below
            // decides whether any of it lands.
            let data = collect_stream(stream).await?;

            let mut objects = self.objects.write().await;
            match objects.get_mut(key) {
                Some(object) => {
                    let current = object.data.len() as u64;
                    if current != offset {
                        return Err(UploadError::offset_conflict(key, offset, Some(current)));
                    }
                    object.data.extend_from_slice(&data);
                }
                None => {
                    if offset != 0 {
                        return Err(UploadError::offset_conflict(key, offset, Some(0)));
                    }
                    objects.insert(
                        key.to_string(),
                        StoredObject {
                            data: data.to_vec(),
                            content_type: opts.content_type,
                            content_disposition: opts.content_disposition,
                        },
                    );
                }
            }

            Ok(data.len() as u64)
        })
        .await
    }

    async fn sign_url(&self, ctx: &UploadCtx, key: &str, ttl: Duration) -> UploadResult<String> {
        // Signing never consults the object, as with a presigned S3 GET: a
        // URL for an absent key is issued and fails when fetched.
        ctx.run(async {
            let ttl = chrono::Duration::from_std(ttl)
                .map_err(|e| UploadError::invalid(format!("Invalid signed URL lifetime: {}", e)))?;
            let expires = chrono::Utc::now() + ttl;
            Ok(format!("memory:///{}?expires={}", key, expires.timestamp()))
        })
        .await
    }
}
