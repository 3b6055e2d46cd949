use async_trait::async_trait;
use std::time::Duration;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use dog_upload::{
    bytes_stream, collect_stream, ByteStream, ConcatableUpload, DataStore, FileInfo,
    LengthDeclarableUpload, MemoryObjectStore, ObjectStore, PrefixedKeyStrategy, ResumableStore,
    ResumableUpload, StoreCapabilities, TerminatableUpload, Upload, UploadConfig, UploadCtx,
    UploadError, UploadResult, WriteOptions,
};

/// Test factory functions
fn create_test_store() -> (MemoryObjectStore, ResumableStore) {
    let objects = MemoryObjectStore::new();
    let store = ResumableStore::new(objects.clone(), UploadConfig::default());
    (objects, store)
}

fn create_test_info(hash: &str) -> FileInfo {
    FileInfo::new()
        .with_metadata("filehash", hash)
        .with_metadata("filename", "notes.txt")
}

/// Backend whose reads open but never deliver a byte
#[derive(Clone)]
struct StalledReads {
    inner: MemoryObjectStore,
}

#[async_trait]
impl ObjectStore for StalledReads {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn read(&self, ctx: &UploadCtx, key: &str) -> UploadResult<ByteStream> {
        // Keep the NotFound behaviour; only the body stalls
        drop(self.inner.read(ctx, key).await?);
        Ok(Box::pin(futures_util::stream::pending::<std::io::Result<bytes::Bytes>>()))
    }

    async fn size(&self, ctx: &UploadCtx, key: &str) -> UploadResult<u64> {
        self.inner.size(ctx, key).await
    }

    async fn delete(&self, ctx: &UploadCtx, keys: &[String]) -> UploadResult<()> {
        self.inner.delete(ctx, keys).await
    }

    async fn write(&self, ctx: &UploadCtx, key: &str, stream: ByteStream, opts: WriteOptions) -> UploadResult<()> {
        self.inner.write(ctx, key, stream, opts).await
    }

    async fn append(
        &self,
        ctx: &UploadCtx,
        key: &str,
        stream: ByteStream,
        offset: u64,
        opts: WriteOptions,
    ) -> UploadResult<u64> {
        self.inner.append(ctx, key, stream, offset, opts).await
    }

    async fn sign_url(&self, ctx: &UploadCtx, key: &str, ttl: Duration) -> UploadResult<String> {
        self.inner.sign_url(ctx, key, ttl).await
    }
}

async fn read_payload(upload: &ResumableUpload, ctx: &UploadCtx) -> Vec<u8> {
    let stream = assert_ok!(upload.read_all(ctx).await);
    assert_ok!(collect_stream(stream).await).to_vec()
}

/// A1. Create Then Resume Starts At Zero
#[tokio::test]
async fn test_create_then_resume_starts_at_zero() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    // Act: create with identity, then resume by id
    let created = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    let resumed = assert_ok!(store.resume(&ctx, "abc").await);

    // Assert: zero offset and identical attributes
    assert_eq!(created.offset(), 0);
    assert_eq!(resumed.offset(), 0);
    assert_eq!(resumed.info().metadata, created.info().metadata);
    assert_eq!(resumed.info().storage, created.info().storage);

    // Only the info object exists until the first chunk lands
    assert_eq!(objects.keys().await, vec!["abc.info".to_string()]);
}

/// A2. Sequential Appends Are Re-Measured On Resume
#[tokio::test]
async fn test_sequential_appends_are_remeasured_on_resume() {
    let (_objects, store) = create_test_store();
    let ctx = UploadCtx::new();
    let chunks: [&'static [u8]; 4] = [b"lorem ", b"ipsum ", b"dolor ", b"sit"];

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("lorem")).await);
    let mut offset = 0;
    for chunk in chunks {
        let written = assert_ok!(upload.append_chunk(&ctx, offset, bytes_stream(chunk)).await);
        assert_eq!(written, chunk.len() as u64);
        offset += written;
        assert_eq!(upload.offset(), offset);
    }

    let expected: u64 = chunks.iter().map(|c| c.len() as u64).sum();
    let resumed = assert_ok!(store.resume(&ctx, "lorem").await);
    assert_eq!(resumed.offset(), expected);
    assert_eq!(assert_ok!(store.measured_offset(&ctx, "lorem").await), expected);

    // Resuming twice measures the same value
    let again = assert_ok!(store.resume(&ctx, "lorem").await);
    assert_eq!(again.offset(), expected);
}

/// A3. Mismatched Offset Is Rejected And Leaves Data Unchanged
#[tokio::test]
async fn test_mismatched_offset_is_rejected() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hello")).await);

    // Act: append behind and ahead of the real length
    let behind = upload.append_chunk(&ctx, 2, bytes_stream("XX")).await.unwrap_err();
    let ahead = upload.append_chunk(&ctx, 9, bytes_stream("XX")).await.unwrap_err();

    // Assert: OffsetConflict, cached offset untouched, payload untouched
    assert!(matches!(behind, UploadError::OffsetConflict { expected: 2, actual: Some(5), .. }));
    assert!(matches!(ahead, UploadError::OffsetConflict { expected: 9, .. }));
    assert_eq!(upload.offset(), 5);
    assert_eq!(objects.object("abc").await.unwrap().data, b"hello");
}

/// A4. Terminate Then Resume Is NotFound
#[tokio::test]
async fn test_terminate_then_resume_is_not_found() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hello")).await);

    assert_ok!(upload.terminate(&ctx).await);

    assert!(objects.keys().await.is_empty());
    let err = store.resume(&ctx, "abc").await.unwrap_err();
    assert!(matches!(err, UploadError::NotFound { ref key } if key == "abc.info"));
}

/// A5. Terminate Before Any Chunk Deletes The Info Object
#[tokio::test]
async fn test_terminate_without_payload() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let upload = assert_ok!(store.create(&ctx, create_test_info("empty")).await);
    assert_ok!(upload.terminate(&ctx).await);

    assert!(objects.keys().await.is_empty());
}

/// B1. Read All Reproduces Chunks In Append Order
#[tokio::test]
async fn test_read_all_reproduces_append_order() {
    let (_objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let payload: Vec<u8> = (0u16..2048).map(|i| (i % 251) as u8).collect();
    let mut upload = assert_ok!(store.create(&ctx, create_test_info("binary")).await);

    let mut offset = 0u64;
    for chunk in payload.chunks(300) {
        offset += assert_ok!(upload.append_chunk(&ctx, offset, bytes_stream(chunk.to_vec())).await);
    }

    assert_eq!(read_payload(&upload, &ctx).await, payload);

    let resumed = assert_ok!(store.resume(&ctx, "binary").await);
    assert_eq!(read_payload(&resumed, &ctx).await, payload);
}

/// B2. Read All Before Any Chunk Is NotFound
#[tokio::test]
async fn test_read_all_before_first_chunk() {
    let (_objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    let err = upload.read_all(&ctx).await.err().unwrap();
    assert!(err.is_not_found());
}

/// C1. Hello World Scenario
#[tokio::test]
async fn test_hello_world_scenario() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, FileInfo::new().with_metadata("filehash", "abc")).await);
    assert_eq!(upload.data_key(), "abc");
    assert_eq!(upload.info_key(), "abc.info");
    assert_eq!(upload.offset(), 0);

    assert_eq!(assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hello")).await), 5);
    assert_eq!(upload.offset(), 5);

    assert_eq!(assert_ok!(upload.append_chunk(&ctx, 5, bytes_stream(" world")).await), 6);
    assert_eq!(upload.offset(), 11);

    assert_eq!(read_payload(&upload, &ctx).await, b"hello world");
    assert_eq!(assert_ok!(store.resume(&ctx, "abc").await).offset(), 11);

    // No filename attribute: empty filename form
    let data = objects.object("abc").await.unwrap();
    assert_eq!(data.content_disposition.as_deref(), Some("attachment; filename="));

    assert_ok!(upload.terminate(&ctx).await);
    assert!(!objects.contains("abc").await);
    assert!(!objects.contains("abc.info").await);
    assert!(store.resume(&ctx, "abc").await.unwrap_err().is_not_found());
}

/// C2. Missing Identity Writes Nothing
#[tokio::test]
async fn test_missing_identity_writes_nothing() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let info = FileInfo::new().with_metadata("filename", "orphan.txt");
    let err = store.create(&ctx, info).await.unwrap_err();

    assert!(matches!(err, UploadError::MissingIdentity { .. }));
    assert!(objects.keys().await.is_empty());
}

/// D1. Snapshot Offset Is Never Trusted
#[tokio::test]
async fn test_snapshot_offset_is_never_trusted() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hello")).await);

    // The info object still says offset 0
    let snapshot: FileInfo = serde_json::from_slice(&objects.object("abc.info").await.unwrap().data).unwrap();
    assert_eq!(snapshot.offset, 0);

    // Payload grows behind the handle's back; resume reports the backend's length
    let mut other = assert_ok!(store.resume(&ctx, "abc").await);
    assert_ok!(other.append_chunk(&ctx, 5, bytes_stream("!!")).await);

    assert_eq!(upload.offset(), 5);
    assert_eq!(assert_ok!(store.resume(&ctx, "abc").await).offset(), 7);
}

/// D2. Stale Handle Conflicts, Re-Resume Recovers
#[tokio::test]
async fn test_stale_handle_conflicts_then_recovers() {
    let (_objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut first = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    let mut second = assert_ok!(store.resume(&ctx, "abc").await);

    // Both believe offset 0; the backend admits only one
    assert_ok!(first.append_chunk(&ctx, 0, bytes_stream("one")).await);
    let err = second.append_chunk(&ctx, 0, bytes_stream("two")).await.unwrap_err();
    assert!(err.is_offset_conflict());
    assert_eq!(second.offset(), 0);

    let mut fresh = assert_ok!(store.resume(&ctx, "abc").await);
    assert_eq!(fresh.offset(), 3);
    assert_ok!(fresh.append_chunk(&ctx, 3, bytes_stream("two")).await);
    assert_eq!(read_payload(&fresh, &ctx).await, b"onetwo");
}

/// E1. Partial Delete Failure Leaves The Upload Live
#[tokio::test]
async fn test_partial_delete_failure_leaves_upload_live() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hello")).await);

    objects.fail_deletes_for("abc").await;
    let err = upload.terminate(&ctx).await.unwrap_err();
    assert!(matches!(err, UploadError::PartialFailure { ref failed } if failed == &vec!["abc".to_string()]));

    // Handle still usable; retry after the backend recovers
    assert_ok!(upload.append_chunk(&ctx, 5, bytes_stream("!")).await);
    objects.clear_delete_failure("abc").await;
    assert_ok!(upload.terminate(&ctx).await);
    assert!(objects.keys().await.is_empty());
}

/// E2. Cancelled Context Performs No Backend Effects
#[tokio::test]
async fn test_cancelled_context_has_no_effects() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();
    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);

    let token = CancellationToken::new();
    let cancelled = UploadCtx::new().with_cancellation(token.clone());
    token.cancel();

    assert!(matches!(
        store.create(&cancelled, create_test_info("other")).await.unwrap_err(),
        UploadError::Cancelled
    ));
    assert!(matches!(
        upload.append_chunk(&cancelled, 0, bytes_stream("hello")).await.unwrap_err(),
        UploadError::Cancelled
    ));
    assert!(matches!(upload.terminate(&cancelled).await.unwrap_err(), UploadError::Cancelled));

    assert_eq!(upload.offset(), 0);
    assert_eq!(objects.keys().await, vec!["abc.info".to_string()]);
}

/// E3. Resume Gives Up On An Info Body That Never Arrives
#[tokio::test(start_paused = true)]
async fn test_resume_deadline_covers_info_body() {
    let store = ResumableStore::new(
        StalledReads { inner: MemoryObjectStore::new() },
        UploadConfig::default(),
    );
    assert_ok!(store.create(&UploadCtx::new(), create_test_info("abc")).await);

    let ctx = UploadCtx::new().with_timeout(Duration::from_millis(50));
    let err = store.resume(&ctx, "abc").await.unwrap_err();

    assert!(matches!(err, UploadError::DeadlineExceeded));
}

/// E4. Cancelling Stops A Resume Stuck On The Info Body
#[tokio::test]
async fn test_cancel_stops_resume_on_stalled_body() {
    let store = ResumableStore::new(
        StalledReads { inner: MemoryObjectStore::new() },
        UploadConfig::default(),
    );
    assert_ok!(store.create(&UploadCtx::new(), create_test_info("abc")).await);

    let token = CancellationToken::new();
    let ctx = UploadCtx::new().with_cancellation(token.clone());
    let pending = tokio::spawn(async move { store.resume(&ctx, "abc").await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, UploadError::Cancelled));
}

/// F1. Framework Drives The Store Through Capability Traits
#[tokio::test]
async fn test_framework_drives_capability_traits() {
    async fn run_upload<D>(store: &D, ctx: &UploadCtx) -> Vec<u8>
    where
        D: DataStore,
        D::Upload: TerminatableUpload + LengthDeclarableUpload + ConcatableUpload,
    {
        let mut upload = store.new_upload(ctx, create_test_info("framework")).await.unwrap();
        upload.declare_length(ctx, 9).await.unwrap();
        upload.concat_uploads(ctx, &["a".to_string(), "b".to_string()]).await.unwrap();

        let info = upload.get_info(ctx).await.unwrap();
        let n = upload.write_chunk(ctx, info.offset, bytes_stream("framework")).await.unwrap();
        upload.finish_upload(ctx).await.unwrap();
        assert_eq!(n, 9);

        let resumed = store.get_upload(ctx, "framework").await.unwrap();
        let data = collect_stream(resumed.get_reader(ctx).await.unwrap()).await.unwrap();
        resumed.terminate(ctx).await.unwrap();
        data.to_vec()
    }

    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    assert_eq!(run_upload(&store, &ctx).await, b"framework");
    assert!(objects.keys().await.is_empty());
}

/// F2. Stub Capabilities Change Nothing And Are Not Advertised
#[tokio::test]
async fn test_stub_capabilities_are_not_advertised() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    assert_eq!(store.capabilities(), StoreCapabilities::basic().with_terminate());

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc").with_deferred_size()).await);
    let before = objects.object("abc.info").await.unwrap().data;

    assert_ok!(upload.declare_length(&ctx, 100).await);
    assert_ok!(upload.concat_uploads(&ctx, &["x".to_string()]).await);
    assert_ok!(upload.finish_upload(&ctx).await);

    assert_eq!(upload.info().size, None);
    assert!(upload.info().size_is_deferred);
    assert_eq!(objects.object("abc.info").await.unwrap().data, before);
    assert_eq!(objects.keys().await, vec!["abc.info".to_string()]);
}

/// G1. Prefixed Layout Keeps Both Objects In The Namespace
#[tokio::test]
async fn test_prefixed_layout() {
    let objects = MemoryObjectStore::new();
    let store = ResumableStore::with_key_strategy(
        objects.clone(),
        PrefixedKeyStrategy::new("uploads"),
        UploadConfig::default(),
    );
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);
    assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hi")).await);

    assert_eq!(
        objects.keys().await,
        vec!["uploads/abc".to_string(), "uploads/abc.info".to_string()]
    );
    assert_eq!(upload.info().storage.get("Key").map(String::as_str), Some("uploads/abc"));
    assert_eq!(assert_ok!(store.resume(&ctx, "abc").await).offset(), 2);
}

/// G2. Signed Download URL Uses The Data Key
#[tokio::test]
async fn test_signed_download_url() {
    let (_objects, store) = create_test_store();
    let ctx = UploadCtx::new();

    let mut upload = assert_ok!(store.create(&ctx, create_test_info("abc")).await);

    // Signing does not look at the payload, so it works before the first chunk
    let early = assert_ok!(upload.signed_url(&ctx, None).await);
    assert!(early.starts_with("memory:///abc?expires="));

    assert_ok!(upload.append_chunk(&ctx, 0, bytes_stream("hello")).await);

    let url = assert_ok!(upload.signed_url(&ctx, None).await);
    assert!(url.starts_with("memory:///abc?expires="));

    let short = assert_ok!(upload.signed_url(&ctx, Some(Duration::from_secs(5))).await);
    assert!(short.starts_with("memory:///abc?expires="));
}

/// G3. Malformed Info Object Surfaces A Serialization Error
#[tokio::test]
async fn test_malformed_info_object() {
    let (objects, store) = create_test_store();
    let ctx = UploadCtx::new();
    assert_ok!(objects.write(&ctx, "broken.info", bytes_stream("{not json"), WriteOptions::new()).await);

    let err = store.resume(&ctx, "broken").await.unwrap_err();
    assert!(matches!(err, UploadError::Serialization { .. }));
}
