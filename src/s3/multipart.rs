//! Client-side model of a multipart upload.
//!
//! A [MultipartSession] wraps one server-side upload id. Parts uploaded or
//! copied through the session are recorded by part number with upsert
//! semantics, so resending a part replaces the earlier record instead of
//! adding a second one. The session also remembers where each part's bytes
//! came from, which lets tests rebuild the body the completed object should
//! have.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::instrument;
use typed_builder::TypedBuilder;

use super::api::{S3Api, S3ApiError};
use super::partition::{partition_with, split_body, ByteRange, PartRange, PartSize, PartitionError};
use super::S3Object;

/// A part accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    pub part_number: i32,
    pub e_tag: String,
}

/// Options sent with `CreateMultipartUpload`.
#[derive(Debug, Clone, Default, TypedBuilder)]
pub struct UploadOptions {
    #[builder(default, setter(strip_option))]
    pub metadata: Option<HashMap<String, String>>,
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,
}

/// Where the bytes of a recorded part came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSource {
    Uploaded(Bytes),
    Copied {
        source: S3Object,
        version_id: Option<String>,
        byte_range: ByteRange,
    },
    /// Imported from `ListParts` when resuming; the bytes are unknown.
    Listed { size: Option<i64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Completed,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Open => "open",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        })
    }
}

#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("Part {part_number} covers {expected} bytes but {actual} bytes were supplied")]
    PartLengthMismatch {
        part_number: i32,
        expected: i64,
        actual: usize,
    },
    #[error("Multipart upload {upload_id} is {state}")]
    SessionFinished {
        upload_id: String,
        state: SessionState,
    },
    #[error("Content of part {0} is not known locally")]
    UnknownPartContent(i32),
    #[error("max_concurrent must be greater than 0")]
    ZeroConcurrency,
    #[error(transparent)]
    Partition(#[from] PartitionError),
    #[error("Part {part_number} failed")]
    Part {
        part_number: i32,
        #[source]
        source: S3ApiError,
    },
    #[error("Completing multipart upload {upload_id} failed")]
    Complete {
        upload_id: String,
        #[source]
        source: S3ApiError,
    },
    #[error("Aborting multipart upload {upload_id} failed")]
    Abort {
        upload_id: String,
        #[source]
        source: S3ApiError,
    },
    #[error(transparent)]
    Api(#[from] S3ApiError),
}

impl MultipartError {
    /// The underlying S3 failure, if this error came from the server.
    pub fn api_error(&self) -> Option<&S3ApiError> {
        match self {
            MultipartError::Part { source, .. }
            | MultipartError::Complete { source, .. }
            | MultipartError::Abort { source, .. }
            | MultipartError::Api(source) => Some(source),
            _ => None,
        }
    }
}

/// Outcome of a successful completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub e_tag: String,
    pub version_id: Option<String>,
    /// The part list as sent to the server.
    pub parts: Vec<PartResult>,
    /// `None` when some part's bytes are not known locally.
    pub expected_body: Option<Bytes>,
}

#[derive(Debug, Clone)]
struct RecordedPart {
    result: PartResult,
    source: PartSource,
}

#[derive(Debug)]
struct SessionInner {
    parts: BTreeMap<i32, RecordedPart>,
    state: SessionState,
}

/// One in-progress multipart upload.
///
/// Every method takes `&self`; the part map sits behind a mutex so parts may
/// be uploaded concurrently from a single session. Calling [abort] while part
/// operations are in flight is not supported.
///
/// [abort]: MultipartSession::abort
pub struct MultipartSession<'a, A: S3Api + ?Sized> {
    client: &'a A,
    object: S3Object,
    upload_id: String,
    inner: Mutex<SessionInner>,
}

impl<A: S3Api + ?Sized> fmt::Debug for MultipartSession<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartSession")
            .field("object", &self.object)
            .field("upload_id", &self.upload_id)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<'a, A: S3Api + ?Sized> MultipartSession<'a, A> {
    fn from_parts(
        client: &'a A,
        object: S3Object,
        upload_id: String,
        parts: BTreeMap<i32, RecordedPart>,
    ) -> Self {
        Self {
            client,
            object,
            upload_id,
            inner: Mutex::new(SessionInner {
                parts,
                state: SessionState::Open,
            }),
        }
    }

    /// Initiates a new multipart upload for `object`.
    #[instrument(skip(client))]
    pub async fn begin(
        client: &'a A,
        object: S3Object,
        options: &UploadOptions,
    ) -> Result<Self, MultipartError> {
        let upload_id = client.create_multipart_upload(&object, options).await?;
        tracing::info!(upload_id = %upload_id, "Initiated multipart upload");
        Ok(Self::from_parts(client, object, upload_id, BTreeMap::new()))
    }

    /// Picks up an existing upload, importing its parts from `ListParts`.
    ///
    /// Imported parts have no local content, so [expected_body] returns `None`
    /// unless they are uploaded again through this session.
    ///
    /// [expected_body]: MultipartSession::expected_body
    #[instrument(skip(client))]
    pub async fn resume(
        client: &'a A,
        object: S3Object,
        upload_id: &str,
    ) -> Result<Self, MultipartError> {
        let parts = client
            .list_parts(&object, upload_id)
            .await?
            .into_iter()
            .map(|part| {
                (
                    part.part_number,
                    RecordedPart {
                        result: PartResult {
                            part_number: part.part_number,
                            e_tag: part.e_tag,
                        },
                        source: PartSource::Listed { size: part.size },
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();
        tracing::info!(parts = parts.len(), "Resumed multipart upload");
        Ok(Self::from_parts(client, object, upload_id.to_owned(), parts))
    }

    pub fn object(&self) -> &S3Object {
        &self.object
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// Recorded parts in part-number order.
    pub fn parts(&self) -> Vec<PartResult> {
        self.inner()
            .parts
            .values()
            .map(|part| part.result.clone())
            .collect()
    }

    /// One past the highest recorded part number, or 1 for an empty session.
    pub fn next_part_number(&self) -> i32 {
        self.inner()
            .parts
            .keys()
            .next_back()
            .map_or(1, |highest| highest + 1)
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), MultipartError> {
        match self.inner().state {
            SessionState::Open => Ok(()),
            state => Err(MultipartError::SessionFinished {
                upload_id: self.upload_id.clone(),
                state,
            }),
        }
    }

    fn record(&self, result: PartResult, source: PartSource) {
        let mut inner = self.inner();
        if inner
            .parts
            .insert(
                result.part_number,
                RecordedPart {
                    result: result.clone(),
                    source,
                },
            )
            .is_some()
        {
            tracing::debug!(part_number = result.part_number, "Replaced recorded part");
        }
    }

    /// Uploads `body` as the part described by `range`.
    ///
    /// `body` must be exactly as long as `range`. On failure nothing is
    /// recorded.
    #[instrument(skip(self, body), fields(upload_id = %self.upload_id))]
    pub async fn upload_part(
        &self,
        range: &PartRange,
        body: Bytes,
    ) -> Result<PartResult, MultipartError> {
        let part_number = range.part_number;
        if i64::try_from(body.len()).ok() != Some(range.len()) {
            return Err(MultipartError::PartLengthMismatch {
                part_number,
                expected: range.len(),
                actual: body.len(),
            });
        }
        self.ensure_open()?;

        let e_tag = self
            .client
            .upload_part(&self.object, &self.upload_id, part_number, body.clone())
            .await
            .map_err(|source| MultipartError::Part {
                part_number,
                source,
            })?;
        tracing::debug!(part_number, e_tag = %e_tag, "Uploaded part");

        let result = PartResult { part_number, e_tag };
        self.record(result.clone(), PartSource::Uploaded(body));
        Ok(result)
    }

    /// Copies `range` of `source` into the part `range.part_number`.
    #[instrument(skip(self), fields(upload_id = %self.upload_id))]
    pub async fn copy_part(
        &self,
        range: &PartRange,
        source: &S3Object,
        source_version: Option<&str>,
    ) -> Result<PartResult, MultipartError> {
        let part_number = range.part_number;
        self.ensure_open()?;

        let e_tag = self
            .client
            .upload_part_copy(
                &self.object,
                &self.upload_id,
                part_number,
                source,
                source_version,
                range.byte_range,
            )
            .await
            .map_err(|source| MultipartError::Part {
                part_number,
                source,
            })?;
        tracing::debug!(part_number, byte_range = ?range.byte_range, "Copied part");

        let result = PartResult { part_number, e_tag };
        self.record(
            result.clone(),
            PartSource::Copied {
                source: source.clone(),
                version_id: source_version.map(str::to_owned),
                byte_range: range.byte_range,
            },
        );
        Ok(result)
    }

    /// Uploads every `part_size` slice of `body` in order, starting at part 1.
    pub async fn upload_body(
        &self,
        body: &Bytes,
        part_size: &PartSize,
    ) -> Result<Vec<PartResult>, MultipartError> {
        self.resend_parts(body, part_size, &[]).await
    }

    /// Like [upload_body], re-uploading each part number in `resend`
    /// immediately after its first upload.
    ///
    /// [upload_body]: MultipartSession::upload_body
    pub async fn resend_parts(
        &self,
        body: &Bytes,
        part_size: &PartSize,
        resend: &[i32],
    ) -> Result<Vec<PartResult>, MultipartError> {
        let mut results = vec![];
        for (range, bytes) in split_body(body, part_size)? {
            let mut result = self.upload_part(&range, bytes.clone()).await?;
            if resend.contains(&range.part_number) {
                tracing::info!(part_number = range.part_number, "Resending part");
                result = self.upload_part(&range, bytes).await?;
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Appends `body` after the parts already recorded, numbering from
    /// [next_part_number].
    ///
    /// [next_part_number]: MultipartSession::next_part_number
    pub async fn extend(
        &self,
        body: &Bytes,
        part_size: &PartSize,
    ) -> Result<Vec<PartResult>, MultipartError> {
        let offset = self.next_part_number() - 1;
        let mut results = vec![];
        for (range, bytes) in split_body(body, part_size)? {
            let range = range.renumbered(range.part_number + offset);
            results.push(self.upload_part(&range, bytes).await?);
        }
        Ok(results)
    }

    /// Uploads the slices of `body` with at most `max_concurrent` requests in flight.
    ///
    /// Returns results in part-number order.
    #[instrument(skip(self, body), fields(upload_id = %self.upload_id, len = body.len()))]
    pub async fn upload_body_concurrently(
        &self,
        body: &Bytes,
        part_size: &PartSize,
        max_concurrent: usize,
    ) -> Result<Vec<PartResult>, MultipartError> {
        if max_concurrent == 0 {
            return Err(MultipartError::ZeroConcurrency);
        }
        let parts = split_body(body, part_size)?;

        let mut results: Vec<PartResult> = stream::iter(parts.into_iter().map(Ok))
            .map_ok(|(range, bytes)| async move { self.upload_part(&range, bytes).await })
            .try_buffer_unordered(max_concurrent)
            .try_collect()
            .await?;
        results.sort_by_key(|part| part.part_number);

        tracing::info!(parts = results.len(), "All parts uploaded");
        Ok(results)
    }

    /// Copies `source` in `part_size` ranges, one copy-part per range,
    /// starting at part 1.
    ///
    /// `total_size` is the length of the source object.
    #[instrument(skip(self), fields(upload_id = %self.upload_id))]
    pub async fn copy_object_range(
        &self,
        source: &S3Object,
        source_version: Option<&str>,
        total_size: i64,
        part_size: &PartSize,
    ) -> Result<Vec<PartResult>, MultipartError> {
        let mut results = vec![];
        for range in partition_with(total_size, part_size)? {
            results.push(self.copy_part(&range, source, source_version).await?);
        }
        Ok(results)
    }

    /// The body the completed object should have, when every part was
    /// uploaded from local bytes.
    pub fn expected_body(&self) -> Option<Bytes> {
        let inner = self.inner();
        let mut body = BytesMut::new();
        for part in inner.parts.values() {
            match &part.source {
                PartSource::Uploaded(bytes) => body.extend_from_slice(bytes),
                _ => return None,
            }
        }
        Some(body.freeze())
    }

    /// Like [expected_body], fetching copied ranges from their source objects.
    ///
    /// [expected_body]: MultipartSession::expected_body
    #[instrument(skip(self), fields(upload_id = %self.upload_id))]
    pub async fn materialize_expected_body(&self) -> Result<Bytes, MultipartError> {
        let sources: Vec<_> = self
            .inner()
            .parts
            .values()
            .map(|part| (part.result.part_number, part.source.clone()))
            .collect();

        let mut body = BytesMut::new();
        for (part_number, source) in sources {
            match source {
                PartSource::Uploaded(bytes) => body.extend_from_slice(&bytes),
                PartSource::Copied {
                    source,
                    version_id,
                    byte_range,
                } => {
                    let bytes = self
                        .client
                        .get_object(&source, version_id.as_deref(), Some(byte_range))
                        .await
                        .map_err(|source| MultipartError::Part {
                            part_number,
                            source,
                        })?;
                    body.extend_from_slice(&bytes);
                }
                PartSource::Listed { .. } => {
                    return Err(MultipartError::UnknownPartContent(part_number))
                }
            }
        }
        Ok(body.freeze())
    }

    /// Parts as the server currently reports them.
    pub async fn list_parts(&self) -> Result<Vec<PartResult>, MultipartError> {
        Ok(self
            .client
            .list_parts(&self.object, &self.upload_id)
            .await?
            .into_iter()
            .map(|part| PartResult {
                part_number: part.part_number,
                e_tag: part.e_tag,
            })
            .collect())
    }

    /// Completes the upload with every recorded part, sorted by part number.
    ///
    /// The part list is not checked for gaps; the server decides whether it
    /// is acceptable.
    pub async fn complete(&self) -> Result<CompletedUpload, MultipartError> {
        let parts = self.parts();
        self.complete_with(parts).await
    }

    /// Completes the upload with `parts` exactly as given.
    ///
    /// Lets tests send lists with missing parts, bad ETags or out-of-order
    /// numbers.
    #[instrument(skip(self), fields(upload_id = %self.upload_id))]
    pub async fn complete_with(
        &self,
        parts: Vec<PartResult>,
    ) -> Result<CompletedUpload, MultipartError> {
        self.ensure_open()?;
        let output = self
            .client
            .complete_multipart_upload(&self.object, &self.upload_id, &parts)
            .await
            .map_err(|source| MultipartError::Complete {
                upload_id: self.upload_id.clone(),
                source,
            })?;
        self.inner().state = SessionState::Completed;
        tracing::info!(e_tag = %output.e_tag, "Completed multipart upload");

        Ok(CompletedUpload {
            e_tag: output.e_tag,
            version_id: output.version_id,
            parts,
            expected_body: self.expected_body(),
        })
    }

    /// Aborts the upload. Later part operations fail without reaching the server.
    #[instrument(skip(self), fields(upload_id = %self.upload_id))]
    pub async fn abort(&self) -> Result<(), MultipartError> {
        self.ensure_open()?;
        self.client
            .abort_multipart_upload(&self.object, &self.upload_id)
            .await
            .map_err(|source| MultipartError::Abort {
                upload_id: self.upload_id.clone(),
                source,
            })?;
        self.inner().state = SessionState::Aborted;
        tracing::info!("Aborted multipart upload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::memory::MemoryS3;
    use crate::s3::partition::{partition, MIN_S3_PART_SIZE};
    use crate::s3::test::{generate_random_bytes, seeded_rng};
    use ::function_name::named;
    use assert_matches::assert_matches;
    use bytesize::{KIB, MIB};

    const BUCKET: &str = "multipart-bucket";

    fn mb5() -> PartSize {
        PartSize::default()
    }

    async fn round_trip(size: usize, rng: &mut impl rand::Rng) {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "round-trip");
        let body = generate_random_bytes(size, rng);

        let session = MultipartSession::begin(&api, object.clone(), &UploadOptions::default())
            .await
            .unwrap();
        session.upload_body(&body, &mb5()).await.unwrap();
        let completed = session.complete().await.unwrap();

        let stored = api.get_object(&object, None, None).await.unwrap();
        assert_eq!(stored.len(), size);
        assert_eq!(stored, body);
        assert_eq!(completed.expected_body, Some(body));
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    #[named]
    async fn test_multipart_round_trip_sizes() {
        let mut rng = seeded_rng(function_name!());
        for size in [
            1,
            5 * MIB as usize,
            (5 * MIB + 100 * KIB) as usize,
            (10 * MIB + 600 * KIB) as usize,
        ] {
            round_trip(size, &mut rng).await;
        }
    }

    #[tokio::test]
    #[named]
    async fn test_resend_is_idempotent() {
        let mut rng = seeded_rng(function_name!());
        let body = generate_random_bytes((10 * MIB + 600 * KIB) as usize, &mut rng);

        for resend in [vec![0], vec![1], vec![2], vec![1, 2], vec![0, 1, 2, 3, 4, 5]] {
            let api = MemoryS3::new();
            api.create_bucket(BUCKET);
            let object = S3Object::new(BUCKET, "resend");
            let session = MultipartSession::begin(&api, object.clone(), &UploadOptions::default())
                .await
                .unwrap();

            let results = session.resend_parts(&body, &mb5(), &resend).await.unwrap();
            assert_eq!(results.len(), 3);
            assert_eq!(session.parts().len(), 3);
            session.complete().await.unwrap();

            let stored = api.get_object(&object, None, None).await.unwrap();
            assert_eq!(stored, body, "resend {resend:?}");
        }
    }

    #[tokio::test]
    async fn test_length_mismatch_records_nothing() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let session = MultipartSession::begin(
            &api,
            S3Object::new(BUCKET, "mismatch"),
            &UploadOptions::default(),
        )
        .await
        .unwrap();
        let range = partition(10, 10).unwrap()[0];

        let result = session.upload_part(&range, Bytes::from_static(b"short")).await;
        assert_matches!(
            result,
            Err(MultipartError::PartLengthMismatch {
                part_number: 1,
                expected: 10,
                actual: 5
            })
        );
        assert!(session.parts().is_empty());
        assert_eq!(api.request_count("UploadPart"), 0);
    }

    #[tokio::test]
    #[named]
    async fn test_copy_part_range() {
        let mut rng = seeded_rng(function_name!());
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let source = S3Object::new(BUCKET, "source");
        let source_body = generate_random_bytes((10 * MIB) as usize, &mut rng);
        api.put_object(&source, source_body.clone(), None).await.unwrap();

        let n = 5 * MIB as i64;
        let destination = source.sibling("copy");
        let session = MultipartSession::begin(&api, destination.clone(), &UploadOptions::default())
            .await
            .unwrap();
        let range = partition(n, n).unwrap()[0];
        session.copy_part(&range, &source, None).await.unwrap();
        let completed = session.complete().await.unwrap();
        assert_eq!(completed.expected_body, None);

        let stored = api.get_object(&destination, None, None).await.unwrap();
        assert_eq!(stored.len(), n as usize);
        assert_eq!(stored, source_body.slice(..n as usize));
        assert_eq!(session.materialize_expected_body().await.unwrap(), stored);
    }

    #[tokio::test]
    #[named]
    async fn test_copy_then_extend() {
        let mut rng = seeded_rng(function_name!());
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let source = S3Object::new(BUCKET, "source");
        let source_body = generate_random_bytes((10 * MIB + 1) as usize, &mut rng);
        api.put_object(&source, source_body.clone(), None).await.unwrap();

        let destination = source.sibling("composite");
        let session = MultipartSession::begin(&api, destination.clone(), &UploadOptions::default())
            .await
            .unwrap();
        let copied = session
            .copy_object_range(&source, None, source_body.len() as i64, &mb5())
            .await
            .unwrap();
        assert_eq!(copied.len(), 3);
        assert_eq!(session.next_part_number(), 4);

        let tail = generate_random_bytes(1024, &mut rng);
        let extended = session.extend(&tail, &mb5()).await.unwrap();
        assert_eq!(extended[0].part_number, 4);
        assert_eq!(session.next_part_number(), 5);

        // The copied source ends with a 1 byte part, so completion is rejected.
        let err = session.complete().await.unwrap_err();
        assert_eq!(
            err.api_error().and_then(S3ApiError::code),
            Some("EntityTooSmall")
        );
    }

    #[tokio::test]
    #[named]
    async fn test_concurrent_upload() {
        let mut rng = seeded_rng(function_name!());
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "concurrent");
        let body = generate_random_bytes((20 * MIB + 7) as usize, &mut rng);

        let session = MultipartSession::begin(&api, object.clone(), &UploadOptions::default())
            .await
            .unwrap();
        let results = session
            .upload_body_concurrently(&body, &mb5(), 3)
            .await
            .unwrap();
        let numbers: Vec<_> = results.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        session.complete().await.unwrap();
        assert_eq!(api.get_object(&object, None, None).await.unwrap(), body);

        assert_matches!(
            session.upload_body_concurrently(&body, &mb5(), 0).await,
            Err(MultipartError::ZeroConcurrency)
        );
    }

    #[tokio::test]
    async fn test_abort_preserves_existing_object() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "existing");
        let original = Bytes::from_static(b"original content");
        api.put_object(&object, original.clone(), None).await.unwrap();

        let session = MultipartSession::begin(&api, object.clone(), &UploadOptions::default())
            .await
            .unwrap();
        let body = Bytes::from(vec![7u8; MIN_S3_PART_SIZE as usize]);
        session.upload_body(&body, &mb5()).await.unwrap();
        session.abort().await.unwrap();

        let range = partition(1, 1).unwrap()[0];
        assert_matches!(
            session.upload_part(&range, Bytes::from_static(b"x")).await,
            Err(MultipartError::SessionFinished {
                state: SessionState::Aborted,
                ..
            })
        );
        let raw = api
            .upload_part(&object, session.upload_id(), 2, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(raw.code(), Some("NoSuchUpload"));
        assert_eq!(api.get_object(&object, None, None).await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_complete_with_missing_part_is_rejected() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "missing");
        let session = MultipartSession::begin(&api, object, &UploadOptions::default())
            .await
            .unwrap();
        // Two full parts, so only the unknown part can be rejected.
        let body = Bytes::from(vec![1u8; (10 * MIB) as usize]);
        let mut parts = session.upload_body(&body, &mb5()).await.unwrap();
        parts.push(PartResult {
            part_number: 9,
            e_tag: parts[0].e_tag.clone(),
        });

        let err = session.complete_with(parts).await.unwrap_err();
        assert_eq!(err.api_error().and_then(S3ApiError::code), Some("InvalidPart"));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[tokio::test]
    async fn test_complete_with_wrong_etag_is_rejected() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "wrong-etag");
        let session = MultipartSession::begin(&api, object.clone(), &UploadOptions::default())
            .await
            .unwrap();
        let body = Bytes::from(vec![2u8; (10 * MIB) as usize]);
        let mut parts = session.upload_body(&body, &mb5()).await.unwrap();
        parts[1].e_tag = "\"0000000000000000\"".to_owned();

        let err = session.complete_with(parts).await.unwrap_err();
        assert_eq!(err.api_error().and_then(S3ApiError::code), Some("InvalidPart"));
        assert_eq!(session.state(), SessionState::Open);
        assert_matches!(
            api.get_object(&object, None, None).await,
            Err(e) if e.code() == Some("NoSuchKey")
        );

        // The recorded parts are still valid, so completion succeeds afterwards.
        session.complete().await.unwrap();
        assert_eq!(api.get_object(&object, None, None).await.unwrap(), body);
    }

    #[tokio::test]
    async fn test_complete_with_unordered_parts_is_rejected() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let session = MultipartSession::begin(
            &api,
            S3Object::new(BUCKET, "unordered"),
            &UploadOptions::default(),
        )
        .await
        .unwrap();
        let body = Bytes::from(vec![1u8; (5 * MIB + 10) as usize]);
        let mut parts = session.upload_body(&body, &mb5()).await.unwrap();
        parts.reverse();

        let err = session.complete_with(parts).await.unwrap_err();
        assert_eq!(
            err.api_error().and_then(S3ApiError::code),
            Some("InvalidPartOrder")
        );
    }

    #[tokio::test]
    async fn test_resume_lists_parts() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "resume");
        let body = Bytes::from(vec![3u8; (10 * MIB) as usize]);
        let first = MultipartSession::begin(
            &api,
            object.clone(),
            &UploadOptions::builder().content_type("text/plain").build(),
        )
        .await
        .unwrap();
        first.upload_body(&body, &mb5()).await.unwrap();

        let resumed = MultipartSession::resume(&api, object.clone(), first.upload_id())
            .await
            .unwrap();
        assert_eq!(resumed.parts(), first.parts());
        assert_eq!(resumed.list_parts().await.unwrap(), first.parts());
        assert_eq!(resumed.next_part_number(), 3);
        assert_eq!(resumed.expected_body(), None);
        assert_matches!(
            resumed.materialize_expected_body().await,
            Err(MultipartError::UnknownPartContent(1))
        );

        resumed.extend(&Bytes::from_static(b"tail"), &mb5()).await.unwrap();
        resumed.complete().await.unwrap();
        let stored = api.get_object(&object, None, None).await.unwrap();
        assert_eq!(stored.len(), body.len() + 4);
    }

    #[tokio::test]
    async fn test_zero_length_completion_is_rejected() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let session = MultipartSession::begin(
            &api,
            S3Object::new(BUCKET, "empty"),
            &UploadOptions::default(),
        )
        .await
        .unwrap();
        assert!(session.upload_body(&Bytes::new(), &mb5()).await.unwrap().is_empty());
        let err = session.complete().await.unwrap_err();
        assert_eq!(
            err.api_error().and_then(S3ApiError::code),
            Some("MalformedXML")
        );
    }

    // *** Integration tests *** //
    mod integration {
        use super::*;
        use crate::config::HarnessEnv;
        use crate::s3::test::{create_bucket, gen_random_file_name, localstack_test_client};
        use aws_sdk_s3::Client;

        #[tokio::test]
        #[ignore = "requires a running S3 endpoint"]
        #[named]
        async fn test_multipart_resend_against_endpoint() {
            let env = HarnessEnv::from_env().unwrap();
            let client: Client = localstack_test_client().await;
            let mut rng = seeded_rng(function_name!());
            let bucket = env.bucket_name("test-multipart-resend");
            create_bucket(&client, &bucket).await.unwrap();

            let object = S3Object::new(&bucket, gen_random_file_name(&mut rng));
            let body = generate_random_bytes((10 * MIB + 600 * KIB) as usize, &mut rng);
            let session = MultipartSession::begin(&client, object.clone(), &UploadOptions::default())
                .await
                .unwrap();
            session.resend_parts(&body, &mb5(), &[1, 2]).await.unwrap();
            assert_eq!(session.list_parts().await.unwrap(), session.parts());
            session.complete().await.unwrap();

            let stored = S3Api::get_object(&client, &object, None, None)
                .await
                .unwrap();
            assert_eq!(stored, body);
        }

        #[tokio::test]
        #[ignore = "requires a running S3 endpoint"]
        #[named]
        async fn test_concurrent_upload_against_endpoint() {
            let env = HarnessEnv::from_env().unwrap();
            let client: Client = localstack_test_client().await;
            let mut rng = seeded_rng(function_name!());
            let bucket = env.bucket_name("test-multipart-concurrent");
            create_bucket(&client, &bucket).await.unwrap();

            let object = S3Object::new(&bucket, gen_random_file_name(&mut rng));
            let body = generate_random_bytes((16 * MIB) as usize, &mut rng);
            let session = MultipartSession::begin(&client, object.clone(), &UploadOptions::default())
                .await
                .unwrap();
            session
                .upload_body_concurrently(&body, &mb5(), env.max_concurrent_parts)
                .await
                .unwrap();
            let completed = session.complete().await.unwrap();
            assert_eq!(completed.parts.len(), 4);

            let stored = S3Api::get_object(&client, &object, None, None)
                .await
                .unwrap();
            assert_eq!(stored, body);
        }
    }
}
