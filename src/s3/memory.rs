//! In-memory [S3Api] used to exercise the harness without a server.
//!
//! Models the parts of S3 the harness depends on: multipart validation on
//! completion, v1/v2 listing with prefix, delimiter and cursors, versioned
//! buckets with delete markers, ranged reads and object ACLs. Error codes and
//! statuses follow S3. Listing faults can be injected with
//! [MemoryS3::set_listing_quirk].

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::api::{
    CompleteOutput, DeleteOutput, ListQuery, ListedPart, ListingPage, PutOutput, S3Api,
    S3ApiError,
};
use super::grants::{AccessControlList, Grant, Grantee, Owner, Permission};
use super::multipart::{PartResult, UploadOptions};
use super::partition::{ByteRange, MIN_S3_PART_SIZE};
use super::versioning::VersionRecord;
use super::S3Object;

/// Canonical id of the owner of everything stored in a [MemoryS3].
pub const MEMORY_OWNER_ID: &str = "memory-owner";
const MEMORY_OWNER_NAME: &str = "memory";
const DEFAULT_MAX_KEYS: i32 = 1000;
const MAX_PART_NUMBER: i32 = 10_000;
const TOKEN_PREFIX: &str = "token:";

/// Pagination faults a misbehaving server might produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingQuirk {
    /// Non-truncated pages carry a continuation token.
    TokenOnFinalPage,
    /// Truncated pages carry no `NextMarker` or `NextContinuationToken`.
    DropContinuationToken,
    /// Cursors are ignored, so every request returns the first page.
    RepeatFirstPage,
    /// Keys within a page come back in descending order.
    ReverseKeys,
}

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    /// `None` for a delete marker.
    body: Option<Bytes>,
    acl: AccessControlList,
}

#[derive(Debug, Default)]
struct Bucket {
    versioned: bool,
    /// Versions per key, oldest first.
    objects: BTreeMap<String, Vec<StoredVersion>>,
}

#[derive(Debug)]
struct Upload {
    object: S3Object,
    parts: BTreeMap<i32, (String, Bytes)>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    uploads: HashMap<String, Upload>,
    next_id: u64,
    requests: HashMap<&'static str, usize>,
    quirk: Option<ListingQuirk>,
    ignore_version_deletes: bool,
    failures: HashMap<&'static str, &'static str>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Counts a call to `operation`, failing it if a failure was injected.
    fn request(&mut self, operation: &'static str) -> Result<(), S3ApiError> {
        *self.requests.entry(operation).or_default() += 1;
        match self.failures.get(operation) {
            Some(code) => Err(S3ApiError::service(
                code,
                503,
                format!("{operation} failed on request"),
            )),
            None => Ok(()),
        }
    }

    fn bucket(&self, name: &str) -> Result<&Bucket, S3ApiError> {
        self.buckets.get(name).ok_or_else(|| no_such_bucket(name))
    }

    fn bucket_mut(&mut self, name: &str) -> Result<&mut Bucket, S3ApiError> {
        self.buckets.get_mut(name).ok_or_else(|| no_such_bucket(name))
    }

    fn upload(&self, object: &S3Object, upload_id: &str) -> Result<&Upload, S3ApiError> {
        self.uploads
            .get(upload_id)
            .filter(|upload| &upload.object == object)
            .ok_or_else(|| no_such_upload(upload_id))
    }

    fn upload_mut(&mut self, object: &S3Object, upload_id: &str) -> Result<&mut Upload, S3ApiError> {
        self.uploads
            .get_mut(upload_id)
            .filter(|upload| &upload.object == object)
            .ok_or_else(|| no_such_upload(upload_id))
    }

    fn version(
        &self,
        object: &S3Object,
        version_id: Option<&str>,
    ) -> Result<&StoredVersion, S3ApiError> {
        let versions = self
            .bucket(&object.bucket)?
            .objects
            .get(&object.key)
            .ok_or_else(|| no_such_key(object))?;
        match version_id {
            Some(version_id) => versions
                .iter()
                .find(|v| v.version_id == version_id)
                .ok_or_else(|| {
                    S3ApiError::service("NoSuchVersion", 404, format!("{object}?versionId={version_id}"))
                }),
            None => versions
                .last()
                .filter(|v| v.body.is_some())
                .ok_or_else(|| no_such_key(object)),
        }
    }

    fn read(
        &self,
        object: &S3Object,
        version_id: Option<&str>,
        range: Option<ByteRange>,
        clamp: bool,
    ) -> Result<Bytes, S3ApiError> {
        let version = self.version(object, version_id)?;
        let body = version
            .body
            .clone()
            .ok_or_else(|| S3ApiError::service("MethodNotAllowed", 405, "delete marker"))?;
        let Some(range) = range else {
            return Ok(body);
        };
        let len = body.len();
        let start = usize::try_from(range.start()).unwrap_or(usize::MAX);
        let end = usize::try_from(range.end()).unwrap_or(usize::MAX);
        if start >= len || (!clamp && end >= len) {
            return Err(S3ApiError::service(
                "InvalidRange",
                416,
                format!("{} is not satisfiable for {len} bytes", range.as_string()),
            ));
        }
        Ok(body.slice(start..=end.min(len - 1)))
    }

    fn store(&mut self, object: &S3Object, body: Bytes, e_tag: String) -> Result<PutOutput, S3ApiError> {
        let id = self.next_id();
        let bucket = self.bucket_mut(&object.bucket)?;
        let version_id = bucket.versioned.then(|| format!("v{id:08}"));
        let version = StoredVersion {
            version_id: version_id.clone().unwrap_or_else(|| "null".to_owned()),
            body: Some(body),
            acl: default_acl(),
        };
        let versions = bucket.objects.entry(object.key.clone()).or_default();
        if !bucket.versioned {
            versions.clear();
        }
        versions.push(version);
        Ok(PutOutput { e_tag, version_id })
    }
}

fn no_such_bucket(bucket: &str) -> S3ApiError {
    S3ApiError::service("NoSuchBucket", 404, format!("bucket {bucket} does not exist"))
}

fn no_such_upload(upload_id: &str) -> S3ApiError {
    S3ApiError::service("NoSuchUpload", 404, format!("upload {upload_id} does not exist"))
}

fn no_such_key(object: &S3Object) -> S3ApiError {
    S3ApiError::service("NoSuchKey", 404, format!("{object} does not exist"))
}

fn e_tag_of(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("\"{:016x}\"", hasher.finish())
}

fn default_acl() -> AccessControlList {
    AccessControlList {
        owner: Some(Owner {
            id: MEMORY_OWNER_ID.to_owned(),
            display_name: Some(MEMORY_OWNER_NAME.to_owned()),
        }),
        grants: vec![Grant::new(
            Grantee::canonical_user(MEMORY_OWNER_ID, Some(MEMORY_OWNER_NAME)),
            Permission::FullControl,
        )],
    }
}

/// Key or rolled-up common prefix, in listing order.
struct Entry {
    name: String,
    is_prefix: bool,
}

fn entries(bucket: &Bucket, prefix: &str, delimiter: Option<&str>) -> Vec<Entry> {
    let mut entries: Vec<Entry> = vec![];
    let live = bucket
        .objects
        .iter()
        .filter(|(key, versions)| {
            key.starts_with(prefix) && versions.last().is_some_and(|v| v.body.is_some())
        })
        .map(|(key, _)| key);
    for key in live {
        let rolled_up = delimiter
            .filter(|d| !d.is_empty())
            .and_then(|d| key[prefix.len()..].find(d).map(|at| &key[..prefix.len() + at + d.len()]));
        let entry = match rolled_up {
            Some(common) => Entry {
                name: common.to_owned(),
                is_prefix: true,
            },
            None => Entry {
                name: key.clone(),
                is_prefix: false,
            },
        };
        if entries.last().map(|e| &e.name) != Some(&entry.name) {
            entries.push(entry);
        }
    }
    entries
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    V1,
    V2,
}

/// In-memory S3 service.
#[derive(Debug)]
pub struct MemoryS3 {
    state: Mutex<State>,
    min_part_size: i64,
}

impl Default for MemoryS3 {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryS3 {
    pub fn new() -> Self {
        Self::with_min_part_size(MIN_S3_PART_SIZE)
    }

    /// A service that rejects non-final parts below `min_part_size` bytes.
    pub fn with_min_part_size(min_part_size: i64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            min_part_size,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.state().buckets.entry(bucket.to_owned()).or_default();
    }

    pub fn enable_versioning(&self, bucket: &str) {
        self.state()
            .buckets
            .entry(bucket.to_owned())
            .or_default()
            .versioned = true;
    }

    pub fn set_listing_quirk(&self, quirk: Option<ListingQuirk>) {
        self.state().quirk = quirk;
    }

    /// When set, deletes naming a version id succeed without removing anything.
    pub fn set_ignore_version_deletes(&self, ignore: bool) {
        self.state().ignore_version_deletes = ignore;
    }

    /// Makes every `operation` call fail with the S3 error `code` and status
    /// 503, or clears the failure when `code` is `None`.
    pub fn set_failure(&self, operation: &'static str, code: Option<&'static str>) {
        let mut state = self.state();
        match code {
            Some(code) => state.failures.insert(operation, code),
            None => state.failures.remove(operation),
        };
    }

    /// How many times `operation` (e.g. `"UploadPart"`) was called.
    pub fn request_count(&self, operation: &str) -> usize {
        self.state().requests.get(operation).copied().unwrap_or(0)
    }

    /// Ids of uploads that are neither completed nor aborted.
    pub fn open_uploads(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state().uploads.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn list(&self, query: &ListQuery, protocol: Protocol) -> Result<ListingPage, S3ApiError> {
        let mut state = self.state();
        state.request(match protocol {
            Protocol::V1 => "ListObjects",
            Protocol::V2 => "ListObjectsV2",
        })?;
        let quirk = state.quirk;
        let bucket = state.bucket(&query.bucket)?;

        let max_keys = query.max_keys.unwrap_or(DEFAULT_MAX_KEYS);
        if max_keys <= 0 {
            return Ok(ListingPage::default());
        }
        let max_keys = usize::try_from(max_keys).unwrap_or(usize::MAX);

        let cursor = match protocol {
            Protocol::V1 => query.marker.clone(),
            Protocol::V2 => match &query.continuation_token {
                Some(token) => Some(
                    token
                        .strip_prefix(TOKEN_PREFIX)
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            S3ApiError::service("InvalidArgument", 400, "invalid continuation token")
                        })?,
                ),
                None => query.start_after.clone(),
            },
        };
        let cursor = cursor.filter(|_| quirk != Some(ListingQuirk::RepeatFirstPage));

        let delimiter = query.delimiter.as_deref();
        let mut remaining = entries(bucket, query.prefix.as_deref().unwrap_or(""), delimiter)
            .into_iter()
            .filter(|entry| cursor.as_deref().map_or(true, |c| entry.name.as_str() > c))
            .peekable();

        let mut page = ListingPage::default();
        let mut last = None;
        for entry in remaining.by_ref().take(max_keys) {
            if entry.is_prefix {
                page.common_prefixes.push(entry.name.clone());
            } else {
                page.keys.push(entry.name.clone());
            }
            last = Some(entry.name);
        }
        page.is_truncated = remaining.peek().is_some();

        if page.is_truncated {
            page.continuation_token = match protocol {
                Protocol::V1 => last.filter(|_| delimiter.is_some_and(|d| !d.is_empty())),
                Protocol::V2 => last.map(|name| format!("{TOKEN_PREFIX}{name}")),
            };
        }
        match quirk {
            Some(ListingQuirk::TokenOnFinalPage) if !page.is_truncated => {
                page.continuation_token = Some(format!("{TOKEN_PREFIX}final"));
            }
            Some(ListingQuirk::DropContinuationToken) => page.continuation_token = None,
            Some(ListingQuirk::ReverseKeys) => page.keys.reverse(),
            _ => {}
        }
        Ok(page)
    }
}

#[async_trait]
impl S3Api for MemoryS3 {
    async fn create_multipart_upload(
        &self,
        object: &S3Object,
        _options: &UploadOptions,
    ) -> Result<String, S3ApiError> {
        let mut state = self.state();
        state.request("CreateMultipartUpload")?;
        state.bucket(&object.bucket)?;
        let upload_id = format!("upload-{:08}", state.next_id());
        state.uploads.insert(
            upload_id.clone(),
            Upload {
                object: object.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        object: &S3Object,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String, S3ApiError> {
        let mut state = self.state();
        state.request("UploadPart")?;
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(S3ApiError::service(
                "InvalidArgument",
                400,
                format!("part number {part_number} out of range"),
            ));
        }
        let upload = state.upload_mut(object, upload_id)?;
        let e_tag = e_tag_of(&body);
        upload.parts.insert(part_number, (e_tag.clone(), body));
        Ok(e_tag)
    }

    async fn upload_part_copy(
        &self,
        object: &S3Object,
        upload_id: &str,
        part_number: i32,
        source: &S3Object,
        source_version: Option<&str>,
        range: ByteRange,
    ) -> Result<String, S3ApiError> {
        let mut state = self.state();
        state.request("UploadPartCopy")?;
        state.upload(object, upload_id)?;
        let body = state.read(source, source_version, Some(range), false)?;
        let upload = state.upload_mut(object, upload_id)?;
        let e_tag = e_tag_of(&body);
        upload.parts.insert(part_number, (e_tag.clone(), body));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        object: &S3Object,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<CompleteOutput, S3ApiError> {
        let mut state = self.state();
        state.request("CompleteMultipartUpload")?;
        let upload = state.upload(object, upload_id)?;

        if parts.is_empty() {
            return Err(S3ApiError::service(
                "MalformedXML",
                400,
                "the part list must not be empty",
            ));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(S3ApiError::service(
                "InvalidPartOrder",
                400,
                "parts must be in ascending order",
            ));
        }

        let mut body = BytesMut::new();
        let mut digest = String::new();
        for (index, part) in parts.iter().enumerate() {
            let (e_tag, bytes) = upload
                .parts
                .get(&part.part_number)
                .filter(|(e_tag, _)| *e_tag == part.e_tag)
                .ok_or_else(|| {
                    S3ApiError::service(
                        "InvalidPart",
                        400,
                        format!("part {} was not uploaded with that ETag", part.part_number),
                    )
                })?;
            let is_last = index + 1 == parts.len();
            if !is_last && i64::try_from(bytes.len()).unwrap_or(i64::MAX) < self.min_part_size {
                return Err(S3ApiError::service(
                    "EntityTooSmall",
                    400,
                    format!("part {} is smaller than the minimum", part.part_number),
                ));
            }
            body.extend_from_slice(bytes);
            digest.push_str(e_tag);
        }

        let e_tag = format!(
            "\"{}-{}\"",
            e_tag_of(digest.as_bytes()).trim_matches('"'),
            parts.len()
        );
        let stored = state.store(object, body.freeze(), e_tag)?;
        state.uploads.remove(upload_id);
        Ok(CompleteOutput {
            e_tag: stored.e_tag,
            version_id: stored.version_id,
        })
    }

    async fn abort_multipart_upload(
        &self,
        object: &S3Object,
        upload_id: &str,
    ) -> Result<(), S3ApiError> {
        let mut state = self.state();
        state.request("AbortMultipartUpload")?;
        state.upload(object, upload_id)?;
        state.uploads.remove(upload_id);
        Ok(())
    }

    async fn list_parts(
        &self,
        object: &S3Object,
        upload_id: &str,
    ) -> Result<Vec<ListedPart>, S3ApiError> {
        let mut state = self.state();
        state.request("ListParts")?;
        let upload = state.upload(object, upload_id)?;
        Ok(upload
            .parts
            .iter()
            .map(|(part_number, (e_tag, bytes))| ListedPart {
                part_number: *part_number,
                e_tag: e_tag.clone(),
                size: i64::try_from(bytes.len()).ok(),
            })
            .collect())
    }

    async fn list_objects(&self, query: &ListQuery) -> Result<ListingPage, S3ApiError> {
        self.list(query, Protocol::V1)
    }

    async fn list_objects_v2(&self, query: &ListQuery) -> Result<ListingPage, S3ApiError> {
        self.list(query, Protocol::V2)
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<VersionRecord>, S3ApiError> {
        let mut state = self.state();
        state.request("ListObjectVersions")?;
        let bucket = state.bucket(bucket)?;
        let prefix = prefix.unwrap_or("");
        Ok(bucket
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .flat_map(|(key, versions)| {
                versions.iter().rev().map(move |v| VersionRecord {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    is_delete_marker: v.body.is_none(),
                })
            })
            .collect())
    }

    async fn delete_object(
        &self,
        object: &S3Object,
        version_id: Option<&str>,
    ) -> Result<DeleteOutput, S3ApiError> {
        let mut state = self.state();
        state.request("DeleteObject")?;
        let id = state.next_id();
        let ignore_version_deletes = state.ignore_version_deletes;
        let bucket = state.bucket_mut(&object.bucket)?;

        match version_id {
            Some(_) if ignore_version_deletes => Ok(DeleteOutput::default()),
            Some(version_id) => {
                let versions = bucket.objects.get_mut(&object.key);
                let removed = versions.as_ref().and_then(|versions| {
                    versions.iter().position(|v| v.version_id == version_id)
                });
                let mut outcome = DeleteOutput {
                    delete_marker: false,
                    version_id: Some(version_id.to_owned()),
                };
                if let (Some(versions), Some(index)) = (versions, removed) {
                    outcome.delete_marker = versions.remove(index).body.is_none();
                    if versions.is_empty() {
                        bucket.objects.remove(&object.key);
                    }
                }
                Ok(outcome)
            }
            None if bucket.versioned => {
                let version_id = format!("v{id:08}");
                bucket
                    .objects
                    .entry(object.key.clone())
                    .or_default()
                    .push(StoredVersion {
                        version_id: version_id.clone(),
                        body: None,
                        acl: default_acl(),
                    });
                Ok(DeleteOutput {
                    delete_marker: true,
                    version_id: Some(version_id),
                })
            }
            None => {
                bucket.objects.remove(&object.key);
                Ok(DeleteOutput::default())
            }
        }
    }

    async fn put_object(
        &self,
        object: &S3Object,
        body: Bytes,
        _metadata: Option<&HashMap<String, String>>,
    ) -> Result<PutOutput, S3ApiError> {
        let mut state = self.state();
        state.request("PutObject")?;
        let e_tag = e_tag_of(&body);
        state.store(object, body, e_tag)
    }

    async fn get_object(
        &self,
        object: &S3Object,
        version_id: Option<&str>,
        range: Option<ByteRange>,
    ) -> Result<Bytes, S3ApiError> {
        let mut state = self.state();
        state.request("GetObject")?;
        state.read(object, version_id, range, true)
    }

    async fn get_object_acl(
        &self,
        object: &S3Object,
        version_id: Option<&str>,
    ) -> Result<AccessControlList, S3ApiError> {
        let mut state = self.state();
        state.request("GetObjectAcl")?;
        Ok(state.version(object, version_id)?.acl.clone())
    }

    async fn put_object_acl(
        &self,
        object: &S3Object,
        acl: &AccessControlList,
    ) -> Result<(), S3ApiError> {
        let mut state = self.state();
        state.request("PutObjectAcl")?;
        let latest = state
            .bucket_mut(&object.bucket)?
            .objects
            .get_mut(&object.key)
            .and_then(|versions| versions.last_mut())
            .filter(|v| v.body.is_some())
            .ok_or_else(|| no_such_key(object))?;
        latest.acl = acl.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::grants::{compare_acl, ALL_USERS};
    use assert_matches::assert_matches;

    const BUCKET: &str = "memory-bucket";

    #[tokio::test]
    async fn test_unversioned_put_replaces() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "key");
        let first = api.put_object(&object, Bytes::from_static(b"one"), None).await.unwrap();
        assert_eq!(first.version_id, None);
        api.put_object(&object, Bytes::from_static(b"two"), None).await.unwrap();

        let versions = api.list_object_versions(BUCKET, None).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_id, "null");
        assert_eq!(api.get_object(&object, None, None).await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_delete_marker_hides_object() {
        let api = MemoryS3::new();
        api.enable_versioning(BUCKET);
        let object = S3Object::new(BUCKET, "key");
        let put = api.put_object(&object, Bytes::from_static(b"data"), None).await.unwrap();
        let marker = api.delete_object(&object, None).await.unwrap();
        assert!(marker.delete_marker);

        let err = api.get_object(&object, None, None).await.unwrap_err();
        assert_eq!(err.code(), Some("NoSuchKey"));
        let old = api
            .get_object(&object, put.version_id.as_deref(), None)
            .await
            .unwrap();
        assert_eq!(old, "data");

        let listed = api
            .list_objects_v2(&ListQuery {
                bucket: BUCKET.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(listed.keys.is_empty());

        let removed = api
            .delete_object(&object, marker.version_id.as_deref())
            .await
            .unwrap();
        assert!(removed.delete_marker);
        assert_eq!(api.get_object(&object, None, None).await.unwrap(), "data");
    }

    #[tokio::test]
    async fn test_ranged_get() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "ranged");
        api.put_object(&object, Bytes::from_static(b"0123456789"), None)
            .await
            .unwrap();

        let range = ByteRange::try_from((2, 4)).unwrap();
        assert_eq!(api.get_object(&object, None, Some(range)).await.unwrap(), "234");
        let past_end = ByteRange::try_from((8, 20)).unwrap();
        assert_eq!(api.get_object(&object, None, Some(past_end)).await.unwrap(), "89");
        let unsatisfiable = ByteRange::try_from((10, 12)).unwrap();
        let err = api
            .get_object(&object, None, Some(unsatisfiable))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(416));
    }

    #[tokio::test]
    async fn test_acl_round_trip() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "acl");
        api.put_object(&object, Bytes::from_static(b"x"), None).await.unwrap();

        let mut acl = api.get_object_acl(&object, None).await.unwrap();
        compare_acl(&default_acl(), &acl).unwrap();

        acl.grants.push(Grant::new(Grantee::group(ALL_USERS), Permission::Read));
        api.put_object_acl(&object, &acl).await.unwrap();
        let stored = api.get_object_acl(&object, None).await.unwrap();
        compare_acl(&acl, &stored).unwrap();
    }

    #[tokio::test]
    async fn test_upload_for_other_key_is_unknown() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        let object = S3Object::new(BUCKET, "a");
        let upload_id = api
            .create_multipart_upload(&object, &UploadOptions::default())
            .await
            .unwrap();
        assert_eq!(api.open_uploads(), vec![upload_id.clone()]);

        let err = api
            .upload_part(&object.sibling("b"), &upload_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("NoSuchUpload"));
        assert_matches!(
            api.upload_part(&object, &upload_id, 0, Bytes::new()).await,
            Err(e) if e.code() == Some("InvalidArgument")
        );
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let api = MemoryS3::new();
        api.create_bucket(BUCKET);
        api.set_failure("ListObjectVersions", Some("SlowDown"));

        let err = api.list_object_versions(BUCKET, None).await.unwrap_err();
        assert_eq!(err.code(), Some("SlowDown"));
        assert_eq!(err.status(), Some(503));
        assert_eq!(api.request_count("ListObjectVersions"), 1);

        api.set_failure("ListObjectVersions", None);
        assert!(api.list_object_versions(BUCKET, None).await.unwrap().is_empty());
    }
}
