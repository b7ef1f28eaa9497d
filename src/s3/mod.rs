//! Client-side harness components for S3 conformance suites.
//!
//! Every component drives the service through the [S3Api] trait, which is
//! implemented for [Client]. With the `test-utils` feature, `memory::MemoryS3`
//! provides an in-memory implementation.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use s3_conformance::config::client_from_env;
//! use s3_conformance::s3::{MultipartSession, PartSize, S3Object, UploadOptions};
//!
//! # tokio_test::block_on(async {
//! let client = client_from_env().await.unwrap();
//! let object = S3Object::new("my-bucket", "my-key");
//! let body = Bytes::from(vec![0u8; 12 * 1024 * 1024]);
//!
//! let session = MultipartSession::begin(&client, object, &UploadOptions::default())
//!     .await
//!     .unwrap();
//! session.resend_parts(&body, &PartSize::default(), &[2]).await.unwrap();
//! let completed = session.complete().await.unwrap();
//! assert_eq!(completed.expected_body, Some(body));
//! # })
//! ```

/// Re-export of [aws_sdk_s3::client::Client](https://docs.rs/aws-sdk-s3/latest/aws_sdk_s3/client/struct.Client.html).
///
pub use aws_sdk_s3::Client;

mod api;
mod grants;
mod listing;
mod multipart;
mod partition;
mod s3_object;
mod versioning;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use api::{
    CompleteOutput, DeleteOutput, ListQuery, ListedPart, ListingPage, PutOutput, S3Api,
    S3ApiError,
};
pub use grants::{
    canonicalize, compare_acl, compare_grants, AccessControlList, Grant, GrantError, Grantee,
    Owner, Permission, ALL_USERS, AUTHENTICATED_USERS,
};
pub use listing::{
    CrawlRequest, CrawlSummary, ExpectedPage, ListingCrawler, ListingError, ListingProtocol,
    PageMismatch,
};
pub use multipart::{
    CompletedUpload, MultipartError, MultipartSession, PartResult, PartSource, SessionState,
    UploadOptions,
};
pub use partition::{
    partition, partition_with, split_body, ByteRange, ByteRangeError, PartRange, PartSize,
    PartitionError, DEFAULT_PART_SIZE, MIN_S3_PART_SIZE,
};
pub use s3_object::S3Object;
pub use versioning::{
    list_all_versions, StressError, StressReport, VersionRecord, VersionStress, WorkerKind,
};

#[cfg(test)]
pub(crate) mod test {
    use crate::config::client_from_env;
    use crate::localstack;
    use anyhow::Result;
    use aws_sdk_s3::types::{BucketVersioningStatus, VersioningConfiguration};
    use aws_sdk_s3::Client;
    use bytes::Bytes;
    use rand::distributions::{Alphanumeric, DistString};
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    // Integration tests share a LocalStack instance rather than living in
    // tests/, since they need these crate-private helpers.
    pub async fn localstack_test_client() -> Client {
        localstack::test_utils::wait_for_localstack().await;
        client_from_env().await.unwrap()
    }

    pub async fn create_bucket(client: &Client, bucket: &str) -> Result<()> {
        match client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => match e.as_service_error() {
                Some(err)
                    if err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists() =>
                {
                    Ok(())
                }
                _ => Err(anyhow::Error::from(e)),
            },
        }
    }

    pub async fn enable_versioning(client: &Client, bucket: &str) -> Result<()> {
        client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(
                VersioningConfiguration::builder()
                    .status(BucketVersioningStatus::Enabled)
                    .build(),
            )
            .send()
            .await?;
        Ok(())
    }

    pub fn seeded_rng<H: Hash + ?Sized>(seed: &H) -> impl Rng {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        ChaCha8Rng::seed_from_u64(hasher.finish())
    }

    pub fn gen_random_file_name<R: Rng>(rng: &mut R) -> String {
        Alphanumeric.sample_string(rng, 16)
    }

    pub fn generate_random_bytes(length: usize, rng: &mut impl Rng) -> Bytes {
        let mut bytes = vec![0u8; length];
        rng.fill(&mut bytes[..]);
        Bytes::from(bytes)
    }
}
