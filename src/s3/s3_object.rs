use std::str::FromStr;

use anyhow::{bail, Context, Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// A bucket key pair for a S3Object, with conversion from S3 urls.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// The bucket the object is in.
    pub bucket: String,
    /// The key the in the bucket for the object.
    pub key: String,
}

impl S3Object {
    /// Create a new [S3Object] using anything which can be
    /// treated as [&str].  Any leading `/` will be trimmed from
    /// the key.  No validation is done against the bucket or key
    /// to ensure they meet the AWS requirements.
    pub fn new(bucket: impl AsRef<str>, key: impl AsRef<str>) -> Self {
        S3Object {
            bucket: bucket.as_ref().to_owned(),
            key: key.as_ref().trim_start_matches('/').to_owned(),
        }
    }

    /// The value of `x-amz-copy-source` that names this object, optionally
    /// pinned to a single version.
    ///
    /// The key is passed through verbatim; callers copying keys that need
    /// percent-encoding must encode them when building the [S3Object].
    pub fn copy_source(&self, version_id: Option<&str>) -> String {
        match version_id {
            Some(version_id) => format!("{}/{}?versionId={}", self.bucket, self.key, version_id),
            None => format!("{}/{}", self.bucket, self.key),
        }
    }

    /// Another key in the same bucket.
    pub fn sibling(&self, key: impl AsRef<str>) -> Self {
        S3Object::new(&self.bucket, key)
    }
}

impl std::fmt::Display for S3Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Convert from an [Url] into a [S3Object]. The scheme
/// must be `s3` and the `path` must not be empty.
impl TryFrom<Url> for S3Object {
    type Error = Error;

    fn try_from(value: Url) -> Result<Self, Self::Error> {
        if value.scheme() != "s3" {
            bail!("S3 URL must have a scheme of s3")
        }
        let bucket = value.host_str().context("S3 URL must have host")?;
        let key = value.path();

        if key.is_empty() {
            bail!("S3 URL must have a path")
        }
        Ok(S3Object::new(bucket, key))
    }
}

/// Convert from a [&str] into a [S3Object].
/// The [&str] must be a valid `S3` [Url].
impl TryFrom<&str> for S3Object {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse::<Url>()?.try_into()
    }
}

/// Convert from [&str] into a [S3Object].
/// The [&str] must be a valid `S3` [Url].
impl FromStr for S3Object {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse::<Url>()?.try_into()
    }
}
