//! Endpoint resolution for S3-compatible targets and LocalStack.

use anyhow::{Context, Result};
use http::Uri;
use std::env;
use std::str::FromStr;

/// Resolve the endpoint the harness should talk to.
///
/// `S3_ENDPOINT_URL` names any S3-compatible server and wins when set.
/// Otherwise a LocalStack endpoint is built from `LOCALSTACK_HOSTNAME` and
/// `EDGE_PORT` (default `4566`). Returns `None` when neither is set, leaving
/// the SDK to pick the AWS endpoint.
///
/// Ref: https://docs.localstack.cloud/localstack/configuration/
///
pub(crate) fn get_endpoint_uri() -> Result<Option<Uri>> {
    if let Ok(url) = env::var("S3_ENDPOINT_URL") {
        let uri = Uri::from_str(&url).context(format!("Failed to parse S3_ENDPOINT_URL: {}", url))?;
        return Ok(Some(uri));
    }
    match env::var("LOCALSTACK_HOSTNAME") {
        Ok(host) => {
            let port = env::var("EDGE_PORT").unwrap_or_else(|_| "4566".to_string());
            let uri = format!("http://{}:{}", host, port);
            let uri =
                Uri::from_str(&uri).context(format!("Failed to parse LocalStack URI: {}", uri))?;
            Ok(Some(uri))
        }
        Err(_) => Ok(None),
    }
}
