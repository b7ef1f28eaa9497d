//! Shared SDK configuration, harness settings and tracing setup.

use anyhow::{anyhow, Context, Result};
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::iter::empty;
use tracing_subscriber::filter::EnvFilter;

use crate::localstack;

/// Create a shared `SdkConfig` pointed at the harness target.
///
/// # Example
///
/// ```
/// use aws_config;
/// use s3_conformance::config::load_from_env;
/// use s3_conformance::s3::Client;
///
/// # tokio_test::block_on(async {
/// let shared_config = load_from_env().await.unwrap();
/// let client = Client::new(&shared_config);
/// # })
/// ```
///
/// ## Endpoint
///
/// Set `S3_ENDPOINT_URL` to drive any S3-compatible server:
///
/// ```shell
/// $ export S3_ENDPOINT_URL=http://localhost:9000
/// ```
///
/// Otherwise, to drive [LocalStack](https://localstack.cloud/), set `LOCALSTACK_HOSTNAME`
/// and optionally `EDGE_PORT` if you need something other than the default of `4566`.
///
/// ## Errors
///
/// An error will be returned if either variable is set and a valid URI cannot be constructed.
///
pub async fn load_from_env() -> Result<SdkConfig> {
    let mut shared_config = aws_config::from_env();
    if let Some(uri) = localstack::get_endpoint_uri()? {
        shared_config = shared_config.endpoint_url(uri.to_string());
    }
    Ok(shared_config.load().await)
}

/// Harness settings, read from environment variables only.
#[derive(Debug, Clone, Parser)]
pub struct HarnessEnv {
    /// Address buckets by path (`host/bucket/key`) rather than by virtual host.
    #[arg(long, env = "S3_FORCE_PATH_STYLE", default_value_t = true, action = ArgAction::Set)]
    pub s3_force_path_style: bool,
    /// Prepended to every bucket name the suite creates.
    #[arg(long, env = "BUCKET_PREFIX")]
    pub bucket_prefix: Option<String>,
    /// Sequential clean-up passes allowed after a versioning stress run.
    #[arg(long, env = "RECONCILE_ATTEMPTS", default_value_t = 5)]
    pub reconcile_attempts: usize,
    /// Parts uploaded at once by concurrent multipart uploads.
    #[arg(long, env = "MAX_CONCURRENT_PARTS", default_value_t = 4)]
    pub max_concurrent_parts: usize,
}

impl HarnessEnv {
    pub fn from_env() -> Result<Self> {
        // Only environment variables are considered; the test runner's own
        // command line arguments must not leak into the settings.
        HarnessEnv::try_parse_from(empty::<OsString>())
            .context("An error occurred while parsing environment variables for the harness.")
    }

    /// `name` with the configured bucket prefix, if any.
    pub fn bucket_name(&self, name: &str) -> String {
        match &self.bucket_prefix {
            Some(prefix) => format!("{prefix}{name}"),
            None => name.to_owned(),
        }
    }
}

/// Build an S3 client for the harness target from a shared config.
pub fn s3_client(shared_config: &SdkConfig, env: &HarnessEnv) -> Client {
    let config = aws_sdk_s3::config::Builder::from(shared_config)
        .force_path_style(env.s3_force_path_style)
        .build();
    Client::from_conf(config)
}

/// [load_from_env] and [HarnessEnv::from_env] combined into a ready client.
pub async fn client_from_env() -> Result<Client> {
    let shared_config = load_from_env().await?;
    let env = HarnessEnv::from_env()?;
    tracing::debug!(?env, "Harness settings");
    Ok(s3_client(&shared_config, &env))
}

/// Install a JSON `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already installed.
///
/// ```
/// use s3_conformance::config::init_tracing;
///
/// init_tracing().unwrap();
/// tracing::info!(suite = "multipart", "Starting");
/// assert!(init_tracing().is_err());
/// ```
pub fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .try_init()
        .map_err(|e| anyhow!(e))
}
