//! # S3 conformance harness
//!
//! The client-side core of a conformance suite for S3-compatible services,
//! built on [aws-sdk-s3](https://github.com/awslabs/aws-sdk-rust).
//!
//! * [s3::partition] splits bodies into part byte ranges.
//! * [s3::MultipartSession] drives multipart uploads and copies, including
//!   resent parts, and rebuilds the body the completed object should have.
//! * [s3::ListingCrawler] walks `ListObjects` and `ListObjectsV2` pages and
//!   checks the pagination contract.
//! * [s3::compare_grants] compares ACL grant sets regardless of order.
//! * [s3::VersionStress] races writers and deleters on a versioned bucket and
//!   reconciles it to empty.
//!
//! Targets are configured through the environment, see [config].
//!

// Public modules

pub mod config;
pub mod s3;

// Internal shared modules
mod localstack;
mod types;
