use aws_smithy_runtime_api::http::Response;

/// Convenience wrapper to handle http response
pub(crate) type SdkError<E> = aws_sdk_s3::error::SdkError<E, Response>;

/// Type-erased error source carried by transport failures.
pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;
