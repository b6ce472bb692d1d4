//! SDK client construction from the ambient AWS configuration.

use aws_config::{BehaviorVersion, SdkConfig};

/// Loads the default AWS configuration (environment, profile, instance
/// metadata) once per caller.
pub async fn sdk_config() -> SdkConfig {
    aws_config::load_defaults(BehaviorVersion::latest()).await
}

/// Returns a configured S3 client.
pub async fn s3_client() -> aws_sdk_s3::Client {
    aws_sdk_s3::Client::new(&sdk_config().await)
}

/// Returns a configured SESv2 client.
pub async fn sesv2_client() -> aws_sdk_sesv2::Client {
    aws_sdk_sesv2::Client::new(&sdk_config().await)
}

/// Returns a configured Step Functions client.
pub async fn sfn_client() -> aws_sdk_sfn::Client {
    aws_sdk_sfn::Client::new(&sdk_config().await)
}
