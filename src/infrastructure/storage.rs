use crate::config::MoverConfig;
use crate::services::client_factory::RegionalClientFactory;
use std::env;
use std::sync::Arc;
use tracing::info;

pub async fn setup_client_factory(config: &MoverConfig) -> Arc<RegionalClientFactory> {
    let mut loader = aws_config::from_env();

    if let Some(endpoint_url) = &config.s3_endpoint {
        info!("☁️  S3 endpoint override: {}", endpoint_url);
        loader = loader.endpoint_url(endpoint_url);
    }

    // Static keys for MinIO style deployments; otherwise the default provider chain.
    if let (Ok(access_key), Ok(secret_key)) =
        (env::var("S3_ACCESS_KEY"), env::var("S3_SECRET_KEY"))
    {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }

    let aws_config = loader.load().await;

    info!(
        "☁️  S3 Storage: uploads from {} (default destination: {})",
        config.upload_bucket, config.default_storage_bucket
    );

    Arc::new(RegionalClientFactory::new(
        aws_config,
        config.s3_endpoint.is_some(),
    ))
}
