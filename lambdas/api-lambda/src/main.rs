use agosh_shared::config::{AppConfig, StoreBackend};
use agosh_shared::files::{FileStore, MemoryFileStore, S3FileStore};
use agosh_shared::store::dynamo::DynamoStore;
use agosh_shared::store::memory::MemoryStore;
use agosh_shared::store::Store;
use agosh_shared::AppState;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{run, service_fn, Error, Request};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let config = AppConfig::from_env()?;

    // Initialize backends once at startup
    let (store, files): (Arc<dyn Store>, Arc<dyn FileStore>) = match config.store_backend {
        StoreBackend::Dynamo => {
            let aws_config = aws_config::load_from_env().await;
            (
                Arc::new(DynamoStore::new(DynamoClient::new(&aws_config), &config.table_name)),
                Arc::new(S3FileStore::new(
                    S3Client::new(&aws_config),
                    &config.receipts_bucket,
                    config.receipts_public_base_url.clone(),
                )),
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost when the process exits");
            (Arc::new(MemoryStore::new()), Arc::new(MemoryFileStore::new()))
        }
    };
    tracing::info!(
        "Starting API with table {} and bucket {}",
        config.table_name,
        config.receipts_bucket
    );

    let state = AppState::new(store, files, config);

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
