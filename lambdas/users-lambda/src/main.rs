use aws_sdk_dynamodb::Client as DynamoClient;
use emt_shared::{config::Config, AppState};
use lambda_http::{run, service_fn, tracing, Error, Request};
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    // Clients and config are built once per cold start and reused across invocations
    let aws_config = aws_config::load_from_env().await;
    let config = Config::from_env();
    tracing::info!(
        "Users Lambda starting (table: {}, override tier: {})",
        config.table_name,
        if config.admin_override_key.is_some() { "enabled" } else { "disabled" }
    );

    let state = AppState::new(DynamoClient::new(&aws_config), config);

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
