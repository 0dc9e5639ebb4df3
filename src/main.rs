use std::error::Error;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Optional .env for local runs; a missing file is fine in production.
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = api::AppConfig::from_env()?;
    tracing::info!(
        bind = %config.bind_address,
        workers = config.worker_count,
        assistant = %config.assistant_bin,
        "starting review-relay"
    );

    // Fatal by design: an unopenable database aborts startup.
    let state = api::build_state(config).await?;
    api::start(state).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,review_engine=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
