use std::sync::Arc;

use anyhow::Context;
use storefront::config::Config;
use storefront::http::{self, AppState};
use storefront::service::Storefront;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting storefront service");

    let config = Config::from_env()?;
    tracing::info!(
        "Loaded configuration: db={} shipping={} tax={}%",
        config.database_path.display(),
        config.charges.shipping_cost,
        config.charges.tax_rate_percent
    );

    if config.tokens.is_empty() {
        tracing::warn!(
            "No AUTH_TOKENS configured. Every authenticated route will answer 401 \
            until tokens are provided as token=user:role pairs."
        );
    }

    let db = sled::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path.display()))?;
    let storefront = Storefront::new(Arc::new(db), config.charges)?;
    let state = Arc::new(AppState::new(storefront, Arc::new(config.tokens.clone())));

    let app = http::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
