use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use showrun::api::{routes::create_router, state::AppState};
use showrun::config::Config;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    let addr: SocketAddr = (config.host, config.port).into();

    // Create application state
    let state = Arc::new(AppState::new(config));

    // Build router
    let app = create_router(state);

    tracing::info!("showrun backend starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
