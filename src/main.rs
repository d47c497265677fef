use std::path::Path;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use campuschat::api::{self, AppState};
use campuschat::config::Config;
use campuschat::db::Database;
use campuschat::ingest::Ingestor;
use campuschat::keypool::KeyPool;
use campuschat::llm::gemini::GeminiClient;
use campuschat::llm::Oracle;
use campuschat::relay::Relay;
use campuschat::sweep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campuschat=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        port = config.port,
        keys = config.gemini_api_keys.len(),
        "campuschat starting"
    );

    let db = Arc::new(Database::new(Path::new(&config.database_path))?);
    // An empty key pool can never answer anything; refuse to start.
    let keys = Arc::new(KeyPool::new(config.gemini_api_keys.clone())?);
    let oracle: Arc<dyn Oracle> = Arc::new(GeminiClient::new(config.gemini_base_url.clone())?);

    let state = Arc::new(AppState {
        db: Arc::clone(&db),
        ingestor: Ingestor::new(Arc::clone(&db), Arc::clone(&oracle), Arc::clone(&keys)),
        relay: Relay::new(Arc::clone(&db), Arc::clone(&oracle), Arc::clone(&keys)),
    });

    tokio::spawn(sweep::run_room_cleanup(Arc::clone(&db), sweep::SWEEP_PERIOD));

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
