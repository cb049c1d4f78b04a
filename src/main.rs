use std::{net::SocketAddr, sync::Arc};

use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatelink::annotate::{Annotator, HttpAnnotator};
use gatelink::registry::{ConfigStore, Registry, SqliteStore};
use gatelink::{config, geo, handlers, AppState};

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent — env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatelink=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting gatelink on {}:{}", config.host, config.port);
    tracing::info!("Base URL: {}", config.base_url);

    // Open SQLite connection pool
    // CREATE the file if it doesn't exist yet
    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            config
                .database_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .foreign_keys(true),
        )
        .await?;

    // Run embedded migrations (files in migrations/)
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    // Build shared state
    let store = Arc::new(SqliteStore::new(db));
    store.warm_cache().await?;

    let annotator: Option<Arc<dyn Annotator>> = match &config.annotation_url {
        Some(url) => {
            tracing::info!("Click annotation service: {}", url);
            Some(Arc::new(HttpAnnotator::new(url.clone())?))
        }
        None => None,
    };

    let bind_addr = format!("{}:{}", config.host, config.port);
    let root_url = config.root_redirect_url.clone();

    let state = Arc::new(AppState {
        config,
        registry: Arc::clone(&store) as Arc<dyn Registry>,
        store: store as Arc<dyn ConfigStore>,
        annotator,
        geo_cache: geo::GeoCache::new(),
    });

    // ── Router ─────────────────────────────────────────────────────────────
    let app = Router::new()
        // Root visitors go to the configured public site
        .route(
            "/",
            get(move || async move { axum::response::Redirect::to(&root_url) }),
        )
        // Health check — returns 200 OK with no auth required
        .route("/health", get(|| async { axum::http::StatusCode::OK }))
        // Short-link resolution — the only real entry point
        .route("/:code", get(handlers::redirect::resolve))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
