use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderName, HeaderValue, Method, header};
use common::storage::filesystem::FilesystemPackageStore;
use common::upk::ZipUpkTranslator;
use server::config::{AppConfig, CorsConfig};
use server::database::init_db;
use server::scanner::run_scanner;
use server::state::AppState;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = AppConfig::load().context("Failed to load config")?;

    let db = init_db(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    info!("Database ready");

    let store = FilesystemPackageStore::new(
        config.storage.root.clone(),
        config.storage.max_upload_size,
    )
    .await
    .with_context(|| {
        format!(
            "Failed to initialize package storage at {}",
            config.storage.root.display()
        )
    })?;
    tokio::fs::create_dir_all(&config.storage.upload_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.storage.upload_dir.display()
            )
        })?;

    let state = AppState {
        db,
        store: Arc::new(store),
        translator: Arc::new(ZipUpkTranslator::default()),
        config: config.clone(),
    };

    if config.scanner.enabled {
        tokio::spawn(run_scanner(
            state.db.clone(),
            Arc::clone(&state.store),
            Arc::clone(&state.translator),
            config.scanner.clone(),
        ));
    } else {
        info!("In-process scanner disabled, relying on POST /api/v1/scanner/run");
    }

    let app = server::build_router(state).layer(cors_layer(&config.server.cors));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running at http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allow_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::RANGE,
            HeaderName::from_static("x-entity-id"),
        ])
        .expose_headers([
            header::CONTENT_RANGE,
            header::CONTENT_DISPOSITION,
            header::ACCEPT_RANGES,
        ])
        .max_age(Duration::from_secs(config.max_age));

    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}
