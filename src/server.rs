use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    api::{self, AppState, Timeouts},
    data_dir::DataDir,
    error::{Error, Result},
    stores::Stores,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// Browser origin allowed to call the API.
    pub cors_origin: String,
    pub timeouts: Timeouts,
    /// Upper bound on a multipart upload body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8081)),
            cors_origin: "http://localhost:3000".to_string(),
            timeouts: Timeouts::default(),
            max_upload_bytes: 8 * 1024 * 1024,
        }
    }
}

fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = HeaderValue::from_str(origin).map_err(|e| {
        Error::Config(format!("invalid CORS origin '{origin}': {e}"))
    })?;

    Ok(CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(origin))
}

/// The API router with the request-level layers applied.
pub fn app(state: AppState, config: &ServerConfig) -> Result<Router> {
    Ok(api::router(state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.cors_origin)?)
        .layer(TraceLayer::new_for_http()))
}

/// Serve the API until interrupted.
pub async fn run(
    config: ServerConfig,
    stores: Arc<Stores>,
    data_dir: &DataDir,
) -> Result<()> {
    let state = AppState::new(stores, data_dir, config.timeouts)?;
    let app = app(state, &config)?;

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        addr = %config.bind,
        data_dir = %data_dir.root().display(),
        "devbook listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}
