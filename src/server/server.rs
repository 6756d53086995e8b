use std::error::Error;
use std::sync::Arc;
use axum::{Router, extract::DefaultBodyLimit, routing::{get, post}};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::inference::CascadeEngine;
use super::routes;

/// Builds the application router.
///
/// # Arguments
///
/// * `engine` - Shared cascade engine
/// * `max_upload_bytes` - Request body limit for uploads
pub fn router(engine: Arc<CascadeEngine>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(routes::health_check))
        .route("/api/classify", post(routes::classify))
        .route("/api/v1/models", get(routes::list_models))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        // Browsers call the API from any origin
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

/// API server for classification requests
pub struct ApiServer {
    engine: Arc<CascadeEngine>,
    host: String,
    port: u16,
    max_upload_bytes: usize,
}

impl ApiServer {
    pub fn new(engine: Arc<CascadeEngine>, host: String, port: u16, max_upload_bytes: usize) -> Self {
        info!("Creating new API server on {}:{}", host, port);
        Self {
            engine,
            host,
            port,
            max_upload_bytes,
        }
    }

    pub async fn start(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let app = router(Arc::clone(&self.engine), self.max_upload_bytes);

        info!("Starting server on {}:{}", self.host, self.port);
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;

        info!("Server started successfully");
        axum::serve(listener, app).await?;
        Ok(())
    }
}
