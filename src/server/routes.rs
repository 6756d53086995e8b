use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{Instrument, Span, error, info, info_span, warn};
use uuid::Uuid;

use crate::inference::{CascadeEngine, ModelDetails};
use super::types::{ApiResponse, ErrorBody};

const IMAGE_FIELD: &str = "image";

/// Returns a health check response
pub async fn health_check() -> &'static str {
    info!("Health check endpoint called");
    "medcascade is running!"
}

/// Lists the router and domain models the engine was built with.
pub async fn list_models(State(engine): State<Arc<CascadeEngine>>) -> Json<ApiResponse<Vec<ModelDetails>>> {
    info!("Listing {} models", engine.models().len());
    Json(ApiResponse::success(engine.models().to_vec()))
}

/// Classifies the image in multipart field `image`.
///
/// 200 with the classification, 400 when the field is missing or the bytes
/// are not an image, 500 for anything that went wrong on our side.
pub async fn classify(
    State(engine): State<Arc<CascadeEngine>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let span = info_span!("classify", request_id = %Uuid::new_v4());
    async move {
        let bytes = match read_image(multipart).await {
            Ok(bytes) => bytes,
            Err(response) => return response,
        };
        info!("Received {} byte image", bytes.len());

        // Evaluation is CPU bound; keep it off the async workers
        let span = Span::current();
        let outcome = tokio::task::spawn_blocking(move || span.in_scope(|| engine.classify(&bytes))).await;

        match outcome {
            Ok(Ok(classification)) => {
                info!(
                    "Classified as {} / {}",
                    classification.domain, classification.class_name
                );
                (StatusCode::OK, Json(classification)).into_response()
            }
            Ok(Err(e)) if e.is_client_error() => {
                warn!("Rejected upload: {}", e);
                error_response(StatusCode::BAD_REQUEST, e.to_string())
            }
            Ok(Err(e)) => {
                error!("Classification failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Err(e) => {
                error!("Classification task failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Classification task failed".to_string())
            }
        }
    }
    .instrument(span)
    .await
}

/// Pulls the `image` field out of the form. Anything short of a readable
/// field counts as no upload, except an oversized body.
async fn read_image(multipart: Result<Multipart, MultipartRejection>) -> Result<Bytes, Response> {
    let no_image = || error_response(StatusCode::BAD_REQUEST, "No image uploaded".to_string());

    let mut multipart = multipart.map_err(|e| {
        warn!("Malformed form: {}", e);
        no_image()
    })?;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(IMAGE_FIELD) => {
                return field.bytes().await.map_err(|e| {
                    warn!("Failed to read image field: {}", e);
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        error_response(StatusCode::PAYLOAD_TOO_LARGE, e.body_text())
                    } else {
                        no_image()
                    }
                });
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(no_image()),
            Err(e) => {
                warn!("Malformed form: {}", e);
                if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    return Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, e.body_text()));
                }
                return Err(no_image());
            }
        }
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}
