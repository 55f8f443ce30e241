use crate::render::{self, CompositionResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/og-image/{slug}", get(og_image).head(og_image))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state.metrics.gather()?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response())
}

async fn og_image(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Response {
    let slug = slug.strip_suffix(".png").unwrap_or(&slug);
    let result = render::render_preview(&state, slug).await;
    to_http_response(result, &headers)
}

fn to_http_response(result: CompositionResult, request_headers: &HeaderMap) -> Response {
    match result {
        CompositionResult::Image {
            bytes,
            etag,
            cache_control,
            filename,
        } => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&etag) {
                headers.insert(header::ETAG, value);
            }
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_str(&cache_control)
                    .unwrap_or(HeaderValue::from_static("no-store")),
            );
            if matches_etag(request_headers, &etag) {
                return (StatusCode::NOT_MODIFIED, headers).into_response();
            }
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_str(&format!("inline; filename={filename}"))
                    .unwrap_or(HeaderValue::from_static("inline")),
            );
            headers.insert(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            );
            (headers, bytes).into_response()
        }
        CompositionResult::Fallback { location } => {
            let mut headers = HeaderMap::new();
            match HeaderValue::from_str(&location) {
                Ok(value) => {
                    headers.insert(header::LOCATION, value);
                }
                Err(_) => {
                    return ApiError::new(StatusCode::BAD_GATEWAY, "preview unavailable")
                        .into_response();
                }
            }
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            (StatusCode::FOUND, headers).into_response()
        }
    }
}

fn matches_etag(headers: &HeaderMap, etag: &str) -> bool {
    let header_value = match headers.get(header::IF_NONE_MATCH) {
        Some(value) => value.to_str().unwrap_or(""),
        None => return false,
    };
    if header_value.trim() == "*" {
        return true;
    }
    header_value
        .split(',')
        .map(|item| item.trim().trim_start_matches("W/"))
        .any(|value| value == etag)
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: serde_json::json!({ "error": message }),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::warn!(error = ?error, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "request failed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
