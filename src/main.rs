#![allow(clippy::collapsible_if)]
mod assets;
mod badges;
mod compose;
mod config;
mod fonts;
mod http;
mod metadata;
mod metrics;
mod render;
mod state;
#[cfg(test)]
mod test_support;
mod typeset;

use crate::assets::AssetFetcher;
use crate::config::Config;
use crate::fonts::FontSet;
use crate::metadata::GhostResolver;
use crate::metrics::Metrics;
use crate::state::AppState;
use axum::Router;
use axum::body::HttpBody;
use axum::http::{Response, header};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::{
    CompressionLayer,
    predicate::{DefaultPredicate, Predicate},
};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
struct NoImageCompression {
    inner: DefaultPredicate,
}

impl NoImageCompression {
    fn new() -> Self {
        Self {
            inner: DefaultPredicate::new(),
        }
    }
}

impl Predicate for NoImageCompression {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            if let Ok(content_type) = content_type.to_str() {
                if content_type.starts_with("image/") {
                    return false;
                }
            }
        }
        self.inner.should_compress(response)
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    let max_in_flight = if state.config.max_in_flight_requests == 0 {
        usize::MAX
    } else {
        state.config.max_in_flight_requests
    };
    http::router(state)
        .layer(CompressionLayer::new().compress_when(NoImageCompression::new()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false)),
        )
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = ?err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    if config.allow_http {
        warn!("ALLOW_HTTP is enabled; feature images and logos may be fetched over plain http");
    }
    info!(
        ghost_url = %config.ghost_url,
        logo_url = %config.logo_url,
        fallback_image_url = %config.fallback_image_url,
        max_concurrent_renders = config.max_concurrent_renders,
        max_in_flight_requests = config.max_in_flight_requests,
        cache_max_age_seconds = config.cache_max_age.as_secs(),
        "startup config summary"
    );

    let fonts = FontSet::load(config.font_path.as_deref())?;
    info!(source = ?fonts.source, "title font ready");
    let resolver = Arc::new(GhostResolver::new(&config)?);
    let assets = AssetFetcher::new(&config)?;
    let metrics = Arc::new(Metrics::new()?);
    let state = Arc::new(AppState::new(config, resolver, assets, fonts, metrics));

    let app = build_app(state.clone());
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "og renderer listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
