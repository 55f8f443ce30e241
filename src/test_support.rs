use crate::assets::AssetFetcher;
use crate::config::Config;
use crate::fonts::FontSet;
use crate::metadata::{ArticleMetadata, MetadataError, MetadataResolver};
use crate::metrics::Metrics;
use crate::state::AppState;
use async_trait::async_trait;
use axum::Router;
use image::{ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::net::TcpListener;

pub(crate) fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, color);
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Serves `router` on an ephemeral local port and returns its base URL.
pub(crate) async fn spawn_server(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Default)]
pub(crate) struct FakeResolver {
    articles: HashMap<String, ArticleMetadata>,
    failing: Vec<String>,
}

impl FakeResolver {
    pub(crate) fn with_article(mut self, slug: &str, metadata: ArticleMetadata) -> Self {
        self.articles.insert(slug.to_string(), metadata);
        self
    }

    pub(crate) fn with_failure(mut self, slug: &str) -> Self {
        self.failing.push(slug.to_string());
        self
    }
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    async fn resolve(&self, slug: &str) -> Result<ArticleMetadata, MetadataError> {
        if self.failing.iter().any(|failing| failing == slug) {
            return Err(MetadataError::Fetch {
                slug: slug.to_string(),
                reason: "upstream unavailable".to_string(),
            });
        }
        self.articles
            .get(slug)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound {
                slug: slug.to_string(),
            })
    }
}

pub(crate) fn article(title: &str) -> ArticleMetadata {
    ArticleMetadata {
        title: title.to_string(),
        excerpt: None,
        feature_image_url: None,
        category_tag: None,
        is_premium: false,
    }
}

pub(crate) fn test_state(config: Config, resolver: FakeResolver) -> Arc<AppState> {
    let assets = AssetFetcher::new(&config).unwrap();
    let fonts = FontSet::embedded().unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    Arc::new(AppState::new(
        config,
        Arc::new(resolver),
        assets,
        fonts,
        metrics,
    ))
}
