use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

const MAX_SLUG_LEN: usize = 200;

/// The slice of an article the preview card is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleMetadata {
    pub title: String,
    pub excerpt: Option<String>,
    pub feature_image_url: Option<String>,
    pub category_tag: Option<String>,
    pub is_premium: bool,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("article {slug} not found")]
    NotFound { slug: String },
    #[error("article metadata fetch failed for {slug}: {reason}")]
    Fetch { slug: String, reason: String },
}

/// Resolves an article slug to its metadata. Not-found and fetch errors are
/// distinct here but callers treat them the same way.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, slug: &str) -> Result<ArticleMetadata, MetadataError>;
}

#[derive(Debug, Deserialize)]
struct GhostPostsResponse {
    #[serde(default)]
    posts: Vec<GhostPost>,
}

#[derive(Debug, Deserialize)]
struct GhostPost {
    title: Option<String>,
    excerpt: Option<String>,
    custom_excerpt: Option<String>,
    feature_image: Option<String>,
    visibility: Option<String>,
    #[serde(default)]
    tags: Vec<GhostTag>,
}

#[derive(Debug, Deserialize)]
struct GhostTag {
    name: Option<String>,
}

impl ArticleMetadata {
    fn from_ghost_post(post: GhostPost, default_title: &str) -> Self {
        let title = non_blank(post.title).unwrap_or_else(|| default_title.to_string());
        let excerpt = non_blank(post.excerpt).or_else(|| non_blank(post.custom_excerpt));
        let feature_image_url = non_blank(post.feature_image);
        let category_tag = post
            .tags
            .into_iter()
            .next()
            .and_then(|tag| non_blank(tag.name))
            .map(|name| name.to_uppercase());
        let is_premium = post
            .visibility
            .as_deref()
            .map(|visibility| !visibility.trim().eq_ignore_ascii_case("public"))
            .unwrap_or(false);
        Self {
            title,
            excerpt,
            feature_image_url,
            category_tag,
            is_premium,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

/// Metadata lookup against the Ghost Content API.
#[derive(Clone)]
pub struct GhostResolver {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_title: String,
}

impl GhostResolver {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.metadata_timeout)
            .user_agent(concat!("og-renderer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build ghost client")?;
        Ok(Self {
            client,
            base_url: config.ghost_url.trim_end_matches('/').to_string(),
            api_key: config.ghost_content_api_key.clone(),
            default_title: config.site_title.clone(),
        })
    }

    fn post_url(&self, slug: &str) -> Result<Url, MetadataError> {
        let mut url = Url::parse(&format!(
            "{}/ghost/api/content/posts/slug/{}/",
            self.base_url, slug
        ))
        .map_err(|err| MetadataError::Fetch {
            slug: slug.to_string(),
            reason: err.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("key", &self.api_key)
            .append_pair("include", "tags");
        Ok(url)
    }
}

#[async_trait]
impl MetadataResolver for GhostResolver {
    async fn resolve(&self, slug: &str) -> Result<ArticleMetadata, MetadataError> {
        if !is_valid_slug(slug) {
            return Err(MetadataError::NotFound {
                slug: slug.to_string(),
            });
        }
        let fetch_error = |reason: String| MetadataError::Fetch {
            slug: slug.to_string(),
            reason,
        };
        let url = self.post_url(slug)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(MetadataError::NotFound {
                slug: slug.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(fetch_error(format!("ghost returned {}", response.status())));
        }
        let body: GhostPostsResponse = response
            .json()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;
        let post = body
            .posts
            .into_iter()
            .next()
            .ok_or_else(|| MetadataError::NotFound {
                slug: slug.to_string(),
            })?;
        let metadata = ArticleMetadata::from_ghost_post(post, &self.default_title);
        debug!(
            slug = %slug,
            has_feature_image = metadata.feature_image_url.is_some(),
            has_excerpt = metadata.excerpt.is_some(),
            category = ?metadata.category_tag,
            premium = metadata.is_premium,
            "resolved article metadata"
        );
        Ok(metadata)
    }
}
