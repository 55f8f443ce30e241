use crate::assets::AssetFetchError;
use crate::badges;
use crate::compose;
use crate::config::CardStyle;
use crate::fonts::FontSet;
use crate::metadata::{ArticleMetadata, MetadataError, is_valid_slug};
use crate::state::AppState;
use crate::typeset;
use bytes::Bytes;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task;
use tracing::{debug, info, warn};

/// Draws preview cards. Holds only immutable inputs so one instance is shared
/// by every request.
pub struct OgRenderer {
    style: CardStyle,
    fonts: Arc<FontSet>,
    max_decoded_pixels: u64,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("png encode failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("render worker failed: {0}")]
    Worker(String),
    #[error("render permits closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

/// What the endpoint sends back: the card, or a redirect to the static
/// fallback image. Never a partial card.
#[derive(Debug, Clone)]
pub enum CompositionResult {
    Image {
        bytes: Bytes,
        etag: String,
        cache_control: String,
        filename: String,
    },
    Fallback {
        location: String,
    },
}

impl OgRenderer {
    pub fn new(style: CardStyle, fonts: Arc<FontSet>, max_decoded_pixels: u64) -> Self {
        Self {
            style,
            fonts,
            max_decoded_pixels,
        }
    }

    /// Background, scrim, badges, logo, title. Undecodable images degrade
    /// to the solid background or to no logo.
    pub fn compose_card(
        &self,
        meta: &ArticleMetadata,
        feature: Option<&[u8]>,
        logo: Option<&[u8]>,
    ) -> RgbaImage {
        let style = &self.style;
        let decode = |bytes: &[u8]| compose::decode_image(bytes, self.max_decoded_pixels);
        let feature = match feature.map(decode) {
            Some(Ok(image)) => Some(image),
            Some(Err(err)) => {
                warn!(error = %err, "feature image undecodable, using solid background");
                None
            }
            None => None,
        };
        let mut canvas = compose::background(feature.as_ref(), style);
        drop(feature);

        compose::apply_scrim(&mut canvas, style.scrim_alpha);
        let badge_count = badges::render_badges(&mut canvas, &self.fonts.bold, style, meta);

        let logo_placed = match logo.map(decode) {
            Some(Ok(logo)) => {
                compose::place_logo(&mut canvas, &logo, style);
                true
            }
            Some(Err(err)) => {
                warn!(error = %err, "logo undecodable, skipping");
                false
            }
            None => false,
        };

        let lines = typeset::wrap_title(&meta.title, style.title_columns, style.title_max_lines);
        typeset::draw_title(&mut canvas, &self.fonts.bold, style, &lines);
        debug!(
            badges = badge_count,
            logo = logo_placed,
            title_lines = lines.len(),
            "composed card"
        );
        canvas
    }

    pub fn render(
        &self,
        meta: &ArticleMetadata,
        feature: Option<&[u8]>,
        logo: Option<&[u8]>,
    ) -> Result<Vec<u8>, RenderError> {
        let canvas = self.compose_card(meta, feature, logo);
        encode_png(canvas, &self.style)
    }
}

/// Flattens to opaque RGB and writes a maximally compressed PNG.
pub fn encode_png(mut canvas: RgbaImage, style: &CardStyle) -> Result<Vec<u8>, RenderError> {
    compose::flatten(&mut canvas, style);
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let mut bytes = Vec::new();
    let encoder =
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, PngFilterType::Adaptive);
    encoder.write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

/// Runs the whole preview pipeline for `slug`. Every failure that escapes the
/// pipeline becomes a fallback redirect.
pub async fn render_preview(state: &AppState, slug: &str) -> CompositionResult {
    let started = Instant::now();
    match try_render_preview(state, slug).await {
        Ok(result) => {
            state.metrics.observe_render_result("image");
            state
                .metrics
                .observe_render_duration("total", started.elapsed());
            info!(
                slug = %slug,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "rendered preview"
            );
            result
        }
        Err(err) => {
            state.metrics.observe_render_result("fallback");
            warn!(slug = %slug, error = %err, "preview failed, redirecting to fallback image");
            CompositionResult::Fallback {
                location: state.config.fallback_image_url.clone(),
            }
        }
    }
}

async fn try_render_preview(
    state: &AppState,
    slug: &str,
) -> Result<CompositionResult, PreviewError> {
    if !is_valid_slug(slug) {
        return Err(MetadataError::NotFound {
            slug: slug.to_string(),
        }
        .into());
    }
    let stage = Instant::now();
    let meta = state.resolver.resolve(slug).await?;
    state
        .metrics
        .observe_render_duration("metadata", stage.elapsed());

    let fetched = state
        .assets
        .fetch_pair(meta.feature_image_url.as_deref(), &state.config.logo_url)
        .await;
    state
        .metrics
        .observe_render_duration("fetch", fetched.elapsed);
    let feature = match fetched.feature {
        Some(result) => recover_asset(state, "feature", result),
        None => None,
    };
    let logo = recover_asset(state, "logo", fetched.logo);

    let permit = state
        .render_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| RenderError::Closed)?;
    let _guard = state.metrics.render_guard();
    let renderer = state.renderer.clone();
    let stage = Instant::now();
    let png = task::spawn_blocking(move || {
        let _permit = permit;
        renderer.render(&meta, feature.as_deref(), logo.as_deref())
    })
    .await
    .map_err(|err| RenderError::Worker(err.to_string()))??;
    state
        .metrics
        .observe_render_duration("compose", stage.elapsed());

    Ok(CompositionResult::Image {
        etag: etag_for(&png),
        bytes: Bytes::from(png),
        cache_control: format!("public, max-age={}", state.config.cache_max_age.as_secs()),
        filename: format!("{slug}-og.png"),
    })
}

fn recover_asset(
    state: &AppState,
    asset: &'static str,
    result: Result<Bytes, AssetFetchError>,
) -> Option<Bytes> {
    match result {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            state.metrics.observe_asset_failure(asset, err.kind());
            warn!(asset, error = %err, "asset unavailable, degrading");
            None
        }
    }
}

fn etag_for(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}
