use anyhow::{Context, Result, anyhow};
use image::{Rgb, Rgba};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_GHOST_URL: &str = "https://the-state-of-play.ghost.io";
pub const DEFAULT_LOGO_URL: &str = "https://www.stateofplay.club/logo.png";
pub const DEFAULT_FALLBACK_IMAGE_URL: &str =
    "https://the-state-of-play.ghost.io/content/images/size/w1200/2024/01/default-og.jpg";
pub const DEFAULT_SITE_TITLE: &str = "The State of Play";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub ghost_url: String,
    pub ghost_content_api_key: String,
    pub logo_url: String,
    pub fallback_image_url: String,
    pub site_title: String,
    pub fetch_timeout: Duration,
    pub metadata_timeout: Duration,
    pub max_asset_bytes: usize,
    pub max_decoded_pixels: u64,
    pub max_concurrent_renders: usize,
    pub max_in_flight_requests: usize,
    pub allow_http: bool,
    pub allow_private_networks: bool,
    pub font_path: Option<PathBuf>,
    pub cache_max_age: Duration,
    pub style: CardStyle,
}

/// Fixed layout and palette of the preview card.
///
/// Every stage of the pipeline reads its geometry from here; nothing in the
/// render path hard-codes a coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct CardStyle {
    pub width: u32,
    pub height: u32,
    pub background: Rgb<u8>,
    pub brightness: f32,
    pub scrim_alpha: u8,
    pub badge_right_margin: u32,
    pub badge_top: i32,
    pub badge_padding: u32,
    pub badge_gutter: u32,
    pub badge_radius: u32,
    pub badge_font_size: f32,
    pub category_fill: Rgba<u8>,
    pub category_text: Rgba<u8>,
    pub premium_fill: Rgba<u8>,
    pub premium_text: Rgba<u8>,
    pub premium_label: String,
    pub logo_height: u32,
    pub logo_x: i64,
    pub logo_y: i64,
    pub title_columns: usize,
    pub title_max_lines: usize,
    pub title_x: i32,
    pub title_y: i32,
    pub title_line_height: i32,
    pub title_font_size: f32,
    pub title_color: Rgba<u8>,
}

impl Default for CardStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 630,
            background: Rgb([20, 50, 100]),
            brightness: 0.4,
            scrim_alpha: 130,
            badge_right_margin: 50,
            badge_top: 45,
            badge_padding: 10,
            badge_gutter: 12,
            badge_radius: 5,
            badge_font_size: 18.0,
            category_fill: Rgba([255, 255, 255, 255]),
            category_text: Rgba([20, 50, 100, 255]),
            premium_fill: Rgba([255, 127, 80, 255]),
            premium_text: Rgba([255, 255, 255, 255]),
            premium_label: "PREMIUM".to_string(),
            logo_height: 50,
            logo_x: 50,
            logo_y: 40,
            title_columns: 32,
            title_max_lines: 3,
            title_x: 50,
            title_y: 150,
            title_line_height: 62,
            title_font_size: 54.0,
            title_color: Rgba([255, 255, 255, 255]),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 8080);

        let ghost_url = parse_url_env("GHOST_URL", DEFAULT_GHOST_URL)?
            .trim_end_matches('/')
            .to_string();
        let ghost_content_api_key = env::var("GHOST_CONTENT_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("GHOST_CONTENT_API_KEY is required to resolve article metadata")?;
        let logo_url = parse_url_env("LOGO_URL", DEFAULT_LOGO_URL)?;
        let fallback_image_url = parse_url_env("FALLBACK_IMAGE_URL", DEFAULT_FALLBACK_IMAGE_URL)?;
        let site_title = env::var("SITE_TITLE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SITE_TITLE.to_string());

        let fetch_timeout = Duration::from_secs(parse_u64("FETCH_TIMEOUT_SECONDS", 10).max(1));
        let metadata_timeout =
            Duration::from_secs(parse_u64("METADATA_TIMEOUT_SECONDS", 10).max(1));
        let max_asset_bytes = parse_usize("MAX_ASSET_BYTES", 10 * 1024 * 1024);
        let max_decoded_pixels = parse_u64("MAX_DECODED_PIXELS", 40_000_000);
        let max_concurrent_renders = parse_usize("MAX_CONCURRENT_RENDERS", 4).max(1);
        let max_in_flight_requests = parse_usize("MAX_IN_FLIGHT_REQUESTS", 512);
        let allow_http = parse_bool("ALLOW_HTTP", true);
        let allow_private_networks = parse_bool("ALLOW_PRIVATE_NETWORKS", false);
        let font_path = env::var("FONT_PATH")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let cache_max_age = Duration::from_secs(parse_u64("CACHE_MAX_AGE_SECONDS", 86_400));
        if cache_max_age.is_zero() {
            warn!("CACHE_MAX_AGE_SECONDS is 0; preview images will not be cached downstream");
        }

        Ok(Self {
            host,
            port,
            ghost_url,
            ghost_content_api_key,
            logo_url,
            fallback_image_url,
            site_title,
            fetch_timeout,
            metadata_timeout,
            max_asset_bytes,
            max_decoded_pixels,
            max_concurrent_renders,
            max_in_flight_requests,
            allow_http,
            allow_private_networks,
            font_path,
            cache_max_age,
            style: CardStyle::default(),
        })
    }
}

fn parse_url_env(key: &str, default: &str) -> Result<String> {
    let raw = env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string());
    let parsed = url::Url::parse(&raw).with_context(|| format!("invalid {key}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw),
        other => Err(anyhow!("{key} must be http or https, got {other}")),
    }
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        ghost_url: DEFAULT_GHOST_URL.to_string(),
        ghost_content_api_key: "test-key".to_string(),
        logo_url: DEFAULT_LOGO_URL.to_string(),
        fallback_image_url: DEFAULT_FALLBACK_IMAGE_URL.to_string(),
        site_title: DEFAULT_SITE_TITLE.to_string(),
        fetch_timeout: Duration::from_secs(10),
        metadata_timeout: Duration::from_secs(10),
        max_asset_bytes: 10 * 1024 * 1024,
        max_decoded_pixels: 40_000_000,
        max_concurrent_renders: 2,
        max_in_flight_requests: 0,
        allow_http: true,
        allow_private_networks: true,
        font_path: None,
        cache_max_age: Duration::from_secs(86_400),
        style: CardStyle::default(),
    }
}
