use crate::assets::AssetFetcher;
use crate::config::Config;
use crate::fonts::FontSet;
use crate::metadata::MetadataResolver;
use crate::metrics::Metrics;
use crate::render::OgRenderer;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub resolver: Arc<dyn MetadataResolver>,
    pub assets: AssetFetcher,
    pub renderer: Arc<OgRenderer>,
    pub render_semaphore: Arc<Semaphore>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Config,
        resolver: Arc<dyn MetadataResolver>,
        assets: AssetFetcher,
        fonts: FontSet,
        metrics: Arc<Metrics>,
    ) -> Self {
        let render_semaphore = Arc::new(Semaphore::new(config.max_concurrent_renders.max(1)));
        let renderer = Arc::new(OgRenderer::new(
            config.style.clone(),
            Arc::new(fonts),
            config.max_decoded_pixels,
        ));
        Self {
            config: Arc::new(config),
            resolver,
            assets,
            renderer,
            render_semaphore,
            metrics,
        }
    }
}
