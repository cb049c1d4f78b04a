use std::sync::Arc;

pub mod annotate;
pub mod cache;
pub mod classify;
pub mod config;
pub mod geo;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod registry;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub config: config::AppConfig,
    /// Link + click storage behind the pipeline's only write seam.
    pub registry: Arc<dyn registry::Registry>,
    /// Read-only collaborator data: settings, loading pages, CAPTCHA keys.
    pub store: Arc<dyn registry::ConfigStore>,
    /// Optional out-of-band bot-likelihood annotation service.
    pub annotator: Option<Arc<dyn annotate::Annotator>>,
    /// In-memory cache for IP → GeoInfo lookups so the same IP is never
    /// looked up more than once per server lifetime.
    pub geo_cache: geo::GeoCache,
}
