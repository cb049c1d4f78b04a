//! The resolution pipeline: the one non-trivial decision this service makes.
//!
//! Control flow per request:
//! registry lookup → gate chain → (halt ⇒ challenge outcome, nothing
//! recorded) → click append → destination resolution → loading-page
//! selection (interstitials only) → presentation artifact.
//!
//! The click append happens before any navigation artifact is produced and
//! its failure aborts the request: a visit that cannot be recorded is never
//! redirected.

pub mod gates;
pub mod loading_page;
pub mod presentation;
pub mod recorder;
pub mod resolver;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::thread_rng;
use thiserror::Error;

use crate::annotate::{self, Annotator};
use crate::classify;
use crate::registry::{ConfigStore, Registry, StorageError};

pub use gates::Halt;
pub use presentation::Resolution;

/// Everything the pipeline knows about the inbound request. Geo and device
/// detection stay pluggable: the caller supplies whatever it has, the
/// pipeline treats the values as opaque.
#[derive(Debug, Clone, Default)]
pub struct Visitor {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    /// ISO country code, if any lookup produced one synchronously.
    pub country_code: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    /// Password supplied with this request (query or cookie).
    pub credential: Option<String>,
    /// CAPTCHA token supplied with this request (query or cookie).
    pub captcha_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The short code resolves to no link. User-visible 404.
    #[error("unknown short code")]
    NotFound,
    /// The registry failed, most critically on the click append. The visit
    /// was not durably recorded, so no redirect may happen.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Resolve one short-code visit end to end.
///
/// Exactly one click is appended iff every gate passes; halts and errors
/// append nothing. On success the optional annotator is handed the recorded
/// click on a detached task — its outcome can only ever touch the stored
/// click's bot flags, never this response.
pub async fn resolve(
    registry: &Arc<dyn Registry>,
    store: &dyn ConfigStore,
    annotator: Option<&Arc<dyn Annotator>>,
    short_code: &str,
    visitor: &Visitor,
    now: DateTime<Utc>,
) -> Result<Resolution, ResolveError> {
    let link = registry
        .lookup(short_code)
        .await?
        .ok_or(ResolveError::NotFound)?;

    // ── Gate chain ─────────────────────────────────────────────────────────
    let click_count = if link.max_clicks.is_some() {
        registry.click_count(&link.id).await?
    } else {
        0
    };
    let captcha_configured = if link.captcha_required {
        store
            .captcha()
            .await?
            .map(|c| c.is_configured())
            .unwrap_or(false)
    } else {
        false
    };

    let input = gates::GateInput {
        click_count,
        credential: visitor.credential.as_deref(),
        captcha_token: visitor.captcha_token.as_deref(),
        captcha_configured,
    };
    if let Some(halt) = gates::run(&link, &input, now) {
        tracing::debug!(%short_code, ?halt, "gate halted resolution");
        return Ok(Resolution::Halted(halt));
    }

    // ── Record the click before any navigation side effect ─────────────────
    let profile = classify::classify(visitor.user_agent.as_deref());
    let click = recorder::build_click(&link, visitor, &profile, now);
    let click_id = click.id.clone();
    registry.append_click(click.clone()).await?;

    if let Some(annotator) = annotator {
        annotate::spawn(Arc::clone(annotator), Arc::clone(registry), click);
    }
    tracing::debug!(%short_code, %click_id, "click recorded");

    // ── Destination ────────────────────────────────────────────────────────
    let resolved = resolver::resolve_destination(
        &link,
        visitor.country_code.as_deref(),
        profile.class,
        &mut thread_rng(),
    );

    // ── Presentation ───────────────────────────────────────────────────────
    let settings = store.settings().await?;
    let interstitial_body = if link.use_meta_refresh && !link.is_cloaked {
        let config = loading_page::effective_config(&link, &settings);
        let pages = store.loading_pages().await?;
        Some(loading_page::select_page(config, &pages, &mut thread_rng()))
    } else {
        None
    };

    Ok(presentation::present(
        &link,
        &settings,
        resolved.url,
        interstitial_body,
    ))
}
