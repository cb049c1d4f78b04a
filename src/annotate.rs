use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::Click;
use crate::registry::Registry;

/// Refined bot verdict from the external annotation service.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Verdict {
    pub is_bot: bool,
    #[serde(default)]
    pub is_email_scanner: bool,
}

/// Advisory bot-likelihood scoring. Consulted after a click is already
/// durably recorded; it can only ever update that click's bot flags.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn assess(&self, click: &Click) -> anyhow::Result<Verdict>;
}

/// POSTs the click as JSON to a configured endpoint and expects a
/// `{"is_bot": bool, "is_email_scanner": bool}` reply.
pub struct HttpAnnotator {
    client: reqwest::Client,
    url: String,
}

impl HttpAnnotator {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Annotator for HttpAnnotator {
    async fn assess(&self, click: &Click) -> anyhow::Result<Verdict> {
        let verdict = self
            .client
            .post(&self.url)
            .json(click)
            .send()
            .await?
            .error_for_status()?
            .json::<Verdict>()
            .await?;
        Ok(verdict)
    }
}

/// Hand a recorded click to the annotator on a detached task. Every failure
/// is logged and dropped; the local heuristic classification stands.
pub fn spawn(annotator: Arc<dyn Annotator>, registry: Arc<dyn Registry>, click: Click) {
    tokio::spawn(async move {
        match annotator.assess(&click).await {
            Ok(verdict) => {
                if let Err(e) = registry
                    .attach_annotation(&click.id, verdict.is_bot, verdict.is_email_scanner)
                    .await
                {
                    tracing::warn!("failed to attach annotation to click {}: {}", click.id, e);
                }
            }
            Err(e) => {
                tracing::debug!(
                    "annotation service unavailable for click {}; keeping heuristic verdict: {}",
                    click.id,
                    e
                );
            }
        }
    });
}
