use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::cache::LinkCache;
use crate::models::{
    CaptchaConfig, Click, Link, LoadingPage, LoadingPageMode, LoadingPageOverride,
    LoadingPageSettings, RedirectKind, Settings,
};

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored record: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

// ── Traits ─────────────────────────────────────────────────────────────────

/// Link and click storage. The resolution pipeline performs exactly one
/// mutation through this seam: appending a click. Everything else is a read.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn lookup(&self, short_code: &str) -> Result<Option<Link>, StorageError>;

    /// Current number of recorded clicks for a link (click-quota gate input).
    async fn click_count(&self, link_id: &str) -> Result<u64, StorageError>;

    /// Durably append one click. Must be safe under concurrent appends to
    /// the same link; a failure here aborts the whole resolution.
    async fn append_click(&self, click: Click) -> Result<(), StorageError>;

    /// Out-of-band enrichment hook for the annotation service. A failure
    /// here never affects an already-completed resolution.
    async fn attach_annotation(
        &self,
        click_id: &str,
        is_bot: bool,
        is_email_scanner: bool,
    ) -> Result<(), StorageError>;
}

/// Read-only collaborator data, consulted by value at resolution time.
/// Stale reads during a config edit are an accepted inconsistency window.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn settings(&self) -> Result<Settings, StorageError>;
    async fn loading_pages(&self) -> Result<Vec<LoadingPage>, StorageError>;
    async fn loading_page(&self, id: &str) -> Result<Option<LoadingPage>, StorageError>;
    async fn captcha(&self) -> Result<Option<CaptchaConfig>, StorageError>;
}

// ── SQLite implementation ──────────────────────────────────────────────────

/// SQLite-backed registry + config store. Link records are cached in memory
/// (warmed at startup, backfilled on miss); click counts are always live.
pub struct SqliteStore {
    pool: SqlitePool,
    cache: LinkCache,
}

const LINK_COLUMNS: &str = "id, short_code, long_url, title, created_at, \
     use_base64_encoding, redirect_kind, is_cloaked, use_meta_refresh, \
     meta_refresh_delay_secs, password, expires_at, max_clicks, captcha_required, \
     geo_targets, device_targets, ab_test_urls, retargeting_pixels, loading_page";

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: LinkCache::new(),
        }
    }

    /// Load every link into the in-memory cache at startup.
    pub async fn warm_cache(&self) -> Result<(), StorageError> {
        let rows: Vec<LinkRow> =
            sqlx::query_as(&format!("SELECT {LINK_COLUMNS} FROM links"))
                .fetch_all(&self.pool)
                .await?;

        let count = rows.len();
        for row in rows {
            self.cache.set(Link::try_from(row)?);
        }

        tracing::info!("Cache warmed with {} link(s)", count);
        Ok(())
    }
}

#[async_trait]
impl Registry for SqliteStore {
    async fn lookup(&self, short_code: &str) -> Result<Option<Link>, StorageError> {
        if let Some(link) = self.cache.get(short_code) {
            return Ok(Some(link));
        }

        let row: Option<LinkRow> = sqlx::query_as(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE short_code = ?1"
        ))
        .bind(short_code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let link = Link::try_from(row)?;
                // Backfill the cache for next time
                self.cache.set(link.clone());
                Ok(Some(link))
            }
            None => Ok(None),
        }
    }

    async fn click_count(&self, link_id: &str) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clicks WHERE link_id = ?1")
            .bind(link_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn append_click(&self, click: Click) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO clicks
                 (id, link_id, clicked_at, ip_address, user_agent, referrer,
                  country, region, city, browser, os, device, is_bot, is_email_scanner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        )
        .bind(&click.id)
        .bind(&click.link_id)
        .bind(click.clicked_at.naive_utc())
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referrer)
        .bind(&click.country)
        .bind(&click.region)
        .bind(&click.city)
        .bind(&click.browser)
        .bind(&click.os)
        .bind(&click.device)
        .bind(click.is_bot)
        .bind(click.is_email_scanner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attach_annotation(
        &self,
        click_id: &str,
        is_bot: bool,
        is_email_scanner: bool,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE clicks SET is_bot = ?2, is_email_scanner = ?3 WHERE id = ?1")
            .bind(click_id)
            .bind(is_bot)
            .bind(is_email_scanner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn settings(&self) -> Result<Settings, StorageError> {
        let row: Option<(String, bool, String, Option<String>)> = sqlx::query_as(
            "SELECT default_redirect_kind, loading_enabled, loading_mode,
                    loading_selected_page_id
             FROM settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some((kind, enabled, mode, selected_page_id)) = row else {
            return Ok(Settings::default());
        };

        Ok(Settings {
            default_redirect_kind: parse_redirect_kind(Some(kind.as_str()))
                .unwrap_or(RedirectKind::Temporary),
            loading_page: LoadingPageSettings {
                enabled,
                mode: parse_loading_mode(&mode),
                selected_page_id,
            },
        })
    }

    async fn loading_pages(&self) -> Result<Vec<LoadingPage>, StorageError> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT id, name, html_content FROM loading_pages ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, html_content)| LoadingPage {
                id,
                name,
                html_content,
            })
            .collect())
    }

    async fn loading_page(&self, id: &str) -> Result<Option<LoadingPage>, StorageError> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id, name, html_content FROM loading_pages WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, html_content)| LoadingPage {
            id,
            name,
            html_content,
        }))
    }

    async fn captcha(&self) -> Result<Option<CaptchaConfig>, StorageError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT site_key, secret_key FROM captcha_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(site_key, secret_key)| CaptchaConfig {
            site_key,
            secret_key,
        }))
    }
}

// ── Row mapping ────────────────────────────────────────────────────────────

/// Raw `links` row. List-valued fields are JSON text columns.
#[derive(sqlx::FromRow)]
struct LinkRow {
    id: String,
    short_code: String,
    long_url: String,
    title: Option<String>,
    created_at: NaiveDateTime,
    use_base64_encoding: bool,
    redirect_kind: Option<String>,
    is_cloaked: bool,
    use_meta_refresh: bool,
    meta_refresh_delay_secs: i64,
    password: Option<String>,
    expires_at: Option<NaiveDateTime>,
    max_clicks: Option<i64>,
    captcha_required: bool,
    geo_targets: String,
    device_targets: String,
    ab_test_urls: String,
    retargeting_pixels: String,
    loading_page: Option<String>,
}

impl TryFrom<LinkRow> for Link {
    type Error = StorageError;

    fn try_from(row: LinkRow) -> Result<Self, Self::Error> {
        let loading_page: Option<LoadingPageOverride> = match row.loading_page {
            Some(raw) => Some(serde_json::from_str(&raw)?),
            None => None,
        };

        Ok(Link {
            id: row.id,
            short_code: row.short_code,
            long_url: row.long_url,
            title: row.title,
            created_at: row.created_at.and_utc(),
            use_base64_encoding: row.use_base64_encoding,
            redirect_kind: parse_redirect_kind(row.redirect_kind.as_deref()),
            is_cloaked: row.is_cloaked,
            use_meta_refresh: row.use_meta_refresh,
            meta_refresh_delay_secs: row.meta_refresh_delay_secs.max(0) as u32,
            password: row.password,
            expires_at: row.expires_at.map(|t| t.and_utc()),
            max_clicks: row.max_clicks.map(|n| n.max(0) as u64),
            captcha_required: row.captcha_required,
            geo_targets: serde_json::from_str(&row.geo_targets)?,
            device_targets: serde_json::from_str(&row.device_targets)?,
            ab_test_urls: serde_json::from_str(&row.ab_test_urls)?,
            retargeting_pixels: serde_json::from_str(&row.retargeting_pixels)?,
            loading_page,
        })
    }
}

fn parse_redirect_kind(raw: Option<&str>) -> Option<RedirectKind> {
    match raw {
        Some("permanent") => Some(RedirectKind::Permanent),
        Some("temporary") => Some(RedirectKind::Temporary),
        _ => None,
    }
}

fn parse_loading_mode(raw: &str) -> LoadingPageMode {
    match raw {
        "specific" => LoadingPageMode::Specific,
        _ => LoadingPageMode::Random,
    }
}

// ── In-memory implementation ───────────────────────────────────────────────

/// In-memory registry: the pipeline's test seam, and a zero-config run mode.
/// `fail_appends` simulates a storage outage on the click-append path.
#[derive(Default)]
pub struct MemoryRegistry {
    links: DashMap<String, Link>,
    clicks: DashMap<String, Vec<Click>>,
    fail_appends: AtomicBool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, link: Link) {
        self.links.insert(link.short_code.clone(), link);
    }

    /// All clicks recorded for a link, in insertion order.
    pub fn clicks_for(&self, link_id: &str) -> Vec<Click> {
        self.clicks
            .get(link_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// When set, every `append_click` fails with `StorageError::Unavailable`.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn lookup(&self, short_code: &str) -> Result<Option<Link>, StorageError> {
        Ok(self.links.get(short_code).map(|l| l.clone()))
    }

    async fn click_count(&self, link_id: &str) -> Result<u64, StorageError> {
        Ok(self
            .clicks
            .get(link_id)
            .map(|v| v.len() as u64)
            .unwrap_or(0))
    }

    async fn append_click(&self, click: Click) -> Result<(), StorageError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("click append failed".into()));
        }
        if !self.links.iter().any(|l| l.id == click.link_id) {
            return Err(StorageError::Unavailable(format!(
                "no link with id {}",
                click.link_id
            )));
        }
        self.clicks
            .entry(click.link_id.clone())
            .or_default()
            .push(click);
        Ok(())
    }

    async fn attach_annotation(
        &self,
        click_id: &str,
        is_bot: bool,
        is_email_scanner: bool,
    ) -> Result<(), StorageError> {
        for mut entry in self.clicks.iter_mut() {
            if let Some(click) = entry.value_mut().iter_mut().find(|c| c.id == click_id) {
                click.is_bot = is_bot;
                click.is_email_scanner = is_email_scanner;
                return Ok(());
            }
        }
        Ok(())
    }
}

/// In-memory collaborator data with setters for tests.
#[derive(Default)]
pub struct MemoryConfigStore {
    settings: RwLock<Settings>,
    pages: RwLock<Vec<LoadingPage>>,
    captcha: RwLock<Option<CaptchaConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn add_page(&self, page: LoadingPage) {
        self.pages.write().unwrap_or_else(PoisonError::into_inner).push(page);
    }

    pub fn set_captcha(&self, config: Option<CaptchaConfig>) {
        *self.captcha.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn settings(&self) -> Result<Settings, StorageError> {
        Ok(self.settings.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn loading_pages(&self) -> Result<Vec<LoadingPage>, StorageError> {
        Ok(self.pages.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn loading_page(&self, id: &str) -> Result<Option<LoadingPage>, StorageError> {
        Ok(self
            .pages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn captcha(&self) -> Result<Option<CaptchaConfig>, StorageError> {
        Ok(self.captcha.read().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
