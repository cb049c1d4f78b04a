use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Link ───────────────────────────────────────────────────────────────────

/// HTTP redirect kind for the direct-redirect presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectKind {
    /// 301 Moved Permanently
    Permanent,
    /// 302 Found
    Temporary,
}

/// Device classes a link can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    #[serde(rename = "iOS")]
    Ios,
    Android,
    Desktop,
}

/// One geo-targeting rule: visitors from `country` go to `url`.
/// Rules are ordered; the first country match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTarget {
    /// ISO 3166-1 alpha-2 code, e.g. "US", "GB".
    pub country: String,
    pub url: String,
}

/// One device-targeting rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub device: DeviceClass,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelProvider {
    Facebook,
    #[serde(rename = "Google Ads")]
    GoogleAds,
    LinkedIn,
    Twitter,
}

/// A retargeting pixel attached to a link. Emitted as an inert image beacon
/// on whichever presentation is chosen; never consulted by the gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetargetingPixel {
    pub provider: PixelProvider,
    pub id: String,
}

impl RetargetingPixel {
    /// Provider-specific 1x1 beacon URL. The pixel id is restricted to the
    /// character set every provider accepts so it can be embedded in a URL
    /// without further encoding.
    pub fn beacon_url(&self) -> String {
        let id: String = self
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        match self.provider {
            PixelProvider::Facebook => {
                format!("https://www.facebook.com/tr?id={id}&ev=PageView&noscript=1")
            }
            PixelProvider::GoogleAds => format!(
                "https://googleads.g.doubleclick.net/pagead/viewthroughconversion/{id}/?guid=ON&script=0"
            ),
            PixelProvider::LinkedIn => {
                format!("https://px.ads.linkedin.com/collect/?pid={id}&fmt=gif")
            }
            PixelProvider::Twitter => {
                format!("https://analytics.twitter.com/i/adsct?txn_id={id}&fmt=gif")
            }
        }
    }
}

/// How the interstitial page for a link is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingPageMode {
    /// Defer to the global loading-page settings.
    Global,
    /// Pick any configured page uniformly at random.
    Random,
    /// Use a specific page by id.
    Specific,
}

/// Per-link override of the global loading-page settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingPageOverride {
    pub use_global: bool,
    pub mode: LoadingPageMode,
    pub selected_page_id: Option<String>,
}

/// A short link and its full redirect rule set.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: String,
    pub short_code: String,
    /// Destination URL; base64-encoded at rest when `use_base64_encoding`.
    pub long_url: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,

    // Presentation
    pub use_base64_encoding: bool,
    /// `None` means "use the global default redirect kind".
    pub redirect_kind: Option<RedirectKind>,
    pub is_cloaked: bool,
    pub use_meta_refresh: bool,
    /// Meaningful only when `use_meta_refresh` is set.
    pub meta_refresh_delay_secs: u32,

    // Gates
    pub password: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_clicks: Option<u64>,
    pub captcha_required: bool,

    // Targeting
    pub geo_targets: Vec<GeoTarget>,
    pub device_targets: Vec<DeviceTarget>,
    /// When non-empty, combined with `long_url` into a uniform rotation set.
    pub ab_test_urls: Vec<String>,

    // Side effects
    pub retargeting_pixels: Vec<RetargetingPixel>,

    pub loading_page: Option<LoadingPageOverride>,
}

impl Link {
    /// A plain link with every optional feature disabled. Dashboards and
    /// tests start from this and flip on what they need.
    pub fn new(
        id: impl Into<String>,
        short_code: impl Into<String>,
        long_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            short_code: short_code.into(),
            long_url: long_url.into(),
            title: None,
            created_at: Utc::now(),
            use_base64_encoding: false,
            redirect_kind: None,
            is_cloaked: false,
            use_meta_refresh: false,
            meta_refresh_delay_secs: 0,
            password: None,
            expires_at: None,
            max_clicks: None,
            captcha_required: false,
            geo_targets: Vec::new(),
            device_targets: Vec::new(),
            ab_test_urls: Vec::new(),
            retargeting_pixels: Vec::new(),
            loading_page: None,
        }
    }
}

// ── Click ──────────────────────────────────────────────────────────────────

/// One observed visit, appended exactly once per resolution that passes
/// every gate. Gate-halted visits are never recorded.
#[derive(Debug, Clone, Serialize)]
pub struct Click {
    pub id: String,
    pub link_id: String,
    pub clicked_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// "direct" when the request carried no Referer header.
    pub referrer: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub is_bot: bool,
    pub is_email_scanner: bool,
}

// ── Collaborator data ──────────────────────────────────────────────────────

/// Global loading-page defaults.
#[derive(Debug, Clone)]
pub struct LoadingPageSettings {
    pub enabled: bool,
    /// Global mode is never `Global`; only per-link overrides defer.
    pub mode: LoadingPageMode,
    pub selected_page_id: Option<String>,
}

/// Global defaults for link fields left at "use global".
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_redirect_kind: RedirectKind,
    pub loading_page: LoadingPageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_redirect_kind: RedirectKind::Temporary,
            loading_page: LoadingPageSettings {
                enabled: false,
                mode: LoadingPageMode::Random,
                selected_page_id: None,
            },
        }
    }
}

/// An interstitial page body, selected by id or at random.
#[derive(Debug, Clone)]
pub struct LoadingPage {
    pub id: String,
    pub name: String,
    pub html_content: String,
}

/// CAPTCHA provider keys. The CAPTCHA gate only runs when both keys are set;
/// otherwise links requiring CAPTCHA degrade to pass-through.
#[derive(Debug, Clone)]
pub struct CaptchaConfig {
    pub site_key: String,
    pub secret_key: String,
}

impl CaptchaConfig {
    pub fn is_configured(&self) -> bool {
        !self.site_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }
}
