use crate::{
    geo,
    models::RetargetingPixel,
    pipeline::{self, Halt, Resolution, Visitor},
    registry::ConfigStore,
    AppState,
};
use askama::Template;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use chrono::Utc;
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};

// ── Template structs ───────────────────────────────────────────────────────

#[derive(Template)]
#[template(path = "cloak.html")]
struct CloakTemplate {
    url: String,
    title: String,
    pixels: Vec<RetargetingPixel>,
}

#[derive(Template)]
#[template(path = "interstitial.html")]
struct InterstitialTemplate {
    title: String,
    delay_secs: u32,
    url: String,
    /// JSON-encoded copy of `url` for the script fallback; HTML entity
    /// escaping would corrupt it inside a `<script>` block.
    url_json: String,
    body: String,
    pixels: Vec<RetargetingPixel>,
}

#[derive(Template)]
#[template(path = "password.html")]
struct PasswordTemplate {
    code: String,
    error: bool,
}

#[derive(Template)]
#[template(path = "captcha.html")]
struct CaptchaTemplate {
    code: String,
    site_key: String,
}

#[derive(Template)]
#[template(path = "gone.html")]
struct GoneTemplate;

#[derive(Template)]
#[template(path = "redirect_body.html")]
struct RedirectBodyTemplate {
    pixels: Vec<RetargetingPixel>,
}

// ── Query types ────────────────────────────────────────────────────────────

/// Credentials a gate challenge sends back on re-resolution.
#[derive(Deserialize, Default)]
pub struct GateQuery {
    pub pw: Option<String>,
    pub captcha: Option<String>,
    /// Field name the reCAPTCHA widget submits.
    #[serde(rename = "g-recaptcha-response")]
    pub g_recaptcha_response: Option<String>,
}

// ── Handler ────────────────────────────────────────────────────────────────

/// GET /:code[?pw=...][&captcha=...]
///
/// The only resolution entry point. Builds the visitor context from the
/// request, runs the pipeline, and maps its single decision onto an HTTP
/// response. Freshly supplied credentials that pass their gate are persisted
/// as cookies so a reload does not re-challenge.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<GateQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    let ip = extract_ip(&headers, addr);

    let user_agent = header_str(&headers, "user-agent");
    let referrer = header_str(&headers, "referer");

    // Geography: a proxy-provided country header wins; otherwise whatever
    // the geo cache already knows about this IP. Never a network wait here.
    let cached_geo = ip.as_deref().and_then(|ip| state.geo_cache.cached(ip));
    let country_code = header_str(&headers, "cf-ipcountry")
        .or_else(|| header_str(&headers, "x-country-code"))
        .or_else(|| cached_geo.as_ref().map(|g| g.country_code.clone()));

    let credential = query
        .pw
        .clone()
        .or_else(|| cookie_value(&jar, &format!("gl_pw_{code}")));
    let captcha_token = query
        .captcha
        .clone()
        .or_else(|| query.g_recaptcha_response.clone())
        .or_else(|| cookie_value(&jar, &format!("gl_captcha_{code}")));

    let visitor = Visitor {
        ip: ip.clone(),
        user_agent,
        referrer,
        country_code,
        country: cached_geo.as_ref().map(|g| g.country.clone()),
        region: cached_geo.as_ref().map(|g| g.region.clone()),
        city: cached_geo.as_ref().map(|g| g.city.clone()),
        credential,
        captcha_token,
    };

    let result = pipeline::resolve(
        &state.registry,
        state.store.as_ref(),
        state.annotator.as_ref(),
        &code,
        &visitor,
        Utc::now(),
    )
    .await;

    // Warm the geo cache for this IP in the background so the next click
    // from it carries geography.
    if cached_geo.is_none() {
        if let Some(ip) = ip {
            let cache = state.geo_cache.clone();
            tokio::spawn(async move {
                geo::lookup(&ip, &cache).await;
            });
        }
    }

    match result {
        Ok(Resolution::Halted(Halt::PasswordRequired)) => {
            // A present ?pw= that still halted means the password was wrong
            let error = query.pw.is_some();
            PasswordTemplate { code, error }.into_response()
        }
        Ok(Resolution::Halted(Halt::CaptchaRequired)) => {
            let site_key = match state.store.captcha().await {
                Ok(Some(config)) => config.site_key,
                Ok(None) => String::new(),
                Err(e) => {
                    tracing::error!("failed to load CAPTCHA config for '{}': {}", code, e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
                }
            };
            CaptchaTemplate { code, site_key }.into_response()
        }
        Ok(Resolution::Halted(Halt::Expired | Halt::QuotaExceeded)) => {
            (StatusCode::GONE, GoneTemplate).into_response()
        }
        Ok(Resolution::Redirect {
            url,
            permanent,
            pixels,
        }) => {
            let jar = remember_credentials(jar, &code, &query);
            (jar, redirect_response(&url, permanent, pixels)).into_response()
        }
        Ok(Resolution::Cloak { url, title, pixels }) => {
            let jar = remember_credentials(jar, &code, &query);
            (jar, CloakTemplate { url, title, pixels }).into_response()
        }
        Ok(Resolution::Interstitial {
            url,
            delay_secs,
            body_html,
            title,
            pixels,
        }) => {
            let jar = remember_credentials(jar, &code, &query);
            let url_json = serde_json::to_string(&url).unwrap_or_else(|_| "\"\"".into());
            (
                jar,
                InterstitialTemplate {
                    title,
                    delay_secs,
                    url,
                    url_json,
                    body: body_html,
                    pixels,
                },
            )
                .into_response()
        }
        Err(pipeline::ResolveError::NotFound) => {
            (StatusCode::NOT_FOUND, "Short link not found").into_response()
        }
        Err(pipeline::ResolveError::Storage(e)) => {
            // The click could not be recorded; no redirect may happen.
            tracing::error!("storage error resolving short code '{}': {}", code, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

/// Build a 301/302 with the pixel snippets riding in an inert HTML body.
fn redirect_response(url: &str, permanent: bool, pixels: Vec<RetargetingPixel>) -> Response {
    let status = if permanent {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::FOUND
    };

    let location = match HeaderValue::from_str(url) {
        Ok(v) => v,
        Err(_) => {
            tracing::error!("destination URL is not a valid Location header: {url:?}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Invalid destination").into_response();
        }
    };

    let body = if pixels.is_empty() {
        String::new()
    } else {
        RedirectBodyTemplate { pixels }.render().unwrap_or_default()
    };

    let mut response = (status, Html(body)).into_response();
    response.headers_mut().insert(header::LOCATION, location);
    response
}

/// Persist credentials that just passed their gate, scoped to this short
/// code's path so unrelated links never see them.
fn remember_credentials(mut jar: CookieJar, code: &str, query: &GateQuery) -> CookieJar {
    if let Some(pw) = &query.pw {
        jar = jar.add(credential_cookie(format!("gl_pw_{code}"), pw.clone(), code));
    }
    if let Some(token) = query
        .captcha
        .as_ref()
        .or(query.g_recaptcha_response.as_ref())
    {
        jar = jar.add(credential_cookie(
            format!("gl_captcha_{code}"),
            token.clone(),
            code,
        ));
    }
    jar
}

fn credential_cookie(name: String, value: String, code: &str) -> Cookie<'static> {
    Cookie::build((name, value))
        .path(format!("/{code}"))
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(12))
        .build()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name).map(|c| c.value().to_owned())
}

/// Determine the real client IP, preferring common proxy headers.
fn extract_ip(headers: &HeaderMap, addr: SocketAddr) -> Option<String> {
    // X-Forwarded-For can be a comma-separated list; take the first entry.
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(ip) = xff.split(',').next().map(str::trim) {
            if !ip.is_empty() {
                return Some(ip.to_owned());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real_ip.is_empty() {
            return Some(real_ip.to_owned());
        }
    }

    Some(addr.ip().to_string())
}
