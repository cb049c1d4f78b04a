use chrono::{DateTime, Utc};

use crate::models::Link;

/// A gate's short-circuit outcome. Halts are control flow, not errors: each
/// maps to a specific user-visible response and no click is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// `expires_at` has passed.
    Expired,
    /// `max_clicks` has been reached.
    QuotaExceeded,
    /// A password is set and no valid credential accompanied the request.
    PasswordRequired,
    /// CAPTCHA is required, configured, and no token accompanied the request.
    CaptchaRequired,
}

/// Request-side inputs the gates evaluate against.
#[derive(Debug, Clone, Copy, Default)]
pub struct GateInput<'a> {
    /// Live click count, for the quota check.
    pub click_count: u64,
    /// Password supplied via query or cookie, if any.
    pub credential: Option<&'a str>,
    /// CAPTCHA token supplied via query or cookie, if any.
    pub captcha_token: Option<&'a str>,
    /// Whether a CaptchaConfig with both keys is present.
    pub captcha_configured: bool,
}

type Gate = fn(&Link, &GateInput, DateTime<Utc>) -> Option<Halt>;

/// The chain, in its fixed order: expiration/quota first (cheapest and
/// final), then password, then CAPTCHA. The first halt wins.
const GATES: &[Gate] = &[expiration, password, captcha];

pub fn run(link: &Link, input: &GateInput, now: DateTime<Utc>) -> Option<Halt> {
    GATES.iter().find_map(|gate| gate(link, input, now))
}

fn expiration(link: &Link, input: &GateInput, now: DateTime<Utc>) -> Option<Halt> {
    if let Some(expires_at) = link.expires_at {
        if now > expires_at {
            return Some(Halt::Expired);
        }
    }
    if let Some(max) = link.max_clicks {
        if input.click_count >= max {
            return Some(Halt::QuotaExceeded);
        }
    }
    None
}

fn password(link: &Link, input: &GateInput, _now: DateTime<Utc>) -> Option<Halt> {
    let Some(expected) = link.password.as_deref() else {
        return None;
    };
    match input.credential {
        Some(supplied) if supplied == expected => None,
        _ => Some(Halt::PasswordRequired),
    }
}

fn captcha(link: &Link, input: &GateInput, _now: DateTime<Utc>) -> Option<Halt> {
    if !link.captcha_required {
        return None;
    }
    if !input.captcha_configured {
        // Never block on an unconfigured mechanism
        tracing::warn!(
            short_code = %link.short_code,
            "link requires CAPTCHA but no CAPTCHA keys are configured; gate skipped"
        );
        return None;
    }
    match input.captcha_token {
        Some(token) if !token.is_empty() => None,
        _ => Some(Halt::CaptchaRequired),
    }
}
