use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{DeviceClass, Link};

/// The chosen destination. `decode_fell_back` marks the lossy fallback case
/// where a base64-flagged URL did not decode and the raw string was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub url: String,
    pub decode_fell_back: bool,
}

/// Pick the final destination URL for one visit.
///
/// Precedence, first match wins:
/// 1. geo target (list order, country code compared case-insensitively)
/// 2. device target (visitor's device class)
/// 3. A/B rotation: uniform over `{long_url} ∪ ab_test_urls`, a fresh draw
///    per request — deliberately no session stickiness
/// 4. `long_url`
///
/// If the link stores its URLs base64-encoded the selected URL is decoded
/// last, so targeting and rotation operate on whatever form is stored.
pub fn resolve_destination<R: Rng + ?Sized>(
    link: &Link,
    visitor_country: Option<&str>,
    device: DeviceClass,
    rng: &mut R,
) -> Resolved {
    let selected = select(link, visitor_country, device, rng);
    if link.use_base64_encoding {
        decode(selected, &link.short_code)
    } else {
        Resolved {
            url: selected.to_owned(),
            decode_fell_back: false,
        }
    }
}

fn select<'a, R: Rng + ?Sized>(
    link: &'a Link,
    visitor_country: Option<&str>,
    device: DeviceClass,
    rng: &mut R,
) -> &'a str {
    if let Some(country) = visitor_country {
        if let Some(target) = link
            .geo_targets
            .iter()
            .find(|t| t.country.eq_ignore_ascii_case(country))
        {
            return &target.url;
        }
    }

    if let Some(target) = link.device_targets.iter().find(|t| t.device == device) {
        return &target.url;
    }

    if !link.ab_test_urls.is_empty() {
        let mut candidates: Vec<&str> = Vec::with_capacity(link.ab_test_urls.len() + 1);
        candidates.push(&link.long_url);
        candidates.extend(link.ab_test_urls.iter().map(String::as_str));
        if let Some(&choice) = candidates.choose(rng) {
            return choice;
        }
    }

    &link.long_url
}

/// Reverse the base64 obfuscation. A value that does not decode to UTF-8 is
/// passed through untouched; a broken stored URL must degrade, not 500.
fn decode(raw: &str, short_code: &str) -> Resolved {
    match STANDARD.decode(raw.trim()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(url) => Resolved {
                url,
                decode_fell_back: false,
            },
            Err(_) => fallback(raw, short_code, "decoded bytes are not UTF-8"),
        },
        Err(_) => fallback(raw, short_code, "invalid base64"),
    }
}

fn fallback(raw: &str, short_code: &str, reason: &str) -> Resolved {
    tracing::warn!(%short_code, reason, "base64 decode failed; using raw stored URL");
    Resolved {
        url: raw.to_owned(),
        decode_fell_back: true,
    }
}
