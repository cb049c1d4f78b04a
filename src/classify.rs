use woothee::parser::Parser;

use crate::models::DeviceClass;

/// Everything the pipeline derives from a User-Agent string: display fields
/// for the click record, the device class for targeting, and the local
/// bot / email-scanner verdict.
///
/// This is the fast synchronous classifier. An external annotation service
/// may refine `is_bot` / `is_email_scanner` after the click is recorded; it
/// never blocks resolution.
#[derive(Debug, Clone)]
pub struct UaProfile {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    pub class: DeviceClass,
    pub is_bot: bool,
    pub is_email_scanner: bool,
}

/// User-Agent substrings that mark ordinary crawlers and scripted clients.
const BOT_MARKERS: &[&str] = &[
    "bot",
    "crawler",
    "spider",
    "crawl",
    "curl/",
    "wget/",
    "python-requests",
    "go-http-client",
    "headlesschrome",
    "facebookexternalhit",
    "slurp",
    "preview",
];

/// Substrings seen in link-scanning mail gateways. A scanner is also a bot.
const SCANNER_MARKERS: &[&str] = &[
    "googleimageproxy",
    "mimecast",
    "proofpoint",
    "barracuda",
    "symantec",
    "trendmicro",
    "skypeuripreview",
    "outlook",
    "ms-office",
];

/// Parse a User-Agent string with woothee and apply the substring heuristics.
/// A missing or empty UA yields a Desktop profile flagged as a bot: real
/// browsers always send one.
pub fn classify(ua: Option<&str>) -> UaProfile {
    let ua = match ua {
        Some(s) if !s.is_empty() => s,
        _ => {
            return UaProfile {
                browser: None,
                os: None,
                device: None,
                class: DeviceClass::Desktop,
                is_bot: true,
                is_email_scanner: false,
            }
        }
    };

    let lower = ua.to_ascii_lowercase();
    let is_email_scanner = SCANNER_MARKERS.iter().any(|m| lower.contains(m));
    let mut is_bot = is_email_scanner || BOT_MARKERS.iter().any(|m| lower.contains(m));

    let (browser, os, device) = match Parser::new().parse(ua) {
        Some(result) => {
            if result.category == "crawler" {
                is_bot = true;
            }
            (
                non_unknown(result.name),
                non_unknown(result.os),
                non_unknown(result.category),
            )
        }
        None => (None, None, None),
    };

    let class = device_class(os.as_deref(), &lower);

    UaProfile {
        browser,
        os,
        device,
        class,
        is_bot,
        is_email_scanner,
    }
}

/// Map a parsed OS name (plus the raw UA as tie-breaker) onto the three
/// classes device targeting understands.
fn device_class(os: Option<&str>, ua_lower: &str) -> DeviceClass {
    if let Some(os) = os {
        let os = os.to_ascii_lowercase();
        if os.contains("iphone") || os.contains("ipad") || os.contains("ios") {
            return DeviceClass::Ios;
        }
        if os.contains("android") {
            return DeviceClass::Android;
        }
    }
    // woothee leaves os empty for some mobile UAs; fall back to the raw string
    if ua_lower.contains("iphone") || ua_lower.contains("ipad") {
        DeviceClass::Ios
    } else if ua_lower.contains("android") {
        DeviceClass::Android
    } else {
        DeviceClass::Desktop
    }
}

fn non_unknown(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) \
        AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Mobile/15E148 Safari/604.1";
    const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
    const ANDROID_UA: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) \
        AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Mobile Safari/537.36";

    #[test]
    fn classifies_device_classes() {
        assert_eq!(classify(Some(IPHONE_UA)).class, DeviceClass::Ios);
        assert_eq!(classify(Some(ANDROID_UA)).class, DeviceClass::Android);
        assert_eq!(classify(Some(DESKTOP_UA)).class, DeviceClass::Desktop);
    }

    #[test]
    fn real_browsers_are_not_bots() {
        let profile = classify(Some(DESKTOP_UA));
        assert!(!profile.is_bot);
        assert!(!profile.is_email_scanner);
        assert_eq!(profile.browser.as_deref(), Some("Chrome"));
    }

    #[test]
    fn crawlers_and_scripts_are_bots() {
        assert!(classify(Some("Googlebot/2.1 (+http://www.google.com/bot.html)")).is_bot);
        assert!(classify(Some("curl/8.4.0")).is_bot);
        assert!(classify(None).is_bot);
    }

    #[test]
    fn mail_scanners_are_scanners_and_bots() {
        let profile = classify(Some("Mozilla/5.0 (compatible; Proofpoint URL Defense)"));
        assert!(profile.is_email_scanner);
        assert!(profile.is_bot);
    }
}
