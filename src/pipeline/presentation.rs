use crate::models::{Link, RedirectKind, RetargetingPixel, Settings};
use crate::pipeline::gates::Halt;

/// The single deterministic decision the pipeline produces per request.
/// Rendering is the HTTP layer's concern; these carry everything it needs.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// A gate halted resolution. No click was recorded.
    Halted(Halt),
    /// Direct HTTP redirect: 301 when `permanent`, 302 otherwise.
    Redirect {
        url: String,
        permanent: bool,
        pixels: Vec<RetargetingPixel>,
    },
    /// Full-viewport frame embedding the destination; the short-code URL
    /// stays in the address bar.
    Cloak {
        url: String,
        title: String,
        pixels: Vec<RetargetingPixel>,
    },
    /// Interstitial shown for `delay_secs`, then navigation to `url` via a
    /// passive refresh directive with an active timer as fallback.
    Interstitial {
        url: String,
        delay_secs: u32,
        body_html: String,
        title: String,
        pixels: Vec<RetargetingPixel>,
    },
}

/// Pick the presentation for a resolved destination, in fixed priority
/// order: cloak, then delayed interstitial, then direct redirect. The
/// interstitial body is only consulted when meta-refresh applies.
pub fn present(
    link: &Link,
    settings: &Settings,
    url: String,
    interstitial_body: Option<String>,
) -> Resolution {
    let pixels = link.retargeting_pixels.clone();
    let title = link
        .title
        .clone()
        .unwrap_or_else(|| "Redirecting…".to_owned());

    if link.is_cloaked {
        return Resolution::Cloak { url, title, pixels };
    }

    if link.use_meta_refresh {
        return Resolution::Interstitial {
            url,
            delay_secs: link.meta_refresh_delay_secs,
            body_html: interstitial_body
                .unwrap_or_else(|| super::loading_page::PLACEHOLDER_HTML.to_owned()),
            title,
            pixels,
        };
    }

    let kind = link
        .redirect_kind
        .unwrap_or(settings.default_redirect_kind);
    Resolution::Redirect {
        url,
        permanent: kind == RedirectKind::Permanent,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link() -> Link {
        Link::new("l1", "abc", "https://example.com")
    }

    #[test]
    fn default_is_a_temporary_redirect() {
        let res = present(&link(), &Settings::default(), "https://example.com".into(), None);
        match res {
            Resolution::Redirect { permanent, .. } => assert!(!permanent),
            other => panic!("expected Redirect, got {other:?}"),
        }
    }

    #[test]
    fn permanent_kind_marks_the_redirect() {
        let mut l = link();
        l.redirect_kind = Some(RedirectKind::Permanent);
        match present(&l, &Settings::default(), "u".into(), None) {
            Resolution::Redirect { permanent, .. } => assert!(permanent),
            other => panic!("expected Redirect, got {other:?}"),
        }
    }

    #[test]
    fn global_default_kind_applies_when_link_leaves_it_unset() {
        let mut settings = Settings::default();
        settings.default_redirect_kind = RedirectKind::Permanent;
        match present(&link(), &settings, "u".into(), None) {
            Resolution::Redirect { permanent, .. } => assert!(permanent),
            other => panic!("expected Redirect, got {other:?}"),
        }
    }

    #[test]
    fn cloak_outranks_meta_refresh() {
        let mut l = link();
        l.is_cloaked = true;
        l.use_meta_refresh = true;
        l.meta_refresh_delay_secs = 5;
        match present(&l, &Settings::default(), "u".into(), Some("body".into())) {
            Resolution::Cloak { .. } => {}
            other => panic!("expected Cloak, got {other:?}"),
        }
    }

    #[test]
    fn meta_refresh_yields_an_interstitial_with_delay() {
        let mut l = link();
        l.use_meta_refresh = true;
        l.meta_refresh_delay_secs = 3;
        match present(&l, &Settings::default(), "u".into(), Some("<b>wait</b>".into())) {
            Resolution::Interstitial {
                delay_secs,
                body_html,
                ..
            } => {
                assert_eq!(delay_secs, 3);
                assert_eq!(body_html, "<b>wait</b>");
            }
            other => panic!("expected Interstitial, got {other:?}"),
        }
    }
}
