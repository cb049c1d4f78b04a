use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::classify::UaProfile;
use crate::models::{Click, Link};
use crate::pipeline::Visitor;

/// Build the click record for one visit. The bot fields come from the fast
/// local heuristic; the annotation service may overwrite them later.
/// Geography is whatever the caller had available synchronously — an absent
/// lookup yields empty fields, never a wait.
pub fn build_click(link: &Link, visitor: &Visitor, profile: &UaProfile, now: DateTime<Utc>) -> Click {
    Click {
        id: Uuid::new_v4().to_string(),
        link_id: link.id.clone(),
        clicked_at: now,
        ip_address: visitor.ip.clone(),
        user_agent: visitor.user_agent.clone(),
        referrer: visitor
            .referrer
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or("direct")
            .to_owned(),
        country: visitor.country.clone(),
        region: visitor.region.clone(),
        city: visitor.city.clone(),
        browser: profile.browser.clone(),
        os: profile.os.clone(),
        device: profile.device.clone(),
        is_bot: profile.is_bot,
        is_email_scanner: profile.is_email_scanner,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;

    #[test]
    fn missing_referrer_is_recorded_as_direct() {
        let link = Link::new("l1", "abc", "https://example.com");
        let visitor = Visitor::default();
        let profile = classify::classify(None);
        let click = build_click(&link, &visitor, &profile, Utc::now());

        assert_eq!(click.referrer, "direct");
        assert_eq!(click.link_id, "l1");
        assert!(click.is_bot, "absent UA is treated as a bot");
    }

    #[test]
    fn click_ids_are_unique() {
        let link = Link::new("l1", "abc", "https://example.com");
        let visitor = Visitor::default();
        let profile = classify::classify(None);
        let a = build_click(&link, &visitor, &profile, Utc::now());
        let b = build_click(&link, &visitor, &profile, Utc::now());
        assert_ne!(a.id, b.id);
    }
}
