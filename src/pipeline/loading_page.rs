use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{Link, LoadingPage, LoadingPageMode, Settings};

/// Minimal body shown when no configured page applies. Selection never
/// errors; it degrades to this.
pub const PLACEHOLDER_HTML: &str = "<p>Redirecting…</p>";

/// The merged per-link / global configuration, with the `Global` indirection
/// already resolved. `None` means interstitials carry the placeholder body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveMode {
    Random,
    Specific(Option<String>),
}

/// Merge the per-link override with the global defaults.
///
/// - No override, or `use_global`: the global settings apply, including
///   their enabled flag.
/// - Override with `mode == Global`: the global mode and page id apply, but
///   the override itself counts as enabled.
/// - Otherwise the override's mode applies; a `Specific` override without a
///   page id borrows the globally selected page.
pub fn effective_config(link: &Link, settings: &Settings) -> Option<EffectiveMode> {
    let global = &settings.loading_page;

    let Some(override_) = link.loading_page.as_ref().filter(|c| !c.use_global) else {
        if !global.enabled {
            return None;
        }
        return Some(match global.mode {
            LoadingPageMode::Specific => {
                EffectiveMode::Specific(global.selected_page_id.clone())
            }
            _ => EffectiveMode::Random,
        });
    };

    let mode = match override_.mode {
        LoadingPageMode::Global => global.mode,
        mode => mode,
    };

    Some(match mode {
        LoadingPageMode::Specific => EffectiveMode::Specific(
            override_
                .selected_page_id
                .clone()
                .or_else(|| global.selected_page_id.clone()),
        ),
        _ => EffectiveMode::Random,
    })
}

/// Pick the concrete HTML body for an effective config. A missing or deleted
/// page always falls back to the placeholder.
pub fn select_page<R: Rng + ?Sized>(
    config: Option<EffectiveMode>,
    pages: &[LoadingPage],
    rng: &mut R,
) -> String {
    match config {
        Some(EffectiveMode::Random) => pages
            .choose(rng)
            .map(|p| p.html_content.clone())
            .unwrap_or_else(|| PLACEHOLDER_HTML.to_owned()),
        Some(EffectiveMode::Specific(Some(id))) => pages
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.html_content.clone())
            .unwrap_or_else(|| PLACEHOLDER_HTML.to_owned()),
        Some(EffectiveMode::Specific(None)) | None => PLACEHOLDER_HTML.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoadingPageOverride, LoadingPageSettings, RedirectKind};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(11)
    }

    fn page(id: &str, body: &str) -> LoadingPage {
        LoadingPage {
            id: id.into(),
            name: id.into(),
            html_content: body.into(),
        }
    }

    fn settings(enabled: bool, mode: LoadingPageMode, page_id: Option<&str>) -> Settings {
        Settings {
            default_redirect_kind: RedirectKind::Temporary,
            loading_page: LoadingPageSettings {
                enabled,
                mode,
                selected_page_id: page_id.map(Into::into),
            },
        }
    }

    #[test]
    fn no_override_and_global_disabled_means_placeholder() {
        let link = Link::new("l1", "abc", "https://example.com");
        let cfg = effective_config(&link, &settings(false, LoadingPageMode::Random, None));
        assert_eq!(cfg, None);
        assert_eq!(select_page(cfg, &[page("p1", "<b>hi</b>")], &mut rng()), PLACEHOLDER_HTML);
    }

    #[test]
    fn global_specific_selects_global_page() {
        let link = Link::new("l1", "abc", "https://example.com");
        let cfg = effective_config(
            &link,
            &settings(true, LoadingPageMode::Specific, Some("p2")),
        );
        assert_eq!(cfg, Some(EffectiveMode::Specific(Some("p2".into()))));

        let pages = [page("p1", "one"), page("p2", "two")];
        assert_eq!(select_page(cfg, &pages, &mut rng()), "two");
    }

    #[test]
    fn override_specific_beats_global() {
        let mut link = Link::new("l1", "abc", "https://example.com");
        link.loading_page = Some(LoadingPageOverride {
            use_global: false,
            mode: LoadingPageMode::Specific,
            selected_page_id: Some("p1".into()),
        });
        let cfg = effective_config(
            &link,
            &settings(true, LoadingPageMode::Specific, Some("p2")),
        );
        assert_eq!(cfg, Some(EffectiveMode::Specific(Some("p1".into()))));
    }

    #[test]
    fn override_with_use_global_defers_entirely() {
        let mut link = Link::new("l1", "abc", "https://example.com");
        link.loading_page = Some(LoadingPageOverride {
            use_global: true,
            mode: LoadingPageMode::Specific,
            selected_page_id: Some("p1".into()),
        });
        // use_global wins over the override's own mode, and the global
        // config is disabled, so nothing applies.
        let cfg = effective_config(&link, &settings(false, LoadingPageMode::Random, None));
        assert_eq!(cfg, None);
    }

    #[test]
    fn override_global_mode_resolves_to_global_mode() {
        let mut link = Link::new("l1", "abc", "https://example.com");
        link.loading_page = Some(LoadingPageOverride {
            use_global: false,
            mode: LoadingPageMode::Global,
            selected_page_id: None,
        });
        let cfg = effective_config(
            &link,
            // Globally disabled, but a non-global override counts as enabled
            &settings(false, LoadingPageMode::Specific, Some("p2")),
        );
        assert_eq!(cfg, Some(EffectiveMode::Specific(Some("p2".into()))));
    }

    #[test]
    fn deleted_specific_page_falls_back_to_placeholder() {
        let cfg = Some(EffectiveMode::Specific(Some("gone".into())));
        let pages = [page("p1", "one")];
        assert_eq!(select_page(cfg, &pages, &mut rng()), PLACEHOLDER_HTML);
    }

    #[test]
    fn random_mode_with_no_pages_falls_back_to_placeholder() {
        assert_eq!(
            select_page(Some(EffectiveMode::Random), &[], &mut rng()),
            PLACEHOLDER_HTML
        );
    }

    #[test]
    fn random_mode_picks_a_configured_page() {
        let pages = [page("p1", "one"), page("p2", "two")];
        let body = select_page(Some(EffectiveMode::Random), &pages, &mut rng());
        assert!(body == "one" || body == "two");
    }
}
