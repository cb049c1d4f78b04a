//! SQLite store behavior: row mapping of JSON-valued link fields, live click
//! counts, concurrent appends, annotation updates, and collaborator reads.

use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use uuid::Uuid;

use gatelink::models::{Click, DeviceClass, LoadingPageMode, PixelProvider, RedirectKind};
use gatelink::registry::{ConfigStore, Registry, SqliteStore};

async fn open_store(dir: &tempfile::TempDir) -> (SqlitePool, SqliteStore) {
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("open sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    (pool.clone(), SqliteStore::new(pool))
}

async fn insert_link(pool: &SqlitePool, id: &str, code: &str) {
    sqlx::query(
        "INSERT INTO links
             (id, short_code, long_url, redirect_kind, password, max_clicks,
              geo_targets, device_targets, ab_test_urls, retargeting_pixels, loading_page)
         VALUES (?1, ?2, 'https://example.com', 'permanent', 'pw', 5,
                 '[{\"country\":\"US\",\"url\":\"https://us.example.com\"}]',
                 '[{\"device\":\"iOS\",\"url\":\"https://ios.example.com\"}]',
                 '[\"https://b.example.com\"]',
                 '[{\"provider\":\"Google Ads\",\"id\":\"AW-123\"}]',
                 '{\"use_global\":false,\"mode\":\"specific\",\"selected_page_id\":\"p1\"}')",
    )
    .bind(id)
    .bind(code)
    .execute(pool)
    .await
    .expect("insert link");
}

fn click(link_id: &str) -> Click {
    Click {
        id: Uuid::new_v4().to_string(),
        link_id: link_id.into(),
        clicked_at: Utc::now(),
        ip_address: Some("203.0.113.9".into()),
        user_agent: Some("Mozilla/5.0".into()),
        referrer: "direct".into(),
        country: None,
        region: None,
        city: None,
        browser: Some("Chrome".into()),
        os: Some("Windows 10".into()),
        device: Some("pc".into()),
        is_bot: false,
        is_email_scanner: false,
    }
}

#[tokio::test]
async fn lookup_maps_json_columns_onto_the_link() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, store) = open_store(&dir).await;
    insert_link(&pool, "l1", "abc").await;

    let link = store.lookup("abc").await.unwrap().expect("link exists");
    assert_eq!(link.id, "l1");
    assert_eq!(link.long_url, "https://example.com");
    assert_eq!(link.redirect_kind, Some(RedirectKind::Permanent));
    assert_eq!(link.password.as_deref(), Some("pw"));
    assert_eq!(link.max_clicks, Some(5));

    assert_eq!(link.geo_targets.len(), 1);
    assert_eq!(link.geo_targets[0].country, "US");
    assert_eq!(link.device_targets[0].device, DeviceClass::Ios);
    assert_eq!(link.ab_test_urls, vec!["https://b.example.com".to_owned()]);
    assert_eq!(link.retargeting_pixels[0].provider, PixelProvider::GoogleAds);

    let override_ = link.loading_page.expect("override present");
    assert!(!override_.use_global);
    assert_eq!(override_.mode, LoadingPageMode::Specific);
    assert_eq!(override_.selected_page_id.as_deref(), Some("p1"));

    // Second lookup is served from the cache
    assert!(store.lookup("abc").await.unwrap().is_some());
    assert!(store.lookup("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn append_click_is_durable_and_counted_live() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, store) = open_store(&dir).await;
    insert_link(&pool, "l1", "abc").await;

    assert_eq!(store.click_count("l1").await.unwrap(), 0);
    store.append_click(click("l1")).await.unwrap();
    store.append_click(click("l1")).await.unwrap();
    assert_eq!(store.click_count("l1").await.unwrap(), 2);
}

#[tokio::test]
async fn concurrent_appends_to_the_same_link_are_all_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, store) = open_store(&dir).await;
    insert_link(&pool, "l1", "abc").await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.append_click(click("l1")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(store.click_count("l1").await.unwrap(), 8);
}

#[tokio::test]
async fn attach_annotation_updates_the_stored_click() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, store) = open_store(&dir).await;
    insert_link(&pool, "l1", "abc").await;

    let c = click("l1");
    let click_id = c.id.clone();
    store.append_click(c).await.unwrap();

    store.attach_annotation(&click_id, true, true).await.unwrap();

    let (is_bot, is_email_scanner): (bool, bool) =
        sqlx::query_as("SELECT is_bot, is_email_scanner FROM clicks WHERE id = ?1")
            .bind(&click_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(is_bot);
    assert!(is_email_scanner);
}

#[tokio::test]
async fn settings_and_captcha_rows_are_readable() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, store) = open_store(&dir).await;

    // Migration seeds the defaults
    let settings = store.settings().await.unwrap();
    assert_eq!(settings.default_redirect_kind, RedirectKind::Temporary);
    assert!(!settings.loading_page.enabled);

    let captcha = store.captcha().await.unwrap().expect("seeded row");
    assert!(!captcha.is_configured());

    sqlx::query(
        "UPDATE settings SET loading_enabled = 1, loading_mode = 'specific',
             loading_selected_page_id = 'p9' WHERE id = 1",
    )
    .execute(&pool)
    .await
    .unwrap();

    let settings = store.settings().await.unwrap();
    assert!(settings.loading_page.enabled);
    assert_eq!(settings.loading_page.mode, LoadingPageMode::Specific);
    assert_eq!(settings.loading_page.selected_page_id.as_deref(), Some("p9"));
}

#[tokio::test]
async fn loading_pages_are_listed_and_fetched_by_id() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, store) = open_store(&dir).await;

    sqlx::query("INSERT INTO loading_pages (id, name, html_content) VALUES ('p1', 'a', '<b>a</b>')")
        .execute(&pool)
        .await
        .unwrap();

    let pages = store.loading_pages().await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(
        store.loading_page("p1").await.unwrap().unwrap().html_content,
        "<b>a</b>"
    );
    assert!(store.loading_page("missing").await.unwrap().is_none());
}
