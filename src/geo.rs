use dashmap::DashMap;
use serde::Deserialize;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// ── Types ──────────────────────────────────────────────────────────────────

/// Geolocation data for a single IP address.
#[derive(Debug, Clone)]
pub struct GeoInfo {
    pub country: String,
    /// ISO 3166-1 alpha-2 code, the key geo targeting matches against.
    pub country_code: String,
    pub region: String,
    pub city: String,
}

/// Thread-safe in-memory cache: IP string → Option<GeoInfo>.
/// `None` means we already tried and the lookup failed/returned no data.
#[derive(Clone, Debug, Default)]
pub struct GeoCache {
    inner: Arc<DashMap<String, Option<GeoInfo>>>,
}

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous cache-only read. This is all the redirect hot path is
    /// allowed to consult; it must never wait on the network.
    pub fn cached(&self, ip: &str) -> Option<GeoInfo> {
        self.inner.get(ip).and_then(|entry| entry.clone())
    }
}

// ── ip-api.com response shape ──────────────────────────────────────────────

#[derive(Deserialize)]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    #[serde(rename = "regionName")]
    region_name: Option<String>,
    city: Option<String>,
}

// ── Public API ─────────────────────────────────────────────────────────────

/// Look up geolocation for `ip`, consulting `cache` first so an address is
/// never sent to the API more than once per server lifetime.
///
/// Returns `None` for private / loopback / link-local addresses, failed or
/// rate-limited API responses, and IPs that previously returned nothing.
/// The network request carries a 3-second timeout; the caller is expected to
/// be a background task, never the redirect itself.
pub async fn lookup(ip: &str, cache: &GeoCache) -> Option<GeoInfo> {
    if is_private(ip) {
        return None;
    }

    // Covers both successful hits and known misses
    if let Some(entry) = cache.inner.get(ip) {
        return entry.clone();
    }

    let result = fetch_geo(ip).await;

    // Cache the outcome either way so failures are not retried endlessly
    cache.inner.insert(ip.to_owned(), result.clone());

    result
}

// ── Internal helpers ───────────────────────────────────────────────────────

async fn fetch_geo(ip: &str) -> Option<GeoInfo> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .ok()?;

    let url = format!(
        "http://ip-api.com/json/{}?fields=status,country,countryCode,regionName,city",
        ip
    );

    let resp = client
        .get(&url)
        .send()
        .await
        .map_err(|e| tracing::debug!("geo lookup network error for {}: {}", ip, e))
        .ok()?;

    let body: IpApiResponse = resp
        .json()
        .await
        .map_err(|e| tracing::debug!("geo lookup parse error for {}: {}", ip, e))
        .ok()?;

    if body.status != "success" {
        tracing::debug!("geo lookup returned non-success status for {}", ip);
        return None;
    }

    let country = body.country.filter(|s| !s.is_empty()).unwrap_or_default();
    let country_code = body
        .country_code
        .filter(|s| !s.is_empty())
        .unwrap_or_default();
    let region = body
        .region_name
        .filter(|s| !s.is_empty())
        .unwrap_or_default();
    let city = body.city.filter(|s| !s.is_empty()).unwrap_or_default();

    // Treat completely empty results as a miss
    if country.is_empty() && country_code.is_empty() && region.is_empty() && city.is_empty() {
        return None;
    }

    Some(GeoInfo {
        country,
        country_code,
        region,
        city,
    })
}

/// Return `true` for addresses that should never be sent to a public
/// geolocation API: loopback, link-local, private ranges, and IPv6 special
/// addresses.
fn is_private(ip_str: &str) -> bool {
    // Strip IPv6-mapped IPv4 prefix: "::ffff:1.2.3.4" → "1.2.3.4"
    let ip_str = ip_str.strip_prefix("::ffff:").unwrap_or(ip_str);

    match IpAddr::from_str(ip_str) {
        Ok(IpAddr::V4(addr)) => {
            let octets = addr.octets();
            addr.is_loopback()          // 127.x.x.x
            || addr.is_link_local()     // 169.254.x.x
            || addr.is_unspecified()    // 0.0.0.0
            || addr.is_broadcast()
            // 10.x.x.x
            || octets[0] == 10
            // 172.16.x.x – 172.31.x.x
            || (octets[0] == 172 && (16..=31).contains(&octets[1]))
            // 192.168.x.x
            || (octets[0] == 192 && octets[1] == 168)
        }
        Ok(IpAddr::V6(addr)) => {
            addr.is_loopback()       // ::1
            || addr.is_unspecified() // ::
            // fe80::/10  link-local
            || (addr.segments()[0] & 0xffc0) == 0xfe80
            // fc00::/7   unique-local
            || (addr.segments()[0] & 0xfe00) == 0xfc00
        }
        Err(_) => true, // unparseable → treat as private / skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges_are_never_looked_up() {
        for ip in ["127.0.0.1", "10.1.2.3", "172.20.0.1", "192.168.1.1", "::1", "not-an-ip"] {
            assert!(is_private(ip), "{ip} should be private");
        }
        assert!(!is_private("8.8.8.8"));
        assert!(!is_private("::ffff:8.8.8.8"));
    }

    #[test]
    fn cached_is_a_pure_read() {
        let cache = GeoCache::new();
        assert!(cache.cached("8.8.8.8").is_none());
        cache.inner.insert(
            "8.8.8.8".into(),
            Some(GeoInfo {
                country: "United States".into(),
                country_code: "US".into(),
                region: "CA".into(),
                city: "Mountain View".into(),
            }),
        );
        assert_eq!(cache.cached("8.8.8.8").unwrap().country_code, "US");
    }
}
