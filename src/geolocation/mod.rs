//! Source address geolocation
//!
//! [`GeoResolver`] turns an address into a `"Country->Region"` label and
//! remembers the answer. Lookups go through a [`GeoLookup`] provider: the
//! ip-api.com HTTP service by default, or a local MaxMind GeoLite2-City
//! database. Failed lookups resolve to [`UNKNOWN_LOCATION`] and are cached
//! like any other answer, so a bad address costs at most one outbound call
//! per [`CachePolicy`] period.

pub mod ip_api;
pub mod maxmind;

pub use ip_api::IpApiLookup;
pub use maxmind::MaxMindLookup;

use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{GeoConfig, GeoProvider};

/// Label used when an address cannot be located
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Malformed provider response: {0}")]
    Malformed(String),

    #[error("Lookup failed: {0}")]
    Failed(String),

    #[error("Failed to open database: {0}")]
    Database(#[from] maxminddb::MaxMindDBError),

    #[error("Database file not found: {0}")]
    FileNotFound(String),

    #[error("IP address not found in database")]
    NotFound,

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),
}

/// A source of location labels for addresses
#[allow(async_fn_in_trait)]
pub trait GeoLookup {
    /// Resolve `address` to a `"Country->Region"` label
    async fn lookup(&self, address: &str) -> Result<String, GeoError>;
}

/// Build the label shown in alerts
pub fn format_label(country: &str, region: &str) -> String {
    format!("{}->{}", country, region)
}

/// When cached answers are looked up again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Every answer, including `unknown`, lives as long as the process
    #[default]
    Permanent,
    /// `unknown` answers are retried once they are older than the duration
    ExpireUnknownAfter(Duration),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    label: String,
    stored_at: Instant,
}

/// Caching front for a [`GeoLookup`] provider
pub struct GeoResolver<L> {
    provider: L,
    cache: HashMap<String, CacheEntry>,
    policy: CachePolicy,
}

impl<L: GeoLookup> GeoResolver<L> {
    pub fn new(provider: L) -> Self {
        Self::with_policy(provider, CachePolicy::default())
    }

    pub fn with_policy(provider: L, policy: CachePolicy) -> Self {
        GeoResolver {
            provider,
            cache: HashMap::new(),
            policy,
        }
    }

    /// Resolve `address`, consulting the provider only on a cache miss
    ///
    /// Never fails: provider errors are logged and cached as `unknown`.
    pub async fn resolve(&mut self, address: &str) -> String {
        if let Some(entry) = self.cache.get(address) {
            if !self.is_expired(entry) {
                return entry.label.clone();
            }
        }

        let label = match self.provider.lookup(address).await {
            Ok(label) => label,
            Err(e) => {
                log::warn!("Geolocation lookup for {} failed: {}", address, e);
                UNKNOWN_LOCATION.to_string()
            }
        };

        self.cache.insert(
            address.to_string(),
            CacheEntry {
                label: label.clone(),
                stored_at: Instant::now(),
            },
        );
        label
    }

    /// Cached label for `address`, if any
    pub fn cached(&self, address: &str) -> Option<&str> {
        self.cache.get(address).map(|entry| entry.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn provider(&self) -> &L {
        &self.provider
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        match self.policy {
            CachePolicy::Permanent => false,
            CachePolicy::ExpireUnknownAfter(ttl) => {
                entry.label == UNKNOWN_LOCATION && entry.stored_at.elapsed() >= ttl
            }
        }
    }
}

/// Provider selected by configuration
pub enum GeoBackend {
    IpApi(IpApiLookup),
    MaxMind(MaxMindLookup),
}

impl GeoBackend {
    pub fn from_config(config: &GeoConfig) -> Result<Self, GeoError> {
        match config.provider {
            GeoProvider::IpApi => Ok(GeoBackend::IpApi(IpApiLookup::new(
                &config.endpoint,
                &config.lang,
                Duration::from_secs(config.timeout_secs),
            )?)),
            GeoProvider::MaxMind => {
                let path = config
                    .database_path
                    .as_ref()
                    .ok_or_else(|| GeoError::FileNotFound("<geo.database_path not set>".to_string()))?;
                Ok(GeoBackend::MaxMind(MaxMindLookup::new(path, &config.lang)?))
            }
        }
    }
}

impl GeoLookup for GeoBackend {
    async fn lookup(&self, address: &str) -> Result<String, GeoError> {
        match self {
            GeoBackend::IpApi(provider) => provider.lookup(address).await,
            GeoBackend::MaxMind(provider) => provider.lookup(address).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeLookup {
        calls: Cell<usize>,
        answer: Option<&'static str>,
    }

    impl FakeLookup {
        fn answering(answer: &'static str) -> Self {
            FakeLookup {
                calls: Cell::new(0),
                answer: Some(answer),
            }
        }

        fn failing() -> Self {
            FakeLookup {
                calls: Cell::new(0),
                answer: None,
            }
        }
    }

    impl GeoLookup for FakeLookup {
        async fn lookup(&self, _address: &str) -> Result<String, GeoError> {
            self.calls.set(self.calls.get() + 1);
            self.answer
                .map(String::from)
                .ok_or_else(|| GeoError::Failed("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let mut resolver = GeoResolver::new(FakeLookup::answering("Germany->Hesse"));

        assert_eq!(resolver.resolve("203.0.113.9").await, "Germany->Hesse");
        assert_eq!(resolver.resolve("203.0.113.9").await, "Germany->Hesse");
        assert_eq!(resolver.provider().calls.get(), 1);
        assert_eq!(resolver.cached("203.0.113.9"), Some("Germany->Hesse"));
    }

    #[tokio::test]
    async fn test_failure_is_cached_as_unknown() {
        let mut resolver = GeoResolver::new(FakeLookup::failing());

        assert_eq!(resolver.resolve("10.0.0.5").await, UNKNOWN_LOCATION);
        assert_eq!(resolver.resolve("10.0.0.5").await, UNKNOWN_LOCATION);
        assert_eq!(resolver.provider().calls.get(), 1);
    }

    #[tokio::test]
    async fn test_distinct_addresses_are_looked_up_separately() {
        let mut resolver = GeoResolver::new(FakeLookup::answering("Japan->Tokyo"));

        resolver.resolve("198.51.100.1").await;
        resolver.resolve("198.51.100.2").await;
        assert_eq!(resolver.provider().calls.get(), 2);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_expiring_policy_retries_unknown_only() {
        tokio_test::block_on(async {
            let policy = CachePolicy::ExpireUnknownAfter(Duration::ZERO);

            let mut failing = GeoResolver::with_policy(FakeLookup::failing(), policy);
            failing.resolve("10.0.0.5").await;
            failing.resolve("10.0.0.5").await;
            assert_eq!(failing.provider().calls.get(), 2);

            let mut answering =
                GeoResolver::with_policy(FakeLookup::answering("France->Normandy"), policy);
            answering.resolve("192.0.2.44").await;
            answering.resolve("192.0.2.44").await;
            assert_eq!(answering.provider().calls.get(), 1);
        });
    }

    #[test]
    fn test_format_label() {
        assert_eq!(format_label("中国", "广东"), "中国->广东");
    }
}
