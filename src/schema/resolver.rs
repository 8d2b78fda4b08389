//! Per-run schema resolution with coalesced, bounded fetches.

use super::{QualifiedName, SharedProvider, TableSchema};
use crate::constants::{DEFAULT_CONCURRENCY, DEFAULT_PROVIDER_TIMEOUT};
use crate::error::SchemaError;
use crate::resilience::{retry_async, with_timeout, RetryConfig};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Outcome of resolving one table. Shared by every caller that asked for it.
pub type FetchResult = Result<Arc<TableSchema>, SchemaError>;

/// Resolver tuning knobs.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Maximum lookups in flight at once.
    pub concurrency: usize,
    /// Timeout for a single provider call.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

/// Resolver statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolverStats {
    /// Calls to [`SchemaResolver::resolve`].
    pub lookups: u64,
    /// Calls that reached the provider (retries included).
    pub provider_calls: u64,
    /// Distinct tables held in the cache.
    pub cached_tables: usize,
}

impl ResolverStats {
    /// Lookups answered without a new fetch.
    pub fn cache_hits(&self) -> u64 {
        self.lookups.saturating_sub(self.fetches())
    }

    fn fetches(&self) -> u64 {
        self.cached_tables as u64
    }
}

/// Resolves table schemas from one provider, caching results for the run.
///
/// Each qualified name maps to a single `OnceCell`; the first caller runs the
/// fetch and concurrent callers for the same name wait on that cell instead of
/// issuing their own provider call. The map lock is only held while looking up
/// or inserting a cell, never across a fetch.
pub struct SchemaResolver {
    provider: SharedProvider,
    settings: ResolverSettings,
    entries: Mutex<HashMap<QualifiedName, Arc<OnceCell<FetchResult>>>>,
    lookups: AtomicU64,
    provider_calls: AtomicU64,
}

impl SchemaResolver {
    /// Create a resolver for a provider.
    pub fn new(provider: SharedProvider, settings: ResolverSettings) -> Self {
        Self {
            provider,
            settings,
            entries: Mutex::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        }
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Resolve one table, fetching it at most once per run.
    pub async fn resolve(&self, name: &QualifiedName) -> FetchResult {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut entries = self.entries.lock();
            entries.entry(name.clone()).or_default().clone()
        };

        cell.get_or_init(|| self.fetch(name)).await.clone()
    }

    /// Resolve many tables with bounded parallelism.
    ///
    /// Duplicate names are collapsed; the result is keyed by qualified name so
    /// completion order does not matter.
    pub async fn resolve_all<I>(&self, names: I) -> HashMap<QualifiedName, FetchResult>
    where
        I: IntoIterator<Item = QualifiedName>,
    {
        let unique: BTreeSet<QualifiedName> = names.into_iter().collect();
        let total = unique.len();
        let limit = self.settings.concurrency.max(1);

        info!(
            "Resolving {} table(s) from {} (concurrency: {})",
            total,
            self.provider.name(),
            limit
        );

        let results: HashMap<QualifiedName, FetchResult> = stream::iter(unique)
            .map(|name| async move {
                let result = self.resolve(&name).await;
                (name, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let failed = results.values().filter(|r| r.is_err()).count();
        debug!(
            "Resolved {} table(s) from {} ({} failed)",
            total,
            self.provider.name(),
            failed
        );
        results
    }

    /// Return a cached result without fetching.
    pub fn cached(&self, name: &QualifiedName) -> Option<FetchResult> {
        let entries = self.entries.lock();
        entries.get(name).and_then(|cell| cell.get().cloned())
    }

    /// Get resolver statistics.
    pub fn stats(&self) -> ResolverStats {
        let entries = self.entries.lock();
        ResolverStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            cached_tables: entries.values().filter(|c| c.initialized()).count(),
        }
    }

    async fn fetch(&self, name: &QualifiedName) -> FetchResult {
        let provider = self.provider.as_ref();
        let provider_name = provider.name();
        let table = name.to_string();
        let table = table.as_str();
        let timeout = self.settings.timeout;
        let calls = &self.provider_calls;

        debug!("Fetching schema for {} from {}", table, provider_name);

        let (result, attempts) = retry_async(&self.settings.retry, move || {
            calls.fetch_add(1, Ordering::Relaxed);
            with_timeout(timeout, provider_name, table, provider.get_table_schema(name))
        })
        .await;

        match &result {
            Ok(schema) => debug!(
                "Fetched {} ({} columns) from {} in {} attempt(s)",
                table,
                schema.columns.len(),
                provider_name,
                attempts
            ),
            Err(e) if e.is_not_found() => debug!("{} not found in {}", table, provider_name),
            Err(e) => warn!("Failed to fetch {} from {}: {}", table, provider_name, e),
        }

        result.map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnSpec, Dialect, SchemaProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize};

    /// Provider that counts calls, sleeps, and fails on request.
    struct SlowProvider {
        calls: AtomicU32,
        delay: Duration,
        transient_failures: AtomicU32,
    }

    impl SlowProvider {
        fn new(delay: Duration, transient_failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay,
                transient_failures: AtomicU32::new(transient_failures),
            }
        }
    }

    #[async_trait]
    impl SchemaProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        fn dialect(&self) -> Dialect {
            Dialect::SqlServer
        }

        async fn list_tables(&self, _: Option<&str>) -> Result<Vec<QualifiedName>, SchemaError> {
            Ok(Vec::new())
        }

        async fn get_table_schema(&self, name: &QualifiedName) -> Result<TableSchema, SchemaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SchemaError::unavailable("slow", name.to_string(), "reset"));
            }
            if name.table().eq_ignore_ascii_case("missing") {
                return Err(SchemaError::not_found("slow", name.to_string()));
            }
            Ok(TableSchema::new(
                name.clone(),
                vec![ColumnSpec::new("id", "int", false, 1)],
                vec![],
            ))
        }
    }

    /// Provider that records the peak number of lookups in flight.
    #[derive(Default)]
    struct GaugeProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SchemaProvider for GaugeProvider {
        fn name(&self) -> &str {
            "gauge"
        }

        fn dialect(&self) -> Dialect {
            Dialect::SqlServer
        }

        async fn list_tables(&self, _: Option<&str>) -> Result<Vec<QualifiedName>, SchemaError> {
            Ok(Vec::new())
        }

        async fn get_table_schema(&self, name: &QualifiedName) -> Result<TableSchema, SchemaError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(TableSchema::new(name.clone(), vec![], vec![]))
        }
    }

    fn settings() -> ResolverSettings {
        ResolverSettings {
            concurrency: 4,
            timeout: Duration::from_secs(5),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(1),
                jitter: false,
                ..Default::default()
            },
        }
    }

    fn name(s: &str) -> QualifiedName {
        QualifiedName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_coalesced() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(50), 0));
        let resolver = Arc::new(SchemaResolver::new(provider.clone(), settings()));

        let mut handles = Vec::new();
        for spelling in ["dbo.Customers", "DBO.customers", "dbo.CUSTOMERS", "dbo.Customers"] {
            let resolver = resolver.clone();
            let n = name(spelling);
            handles.push(tokio::spawn(async move { resolver.resolve(&n).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let stats = resolver.stats();
        assert_eq!(stats.lookups, 4);
        assert_eq!(stats.provider_calls, 1);
        assert_eq!(stats.cache_hits(), 3);
    }

    #[tokio::test]
    async fn test_resolve_all_dedupes_and_keys_results() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(5), 0));
        let resolver = SchemaResolver::new(provider.clone(), settings());

        let results = resolver
            .resolve_all(vec![name("dbo.A"), name("dbo.B"), name("dbo.a"), name("dbo.missing")])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[&name("dbo.A")].is_ok());
        assert!(results[&name("dbo.Missing")].as_ref().unwrap_err().is_not_found());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_all_respects_concurrency_limit() {
        let provider = Arc::new(GaugeProvider::default());
        let resolver = SchemaResolver::new(
            provider.clone(),
            ResolverSettings {
                concurrency: 2,
                ..settings()
            },
        );

        let names: Vec<QualifiedName> = (0..8).map(|i| name(&format!("dbo.T{i}"))).collect();
        let results = resolver.resolve_all(names).await;

        assert_eq!(results.len(), 8);
        assert!(results.values().all(|r| r.is_ok()));
        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= 2, "peak in-flight lookups was {peak}");
        assert!(peak >= 1);
        assert_eq!(resolver.stats().provider_calls, 8);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let provider = Arc::new(SlowProvider::new(Duration::ZERO, 1));
        let resolver = SchemaResolver::new(provider.clone(), settings());

        assert!(resolver.resolve(&name("dbo.A")).await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(resolver.stats().provider_calls, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_reported_per_table() {
        let provider = Arc::new(SlowProvider::new(Duration::from_millis(200), 0));
        let resolver = SchemaResolver::new(
            provider,
            ResolverSettings {
                timeout: Duration::from_millis(10),
                retry: RetryConfig::no_retry(),
                ..settings()
            },
        );

        let err = resolver.resolve(&name("dbo.A")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.table(), "dbo.A");

        // The failure is cached for the run.
        assert!(resolver.cached(&name("dbo.a")).unwrap().is_err());
    }
}
