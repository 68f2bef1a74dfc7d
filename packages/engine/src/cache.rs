//! Versioned result cache.
//!
//! Memoizes whole rate sets per `(view version, dimensions, filter)` and
//! persists them through a pluggable [`RateStore`]. Entries never outlive
//! their cleaned view version: the first request against a new version
//! drops every older entry, in memory and in the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use accident_risk_engine_models::{RateRecord, StratificationRequest};
use accident_risk_schema::progress::ProgressCallback;
use futures::stream::{self, StreamExt as _};
use sha2::{Digest as _, Sha256};
use tokio::sync::OnceCell;

use crate::EngineError;
use crate::aggregate::{CancelFlag, aggregate, canonical_filter};
use crate::config::MetricsConfig;
use crate::dimension::resolve;
use crate::exposure::ExposureTable;
use crate::metrics::compute_rates;
use crate::view::CleanedView;

/// Identity of one persisted result set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    /// Cleaned view version the records were computed from.
    pub version: String,
    /// Resolved dimension names, in key order.
    pub dimensions: Vec<String>,
    /// Canonical filter key (see `RowFilter::cache_key`).
    pub filter: String,
    /// Digest of the metric settings and exposure table.
    pub basis: String,
}

/// Persistent backing for the [`RateCache`].
///
/// Implementations are called from blocking worker threads.
pub trait RateStore: Send + Sync {
    /// Loads a previously saved result set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend fails.
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<RateRecord>>, EngineError>;

    /// Saves a complete result set, replacing any previous one under `key`.
    /// Either every record is written or none is.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend fails.
    fn save(&self, key: &CacheKey, records: &[RateRecord]) -> Result<(), EngineError>;

    /// Drops every entry whose version differs from `version`. Returns the
    /// number of result sets removed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend fails.
    fn retain_version(&self, version: &str) -> Result<u64, EngineError>;

    /// The version of the most recently saved result set, if any.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend fails.
    fn latest_version(&self) -> Result<Option<String>, EngineError>;

    /// Loads the most recently saved result set for `version` and
    /// `dimensions` with the given filter, under any basis.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] if the backend fails.
    fn load_latest(
        &self,
        version: &str,
        dimensions: &[String],
        filter: &str,
    ) -> Result<Option<Vec<RateRecord>>, EngineError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<CacheKey, (u64, Vec<RateRecord>)>,
    saves: u64,
    latest: Option<String>,
}

/// A [`RateStore`] that lives only as long as the process.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored result sets.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// Whether the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateStore for MemoryStore {
    fn load(&self, key: &CacheKey) -> Result<Option<Vec<RateRecord>>, EngineError> {
        Ok(lock(&self.state)
            .entries
            .get(key)
            .map(|(_, records)| records.clone()))
    }

    fn save(&self, key: &CacheKey, records: &[RateRecord]) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        state.saves += 1;
        let sequence = state.saves;
        state
            .entries
            .insert(key.clone(), (sequence, records.to_vec()));
        state.latest = Some(key.version.clone());
        Ok(())
    }

    fn retain_version(&self, version: &str) -> Result<u64, EngineError> {
        let mut state = lock(&self.state);
        let before = state.entries.len();
        state.entries.retain(|key, _| key.version == version);
        if state.latest.as_deref() != Some(version) {
            state.latest = None;
        }
        Ok((before - state.entries.len()) as u64)
    }

    fn latest_version(&self) -> Result<Option<String>, EngineError> {
        Ok(lock(&self.state).latest.clone())
    }

    fn load_latest(
        &self,
        version: &str,
        dimensions: &[String],
        filter: &str,
    ) -> Result<Option<Vec<RateRecord>>, EngineError> {
        Ok(lock(&self.state)
            .entries
            .iter()
            .filter(|(key, _)| {
                key.version == version && key.dimensions == dimensions && key.filter == filter
            })
            .max_by_key(|(_, (sequence, _))| *sequence)
            .map(|(_, (_, records))| records.clone()))
    }
}

type SlotKey = (Vec<String>, String);
type Slot = Arc<OnceCell<Arc<Vec<RateRecord>>>>;

/// Per-session memoizing front end to the engine.
///
/// Concurrent requests for the same result set share one computation.
/// Result sets are immutable once published and handed out as `Arc`s.
pub struct RateCache {
    store: Arc<dyn RateStore>,
    slots: Mutex<BTreeMap<String, HashMap<SlotKey, Slot>>>,
    current: Arc<Mutex<Option<String>>>,
    cancel: CancelFlag,
    closed: AtomicBool,
    metrics: MetricsConfig,
    exposure: Option<Arc<ExposureTable>>,
    basis: String,
    computations: Arc<AtomicU64>,
}

impl RateCache {
    /// Creates a cache over `store`. Rates use `metrics` and, if given,
    /// `exposure` as the denominator.
    #[must_use]
    pub fn new(
        store: Arc<dyn RateStore>,
        metrics: MetricsConfig,
        exposure: Option<Arc<ExposureTable>>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(metrics.fingerprint().as_bytes());
        hasher.update(b"\0");
        if let Some(exposure) = &exposure {
            hasher.update(exposure.fingerprint().as_bytes());
        }
        let basis = hex::encode(hasher.finalize());

        Self {
            store,
            slots: Mutex::new(BTreeMap::new()),
            current: Arc::new(Mutex::new(None)),
            cancel: CancelFlag::new(),
            closed: AtomicBool::new(false),
            metrics,
            exposure,
            basis,
            computations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a cache backed by a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory(metrics: MetricsConfig, exposure: Option<Arc<ExposureTable>>) -> Self {
        Self::new(Arc::new(MemoryStore::new()), metrics, exposure)
    }

    /// The most recently seen cleaned view version.
    #[must_use]
    pub fn current_version(&self) -> Option<String> {
        lock(&self.current).clone()
    }

    /// Number of aggregation passes this cache has completed. Store hits
    /// and memoized results do not count.
    #[must_use]
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::SeqCst)
    }

    /// Returns the rate records for `request` over `view`, computing and
    /// persisting them on first use.
    ///
    /// # Errors
    ///
    /// * [`EngineError::Closed`] after [`Self::close`]
    /// * [`EngineError::UnknownDimension`] and friends for bad requests
    /// * [`EngineError::Cancelled`] if [`Self::cancel`] interrupts the pass
    /// * [`EngineError::Store`] if the backing store fails
    pub async fn get_or_compute(
        &self,
        view: &Arc<CleanedView>,
        request: &StratificationRequest,
    ) -> Result<Arc<Vec<RateRecord>>, EngineError> {
        self.ensure_open()?;

        let dimensions = resolve(view, &request.dimensions)?;
        let filter = canonical_filter(view, &request.filter)?;
        let version = view.version().to_string();
        self.observe_version(&version).await?;

        let key = CacheKey {
            version: version.clone(),
            dimensions: dimensions.iter().map(|d| d.name.clone()).collect(),
            filter: filter.cache_key(),
            basis: self.basis.clone(),
        };
        let slot = self.slot(&version, (key.dimensions.clone(), key.filter.clone()));

        let records = slot
            .get_or_try_init(|| {
                let view = Arc::clone(view);
                let store = Arc::clone(&self.store);
                let current = Arc::clone(&self.current);
                let computations = Arc::clone(&self.computations);
                let cancel = self.cancel.clone();
                let metrics = self.metrics.clone();
                let exposure = self.exposure.clone();

                async move {
                    tokio::task::spawn_blocking(move || {
                        cancel.check()?;
                        if let Some(records) = store.load(&key)? {
                            log::debug!("Store hit for [{}]", key.dimensions.join(", "));
                            return Ok(Arc::new(records));
                        }

                        let aggregation = aggregate(&view, &dimensions, &filter, &cancel)?;
                        let records =
                            compute_rates(&aggregation, exposure.as_deref(), &metrics);
                        computations.fetch_add(1, Ordering::SeqCst);

                        let current = lock(&current);
                        if current.as_deref() == Some(key.version.as_str()) {
                            store.save(&key, &records)?;
                        } else {
                            log::debug!("View version moved on; not persisting stale result");
                        }
                        drop(current);

                        log::info!(
                            "Computed {} strata over [{}]",
                            records.len(),
                            key.dimensions.join(", ")
                        );
                        Ok::<_, EngineError>(Arc::new(records))
                    })
                    .await
                    .unwrap_or_else(|e| Err(EngineError::from(e)))
                }
            })
            .await?;

        Ok(Arc::clone(records))
    }

    /// Runs several requests concurrently over a shared view, reporting
    /// one unit of progress per finished request. Results are in request
    /// order.
    pub async fn compute_all(
        &self,
        view: &Arc<CleanedView>,
        requests: &[StratificationRequest],
        concurrency: usize,
        progress: &Arc<dyn ProgressCallback>,
    ) -> Vec<Result<Arc<Vec<RateRecord>>, EngineError>> {
        progress.begin("Stratifying", Some(requests.len() as u64));
        let results = stream::iter(requests.iter().map(|request| async move {
            let result = self.get_or_compute(view, request).await;
            progress.advance(1);
            result
        }))
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        progress.finish(format!(
            "{} stratifications, {failed} failed",
            requests.len()
        ));
        results
    }

    /// Returns the unfiltered strata over `dimensions` for the current
    /// version without computing anything.
    ///
    /// Dimension names must be the resolved names (`state`, `hour`, ...);
    /// they are matched case-insensitively. With no version seen yet in
    /// this session, the store's latest version is used.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Closed`] after [`Self::close`], or
    /// [`EngineError::Store`] if the store fails.
    pub async fn fetch<S: AsRef<str>>(
        &self,
        dimensions: &[S],
    ) -> Result<Option<Arc<Vec<RateRecord>>>, EngineError> {
        self.ensure_open()?;
        let dimensions = dimensions
            .iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .collect::<Vec<_>>();
        let filter = "*".to_string();

        if let Some(version) = self.current_version() {
            let memoized = lock(&self.slots)
                .get(&version)
                .and_then(|slots| slots.get(&(dimensions.clone(), filter.clone())))
                .and_then(|slot| slot.get().cloned());
            if memoized.is_some() {
                return Ok(memoized);
            }
        }

        let store = Arc::clone(&self.store);
        let current = self.current_version();
        let basis = self.basis.clone();
        tokio::task::spawn_blocking(move || -> Result<_, EngineError> {
            let Some(version) = current.map_or_else(|| store.latest_version(), |v| Ok(Some(v)))?
            else {
                return Ok(None);
            };
            let key = CacheKey {
                version: version.clone(),
                dimensions: dimensions.clone(),
                filter: filter.clone(),
                basis,
            };
            let records = match store.load(&key)? {
                Some(records) => Some(records),
                None => store.load_latest(&version, &dimensions, &filter)?,
            };
            Ok(records.map(Arc::new))
        })
        .await?
    }

    /// A handle on this cache's cancellation flag, for cancelling from
    /// outside the task that owns the cache (a signal handler, a watchdog).
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Asks in-flight and future computations to stop until
    /// [`Self::resume`] is called. Cancelled computations leave no entry.
    pub fn cancel(&self) {
        log::info!("Cancelling rate computations");
        self.cancel.cancel();
    }

    /// Clears a previous [`Self::cancel`].
    pub fn resume(&self) {
        self.cancel.reset();
    }

    /// Tears the cache down: cancels running work, forgets memoized
    /// results, and rejects further requests. Persisted entries stay in
    /// the store.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        lock(&self.slots).clear();
        log::debug!("Rate cache closed");
    }

    /// The shared slot for `key` under `version`. If another version has
    /// become current since `version` was observed, the slot is private to
    /// this caller and never memoized.
    fn slot(&self, version: &str, key: SlotKey) -> Slot {
        let mut slots = lock(&self.slots);
        if self.current_version().as_deref() != Some(version) {
            log::debug!("View version {} is no longer current", short(version));
            return Slot::default();
        }
        Arc::clone(
            slots
                .entry(version.to_string())
                .or_default()
                .entry(key)
                .or_default(),
        )
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }

    async fn observe_version(&self, version: &str) -> Result<(), EngineError> {
        if self.current_version().as_deref() == Some(version) {
            return Ok(());
        }

        let current = Arc::clone(&self.current);
        let store = Arc::clone(&self.store);
        let next = version.to_string();
        let bumped = tokio::task::spawn_blocking(move || {
            let mut current = lock(&current);
            if current.as_deref() == Some(next.as_str()) {
                return Ok::<_, EngineError>(None);
            }
            let removed = store.retain_version(&next)?;
            let previous = current.replace(next);
            Ok(Some((previous, removed)))
        })
        .await??;

        if let Some((previous, removed)) = bumped {
            lock(&self.slots).retain(|v, _| v == version);
            match previous {
                Some(previous) => log::info!(
                    "View version changed {} -> {}; dropped {removed} stored result sets",
                    short(&previous),
                    short(version)
                ),
                None => log::debug!(
                    "Using view version {} ({removed} stale result sets dropped)",
                    short(version)
                ),
            }
        }
        Ok(())
    }
}

fn short(version: &str) -> &str {
    version.get(..12).unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use accident_risk_engine_models::{DimensionValue, RowFilter};
    use accident_risk_schema::progress::null_progress;

    use super::*;
    use crate::config::ValidationConfig;
    use crate::view::{test_view, test_view_with};

    fn request(dims: &[&str]) -> StratificationRequest {
        StratificationRequest::new(dims.iter().copied())
    }

    #[tokio::test]
    async fn repeated_requests_reuse_the_first_result() {
        let view = Arc::new(test_view());
        let store = Arc::new(MemoryStore::new());
        let cache = RateCache::new(store.clone(), MetricsConfig::default(), None);

        let first = cache.get_or_compute(&view, &request(&["state"])).await.unwrap();
        let second = cache.get_or_compute(&view, &request(&["State"])).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.computations(), 1);
        assert_eq!(store.len(), 1);

        // A new session over the same store is served from the store.
        let fresh = RateCache::new(store, MetricsConfig::default(), None);
        let third = fresh.get_or_compute(&view, &request(&["state"])).await.unwrap();
        assert_eq!(*third, *first);
        assert_eq!(fresh.computations(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_compute_once() {
        let view = Arc::new(test_view());
        let cache = Arc::new(RateCache::in_memory(MetricsConfig::default(), None));

        let handles = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let view = Arc::clone(&view);
                tokio::spawn(async move {
                    cache.get_or_compute(&view, &request(&["state", "hour"])).await
                })
            })
            .collect::<Vec<_>>();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(cache.computations(), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn filters_are_part_of_the_key() {
        let view = Arc::new(test_view());
        let cache = RateCache::in_memory(MetricsConfig::default(), None);

        let all = cache.get_or_compute(&view, &request(&["severity"])).await.unwrap();
        let tx = cache
            .get_or_compute(
                &view,
                &request(&["severity"]).with_filter(RowFilter::all().with(
                    "state=texas".parse().unwrap(),
                )),
            )
            .await
            .unwrap();
        let tx_again = cache
            .get_or_compute(
                &view,
                &request(&["severity"])
                    .with_filter(RowFilter::all().with("state=TX".parse().unwrap())),
            )
            .await
            .unwrap();

        assert_eq!(all.iter().map(|r| r.count).sum::<u64>(), 5);
        assert_eq!(tx.iter().map(|r| r.count).sum::<u64>(), 3);
        assert!(Arc::ptr_eq(&tx, &tx_again));
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test]
    async fn new_version_invalidates_old_entries() {
        let v1 = Arc::new(test_view());
        let v2 = Arc::new(test_view_with(&ValidationConfig {
            known_states: vec!["TX".to_string()],
            ..ValidationConfig::default()
        }));
        assert_ne!(v1.version(), v2.version());

        let store = Arc::new(MemoryStore::new());
        let cache = RateCache::new(store.clone(), MetricsConfig::default(), None);

        cache.get_or_compute(&v1, &request(&["state"])).await.unwrap();
        cache.get_or_compute(&v1, &request(&["severity"])).await.unwrap();
        assert_eq!(store.len(), 2);

        let fresh = cache.get_or_compute(&v2, &request(&["state"])).await.unwrap();
        assert_eq!(cache.current_version().as_deref(), Some(v2.version()));
        assert_eq!(store.len(), 1);
        assert_eq!(
            fresh.iter().map(|r| r.key.clone()).collect::<Vec<_>>(),
            vec![vec![DimensionValue::from("TX")]]
        );
        assert_eq!(cache.fetch(&["severity"]).await.unwrap(), None);
        assert_eq!(cache.computations(), 3);
    }

    #[tokio::test]
    async fn fetch_returns_unfiltered_strata_only() {
        let view = Arc::new(test_view());
        let store = Arc::new(MemoryStore::new());
        let cache = RateCache::new(store.clone(), MetricsConfig::default(), None);
        assert_eq!(cache.fetch(&["state"]).await.unwrap(), None);

        cache
            .get_or_compute(
                &view,
                &request(&["state"])
                    .with_filter(RowFilter::all().with("severity=1".parse().unwrap())),
            )
            .await
            .unwrap();
        assert_eq!(cache.fetch(&["state"]).await.unwrap(), None);

        let computed = cache.get_or_compute(&view, &request(&["state"])).await.unwrap();
        let fetched = cache.fetch(&["STATE"]).await.unwrap().unwrap();
        assert_eq!(*fetched, *computed);

        // Another session reads the store's latest version, whatever its basis.
        let other = RateCache::new(
            store,
            MetricsConfig {
                min_sample: 1,
                ..MetricsConfig::default()
            },
            None,
        );
        assert_eq!(*other.fetch(&["state"]).await.unwrap().unwrap(), *computed);
    }

    #[tokio::test]
    async fn cancelled_computation_leaves_no_entry() {
        let view = Arc::new(test_view());
        let store = Arc::new(MemoryStore::new());
        let cache = RateCache::new(store.clone(), MetricsConfig::default(), None);

        cache.cancel();
        let err = cache.get_or_compute(&view, &request(&["state"])).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(store.is_empty());
        assert_eq!(cache.fetch(&["state"]).await.unwrap(), None);

        cache.resume();
        let records = cache.get_or_compute(&view, &request(&["state"])).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(cache.computations(), 1);
    }

    /// Cancels through `flag`, once, when a computation consults the store.
    #[derive(Default)]
    struct CancellingStore {
        inner: MemoryStore,
        flag: Mutex<Option<CancelFlag>>,
    }

    impl RateStore for CancellingStore {
        fn load(&self, key: &CacheKey) -> Result<Option<Vec<RateRecord>>, EngineError> {
            if let Some(flag) = lock(&self.flag).take() {
                flag.cancel();
            }
            self.inner.load(key)
        }

        fn save(&self, key: &CacheKey, records: &[RateRecord]) -> Result<(), EngineError> {
            self.inner.save(key, records)
        }

        fn retain_version(&self, version: &str) -> Result<u64, EngineError> {
            self.inner.retain_version(version)
        }

        fn latest_version(&self) -> Result<Option<String>, EngineError> {
            self.inner.latest_version()
        }

        fn load_latest(
            &self,
            version: &str,
            dimensions: &[String],
            filter: &str,
        ) -> Result<Option<Vec<RateRecord>>, EngineError> {
            self.inner.load_latest(version, dimensions, filter)
        }
    }

    #[tokio::test]
    async fn cancelling_in_flight_computation_leaves_no_entry() {
        let view = Arc::new(test_view());
        let store = Arc::new(CancellingStore::default());
        let cache = RateCache::new(store.clone(), MetricsConfig::default(), None);
        *lock(&store.flag) = Some(cache.cancel_flag());

        let err = cache.get_or_compute(&view, &request(&["state"])).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(store.inner.is_empty());
        assert_eq!(cache.computations(), 0);
        assert_eq!(cache.fetch(&["state"]).await.unwrap(), None);

        cache.resume();
        let records = cache.get_or_compute(&view, &request(&["state"])).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(store.inner.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_slots_are_not_memoized() {
        let view = Arc::new(test_view());
        let cache = RateCache::in_memory(MetricsConfig::default(), None);
        cache.get_or_compute(&view, &request(&["state"])).await.unwrap();

        *lock(&cache.current) = Some("newer".to_string());
        let slot = cache.slot(view.version(), (vec!["hour".to_string()], "*".to_string()));
        assert!(slot.get().is_none());
        assert!(
            lock(&cache.slots)
                .get(view.version())
                .is_none_or(|slots| !slots.contains_key(&(vec!["hour".to_string()], "*".to_string())))
        );
    }

    #[tokio::test]
    async fn bad_requests_are_rejected_before_computing() {
        let view = Arc::new(test_view());
        let cache = RateCache::in_memory(MetricsConfig::default(), None);
        let err = cache
            .get_or_compute(&view, &request(&["state", "planet"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownDimension { names } if names == ["planet"]));
        assert_eq!(cache.computations(), 0);
    }

    #[tokio::test]
    async fn compute_all_keeps_request_order() {
        let view = Arc::new(test_view());
        let cache = RateCache::in_memory(MetricsConfig::default(), None);
        let requests = vec![
            request(&["state"]),
            request(&["nope"]),
            request(&["season"]),
            request(&["state"]),
        ];

        let results = cache
            .compute_all(&view, &requests, 2, &null_progress())
            .await;
        assert_eq!(results.len(), 4);
        assert!(results[1].is_err());
        let first = results[0].as_ref().unwrap();
        let last = results[3].as_ref().unwrap();
        assert!(Arc::ptr_eq(first, last));
        assert_eq!(
            results[2].as_ref().unwrap().iter().map(|r| r.count).sum::<u64>(),
            5
        );
    }

    #[tokio::test]
    async fn closed_cache_rejects_requests() {
        let view = Arc::new(test_view());
        let cache = RateCache::in_memory(MetricsConfig::default(), None);
        cache.get_or_compute(&view, &request(&["state"])).await.unwrap();
        cache.close();
        cache.close();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            cache.get_or_compute(&view, &request(&["state"])),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(EngineError::Closed)));
        assert!(matches!(cache.fetch(&["state"]).await, Err(EngineError::Closed)));
    }
}
