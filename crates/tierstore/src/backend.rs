//! The backend: every operation flows health gate -> tier policy -> circuit
//! breaker (inside the retry loop) -> transfer engine -> metrics and
//! access-pattern updates.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use tierstore_circuitbreaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
};
use tierstore_client::{EndpointManager, ObjectStoreClient};
use tierstore_core::{ErrorCode, ObjectMetadata, StorageError, StorageResult};
use tierstore_health::{
    ComponentHealthRecord, HealthConfig, HealthGateError, HealthTracker, OperationKind,
};
use tierstore_multipart::{MultipartManager, MultipartUploadState};
use tierstore_pool::{ClientPool, PoolConfig, PoolStats};
use tierstore_retry::{RetryError, Retryer};
use tierstore_tiering::{
    AccessFrequency, AccessPatternStore, CostOptimizer, OptimizationReport, PricingLookup,
    PricingManager, RemotePricingSource, StorageTier, TierConstraints, TierValidator,
    SMALL_OBJECT_THRESHOLD,
};

use crate::config::BackendConfig;
use crate::engine::{ClientFactory, MultipartSettings, TransferEngine, TransferError};
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::telemetry::BackendTelemetry;

/// Guarded operation classes; each owns a breaker and a health component.
const READS: &str = "reads";
const WRITES: &str = "writes";
const DELETES: &str = "deletes";
const LISTS: &str = "lists";

/// The tier in effect plus its validator, published as one immutable value
/// so tier changes swap atomically under concurrent operations.
#[derive(Debug, Clone)]
pub struct TierSelection {
    tier: StorageTier,
    constraints: TierConstraints,
    validator: TierValidator,
}

impl TierSelection {
    fn new(tier: StorageTier, constraints: TierConstraints) -> Self {
        Self {
            tier,
            constraints: constraints.clone(),
            validator: TierValidator::new(tier, constraints),
        }
    }

    pub fn tier(&self) -> StorageTier {
        self.tier
    }

    pub fn validator(&self) -> &TierValidator {
        &self.validator
    }
}

type BackendRetryError = RetryError<CircuitBreakerError<TransferError>>;

/// The resilient, cost-aware object-storage backend.
pub struct Backend {
    config: BackendConfig,
    engine: TransferEngine,
    pool: Arc<ClientPool<ClientFactory>>,
    endpoints: Arc<EndpointManager>,
    selection: RwLock<Arc<TierSelection>>,
    patterns: Arc<AccessPatternStore>,
    pricing: Arc<PricingManager>,
    optimizer: CostOptimizer,
    breakers: CircuitBreakerRegistry<TransferError>,
    retryer: Retryer<CircuitBreakerError<TransferError>>,
    health: Arc<HealthTracker>,
    multipart: Arc<MultipartManager>,
    metrics: Arc<MetricsAggregator>,
}

impl Backend {
    /// Builds a backend over an injected standard client and an optional
    /// accelerated-endpoint client. Acceleration is used only when both the
    /// client is present and `use-accelerate` is set.
    pub fn new(
        config: BackendConfig,
        standard: Arc<dyn ObjectStoreClient>,
        accelerated: Option<Arc<dyn ObjectStoreClient>>,
    ) -> StorageResult<Self> {
        config.validate()?;

        let metrics = Arc::new(MetricsAggregator::new());
        let multipart = Arc::new(MultipartManager::new());

        let pool = ClientPool::new(
            ClientFactory::shared(&config.bucket, Arc::clone(&standard)),
            PoolConfig {
                max_size: config.connectivity.pool_size,
                acquire_timeout: config.connectivity.connect_timeout,
                create_on_timeout: true,
                liveness_interval: Duration::from_secs(30),
                name: format!("{}-clients", config.bucket),
            },
        );

        let accelerated = if config.connectivity.use_accelerate {
            accelerated
        } else {
            None
        };
        let endpoints = Arc::new(EndpointManager::new(accelerated));

        let max_attempts = config.connectivity.max_retries.max(1);
        let part_retryer: Retryer<TransferError> = Retryer::builder()
            .name("multipart-parts")
            .max_attempts(max_attempts)
            .exponential_backoff(Duration::from_millis(200))
            .jitter(0.2)
            .retry_on(|err: &TransferError| err.is_transient())
            .build();

        let settings = MultipartSettings {
            threshold: config.multipart.threshold,
            chunk_size: config.multipart.chunk_size,
            concurrency: config
                .multipart
                .resolved_concurrency(config.connectivity.pool_size),
        };
        let engine = TransferEngine::new(
            &config.bucket,
            Arc::clone(&pool),
            Arc::clone(&endpoints),
            Arc::clone(&multipart),
            Arc::clone(&metrics),
            part_retryer,
            settings,
        );

        let mut pricing = PricingManager::new(config.pricing.discount_config.clone())
            .with_custom_pricing(config.pricing.custom_pricing.clone());
        if config.pricing.use_pricing_api {
            let region = config
                .pricing
                .region
                .clone()
                .unwrap_or_else(|| config.connectivity.region.clone());
            pricing = pricing.with_source(Box::new(RemotePricingSource { region }), true);
            pricing.refresh();
        }
        let pricing = Arc::new(pricing);

        let patterns = Arc::new(AccessPatternStore::new(
            config.cost_optimization.monitor_access_patterns,
        ));
        let optimizer = CostOptimizer::new(
            Arc::clone(&patterns),
            Arc::clone(&pricing) as Arc<dyn PricingLookup>,
            config.cost_optimization.cost_threshold,
        );

        let health = Arc::new(HealthTracker::new(HealthConfig::default()));
        for component in [READS, WRITES, DELETES, LISTS] {
            health.register(component);
        }

        let breakers = CircuitBreakerRegistry::new(|name| {
            CircuitBreaker::new(
                CircuitBreakerConfig::builder()
                    .name(name)
                    .failure_threshold(5)
                    .sliding_interval(Duration::from_secs(60))
                    .open_timeout(Duration::from_secs(30))
                    .build(),
            )
            .with_failure_classifier(|err: &TransferError| err.is_transient())
        });

        let retryer: Retryer<CircuitBreakerError<TransferError>> = Retryer::builder()
            .name("backend")
            .max_attempts(max_attempts)
            .exponential_backoff(Duration::from_millis(100))
            .jitter(0.2)
            .retry_on(|err: &CircuitBreakerError<TransferError>| match err {
                // Transient breaker rejections stay retriable until the
                // attempt budget runs out.
                CircuitBreakerError::OpenCircuit { .. } => true,
                CircuitBreakerError::Inner(e) => e.is_transient(),
            })
            .build();

        let selection = Arc::new(TierSelection::new(
            config.tiering.storage_tier.0,
            config.tiering.tier_constraints.clone(),
        ));

        Ok(Self {
            config,
            engine,
            pool,
            endpoints,
            selection: RwLock::new(selection),
            patterns,
            pricing,
            optimizer,
            breakers,
            retryer,
            health,
            multipart,
            metrics,
        })
    }

    /// Starts background maintenance (the pool liveness checker). Must run
    /// inside a tokio runtime.
    pub fn start_background_tasks(&self) {
        self.pool.start_liveness();
    }

    /// Prefills the connection pool with up to `count` handles.
    pub async fn warmup(&self, count: usize) -> StorageResult<usize> {
        self.pool.warmup(count).await.map_err(|e| {
            StorageError::new(ErrorCode::ServiceUnavailable, e.to_string())
                .component("pool")
                .operation("warmup")
        })
    }

    fn selection(&self) -> Arc<TierSelection> {
        Arc::clone(&self.selection.read().unwrap())
    }

    fn gate_error(err: HealthGateError, operation: &'static str) -> StorageError {
        StorageError::new(ErrorCode::ServiceUnavailable, err.to_string())
            .component("health")
            .operation(operation)
            .context("state", err.state.to_string())
            .context("component", err.component)
    }

    fn validation_error(
        message: String,
        operation: &'static str,
        bucket: &str,
        key: &str,
    ) -> StorageError {
        StorageError::new(ErrorCode::ValidationFailed, message)
            .component("tiering")
            .operation(operation)
            .context("bucket", bucket)
            .context("key", key)
    }

    fn translate(
        &self,
        err: BackendRetryError,
        operation: &'static str,
        key: &str,
    ) -> StorageError {
        match err {
            RetryError::Cancelled => {
                StorageError::new(ErrorCode::OperationTimeout, "operation cancelled")
                    .component("backend")
                    .operation(operation)
                    .context("bucket", &self.config.bucket)
                    .context("key", key)
            }
            RetryError::Inner(CircuitBreakerError::OpenCircuit { name }) => {
                StorageError::new(
                    ErrorCode::ServiceUnavailable,
                    format!("circuit '{name}' is open"),
                )
                .component("circuit-breaker")
                .operation(operation)
                .context("breaker", name)
            }
            RetryError::Inner(CircuitBreakerError::Inner(err)) => {
                err.into_storage_error(operation, &self.config.bucket, key)
            }
        }
    }

    /// Runs one operation through the resilience envelope: retry outside,
    /// breaker inside, metrics and health signals on the way out.
    async fn guarded<T, F, Fut>(
        &self,
        class: &'static str,
        kind: OperationKind,
        operation: &'static str,
        key: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> StorageResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TransferError>>,
    {
        let breaker = self.breakers.breaker(class);
        let start = Instant::now();
        let result = self.retryer.run(cancel, || breaker.call(|| f())).await;
        self.metrics.record_request(start.elapsed());

        match result {
            Ok(value) => {
                self.health.record_success(class);
                Ok(value)
            }
            Err(err) => {
                // Infrastructure failures feed the health tracker; an
                // absent object is a healthy store answering correctly.
                let infra_failure = matches!(
                    &err,
                    RetryError::Inner(CircuitBreakerError::Inner(e)) if !e.is_not_found()
                );
                if infra_failure {
                    self.health.record_failure(class, kind);
                }
                let storage_err = self.translate(err, operation, key);
                self.metrics.record_error(storage_err.message());
                Err(storage_err)
            }
        }
    }

    /// The tier a write of `size` bytes actually uses: small objects are
    /// rerouted to Standard when access monitoring is on, so they do not
    /// pay an infrequent-access minimum they will never amortize.
    fn effective_write_tier(&self, size: u64, configured: StorageTier) -> StorageTier {
        if self.patterns.is_enabled()
            && size < SMALL_OBJECT_THRESHOLD
            && configured != StorageTier::Standard
        {
            tracing::debug!(
                size,
                configured = %configured,
                "small object rerouted to standard tier"
            );
            StorageTier::Standard
        } else {
            configured
        }
    }

    /// Stores an object under the effective tier's storage class.
    pub async fn put(
        &self,
        key: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        self.health
            .check_write(WRITES)
            .map_err(|e| Self::gate_error(e, "put"))?;

        let selection = self.selection();
        let size = data.len() as u64;
        let effective_tier = self.effective_write_tier(size, selection.tier());
        let validator = if effective_tier == selection.tier() {
            selection.validator().clone()
        } else {
            TierValidator::new(effective_tier, selection.constraints.clone())
        };
        validator
            .validate_write(key, size)
            .map_err(|e| Self::validation_error(e.to_string(), "put", &self.config.bucket, key))?;

        let storage_class = effective_tier.storage_class();
        self.guarded(WRITES, OperationKind::Write, "put", key, cancel, || {
            self.engine.put(key, data.clone(), storage_class, cancel)
        })
        .await?;

        self.patterns.record_access(key, size, effective_tier);
        Ok(())
    }

    /// Fetches an object or a byte range. `length == 0` means the remainder
    /// from `offset`; both zero mean the whole object.
    pub async fn get(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        cancel: &CancellationToken,
    ) -> StorageResult<Bytes> {
        self.health
            .check_read(READS)
            .map_err(|e| Self::gate_error(e, "get"))?;

        let data = self
            .guarded(READS, OperationKind::Read, "get", key, cancel, || {
                self.engine.get(key, offset, length)
            })
            .await?;

        self.patterns
            .record_access(key, data.len() as u64, self.selection().tier());
        Ok(data)
    }

    /// Deletes an object. Deleting a missing key succeeds; existing objects
    /// must have outlived the tier's deletion embargo.
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> StorageResult<()> {
        self.health
            .check_write(DELETES)
            .map_err(|e| Self::gate_error(e, "delete"))?;

        let metadata = match self
            .guarded(DELETES, OperationKind::Write, "delete", key, cancel, || {
                self.engine.head(key)
            })
            .await
        {
            Ok(metadata) => metadata,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };

        let age = metadata.age(SystemTime::now());
        self.selection()
            .validator()
            .validate_delete(key, age)
            .map_err(|e| {
                Self::validation_error(e.to_string(), "delete", &self.config.bucket, key)
            })?;

        self.guarded(DELETES, OperationKind::Write, "delete", key, cancel, || {
            self.engine.delete(key)
        })
        .await
    }

    /// Fetches object metadata.
    pub async fn head(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> StorageResult<ObjectMetadata> {
        self.health
            .check_read(READS)
            .map_err(|e| Self::gate_error(e, "head"))?;

        self.guarded(READS, OperationKind::Read, "head", key, cancel, || {
            self.engine.head(key)
        })
        .await
    }

    /// Whether an object exists.
    pub async fn exists(&self, key: &str, cancel: &CancellationToken) -> StorageResult<bool> {
        match self.head(key, cancel).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Lists objects under a prefix. `limit <= 0` uses the server default;
    /// larger limits are clamped to the wire format's signed 32-bit range.
    pub async fn list(
        &self,
        prefix: &str,
        limit: i64,
        cancel: &CancellationToken,
    ) -> StorageResult<Vec<ObjectMetadata>> {
        self.health
            .check_read(LISTS)
            .map_err(|e| Self::gate_error(e, "list"))?;

        let max_keys = (limit > 0).then(|| limit.min(i32::MAX as i64) as i32);
        self.guarded(LISTS, OperationKind::Read, "list", prefix, cancel, || {
            self.engine.list(prefix, max_keys)
        })
        .await
    }

    /// Fetches many objects concurrently, bounded by the pool size. Missing
    /// or failing keys are dropped from the result; only when every key
    /// fails does the first error surface.
    pub async fn get_batch(
        &self,
        keys: &[String],
        cancel: &CancellationToken,
    ) -> StorageResult<HashMap<String, Bytes>> {
        let semaphore = Arc::new(Semaphore::new(self.config.connectivity.pool_size));
        let fetches = keys.iter().map(|key| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                (key.clone(), self.get(key, 0, 0, cancel).await)
            }
        });
        let results = futures::future::join_all(fetches).await;

        let mut fetched = HashMap::new();
        let mut first_error = None;
        for (key, result) in results {
            match result {
                Ok(data) => {
                    fetched.insert(key, data);
                }
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if fetched.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        Ok(fetched)
    }

    /// Stores many objects concurrently, bounded by the pool size. Failures
    /// aggregate into one composite error naming every failed key.
    pub async fn put_batch(
        &self,
        objects: HashMap<String, Bytes>,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        let mut entries: Vec<(String, Bytes)> = objects.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let semaphore = Arc::new(Semaphore::new(self.config.connectivity.pool_size));
        let stores = entries.iter().map(|(key, data)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                (key.clone(), self.put(key, data.clone(), cancel).await)
            }
        });
        let results = futures::future::join_all(stores).await;

        let mut failures: Vec<(String, StorageError)> = Vec::new();
        for (key, result) in results {
            if let Err(err) = result {
                failures.push((key, err));
            }
        }
        if failures.is_empty() {
            return Ok(());
        }

        let failed_keys: Vec<&str> = failures.iter().map(|(k, _)| k.as_str()).collect();
        let code = failures[0].1.code();
        Err(StorageError::new(
            code,
            format!(
                "batch put failed for {} of the objects: {}",
                failures.len(),
                failed_keys.join(", ")
            ),
        )
        .component("transfer")
        .operation("put_batch")
        .context("bucket", &self.config.bucket)
        .context("failed_keys", failed_keys.join(",")))
    }

    /// Probes the bucket and returns per-component health records.
    pub async fn health_check(
        &self,
        _cancel: &CancellationToken,
    ) -> StorageResult<Vec<ComponentHealthRecord>> {
        match self.engine.head_bucket().await {
            Ok(()) => {
                self.health.record_success(READS);
                Ok(self.health.snapshot())
            }
            Err(err) => {
                self.health.record_failure(READS, OperationKind::Read);
                Err(err.into_storage_error("health_check", &self.config.bucket, ""))
            }
        }
    }

    /// Atomically swaps the active tier (and optionally its constraints).
    /// In-flight operations keep the selection they loaded.
    pub fn set_storage_tier(&self, tier: StorageTier, constraints: Option<TierConstraints>) {
        let constraints =
            constraints.unwrap_or_else(|| self.selection().constraints.clone());
        let next = Arc::new(TierSelection::new(tier, constraints));
        *self.selection.write().unwrap() = next;
        tracing::info!(tier = %tier, "storage tier updated");
    }

    /// The currently configured tier.
    pub fn storage_tier(&self) -> StorageTier {
        self.selection().tier()
    }

    /// Tier advisories for an object of the given size and frequency.
    pub fn tier_recommendations(&self, size: u64, frequency: AccessFrequency) -> Vec<String> {
        self.selection().validator().recommendations(size, frequency)
    }

    /// Analyzer output: migrations worth doing, with savings and confidence.
    pub fn optimization_report(&self) -> OptimizationReport {
        self.optimizer.optimization_report()
    }

    /// Applies a recommendation to the local pattern. No remote change.
    pub fn apply_optimization(&self, key: &str, to_tier: StorageTier) -> bool {
        self.optimizer.apply_optimization(key, to_tier)
    }

    /// The access-pattern store (shared with the optimizer).
    pub fn access_patterns(&self) -> &Arc<AccessPatternStore> {
        &self.patterns
    }

    /// Current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Metrics, health records, and the post-discount pricing table.
    pub fn telemetry(&self) -> BackendTelemetry {
        BackendTelemetry {
            metrics: self.metrics.snapshot(),
            health: self.health.snapshot(),
            pricing: self.pricing.pricing_summary(),
        }
    }

    /// Connection-pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Multipart uploads still running.
    pub fn multipart_in_progress(&self) -> Vec<MultipartUploadState> {
        self.multipart.in_progress()
    }

    /// State of one multipart upload, if still tracked.
    pub fn multipart_status(&self, upload_id: &str) -> Option<MultipartUploadState> {
        self.multipart.get(upload_id)
    }

    /// Every tracked multipart upload, terminal states included.
    pub fn multipart_uploads(&self) -> Vec<MultipartUploadState> {
        self.multipart.snapshot()
    }

    /// Drops terminal multipart states older than `max_age`.
    pub fn cleanup_multipart(&self, max_age: Duration) -> usize {
        self.multipart.cleanup(max_age)
    }

    /// Whether the accelerated endpoint is currently in use.
    pub fn acceleration_active(&self) -> bool {
        self.endpoints.acceleration_active()
    }

    /// Administrative re-arm of the accelerated endpoint after a fallback.
    pub fn re_enable_acceleration(&self) {
        self.endpoints.re_enable_acceleration()
    }

    /// The health tracker, for subscribing to transitions.
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Shuts down the pool and stops background tasks. Subsequent
    /// operations fail with a pool error.
    pub fn close(&self) {
        self.pool.close();
        tracing::info!(bucket = %self.config.bucket, "backend closed");
    }
}
