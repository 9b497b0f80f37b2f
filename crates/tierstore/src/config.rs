//! Backend configuration.
//!
//! Plain serde-derived structures; parsing and file loading belong to the
//! caller. Durations accept humantime strings ("30s", "10m") when
//! deserialized from a config format.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tierstore_core::{ErrorCode, StorageError};
use tierstore_tiering::{DiscountConfig, StorageTier, TierConstraints, TierPricing};

const MIB: u64 = 1024 * 1024;

/// Top-level backend configuration.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BackendConfig {
    /// Target bucket. Required.
    pub bucket: String,
    pub connectivity: ConnectivityConfig,
    pub multipart: MultipartConfig,
    pub tiering: TieringConfig,
    pub cost_optimization: CostOptimizationConfig,
    pub pricing: PricingConfig,
    pub optimization: OptimizationConfig,
}

impl BackendConfig {
    /// Minimal configuration for a bucket, everything else defaulted.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Rejects configurations the backend cannot run with.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.bucket.is_empty() {
            return Err(StorageError::new(
                ErrorCode::ValidationFailed,
                "bucket name must not be empty",
            )
            .component("config")
            .operation("validate"));
        }
        if self.multipart.threshold == 0 {
            return Err(StorageError::new(
                ErrorCode::ValidationFailed,
                "multipart threshold must be positive",
            )
            .component("config")
            .operation("validate"));
        }
        if self.connectivity.pool_size == 0 {
            return Err(StorageError::new(
                ErrorCode::ValidationFailed,
                "pool size must be positive",
            )
            .component("config")
            .operation("validate"));
        }
        Ok(())
    }
}

/// Connection settings for the remote store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectivityConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub force_path_style: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub pool_size: usize,
    pub use_accelerate: bool,
    pub use_dual_stack: bool,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            force_path_style: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            pool_size: 10,
            use_accelerate: false,
            use_dual_stack: false,
        }
    }
}

/// Multipart transfer settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MultipartConfig {
    /// Uploads at or above this size take the multipart path.
    pub threshold: u64,
    /// Configured chunk size; the engine may raise it to respect the
    /// remote-store part limit.
    pub chunk_size: u64,
    /// Parts uploaded in parallel. Defaults to the pool size.
    pub concurrency: Option<usize>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            threshold: 32 * MIB,
            chunk_size: 16 * MIB,
            concurrency: None,
        }
    }
}

impl MultipartConfig {
    pub fn resolved_concurrency(&self, pool_size: usize) -> usize {
        self.concurrency.unwrap_or(pool_size).max(1)
    }
}

/// Tier selection and constraint overrides.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TieringConfig {
    pub storage_tier: StorageTierDefault,
    pub tier_constraints: TierConstraints,
}

/// Newtype so the tier defaults to Standard under `#[serde(default)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StorageTierDefault(pub StorageTier);

impl Default for StorageTierDefault {
    fn default() -> Self {
        StorageTierDefault(StorageTier::Standard)
    }
}

/// A declarative lifecycle transition hint, carried in configuration for
/// the recommender; never installed on the remote store.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TransitionRule {
    pub to_tier: StorageTierDefault,
    pub after_days: u32,
    pub min_object_size: Option<u64>,
}

impl Default for TransitionRule {
    fn default() -> Self {
        Self {
            to_tier: StorageTierDefault(StorageTier::StandardIa),
            after_days: 30,
            min_object_size: None,
        }
    }
}

/// Cost-optimization behavior.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CostOptimizationConfig {
    pub enable_auto_tiering: bool,
    pub monitor_access_patterns: bool,
    pub transition_rules: Vec<TransitionRule>,
    /// Minimum $/month savings worth recommending.
    pub cost_threshold: f64,
    pub lifecycle_management: bool,
    pub intelligent_tiering: bool,
}

impl Default for CostOptimizationConfig {
    fn default() -> Self {
        Self {
            enable_auto_tiering: false,
            monitor_access_patterns: true,
            transition_rules: Vec::new(),
            cost_threshold: 0.01,
            lifecycle_management: false,
            intelligent_tiering: false,
        }
    }
}

/// Pricing resolution and discounts.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PricingConfig {
    pub use_pricing_api: bool,
    pub region: Option<String>,
    pub currency: String,
    pub custom_pricing: HashMap<StorageTier, TierPricing>,
    pub discount_config: DiscountConfig,
    /// External discount file; its parsed contents merge over the inline
    /// configuration, non-zero fields winning.
    pub discount_config_file: Option<PathBuf>,
    pub additional_costs: HashMap<String, f64>,
    pub last_updated: Option<String>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            use_pricing_api: false,
            region: None,
            currency: "USD".to_string(),
            custom_pricing: HashMap::new(),
            discount_config: DiscountConfig::default(),
            discount_config_file: None,
            additional_costs: HashMap::new(),
            last_updated: None,
        }
    }
}

/// Throughput tuning hints.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OptimizationConfig {
    pub enable_cargoship_optimization: bool,
    /// Target throughput in MB/s.
    pub target_throughput: f64,
    pub optimization_level: OptimizationLevel,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            enable_cargoship_optimization: false,
            target_throughput: 0.0,
            optimization_level: OptimizationLevel::Standard,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizationLevel {
    #[default]
    Standard,
    Aggressive,
}
