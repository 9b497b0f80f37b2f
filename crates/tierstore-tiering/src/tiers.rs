//! The closed tier set and the immutable descriptor registry.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const KIB: u64 = 1024;

/// The eight supported storage tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageTier {
    Standard,
    StandardIa,
    OneZoneIa,
    ReducedRedundancy,
    GlacierIr,
    Glacier,
    DeepArchive,
    Intelligent,
}

impl StorageTier {
    /// All tiers, in registry order.
    pub const ALL: [StorageTier; 8] = [
        StorageTier::Standard,
        StorageTier::StandardIa,
        StorageTier::OneZoneIa,
        StorageTier::ReducedRedundancy,
        StorageTier::GlacierIr,
        StorageTier::Glacier,
        StorageTier::DeepArchive,
        StorageTier::Intelligent,
    ];

    /// The storage-class string attached to write requests.
    pub fn storage_class(&self) -> &'static str {
        match self {
            StorageTier::Standard => "STANDARD",
            StorageTier::StandardIa => "STANDARD_IA",
            StorageTier::OneZoneIa => "ONEZONE_IA",
            StorageTier::ReducedRedundancy => "REDUCED_REDUNDANCY",
            StorageTier::GlacierIr => "GLACIER_IR",
            StorageTier::Glacier => "GLACIER",
            StorageTier::DeepArchive => "DEEP_ARCHIVE",
            StorageTier::Intelligent => "INTELLIGENT_TIERING",
        }
    }

    /// The configuration id (kebab-case).
    pub fn config_id(&self) -> &'static str {
        match self {
            StorageTier::Standard => "standard",
            StorageTier::StandardIa => "standard-ia",
            StorageTier::OneZoneIa => "one-zone-ia",
            StorageTier::ReducedRedundancy => "reduced-redundancy",
            StorageTier::GlacierIr => "glacier-ir",
            StorageTier::Glacier => "glacier",
            StorageTier::DeepArchive => "deep-archive",
            StorageTier::Intelligent => "intelligent",
        }
    }

    /// This tier's descriptor from the registry.
    pub fn descriptor(&self) -> &'static TierDescriptor {
        &registry()[self]
    }

    /// Whether the tier bills a minimum object size (the IA family).
    pub fn has_ia_minimum(&self) -> bool {
        matches!(
            self,
            StorageTier::StandardIa | StorageTier::OneZoneIa | StorageTier::GlacierIr
        )
    }
}

impl std::str::FromStr for StorageTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StorageTier::ALL
            .iter()
            .find(|tier| tier.config_id() == s)
            .copied()
            .ok_or_else(|| format!("unsupported storage tier '{s}'"))
    }
}

impl std::fmt::Display for StorageTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.config_id())
    }
}

/// How quickly objects in a tier can be read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalLatency {
    Instant,
    MinutesToHours,
    Hours,
    Variable,
}

/// Immutable description of one tier. Source of truth for validation and
/// default pricing.
#[derive(Debug, Clone)]
pub struct TierDescriptor {
    pub tier: StorageTier,
    pub display_name: &'static str,
    /// Smallest object the tier accepts without policy violation.
    pub min_object_size: u64,
    /// How long an object must live before deletion is permitted.
    pub deletion_embargo: Duration,
    pub retrieval_latency: RetrievalLatency,
    /// Whether reading back incurs a per-GB retrieval charge.
    pub retrieval_cost: bool,
    /// Minimum days billed regardless of actual lifetime.
    pub minimum_billable_days: u32,
    /// Default storage cost in $/GB-month.
    pub storage_cost_per_gb_month: f64,
}

fn registry() -> &'static HashMap<StorageTier, TierDescriptor> {
    static REGISTRY: OnceLock<HashMap<StorageTier, TierDescriptor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let descriptors = [
            TierDescriptor {
                tier: StorageTier::Standard,
                display_name: "Standard",
                min_object_size: 0,
                deletion_embargo: Duration::ZERO,
                retrieval_latency: RetrievalLatency::Instant,
                retrieval_cost: false,
                minimum_billable_days: 0,
                storage_cost_per_gb_month: 0.023,
            },
            TierDescriptor {
                tier: StorageTier::StandardIa,
                display_name: "Standard-Infrequent Access",
                min_object_size: 128 * KIB,
                deletion_embargo: 30 * DAY,
                retrieval_latency: RetrievalLatency::Instant,
                retrieval_cost: true,
                minimum_billable_days: 30,
                storage_cost_per_gb_month: 0.0125,
            },
            TierDescriptor {
                tier: StorageTier::OneZoneIa,
                display_name: "One Zone-Infrequent Access",
                min_object_size: 128 * KIB,
                deletion_embargo: 30 * DAY,
                retrieval_latency: RetrievalLatency::Instant,
                retrieval_cost: true,
                minimum_billable_days: 30,
                storage_cost_per_gb_month: 0.01,
            },
            TierDescriptor {
                tier: StorageTier::ReducedRedundancy,
                display_name: "Reduced Redundancy",
                min_object_size: 0,
                deletion_embargo: Duration::ZERO,
                retrieval_latency: RetrievalLatency::Instant,
                retrieval_cost: false,
                minimum_billable_days: 0,
                storage_cost_per_gb_month: 0.024,
            },
            TierDescriptor {
                tier: StorageTier::GlacierIr,
                display_name: "Glacier Instant Retrieval",
                min_object_size: 128 * KIB,
                deletion_embargo: 90 * DAY,
                retrieval_latency: RetrievalLatency::Instant,
                retrieval_cost: true,
                minimum_billable_days: 90,
                storage_cost_per_gb_month: 0.004,
            },
            TierDescriptor {
                tier: StorageTier::Glacier,
                display_name: "Glacier Flexible Retrieval",
                min_object_size: 0,
                deletion_embargo: 90 * DAY,
                retrieval_latency: RetrievalLatency::MinutesToHours,
                retrieval_cost: true,
                minimum_billable_days: 90,
                storage_cost_per_gb_month: 0.0036,
            },
            TierDescriptor {
                tier: StorageTier::DeepArchive,
                display_name: "Glacier Deep Archive",
                min_object_size: 0,
                deletion_embargo: 180 * DAY,
                retrieval_latency: RetrievalLatency::Hours,
                retrieval_cost: true,
                minimum_billable_days: 180,
                storage_cost_per_gb_month: 0.00099,
            },
            TierDescriptor {
                tier: StorageTier::Intelligent,
                display_name: "Intelligent-Tiering",
                min_object_size: 0,
                deletion_embargo: Duration::ZERO,
                retrieval_latency: RetrievalLatency::Variable,
                retrieval_cost: false,
                minimum_billable_days: 30,
                storage_cost_per_gb_month: 0.023,
            },
        ];
        descriptors
            .into_iter()
            .map(|descriptor| (descriptor.tier, descriptor))
            .collect()
    })
}

/// User overrides of a tier descriptor's thresholds. Set fields replace the
/// descriptor defaults; unset fields fall through.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TierConstraints {
    pub min_object_size: Option<u64>,
    #[serde(with = "humantime_serde::option")]
    pub deletion_embargo: Option<Duration>,
    pub retrieval_latency: Option<RetrievalLatency>,
    pub retrieval_cost: Option<bool>,
    pub minimum_storage_days: Option<u32>,
    #[serde(with = "humantime_serde::option")]
    pub transition_delay: Option<Duration>,
}

/// Observed access-rate category of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessFrequency {
    /// At least one access per day.
    Frequent,
    /// At least one access per ten days.
    Infrequent,
    /// Old object with residual accesses.
    Archive,
    /// Rarely touched.
    Cold,
    /// Never read back.
    Never,
    /// Not enough signal to categorize.
    Unknown,
}
