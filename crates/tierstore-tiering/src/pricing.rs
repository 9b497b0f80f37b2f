//! Per-tier pricing with discount composition and volume brackets.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use crate::tiers::StorageTier;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Pricing record for one tier. All monetary values are USD.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TierPricing {
    /// Storage cost in $/GB-month.
    pub storage_per_gb_month: f64,
    /// Retrieval cost in $/GB.
    pub retrieval_per_gb: f64,
    /// Per-request costs.
    pub put_request: f64,
    pub get_request: f64,
    pub delete_request: f64,
    pub list_request: f64,
    pub head_request: f64,
    /// Objects below this size bill as if they were this size.
    pub minimum_billable_size: u64,
    /// Days billed regardless of actual lifetime.
    pub minimum_billable_days: u32,
    /// Cost of transitioning one object into another tier.
    pub transition_costs: HashMap<StorageTier, f64>,
}

impl Default for TierPricing {
    fn default() -> Self {
        Self {
            storage_per_gb_month: 0.0,
            retrieval_per_gb: 0.0,
            put_request: 0.0,
            get_request: 0.0,
            delete_request: 0.0,
            list_request: 0.0,
            head_request: 0.0,
            minimum_billable_size: 0,
            minimum_billable_days: 0,
            transition_costs: HashMap::new(),
        }
    }
}

/// Pricing derived from the tier descriptor table; used when no custom
/// override or pricing-API result exists.
pub fn default_pricing(tier: StorageTier) -> TierPricing {
    let descriptor = tier.descriptor();
    let retrieval_per_gb = match tier {
        StorageTier::Standard
        | StorageTier::ReducedRedundancy
        | StorageTier::Intelligent => 0.0,
        StorageTier::StandardIa | StorageTier::OneZoneIa => 0.01,
        StorageTier::GlacierIr => 0.03,
        StorageTier::Glacier => 0.01,
        StorageTier::DeepArchive => 0.02,
    };
    TierPricing {
        storage_per_gb_month: descriptor.storage_cost_per_gb_month,
        retrieval_per_gb,
        put_request: 0.000005,
        get_request: 0.0000004,
        delete_request: 0.0,
        list_request: 0.000005,
        head_request: 0.0000004,
        minimum_billable_size: descriptor.min_object_size,
        minimum_billable_days: descriptor.minimum_billable_days,
        transition_costs: HashMap::new(),
    }
}

/// One volume-discount bracket. The first declared bracket whose size range
/// contains the object and whose tier set matches wins.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct VolumeTier {
    pub min_size_gb: f64,
    /// Unbounded when absent.
    pub max_size_gb: Option<f64>,
    pub discount_percent: f64,
    /// Tier config ids, or the sentinel "ALL".
    pub applies_to: Vec<String>,
}

impl Default for VolumeTier {
    fn default() -> Self {
        Self {
            min_size_gb: 0.0,
            max_size_gb: None,
            discount_percent: 0.0,
            applies_to: vec!["ALL".to_string()],
        }
    }
}

impl VolumeTier {
    fn matches(&self, tier: StorageTier, size_gb: f64) -> bool {
        if size_gb < self.min_size_gb {
            return false;
        }
        if let Some(max) = self.max_size_gb {
            if size_gb > max {
                return false;
            }
        }
        self.applies_to
            .iter()
            .any(|id| id == "ALL" || id == tier.config_id())
    }
}

/// Discount configuration. Percentages compose multiplicatively in the
/// order enterprise, reserved, spot, per-tier custom.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DiscountConfig {
    pub enterprise_discount: f64,
    pub reserved_capacity_discount: f64,
    pub spot_discount: f64,
    pub custom_discounts: HashMap<StorageTier, f64>,
    pub volume_tiers: Vec<VolumeTier>,
}

impl DiscountConfig {
    /// Merges another (externally loaded) configuration into this one;
    /// non-zero fields of `other` win.
    pub fn merge(&mut self, other: DiscountConfig) {
        if other.enterprise_discount != 0.0 {
            self.enterprise_discount = other.enterprise_discount;
        }
        if other.reserved_capacity_discount != 0.0 {
            self.reserved_capacity_discount = other.reserved_capacity_discount;
        }
        if other.spot_discount != 0.0 {
            self.spot_discount = other.spot_discount;
        }
        for (tier, percent) in other.custom_discounts {
            if percent != 0.0 {
                self.custom_discounts.insert(tier, percent);
            }
        }
        if !other.volume_tiers.is_empty() {
            self.volume_tiers = other.volume_tiers;
        }
    }

    /// The combined multiplier for storage/retrieval rates of `tier`.
    fn rate_multiplier(&self, tier: StorageTier) -> f64 {
        let mut factor = (1.0 - self.enterprise_discount / 100.0)
            * (1.0 - self.reserved_capacity_discount / 100.0)
            * (1.0 - self.spot_discount / 100.0);
        if let Some(custom) = self.custom_discounts.get(&tier) {
            factor *= 1.0 - custom / 100.0;
        }
        factor.max(0.0)
    }
}

/// Errors from the remote pricing source.
#[derive(Debug, Clone, Error)]
pub enum PricingError {
    #[error("pricing source unavailable: {0}")]
    Unavailable(String),
}

/// A source of per-tier pricing, typically a vendor pricing API.
///
/// Implementations must return a full [`TierPricing`] or an error; partial
/// records are not merged.
pub trait PricingSource: Send + Sync {
    fn fetch(&self, tier: StorageTier) -> Result<TierPricing, PricingError>;
}

/// The remote pricing-API source. The response parser is not implemented;
/// the contract is kept by answering with the descriptor-derived defaults.
pub struct RemotePricingSource {
    pub region: String,
}

impl PricingSource for RemotePricingSource {
    fn fetch(&self, tier: StorageTier) -> Result<TierPricing, PricingError> {
        tracing::debug!(
            region = %self.region,
            tier = %tier,
            "pricing API parser not implemented; answering with descriptor defaults"
        );
        Ok(default_pricing(tier))
    }
}

/// Narrow pricing capability handed to the optimizer.
pub trait PricingLookup: Send + Sync {
    /// Post-discount pricing for a tier.
    fn tier_pricing(&self, tier: StorageTier) -> TierPricing;

    /// Monthly storage cost of one object in a tier, with minimum-size
    /// flooring and volume discounts applied.
    fn monthly_object_cost(&self, tier: StorageTier, object_size: u64) -> f64;
}

/// Resolves per-tier pricing: custom override, then pricing-API cache, then
/// descriptor defaults; discounts are applied in every case.
pub struct PricingManager {
    custom: HashMap<StorageTier, TierPricing>,
    discounts: DiscountConfig,
    source: Option<Box<dyn PricingSource>>,
    use_pricing_api: bool,
    api_cache: RwLock<HashMap<StorageTier, TierPricing>>,
}

impl PricingManager {
    pub fn new(discounts: DiscountConfig) -> Self {
        Self {
            custom: HashMap::new(),
            discounts,
            source: None,
            use_pricing_api: false,
            api_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_custom_pricing(mut self, custom: HashMap<StorageTier, TierPricing>) -> Self {
        self.custom = custom;
        self
    }

    pub fn with_source(mut self, source: Box<dyn PricingSource>, enabled: bool) -> Self {
        self.source = Some(source);
        self.use_pricing_api = enabled;
        self
    }

    pub fn discounts(&self) -> &DiscountConfig {
        &self.discounts
    }

    /// Queries the pricing source for every tier and caches the results.
    /// Individual tier failures are logged and skipped.
    pub fn refresh(&self) {
        if !self.use_pricing_api {
            return;
        }
        let Some(source) = &self.source else {
            return;
        };
        let mut cache = self.api_cache.write().unwrap();
        for tier in StorageTier::ALL {
            match source.fetch(tier) {
                Ok(pricing) => {
                    cache.insert(tier, pricing);
                }
                Err(err) => {
                    tracing::warn!(tier = %tier, error = %err, "pricing refresh failed for tier");
                }
            }
        }
    }

    /// Resolves pricing for `tier` and applies discounts: enterprise,
    /// reserved, and spot multiply the storage/retrieval rates, and a
    /// per-tier custom discount multiplies them further. Request costs are
    /// only non-default when custom pricing overrides them.
    pub fn get_tier_pricing(&self, tier: StorageTier) -> TierPricing {
        let mut pricing = if let Some(custom) = self.custom.get(&tier) {
            custom.clone()
        } else if self.use_pricing_api {
            self.api_cache
                .read()
                .unwrap()
                .get(&tier)
                .cloned()
                .unwrap_or_else(|| default_pricing(tier))
        } else {
            default_pricing(tier)
        };

        let factor = self.discounts.rate_multiplier(tier);
        pricing.storage_per_gb_month *= factor;
        pricing.retrieval_per_gb *= factor;
        pricing
    }

    /// Applies the first matching volume bracket to `base_cost`.
    pub fn calculate_volume_discount(
        &self,
        tier: StorageTier,
        size_gb: f64,
        base_cost: f64,
    ) -> f64 {
        for bracket in &self.discounts.volume_tiers {
            if bracket.matches(tier, size_gb) {
                return base_cost * (1.0 - bracket.discount_percent / 100.0);
            }
        }
        base_cost
    }

    /// Per-tier post-discount summary for the telemetry surface.
    pub fn pricing_summary(&self) -> Vec<TierPriceSummary> {
        StorageTier::ALL
            .iter()
            .map(|&tier| {
                let pricing = self.get_tier_pricing(tier);
                TierPriceSummary {
                    tier,
                    storage_per_gb_month: pricing.storage_per_gb_month,
                    retrieval_per_gb: pricing.retrieval_per_gb,
                    put_request: pricing.put_request,
                    get_request: pricing.get_request,
                }
            })
            .collect()
    }
}

impl PricingLookup for PricingManager {
    fn tier_pricing(&self, tier: StorageTier) -> TierPricing {
        self.get_tier_pricing(tier)
    }

    fn monthly_object_cost(&self, tier: StorageTier, object_size: u64) -> f64 {
        let pricing = self.get_tier_pricing(tier);
        let effective_size = object_size.max(pricing.minimum_billable_size);
        let size_gb = effective_size as f64 / GIB;
        let base_cost = size_gb * pricing.storage_per_gb_month;
        self.calculate_volume_discount(tier, size_gb, base_cost)
    }
}

/// One row of the telemetry pricing table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TierPriceSummary {
    pub tier: StorageTier,
    pub storage_per_gb_month: f64,
    pub retrieval_per_gb: f64,
    pub put_request: f64,
    pub get_request: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn defaults_follow_descriptors() {
        let pricing = default_pricing(StorageTier::StandardIa);
        approx(pricing.storage_per_gb_month, 0.0125);
        assert_eq!(pricing.minimum_billable_size, 128 * 1024);
        assert_eq!(pricing.minimum_billable_days, 30);
    }

    #[test]
    fn discounts_compose_multiplicatively() {
        let mut discounts = DiscountConfig {
            enterprise_discount: 10.0,
            reserved_capacity_discount: 20.0,
            spot_discount: 50.0,
            ..Default::default()
        };
        discounts
            .custom_discounts
            .insert(StorageTier::Standard, 10.0);

        let manager = PricingManager::new(discounts);
        let pricing = manager.get_tier_pricing(StorageTier::Standard);
        // 0.023 * 0.9 * 0.8 * 0.5 * 0.9
        approx(pricing.storage_per_gb_month, 0.023 * 0.9 * 0.8 * 0.5 * 0.9);

        // The custom discount is per-tier.
        let other = manager.get_tier_pricing(StorageTier::Glacier);
        approx(other.storage_per_gb_month, 0.0036 * 0.9 * 0.8 * 0.5);
    }

    #[test]
    fn request_costs_are_not_discounted() {
        let manager = PricingManager::new(DiscountConfig {
            enterprise_discount: 50.0,
            ..Default::default()
        });
        let pricing = manager.get_tier_pricing(StorageTier::Standard);
        approx(pricing.put_request, 0.000005);
        approx(pricing.get_request, 0.0000004);
    }

    #[test]
    fn discount_application_is_associative_with_custom_pricing() {
        // Providing pre-discounted custom pricing and letting the engine
        // apply the remaining discounts must equal applying all discounts to
        // the raw rates.
        let discounts = DiscountConfig {
            enterprise_discount: 10.0,
            ..Default::default()
        };

        let raw = default_pricing(StorageTier::Standard);
        let mut pre_discounted = raw.clone();
        pre_discounted.storage_per_gb_month *= 0.8; // reserved applied upstream
        pre_discounted.retrieval_per_gb *= 0.8;

        let mut custom = HashMap::new();
        custom.insert(StorageTier::Standard, pre_discounted);
        let engine_a = PricingManager::new(discounts.clone()).with_custom_pricing(custom);

        let both = DiscountConfig {
            enterprise_discount: 10.0,
            reserved_capacity_discount: 20.0,
            ..Default::default()
        };
        let engine_b = PricingManager::new(both);

        approx(
            engine_a
                .get_tier_pricing(StorageTier::Standard)
                .storage_per_gb_month,
            engine_b
                .get_tier_pricing(StorageTier::Standard)
                .storage_per_gb_month,
        );
    }

    #[test]
    fn first_matching_volume_bracket_wins() {
        let discounts = DiscountConfig {
            volume_tiers: vec![
                VolumeTier {
                    min_size_gb: 100.0,
                    max_size_gb: Some(1000.0),
                    discount_percent: 10.0,
                    applies_to: vec!["standard".to_string()],
                },
                VolumeTier {
                    min_size_gb: 100.0,
                    max_size_gb: None,
                    discount_percent: 50.0,
                    applies_to: vec!["ALL".to_string()],
                },
            ],
            ..Default::default()
        };
        let manager = PricingManager::new(discounts);

        // First bracket matches standard in range.
        approx(
            manager.calculate_volume_discount(StorageTier::Standard, 500.0, 100.0),
            90.0,
        );
        // Standard out of the first bracket's range falls to the ALL bracket.
        approx(
            manager.calculate_volume_discount(StorageTier::Standard, 2000.0, 100.0),
            50.0,
        );
        // Other tiers skip the standard-only bracket.
        approx(
            manager.calculate_volume_discount(StorageTier::Glacier, 500.0, 100.0),
            50.0,
        );
        // No bracket below 100 GB.
        approx(
            manager.calculate_volume_discount(StorageTier::Standard, 10.0, 100.0),
            100.0,
        );
    }

    #[test]
    fn small_objects_bill_the_minimum_size() {
        let manager = PricingManager::new(DiscountConfig::default());
        let below = manager.monthly_object_cost(StorageTier::StandardIa, 1024);
        let at_minimum = manager.monthly_object_cost(StorageTier::StandardIa, 128 * 1024);
        approx(below, at_minimum);

        let above = manager.monthly_object_cost(StorageTier::StandardIa, 256 * 1024);
        assert!(above > at_minimum);
    }

    #[test]
    fn merge_prefers_non_zero_external_fields() {
        let mut inline = DiscountConfig {
            enterprise_discount: 5.0,
            reserved_capacity_discount: 10.0,
            ..Default::default()
        };
        let external = DiscountConfig {
            enterprise_discount: 15.0,
            spot_discount: 20.0,
            ..Default::default()
        };
        inline.merge(external);
        assert_eq!(inline.enterprise_discount, 15.0);
        assert_eq!(inline.reserved_capacity_discount, 10.0);
        assert_eq!(inline.spot_discount, 20.0);
    }

    #[test]
    fn remote_source_keeps_the_contract() {
        let source = RemotePricingSource {
            region: "us-east-1".into(),
        };
        let pricing = source.fetch(StorageTier::Glacier).unwrap();
        approx(pricing.storage_per_gb_month, 0.0036);

        let manager =
            PricingManager::new(DiscountConfig::default()).with_source(Box::new(source), true);
        manager.refresh();
        let resolved = manager.get_tier_pricing(StorageTier::Glacier);
        approx(resolved.storage_per_gb_month, 0.0036);
    }
}
