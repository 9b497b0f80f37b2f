//! The optimization analyzer: turns access patterns into tier-migration
//! recommendations with estimated savings and confidence scores.
//!
//! The analyzer is a recommender only. [`CostOptimizer::apply_optimization`]
//! re-tiers the local pattern and re-costs it; it never performs a remote
//! storage-class change.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::patterns::{AccessPattern, AccessPatternStore};
use crate::pricing::PricingLookup;
use crate::tiers::{AccessFrequency, StorageTier};
use crate::SMALL_OBJECT_THRESHOLD;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);
const GIB: u64 = 1024 * 1024 * 1024;

/// Patterns younger than this carry too little signal to analyze.
const MIN_OBSERVATION_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// One suggested tier migration.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TierRecommendation {
    pub key: String,
    pub from_tier: StorageTier,
    pub to_tier: StorageTier,
    pub access_frequency: AccessFrequency,
    pub object_size: u64,
    pub estimated_monthly_savings: f64,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// The full analysis result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OptimizationReport {
    pub recommendations: Vec<TierRecommendation>,
    pub total_monthly_savings: f64,
    /// Patterns examined, including ones that produced no recommendation.
    pub patterns_analyzed: usize,
    /// Patterns skipped for insufficient observation age.
    pub patterns_skipped: usize,
}

/// Analyzer over the access-pattern store.
///
/// Takes a narrow [`PricingLookup`] capability instead of the whole backend
/// so it can be exercised with a fixed pricing table.
pub struct CostOptimizer {
    patterns: Arc<AccessPatternStore>,
    pricing: Arc<dyn PricingLookup>,
    /// Minimum $/month savings worth surfacing.
    cost_threshold: f64,
}

impl CostOptimizer {
    pub fn new(
        patterns: Arc<AccessPatternStore>,
        pricing: Arc<dyn PricingLookup>,
        cost_threshold: f64,
    ) -> Self {
        Self {
            patterns,
            pricing,
            cost_threshold,
        }
    }

    /// Categorizes a pattern's access rate.
    ///
    /// The rate weighs the access count against the recency window (time
    /// since the last access), so a burst of old reads does not keep an
    /// object "hot" forever: five accesses with the last one ten days ago
    /// rate as one access per two days.
    pub fn categorize(&self, pattern: &AccessPattern, now: SystemTime) -> AccessFrequency {
        if pattern.access_count == 0 {
            return AccessFrequency::Never;
        }
        let idle_hours = (pattern.idle(now).as_secs_f64() / 3600.0).max(1.0);
        let accesses_per_day = pattern.access_count as f64 * 24.0 / idle_hours;
        let age = pattern.age(now);

        if accesses_per_day >= 1.0 {
            AccessFrequency::Frequent
        } else if accesses_per_day >= 0.1 {
            AccessFrequency::Infrequent
        } else if age > 90 * DAY && accesses_per_day >= 0.01 {
            AccessFrequency::Archive
        } else {
            AccessFrequency::Cold
        }
    }

    /// The decision table, with the small-object guard applied: objects
    /// under 128 KiB that have been accessed stay on Standard to sidestep
    /// the IA minimum billable size.
    pub fn optimal_tier(
        &self,
        frequency: AccessFrequency,
        object_size: u64,
        access_count: u64,
    ) -> StorageTier {
        if object_size < SMALL_OBJECT_THRESHOLD && access_count != 0 {
            return StorageTier::Standard;
        }
        match frequency {
            AccessFrequency::Frequent => StorageTier::Standard,
            AccessFrequency::Infrequent => {
                if object_size >= SMALL_OBJECT_THRESHOLD {
                    StorageTier::StandardIa
                } else {
                    StorageTier::Standard
                }
            }
            AccessFrequency::Archive => {
                if object_size >= SMALL_OBJECT_THRESHOLD {
                    StorageTier::GlacierIr
                } else {
                    StorageTier::StandardIa
                }
            }
            AccessFrequency::Cold | AccessFrequency::Never => {
                if object_size > GIB {
                    StorageTier::Glacier
                } else {
                    StorageTier::GlacierIr
                }
            }
            AccessFrequency::Unknown => StorageTier::Intelligent,
        }
    }

    fn confidence(&self, pattern: &AccessPattern, now: SystemTime) -> f64 {
        let mut score: f64 = 0.5;
        if pattern.access_count >= 10 {
            score += 0.2;
        } else if pattern.access_count >= 5 {
            score += 0.1;
        }
        let age = pattern.age(now);
        if age >= 90 * DAY {
            score += 0.2;
        } else if age >= 30 * DAY {
            score += 0.1;
        }
        if pattern.mean_access_gap > Duration::ZERO {
            score += 0.1;
        }
        score.min(1.0)
    }

    /// Analyzes every pattern and returns the recommendations whose savings
    /// clear the configured threshold.
    pub fn optimization_report(&self) -> OptimizationReport {
        let now = SystemTime::now();
        let mut recommendations = Vec::new();
        let mut analyzed = 0usize;
        let mut skipped = 0usize;

        for pattern in self.patterns.snapshot() {
            if pattern.age(now) < MIN_OBSERVATION_AGE {
                skipped += 1;
                continue;
            }
            analyzed += 1;

            let frequency = self.categorize(&pattern, now);
            let optimal =
                self.optimal_tier(frequency, pattern.object_size, pattern.access_count);
            if optimal == pattern.current_tier {
                continue;
            }

            let current_cost = self
                .pricing
                .monthly_object_cost(pattern.current_tier, pattern.object_size);
            let optimal_cost = self.pricing.monthly_object_cost(optimal, pattern.object_size);
            let savings = current_cost - optimal_cost;
            if savings <= 0.0 || savings <= self.cost_threshold {
                continue;
            }

            recommendations.push(TierRecommendation {
                key: pattern.key.clone(),
                from_tier: pattern.current_tier,
                to_tier: optimal,
                access_frequency: frequency,
                object_size: pattern.object_size,
                estimated_monthly_savings: savings,
                confidence: self.confidence(&pattern, now),
            });
        }

        recommendations.sort_by(|a, b| {
            b.estimated_monthly_savings
                .partial_cmp(&a.estimated_monthly_savings)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let total_monthly_savings = recommendations
            .iter()
            .map(|r| r.estimated_monthly_savings)
            .sum();

        OptimizationReport {
            recommendations,
            total_monthly_savings,
            patterns_analyzed: analyzed,
            patterns_skipped: skipped,
        }
    }

    /// Applies a recommendation to the local pattern: re-tiers it and
    /// refreshes its estimated monthly cost. The remote object is untouched;
    /// actual migration is delegated elsewhere.
    pub fn apply_optimization(&self, key: &str, to_tier: StorageTier) -> bool {
        let cost = |size| self.pricing.monthly_object_cost(to_tier, size);
        let applied = self.patterns.update(key, |pattern| {
            pattern.current_tier = to_tier;
            pattern.estimated_monthly_cost = cost(pattern.object_size);
        });
        if applied {
            tracing::info!(key, to_tier = %to_tier, "applied tier optimization to local pattern");
        }
        applied
    }
}
