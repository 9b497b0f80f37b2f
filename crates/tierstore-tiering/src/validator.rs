//! Write and delete validation against a tier's effective constraints.

use std::time::Duration;

use thiserror::Error;

use crate::tiers::{AccessFrequency, StorageTier, TierConstraints};
use crate::SMALL_OBJECT_THRESHOLD;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Validation failures. Fatal to the call; never retried.
#[derive(Debug, Clone, Error)]
pub enum TierValidationError {
    /// The object is smaller than the tier's effective minimum.
    #[error(
        "object '{key}' of {size} bytes is below the {min} byte minimum for tier {tier}"
    )]
    BelowMinimumSize {
        key: String,
        size: u64,
        min: u64,
        tier: StorageTier,
    },

    /// The object has not outlived the tier's deletion embargo.
    #[error(
        "object '{key}' is {age_days} days old, below the {embargo_days} day deletion embargo for tier {tier}"
    )]
    EmbargoNotMet {
        key: String,
        age_days: u64,
        embargo_days: u64,
        tier: StorageTier,
    },
}

/// Validates operations against one tier plus an optional constraints
/// overlay.
#[derive(Debug, Clone)]
pub struct TierValidator {
    tier: StorageTier,
    constraints: TierConstraints,
}

impl TierValidator {
    pub fn new(tier: StorageTier, constraints: TierConstraints) -> Self {
        Self { tier, constraints }
    }

    pub fn tier(&self) -> StorageTier {
        self.tier
    }

    /// The larger of the descriptor minimum and the constraint override.
    pub fn effective_min_object_size(&self) -> u64 {
        let descriptor = self.tier.descriptor();
        descriptor
            .min_object_size
            .max(self.constraints.min_object_size.unwrap_or(0))
    }

    /// The longer of the descriptor embargo and the constraint override.
    pub fn effective_deletion_embargo(&self) -> Duration {
        let descriptor = self.tier.descriptor();
        descriptor
            .deletion_embargo
            .max(self.constraints.deletion_embargo.unwrap_or(Duration::ZERO))
    }

    /// Accepts a write iff `size >= effective_min_object_size()`.
    pub fn validate_write(&self, key: &str, size: u64) -> Result<(), TierValidationError> {
        let min = self.effective_min_object_size();
        if size < min {
            return Err(TierValidationError::BelowMinimumSize {
                key: key.to_string(),
                size,
                min,
                tier: self.tier,
            });
        }
        Ok(())
    }

    /// Accepts a delete iff `object_age >= effective_deletion_embargo()`.
    ///
    /// Warns, without failing, when the object is younger than the tier's
    /// minimum billable period: the delete still pays for the full period.
    pub fn validate_delete(
        &self,
        key: &str,
        object_age: Duration,
    ) -> Result<(), TierValidationError> {
        let embargo = self.effective_deletion_embargo();
        if object_age < embargo {
            return Err(TierValidationError::EmbargoNotMet {
                key: key.to_string(),
                age_days: object_age.as_secs() / DAY.as_secs(),
                embargo_days: embargo.as_secs() / DAY.as_secs(),
                tier: self.tier,
            });
        }

        let billable = self.tier.descriptor().minimum_billable_days;
        if billable > 0 && object_age < billable * DAY {
            tracing::warn!(
                key,
                tier = %self.tier,
                minimum_billable_days = billable,
                "deleting before the minimum billable period; storage is charged for the full period"
            );
        }
        Ok(())
    }

    /// Human-readable tier advisories for an object of the given size and
    /// observed access frequency.
    pub fn recommendations(&self, object_size: u64, frequency: AccessFrequency) -> Vec<String> {
        let mut advisories = Vec::new();

        if object_size < SMALL_OBJECT_THRESHOLD {
            advisories.push(format!(
                "objects under 128 KiB pay the infrequent-access minimum; prefer {} over IA tiers",
                StorageTier::Standard
            ));
        }

        match frequency {
            AccessFrequency::Frequent if self.tier != StorageTier::Standard => {
                advisories.push(format!(
                    "frequently accessed data on {} costs retrieval fees; switch to {}",
                    self.tier,
                    StorageTier::Standard
                ));
            }
            AccessFrequency::Infrequent if self.tier == StorageTier::Standard => {
                advisories.push(format!(
                    "infrequently accessed data could move to {} or {}",
                    StorageTier::StandardIa,
                    StorageTier::OneZoneIa
                ));
            }
            AccessFrequency::Archive
                if !matches!(self.tier, StorageTier::GlacierIr | StorageTier::Glacier) =>
            {
                advisories.push(format!(
                    "archival data could move to {} or {}",
                    StorageTier::GlacierIr,
                    StorageTier::Glacier
                ));
            }
            AccessFrequency::Unknown if self.tier != StorageTier::Intelligent => {
                advisories.push(format!(
                    "access pattern unknown; {} adapts placement automatically",
                    StorageTier::Intelligent
                ));
            }
            _ => {}
        }

        advisories
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(tier: StorageTier) -> TierValidator {
        TierValidator::new(tier, TierConstraints::default())
    }

    #[test]
    fn standard_accepts_any_size() {
        let v = validator(StorageTier::Standard);
        assert!(v.validate_write("k", 0).is_ok());
        assert!(v.validate_write("k", 1).is_ok());
    }

    #[test]
    fn ia_rejects_below_minimum() {
        let v = validator(StorageTier::StandardIa);
        let err = v.validate_write("small.bin", 64 * 1024).unwrap_err();
        match err {
            TierValidationError::BelowMinimumSize { size, min, tier, .. } => {
                assert_eq!(size, 64 * 1024);
                assert_eq!(min, 128 * 1024);
                assert_eq!(tier, StorageTier::StandardIa);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(v.validate_write("ok.bin", 128 * 1024).is_ok());
    }

    #[test]
    fn constraints_raise_but_never_lower_minimums() {
        let v = TierValidator::new(
            StorageTier::StandardIa,
            TierConstraints {
                min_object_size: Some(256 * 1024),
                ..Default::default()
            },
        );
        assert_eq!(v.effective_min_object_size(), 256 * 1024);

        let v = TierValidator::new(
            StorageTier::StandardIa,
            TierConstraints {
                min_object_size: Some(1),
                ..Default::default()
            },
        );
        assert_eq!(v.effective_min_object_size(), 128 * 1024);
    }

    #[test]
    fn embargo_blocks_young_deletes() {
        let v = validator(StorageTier::StandardIa);
        let err = v.validate_delete("doomed", 10 * DAY).unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("30"));
        assert!(rendered.contains("embargo"));

        assert!(v.validate_delete("aged", 40 * DAY).is_ok());
    }

    #[test]
    fn constraint_embargo_extends_descriptor() {
        let v = TierValidator::new(
            StorageTier::StandardIa,
            TierConstraints {
                deletion_embargo: Some(60 * DAY),
                ..Default::default()
            },
        );
        assert!(v.validate_delete("k", 45 * DAY).is_err());
        assert!(v.validate_delete("k", 61 * DAY).is_ok());
    }

    #[test]
    fn recommendations_follow_the_table() {
        let small = validator(StorageTier::StandardIa)
            .recommendations(64 * 1024, AccessFrequency::Cold);
        assert!(small.iter().any(|a| a.contains("128 KiB")));

        let frequent = validator(StorageTier::StandardIa)
            .recommendations(1 << 20, AccessFrequency::Frequent);
        assert!(frequent.iter().any(|a| a.contains("standard")));

        let infrequent = validator(StorageTier::Standard)
            .recommendations(1 << 20, AccessFrequency::Infrequent);
        assert!(infrequent.iter().any(|a| a.contains("standard-ia")));

        let archive =
            validator(StorageTier::Standard).recommendations(1 << 20, AccessFrequency::Archive);
        assert!(archive.iter().any(|a| a.contains("glacier")));

        let unknown =
            validator(StorageTier::Standard).recommendations(1 << 20, AccessFrequency::Unknown);
        assert!(unknown.iter().any(|a| a.contains("intelligent")));

        let settled = validator(StorageTier::Intelligent)
            .recommendations(1 << 20, AccessFrequency::Unknown);
        assert!(settled.is_empty());
    }
}
