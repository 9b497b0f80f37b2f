//! The backend's observability snapshot.

use tierstore_health::ComponentHealthRecord;
use tierstore_tiering::TierPriceSummary;

use crate::metrics::MetricsSnapshot;

/// Everything an operator needs in one place: transfer metrics, component
/// health, and the post-discount pricing table.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendTelemetry {
    pub metrics: MetricsSnapshot,
    pub health: Vec<ComponentHealthRecord>,
    pub pricing: Vec<TierPriceSummary>,
}
