//! A resilient, cost-aware object-storage backend.
//!
//! `tierstore` mediates between a filesystem layer and a remote object
//! store with multiple durability/latency tiers. Three concerns are woven
//! together:
//!
//! - **Transfers**: concurrent single-shot and chunked multipart uploads
//!   and downloads, an accelerated-endpoint fallback, batch fan-out, and a
//!   bounded connection pool.
//! - **Tier policy and cost**: per-tier write/delete validation, access
//!   pattern tracking, pricing with discount composition, and
//!   tier-migration recommendations with estimated monthly savings.
//! - **Resilience**: a circuit breaker per operation class inside a bounded
//!   retry loop, and a health tracker that degrades components to
//!   read-only or unavailable and gates calls before any remote work.
//!
//! The remote store itself is abstracted behind
//! [`ObjectStoreClient`](tierstore_client::ObjectStoreClient); vendor SDK
//! bindings live with the caller.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tierstore::{Backend, BackendConfig};
//! use tierstore_client::InMemoryClient;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(InMemoryClient::with_bucket("data"));
//! let backend = Backend::new(BackendConfig::for_bucket("data"), client, None)?;
//! let cancel = CancellationToken::new();
//!
//! backend.put("hello.txt", Bytes::from_static(b"hi"), &cancel).await?;
//! let body = backend.get("hello.txt", 0, 0, &cancel).await?;
//! assert_eq!(&body[..], b"hi");
//!
//! let report = backend.optimization_report();
//! println!("potential savings: ${:.6}/month", report.total_monthly_savings);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod telemetry;

pub use backend::{Backend, TierSelection};
pub use config::{
    BackendConfig, ConnectivityConfig, CostOptimizationConfig, MultipartConfig,
    OptimizationConfig, OptimizationLevel, PricingConfig, TieringConfig, TransitionRule,
};
pub use engine::{
    chunk_size_policy, TransferError, MAX_CHUNK_SIZE, MAX_PARTS, MIN_CHUNK_SIZE,
};
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use telemetry::BackendTelemetry;

pub use tierstore_core::{ErrorCode, ObjectMetadata, StorageError, StorageResult};
pub use tierstore_tiering::{AccessFrequency, StorageTier, TierConstraints};
