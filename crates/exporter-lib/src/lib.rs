//! Library for the Eureka federation exporter
//!
//! This crate provides the core functionality for:
//! - Kubernetes service discovery and endpoint resolution
//! - Eureka registry response parsing
//! - Concurrent fan-out scraping with per-target failure isolation
//! - Prometheus text exposition parsing, relabeling and serialization
//! - Health checks and self-telemetry

pub mod discover;
pub mod expfmt;
pub mod fetch;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod registry;

pub use discover::{ClusterMode, KubeServiceLister, ResolvePolicy, ServiceLister};
pub use expfmt::MetricFamilyMap;
pub use fetch::{Fetch, HttpFetcher};
pub use health::HealthResponse;
pub use models::{Endpoint, Identity, InstanceRecord, PortSpec};
pub use observability::ExporterMetrics;
pub use pipeline::ScrapePipeline;
