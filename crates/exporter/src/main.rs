//! Eureka federation exporter
//!
//! Discovers Eureka registries in a Kubernetes cluster, queries each for
//! its application instances, scrapes all of them concurrently and serves
//! the relabeled union as one Prometheus text exposition.

use anyhow::{Context, Result};
use clap::Parser;
use exporter_lib::{
    discover::{ClusterMode, KubeServiceLister, DEFAULT_PROXY_URL},
    fetch::HttpFetcher,
    observability::ExporterMetrics,
    pipeline::{ScrapePipeline, DEFAULT_MAX_IN_FLIGHT},
};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

/// Eureka federation exporter
#[derive(Parser, Debug)]
#[command(name = "eureka-exporter")]
#[command(author, version, about = "Scrapes Eureka-registered services into one exposition", long_about = None)]
pub struct Cli {
    /// Label selector identifying registry services
    #[arg(long, env = "EUREKA_SELECTOR", default_value = "app=eureka-service")]
    pub selector: String,

    /// Restrict discovery to one namespace (all namespaces if unset)
    #[arg(long, short, env = "EUREKA_NAMESPACE")]
    pub namespace: Option<String>,

    /// Hard deadline for each registry and scrape call, in milliseconds
    #[arg(long, env = "EUREKA_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Listen port for the federation endpoint
    #[arg(long, short, env = "EUREKA_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Cap on concurrent in-flight calls per pipeline stage
    #[arg(long, env = "EUREKA_MAX_IN_FLIGHT", default_value_t = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    /// API proxy address used when running outside the cluster
    #[arg(long, env = "EUREKA_PROXY_URL", default_value = DEFAULT_PROXY_URL)]
    pub proxy_url: String,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Run one collection, print the exposition to stdout and exit
    #[arg(long)]
    pub once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();

    let mode = match ClusterMode::detect() {
        ClusterMode::InCluster => {
            info!("Kubernetes cluster detected");
            ClusterMode::InCluster
        }
        ClusterMode::Proxy { .. } => {
            info!(
                proxy = %cli.proxy_url,
                "Running outside of Kubernetes cluster, make sure `kubectl proxy` is running"
            );
            ClusterMode::proxy(cli.proxy_url.clone())
        }
    };

    let lister = KubeServiceLister::try_default()
        .await
        .context("Failed to build Kubernetes client")?;
    let fetcher = HttpFetcher::new(Duration::from_millis(cli.timeout_ms))
        .context("Failed to build HTTP client")?;
    let pipeline =
        ScrapePipeline::new(Arc::new(fetcher), mode.clone()).with_max_in_flight(cli.max_in_flight);

    let state = Arc::new(api::AppState::new(
        Arc::new(lister),
        pipeline,
        mode,
        cli.selector.clone(),
        cli.namespace.clone(),
        ExporterMetrics::new(),
    ));

    if cli.once {
        let body = api::collect(&state).await?;
        std::io::stdout().write_all(&body)?;
        return Ok(());
    }

    info!(port = cli.port, selector = %cli.selector, "Starting federation server");
    api::serve(cli.port, state).await
}
