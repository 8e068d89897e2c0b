//! The discover→scrape orchestrator
//!
//! Two structurally identical fan-out/fan-in stages run sequentially per
//! collection request: registry endpoints are fetched and parsed into
//! application endpoints, then those are scraped into metric family maps.
//! Within a stage every item gets its own task, bounded by a configurable
//! in-flight cap; results fan in through a channel drained by the single
//! orchestrator task, so no task ever touches a shared collection.
//!
//! Failure of any single fetch, parse or resolution is local to its item:
//! it is logged with enough context to diagnose and the item contributes
//! nothing. Nothing here aborts a collection; the only fatal step is the
//! initial cluster query, which happens in the caller before any task
//! starts.

use crate::discover::{resolve_application_endpoint, ClusterMode, ResolvePolicy};
use crate::expfmt::{self, MetricFamilyMap};
use crate::fetch::Fetch;
use crate::models::Endpoint;
use crate::registry;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{info, warn};

/// Default cap on concurrent in-flight calls per stage. Cluster service
/// and instance counts are small; the cap only guards against pathological
/// registries advertising thousands of instances.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Per-request scrape orchestrator. Everything it produces is discarded
/// after the response is written; no state survives between runs.
#[derive(Clone)]
pub struct ScrapePipeline {
    fetcher: Arc<dyn Fetch>,
    mode: ClusterMode,
    policy: ResolvePolicy,
    max_in_flight: usize,
}

impl ScrapePipeline {
    pub fn new(fetcher: Arc<dyn Fetch>, mode: ClusterMode) -> Self {
        Self {
            fetcher,
            mode,
            policy: ResolvePolicy::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_policy(mut self, policy: ResolvePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Cap concurrent in-flight calls per stage; values below 1 are
    /// treated as 1.
    pub fn with_max_in_flight(mut self, cap: usize) -> Self {
        self.max_in_flight = cap.max(1);
        self
    }

    pub fn policy(&self) -> &ResolvePolicy {
        &self.policy
    }

    /// Run both stages: discover application endpoints behind the given
    /// registry endpoints, then scrape them. Returns one family map per
    /// application endpoint that was fetched and parsed successfully.
    pub async fn run(&self, registries: Vec<Endpoint>) -> Vec<MetricFamilyMap> {
        let apps = self.discover_applications(registries).await;
        info!(count = apps.len(), "Resolved application endpoints");
        self.scrape_applications(apps).await
    }

    /// Stage A: concurrently query every registry endpoint and flatten the
    /// resolvable application endpoints. Output order follows completion
    /// order and is not guaranteed.
    pub async fn discover_applications(&self, registries: Vec<Endpoint>) -> Vec<Endpoint> {
        let fetcher = Arc::clone(&self.fetcher);
        let mode = self.mode.clone();
        let policy = self.policy;

        fan_out(registries, self.max_in_flight, move |endpoint| {
            discover_one(Arc::clone(&fetcher), mode.clone(), policy, endpoint)
        })
        .await
    }

    /// Stage B: concurrently scrape every application endpoint. Endpoints
    /// whose fetch or parse fails contribute nothing.
    pub async fn scrape_applications(&self, apps: Vec<Endpoint>) -> Vec<MetricFamilyMap> {
        let fetcher = Arc::clone(&self.fetcher);

        fan_out(apps, self.max_in_flight, move |endpoint| {
            scrape_one(Arc::clone(&fetcher), endpoint)
        })
        .await
    }
}

/// One task per item, results collected through a channel drained by this
/// function only. Returns once every task has completed; a single task
/// never aborts or short-circuits its siblings. Empty input returns
/// immediately without spawning anything.
async fn fan_out<T, F, Fut>(items: Vec<Endpoint>, max_in_flight: usize, work: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Endpoint) -> Fut,
    Fut: Future<Output = Vec<T>> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let (tx, mut rx) = mpsc::channel::<T>(items.len());
    let semaphore = Arc::new(Semaphore::new(max_in_flight));

    for item in items {
        let tx = tx.clone();
        let semaphore = Arc::clone(&semaphore);
        let fut = work(item);
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                // the semaphore is never closed
                Err(_) => return,
            };
            for value in fut.await {
                if tx.send(value).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    // the channel closes when the last task drops its sender
    let mut results = Vec::new();
    while let Some(value) = rx.recv().await {
        results.push(value);
    }
    results
}

async fn discover_one(
    fetcher: Arc<dyn Fetch>,
    mode: ClusterMode,
    policy: ResolvePolicy,
    endpoint: Endpoint,
) -> Vec<Endpoint> {
    let body = match fetcher.fetch(&endpoint.url).await {
        Ok(body) => body,
        Err(err) => {
            warn!(
                url = %endpoint.url,
                namespace = %endpoint.identity.namespace,
                name = %endpoint.identity.name,
                error = %err,
                "Registry fetch failed, skipping"
            );
            return Vec::new();
        }
    };

    let text = String::from_utf8_lossy(&body);
    let records = match registry::parse_instances(&text, &endpoint.identity.namespace) {
        Ok(records) => records,
        Err(err) => {
            warn!(
                url = %endpoint.url,
                namespace = %endpoint.identity.namespace,
                error = %err,
                "Registry response parse failed, skipping"
            );
            return Vec::new();
        }
    };

    info!(
        count = records.len(),
        namespace = %endpoint.identity.namespace,
        "Found applications in registry response"
    );

    records
        .iter()
        .filter_map(|record| resolve_application_endpoint(record, &mode, &policy))
        .collect()
}

async fn scrape_one(fetcher: Arc<dyn Fetch>, endpoint: Endpoint) -> Vec<MetricFamilyMap> {
    let body = match fetcher.fetch(&endpoint.url).await {
        Ok(body) => body,
        Err(err) => {
            warn!(
                url = %endpoint.url,
                namespace = %endpoint.identity.namespace,
                name = %endpoint.identity.name,
                error = %err,
                "Scrape fetch failed, skipping"
            );
            return Vec::new();
        }
    };

    let text = String::from_utf8_lossy(&body);
    match expfmt::parse_families(&text, &endpoint.identity) {
        Ok(families) => vec![families],
        Err(err) => {
            warn!(
                url = %endpoint.url,
                namespace = %endpoint.identity.namespace,
                app = %endpoint.identity.name,
                error = %err,
                "Scrape response parse failed, skipping"
            );
            Vec::new()
        }
    }
}
