//! Endpoint resolution: cluster services to registry endpoints, registry
//! instance records to scrapeable application endpoints.
//!
//! URL construction is a pure function of (name, namespace, port, path) and
//! the cluster mode. The cluster is only touched through the
//! [`ServiceLister`] seam so tests can substitute a stub without any
//! process-level state.

use crate::models::{Endpoint, Identity, InstanceRecord};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::{api::ListParams, Api, Client};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Default API proxy address when running outside the cluster
/// (`kubectl proxy` convention).
pub const DEFAULT_PROXY_URL: &str = "http://localhost:8001";

/// Presence of this file means the process runs inside a cluster.
const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Errors from the cluster read. This is the only pipeline-fatal failure
/// category: everything after the service list degrades per endpoint.
#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("cluster query failed: {0}")]
    Cluster(#[from] kube::Error),
}

/// How URLs are built for discovered targets.
///
/// Inside the cluster, addresses resolve via cluster DNS and pod IPs.
/// Outside, every call is routed through a local API proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMode {
    InCluster,
    Proxy { base: String },
}

impl ClusterMode {
    /// Detect the mode from the service account mount. Read once at
    /// startup and passed explicitly from there on.
    pub fn detect() -> Self {
        Self::detect_from(Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE))
    }

    fn detect_from(marker: &Path) -> Self {
        if marker.exists() {
            ClusterMode::InCluster
        } else {
            ClusterMode::proxy(DEFAULT_PROXY_URL)
        }
    }

    pub fn proxy(base: impl Into<String>) -> Self {
        ClusterMode::Proxy { base: base.into() }
    }

    pub fn is_in_cluster(&self) -> bool {
        matches!(self, ClusterMode::InCluster)
    }
}

/// A discovered service: name, namespace and declared port numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub namespace: String,
    pub ports: Vec<i32>,
}

/// Capability to list services by label selector, optionally restricted to
/// one namespace.
#[async_trait]
pub trait ServiceLister: Send + Sync {
    async fn list_services(
        &self,
        selector: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceInfo>, DiscoverError>;
}

/// Real lister backed by the Kubernetes API.
pub struct KubeServiceLister {
    client: Client,
}

impl KubeServiceLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build from the ambient configuration: in-cluster service account if
    /// present, otherwise the local kubeconfig.
    pub async fn try_default() -> Result<Self, DiscoverError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ServiceLister for KubeServiceLister {
    async fn list_services(
        &self,
        selector: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<ServiceInfo>, DiscoverError> {
        let api: Api<Service> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        let params = ListParams::default().labels(selector);
        let list = api.list(&params).await?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|svc| {
                let name = svc.metadata.name?;
                let namespace = svc.metadata.namespace.unwrap_or_default();
                let ports = svc
                    .spec
                    .and_then(|spec| spec.ports)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| p.port)
                    .collect();
                Some(ServiceInfo {
                    name,
                    namespace,
                    ports,
                })
            })
            .collect())
    }
}

/// Which declared port a service endpoint uses.
pub type PortPolicy = fn(&[i32]) -> Option<i32>;

/// Which advertised metrics path an instance is scraped on.
pub type MetricsPathPolicy = fn(&InstanceRecord) -> Option<&str>;

/// Historical policy: only the first declared port is considered, the
/// Eureka REST port by convention. Multi-port registry services are viable
/// and this may need revisiting.
pub fn first_port(ports: &[i32]) -> Option<i32> {
    ports.first().copied()
}

/// Historical policy: the first non-empty `prometheusURI` metadata entry
/// wins; later entries are never consulted.
pub fn first_metrics_path(record: &InstanceRecord) -> Option<&str> {
    record
        .metrics_paths
        .iter()
        .map(String::as_str)
        .find(|path| !path.is_empty())
}

/// Overridable resolution policies; the defaults replicate the historical
/// first-port / first-path behavior.
#[derive(Clone, Copy)]
pub struct ResolvePolicy {
    pub port: PortPolicy,
    pub metrics_path: MetricsPathPolicy,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            port: first_port,
            metrics_path: first_metrics_path,
        }
    }
}

/// Query the cluster for registry services matching `selector` and build
/// one endpoint per service with at least one declared port. A service
/// without ports yields no endpoint and is not an error.
pub async fn resolve_registry_endpoints(
    lister: &dyn ServiceLister,
    selector: &str,
    namespace: Option<&str>,
    mode: &ClusterMode,
    policy: &ResolvePolicy,
) -> Result<Vec<Endpoint>, DiscoverError> {
    let services = lister.list_services(selector, namespace).await?;
    info!(
        count = services.len(),
        selector = %selector,
        "Discovered registry services"
    );

    let mut endpoints = Vec::new();
    for svc in services {
        if svc.ports.len() > 1 {
            debug!(
                namespace = %svc.namespace,
                name = %svc.name,
                ports = svc.ports.len(),
                "Service declares multiple ports, using the first"
            );
        }
        let port = match (policy.port)(&svc.ports) {
            Some(port) => port,
            None => {
                debug!(
                    namespace = %svc.namespace,
                    name = %svc.name,
                    "Service declares no ports, skipping"
                );
                continue;
            }
        };

        endpoints.push(Endpoint {
            identity: Identity::service(&svc.namespace, &svc.name),
            url: registry_url(mode, &svc.namespace, &svc.name, port),
        });
    }

    Ok(endpoints)
}

/// Resolve one instance record to its scrape endpoint, or `None` when the
/// primary port is disabled or no metrics path is advertised. Pure given
/// the record.
pub fn resolve_application_endpoint(
    record: &InstanceRecord,
    mode: &ClusterMode,
    policy: &ResolvePolicy,
) -> Option<Endpoint> {
    if !record.port.enabled {
        debug!(
            namespace = %record.namespace,
            app = %record.name,
            "Insecure port is disabled, skipping"
        );
        return None;
    }

    let path = match (policy.metrics_path)(record) {
        Some(path) => path,
        None => {
            debug!(
                namespace = %record.namespace,
                app = %record.name,
                "No prometheusURI in metadata, skipping"
            );
            return None;
        }
    };

    Some(Endpoint {
        identity: record.identity(),
        url: application_url(mode, record, path),
    })
}

/// URL of a registry service: cluster DNS inside, API proxy outside.
pub fn registry_url(mode: &ClusterMode, namespace: &str, name: &str, port: i32) -> String {
    match mode {
        ClusterMode::InCluster => format!("http://{name}.{namespace}:{port}"),
        ClusterMode::Proxy { base } => {
            format!("{base}/api/v1/namespaces/{namespace}/services/{name}:{port}/proxy")
        }
    }
}

/// URL of an application instance's metrics path. In proxy mode the
/// instance id is assumed to be the pod name, which holds for registries
/// populated from pod metadata; proxy mode is a development convenience.
pub fn application_url(mode: &ClusterMode, record: &InstanceRecord, path: &str) -> String {
    match mode {
        ClusterMode::InCluster => {
            format!("http://{}:{}{}", record.ip_address, record.port.value, path)
        }
        ClusterMode::Proxy { base } => format!(
            "{base}/api/v1/namespaces/{}/pods/{}:{}/proxy{}",
            record.namespace, record.instance_id, record.port.value, path
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PortSpec;

    fn record() -> InstanceRecord {
        InstanceRecord {
            namespace: "example-ns".to_string(),
            name: "example-microservice".to_string(),
            instance_id: "example-microservice-1231-321-223".to_string(),
            ip_address: "10.152.11.25".to_string(),
            port: PortSpec {
                value: "9091".to_string(),
                enabled: true,
            },
            secure_port: PortSpec {
                value: "8491".to_string(),
                enabled: false,
            },
            metrics_paths: vec!["/actuator/prometheus".to_string()],
            action_type: "ADDED".to_string(),
        }
    }

    struct StubLister(Vec<ServiceInfo>);

    #[async_trait]
    impl ServiceLister for StubLister {
        async fn list_services(
            &self,
            _selector: &str,
            _namespace: Option<&str>,
        ) -> Result<Vec<ServiceInfo>, DiscoverError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_resolve_application_endpoint_in_cluster() {
        let endpoint =
            resolve_application_endpoint(&record(), &ClusterMode::InCluster, &ResolvePolicy::default())
                .unwrap();

        assert_eq!(endpoint.url, "http://10.152.11.25:9091/actuator/prometheus");
        assert_eq!(endpoint.identity.namespace, "example-ns");
        assert_eq!(endpoint.identity.name, "example-microservice");
        assert_eq!(
            endpoint.identity.instance_id.as_deref(),
            Some("example-microservice-1231-321-223")
        );
    }

    #[test]
    fn test_resolve_application_endpoint_via_proxy() {
        let mode = ClusterMode::proxy("http://localhost:8001");
        let endpoint =
            resolve_application_endpoint(&record(), &mode, &ResolvePolicy::default()).unwrap();

        assert_eq!(
            endpoint.url,
            "http://localhost:8001/api/v1/namespaces/example-ns/pods/example-microservice-1231-321-223:9091/proxy/actuator/prometheus"
        );
    }

    #[test]
    fn test_disabled_port_yields_absent() {
        let mut r = record();
        r.port.enabled = false;
        assert!(
            resolve_application_endpoint(&r, &ClusterMode::InCluster, &ResolvePolicy::default())
                .is_none()
        );
    }

    #[test]
    fn test_missing_metrics_path_yields_absent() {
        let mut r = record();
        r.metrics_paths.clear();
        assert!(
            resolve_application_endpoint(&r, &ClusterMode::InCluster, &ResolvePolicy::default())
                .is_none()
        );

        // entries present but all empty count as absent too
        r.metrics_paths = vec![String::new(), String::new()];
        assert!(
            resolve_application_endpoint(&r, &ClusterMode::InCluster, &ResolvePolicy::default())
                .is_none()
        );
    }

    #[test]
    fn test_first_non_empty_metrics_path_wins() {
        let mut r = record();
        r.metrics_paths = vec![
            String::new(),
            "/metrics".to_string(),
            "/other".to_string(),
        ];
        let endpoint =
            resolve_application_endpoint(&r, &ClusterMode::InCluster, &ResolvePolicy::default())
                .unwrap();
        assert!(endpoint.url.ends_with("/metrics"));
    }

    #[test]
    fn test_registry_url_shapes() {
        assert_eq!(
            registry_url(&ClusterMode::InCluster, "default", "eureka", 8761),
            "http://eureka.default:8761"
        );
        assert_eq!(
            registry_url(&ClusterMode::proxy("http://localhost:8001"), "default", "eureka", 8761),
            "http://localhost:8001/api/v1/namespaces/default/services/eureka:8761/proxy"
        );
        // pure: same inputs, same output
        assert_eq!(
            registry_url(&ClusterMode::InCluster, "default", "eureka", 8761),
            registry_url(&ClusterMode::InCluster, "default", "eureka", 8761)
        );
    }

    #[tokio::test]
    async fn test_resolve_registry_endpoints_first_port_only() {
        let lister = StubLister(vec![ServiceInfo {
            name: "eureka".to_string(),
            namespace: "default".to_string(),
            ports: vec![8761, 9090],
        }]);

        let endpoints = resolve_registry_endpoints(
            &lister,
            "app=eureka-service",
            None,
            &ClusterMode::InCluster,
            &ResolvePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].url, "http://eureka.default:8761");
        assert_eq!(endpoints[0].identity.instance_id, None);
    }

    #[tokio::test]
    async fn test_service_without_ports_is_skipped() {
        let lister = StubLister(vec![
            ServiceInfo {
                name: "portless".to_string(),
                namespace: "default".to_string(),
                ports: vec![],
            },
            ServiceInfo {
                name: "eureka".to_string(),
                namespace: "prod".to_string(),
                ports: vec![8761],
            },
        ]);

        let endpoints = resolve_registry_endpoints(
            &lister,
            "app=eureka-service",
            None,
            &ClusterMode::InCluster,
            &ResolvePolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].identity.name, "eureka");
    }

    #[test]
    fn test_cluster_mode_detection() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("namespace");

        assert_eq!(
            ClusterMode::detect_from(&marker),
            ClusterMode::proxy(DEFAULT_PROXY_URL)
        );

        std::fs::write(&marker, "default").unwrap();
        assert_eq!(ClusterMode::detect_from(&marker), ClusterMode::InCluster);
    }
}
