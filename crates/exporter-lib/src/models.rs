//! Core data models shared across discovery, scraping and relabeling

use serde::{Deserialize, Serialize};

/// Discovery-derived identity attached to everything produced from an
/// endpoint: the registry namespace, the application name and, for concrete
/// application instances, the registry instance id.
///
/// Immutable once constructed. Duplicate identities from misconfigured
/// registries are tolerated and simply produce duplicate-labeled series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: String,
    pub name: String,
    /// Present for application instances, absent for registry services.
    pub instance_id: Option<String>,
}

impl Identity {
    /// Identity for a discovered registry service (no instance id).
    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            instance_id: None,
        }
    }
}

/// A callable URL plus the identity it was resolved from.
///
/// Resolution returns `Option<Endpoint>`; a record or service that yields no
/// usable URL resolves to `None` and is filtered out before any fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub identity: Identity,
    pub url: String,
}

/// A port declaration from a registry instance record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub value: String,
    pub enabled: bool,
}

/// One application instance as advertised by a Eureka registry.
///
/// The namespace is stamped by the caller that fetched the registry
/// response; the registry itself does not know which cluster namespace it
/// was discovered in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub namespace: String,
    pub name: String,
    pub instance_id: String,
    pub ip_address: String,
    pub port: PortSpec,
    pub secure_port: PortSpec,
    /// Raw `prometheusURI` metadata entries, in document order. Possibly
    /// empty strings; path selection is a policy decision in `discover`.
    pub metrics_paths: Vec<String>,
    pub action_type: String,
}

impl InstanceRecord {
    /// Identity context for metrics scraped from this instance.
    pub fn identity(&self) -> Identity {
        Identity {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            instance_id: Some(self.instance_id.clone()),
        }
    }
}
