//! Eureka registry response parsing
//!
//! A registry response is an XML document whose root contains zero or more
//! `application` elements, each holding one or more `instance` elements.
//! Parsing walks the document for `instance` elements and decodes each one
//! independently: a malformed instance is logged and skipped, a malformed
//! document is an error.

use crate::models::{InstanceRecord, PortSpec};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Element name that carries one application instance.
const INSTANCE_TAG: &[u8] = b"instance";

/// Errors from registry response parsing.
///
/// Only document-level failures surface as errors; individual instance
/// elements that fail to decode are skipped.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("malformed registry document: {0}")]
    Document(#[from] quick_xml::Error),
}

/// Wire shape of one `instance` element.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct XmlInstance {
    app: String,
    ip_addr: String,
    port: XmlPort,
    secure_port: XmlPort,
    metadata: Vec<XmlMetadata>,
    action_type: String,
    instance_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct XmlPort {
    #[serde(rename = "@enabled", default)]
    enabled: bool,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct XmlMetadata {
    #[serde(rename = "prometheusURI")]
    prometheus_uri: Option<String>,
}

impl XmlInstance {
    /// Convert into the domain record, stamping the caller's namespace.
    ///
    /// App name and instance id are lowercased so identities compare the
    /// same regardless of how the application registered itself.
    fn into_record(self, namespace: &str) -> InstanceRecord {
        InstanceRecord {
            namespace: namespace.to_string(),
            name: self.app.to_lowercase(),
            instance_id: self.instance_id.to_lowercase(),
            ip_address: self.ip_addr,
            port: PortSpec {
                value: self.port.value,
                enabled: self.port.enabled,
            },
            secure_port: PortSpec {
                value: self.secure_port.value,
                enabled: self.secure_port.enabled,
            },
            metrics_paths: self
                .metadata
                .into_iter()
                .map(|m| m.prometheus_uri.unwrap_or_default())
                .collect(),
            action_type: self.action_type,
        }
    }
}

/// Parse a registry response body into instance records.
///
/// The namespace is stamped onto every record; the registry response does
/// not know which cluster namespace it was discovered in.
pub fn parse_instances(body: &str, namespace: &str) -> Result<Vec<InstanceRecord>, RegistryError> {
    let mut reader = Reader::from_str(body);
    let mut records = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) if e.name().as_ref() == INSTANCE_TAG => {
                // Raw inner markup of this instance element; decoded
                // independently so one bad instance cannot poison the rest.
                let inner = reader.read_text(e.name())?;
                let wrapped = format!("<instance>{inner}</instance>");
                match quick_xml::de::from_str::<XmlInstance>(&wrapped) {
                    Ok(instance) => records.push(instance.into_record(namespace)),
                    Err(err) => {
                        warn!(namespace = %namespace, error = %err, "Skipping malformed instance element");
                    }
                }
            }
            Event::Empty(e) if e.name().as_ref() == INSTANCE_TAG => {
                records.push(XmlInstance::default().into_record(namespace));
            }
            _ => {}
        }
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<applications>
<application>
<instance>
    <app>Fake-Exporter</app>
    <ipAddr>172.17.0.8</ipAddr>
    <port enabled="true">8080</port>
    <securePort enabled="false">8443</securePort>
    <metadata>
        <prometheusURI>/metrics</prometheusURI>
    </metadata>
    <actionType>ADDED</actionType>
    <instanceId>Fake-Exporter-5554b8f746-g6b7s</instanceId>
</instance>
</application>
</applications>
"#;

    #[test]
    fn test_parse_single_instance() {
        let records = parse_instances(SAMPLE, "default").unwrap();
        assert_eq!(records.len(), 1);

        let r = &records[0];
        assert_eq!(r.namespace, "default");
        assert_eq!(r.name, "fake-exporter");
        assert_eq!(r.instance_id, "fake-exporter-5554b8f746-g6b7s");
        assert_eq!(r.ip_address, "172.17.0.8");
        assert!(r.port.enabled);
        assert_eq!(r.port.value, "8080");
        assert!(!r.secure_port.enabled);
        assert_eq!(r.secure_port.value, "8443");
        assert_eq!(r.metrics_paths, vec!["/metrics".to_string()]);
        assert_eq!(r.action_type, "ADDED");
    }

    #[test]
    fn test_parse_multiple_applications() {
        let body = r#"<applications>
<application><instance><app>a</app><instanceId>a-1</instanceId><port enabled="true">80</port></instance></application>
<application>
  <instance><app>b</app><instanceId>b-1</instanceId><port enabled="true">81</port></instance>
  <instance><app>b</app><instanceId>b-2</instanceId><port enabled="false">81</port></instance>
</application>
</applications>"#;

        let records = parse_instances(body, "prod").unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.namespace == "prod"));
        assert_eq!(records[2].instance_id, "b-2");
        assert!(!records[2].port.enabled);
    }

    #[test]
    fn test_malformed_instance_is_skipped() {
        let body = r#"<applications>
<application>
<instance><app>good</app><instanceId>g-1</instanceId><port enabled="true">80</port></instance>
<instance><app>bad</app><port enabled="not-a-bool">80</port></instance>
</application>
</applications>"#;

        let records = parse_instances(body, "default").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "good");
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        let body = "<applications><application><instance><app>x</app>";
        assert!(parse_instances(body, "default").is_err());
    }

    #[test]
    fn test_empty_document_yields_no_records() {
        let records = parse_instances("<applications></applications>", "default").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_missing_metadata_yields_no_paths() {
        let body = r#"<instance><app>x</app><instanceId>x-1</instanceId><port enabled="true">80</port></instance>"#;
        let records = parse_instances(body, "default").unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].metrics_paths.is_empty());
    }
}
