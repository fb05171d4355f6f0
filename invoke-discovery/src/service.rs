//! Service instances and the discovery function seam

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Service discovery errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Discovery returned {addresses} addresses but {ids} identifiers")]
    MismatchedEndpoints { addresses: usize, ids: usize },

    #[error("Discovery backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Service instance information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Service ID (unique per instance)
    pub id: String,

    /// Service name
    pub name: String,

    /// Host/IP address
    pub address: String,

    /// Port number
    pub port: u16,

    /// Service tags
    pub tags: Vec<String>,

    /// Metadata
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// Create new service instance
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// `host:port` form used as the request authority
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Candidate endpoints for one service, as parallel sequences.
///
/// `addresses[i]` is reachable as `host:port`; `ids[i]` identifies the same
/// instance for circuit breaking and logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints {
    pub addresses: Vec<String>,
    pub ids: Vec<String>,
}

impl Endpoints {
    /// Build from parallel address and identifier lists.
    pub fn new(addresses: Vec<String>, ids: Vec<String>) -> Self {
        Self { addresses, ids }
    }

    /// A single endpoint that is its own identifier.
    pub fn single(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            addresses: vec![address.clone()],
            ids: vec![address],
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Reject lists whose lengths disagree.
    pub fn check(&self) -> Result<(), DiscoveryError> {
        if self.addresses.len() != self.ids.len() {
            return Err(DiscoveryError::MismatchedEndpoints {
                addresses: self.addresses.len(),
                ids: self.ids.len(),
            });
        }
        Ok(())
    }
}

impl FromIterator<ServiceInstance> for Endpoints {
    fn from_iter<I: IntoIterator<Item = ServiceInstance>>(iter: I) -> Self {
        let mut endpoints = Endpoints::default();
        for instance in iter {
            endpoints.addresses.push(instance.endpoint());
            endpoints.ids.push(instance.id);
        }
        endpoints
    }
}

/// Maps a logical service name to its candidate endpoints.
pub type DiscoveryFn = Arc<dyn Fn(&str) -> Result<Endpoints, DiscoveryError> + Send + Sync>;

/// Wrap a closure as a [`DiscoveryFn`].
pub fn discovery_fn<F>(f: F) -> DiscoveryFn
where
    F: Fn(&str) -> Result<Endpoints, DiscoveryError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Discovery that answers every name with the same fixed addresses.
///
/// Each address doubles as its own identifier.
pub fn static_discovery<I, S>(addresses: I) -> DiscoveryFn
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
    let endpoints = Endpoints::new(addresses.clone(), addresses);
    discovery_fn(move |_| Ok(endpoints.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_instance() {
        let service = ServiceInstance::new("svc-1", "api", "localhost", 8080)
            .with_tag("production")
            .with_metadata("version", "1.0.0");

        assert_eq!(service.id, "svc-1");
        assert_eq!(service.name, "api");
        assert_eq!(service.endpoint(), "localhost:8080");
        assert!(service.tags.contains(&"production".to_string()));
    }

    #[test]
    fn test_service_instance_serde() {
        let service = ServiceInstance::new("svc-1", "api", "10.0.0.1", 9000)
            .with_metadata("zone", "a");

        let json = serde_json::to_value(&service).unwrap();
        assert_eq!(json["address"], "10.0.0.1");
        assert_eq!(json["port"], 9000);

        let back: ServiceInstance = serde_json::from_value(json).unwrap();
        assert_eq!(back.endpoint(), "10.0.0.1:9000");
        assert_eq!(back.metadata.get("zone").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_endpoints_from_instances() {
        let endpoints: Endpoints = vec![
            ServiceInstance::new("a", "api", "10.0.0.1", 80),
            ServiceInstance::new("b", "api", "10.0.0.2", 81),
        ]
        .into_iter()
        .collect();

        assert_eq!(endpoints.addresses, vec!["10.0.0.1:80", "10.0.0.2:81"]);
        assert_eq!(endpoints.ids, vec!["a", "b"]);
        assert!(endpoints.check().is_ok());
    }

    #[test]
    fn test_mismatched_endpoints() {
        let endpoints = Endpoints::new(vec!["a".into(), "b".into()], vec!["a".into()]);
        assert_eq!(
            endpoints.check(),
            Err(DiscoveryError::MismatchedEndpoints { addresses: 2, ids: 1 })
        );
    }

    #[test]
    fn test_static_discovery_ignores_name() {
        let discovery = static_discovery(["10.0.0.5:8080"]);
        let first = discovery("users").unwrap();
        let second = discovery("orders").unwrap();

        assert_eq!(first, second);
        assert_eq!(first, Endpoints::single("10.0.0.5:8080"));
    }
}
