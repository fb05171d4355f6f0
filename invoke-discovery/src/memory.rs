//! In-memory service discovery (for testing)

use crate::service::{DiscoveryError, DiscoveryFn, Endpoints, ServiceInstance, discovery_fn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory service discovery (for testing/development)
#[derive(Clone, Default)]
pub struct InMemoryDiscovery {
    services: Arc<RwLock<HashMap<String, ServiceInstance>>>,
}

impl InMemoryDiscovery {
    /// Create new in-memory discovery
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an instance
    pub fn register(&self, service: ServiceInstance) {
        debug!(id = %service.id, name = %service.name, "Registering service instance");
        self.services.write().insert(service.id.clone(), service);
    }

    /// Remove an instance by id
    pub fn deregister(&self, service_id: &str) -> Result<(), DiscoveryError> {
        self.services
            .write()
            .remove(service_id)
            .ok_or_else(|| DiscoveryError::ServiceNotFound(service_id.to_string()))?;
        Ok(())
    }

    /// Instances registered under a service name, ordered by id
    pub fn discover(&self, service_name: &str) -> Result<Endpoints, DiscoveryError> {
        let services = self.services.read();
        let mut instances: Vec<ServiceInstance> = services
            .values()
            .filter(|s| s.name == service_name)
            .cloned()
            .collect();

        if instances.is_empty() {
            return Err(DiscoveryError::ServiceNotFound(service_name.to_string()));
        }

        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances.into_iter().collect())
    }

    /// Clear all registered services
    pub fn clear(&self) {
        self.services.write().clear();
    }

    /// Get count of registered services
    pub fn count(&self) -> usize {
        self.services.read().len()
    }

    /// Expose this registry as a discovery function.
    pub fn as_discovery_fn(&self) -> DiscoveryFn {
        let registry = self.clone();
        discovery_fn(move |name| registry.discover(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_discovery() {
        let discovery = InMemoryDiscovery::new();

        discovery.register(ServiceInstance::new("svc-2", "api", "10.0.0.2", 8080));
        discovery.register(ServiceInstance::new("svc-1", "api", "10.0.0.1", 8080));
        discovery.register(ServiceInstance::new("db-1", "db", "10.0.0.9", 5432));
        assert_eq!(discovery.count(), 3);

        let endpoints = discovery.discover("api").unwrap();
        assert_eq!(endpoints.ids, vec!["svc-1", "svc-2"]);
        assert_eq!(endpoints.addresses, vec!["10.0.0.1:8080", "10.0.0.2:8080"]);

        discovery.deregister("svc-1").unwrap();
        assert_eq!(discovery.discover("api").unwrap().ids, vec!["svc-2"]);
    }

    #[test]
    fn test_service_not_found() {
        let discovery = InMemoryDiscovery::new();

        assert_eq!(
            discovery.discover("nonexistent"),
            Err(DiscoveryError::ServiceNotFound("nonexistent".to_string()))
        );
        assert!(discovery.deregister("nope").is_err());
    }

    #[test]
    fn test_as_discovery_fn_sees_later_registrations() {
        let discovery = InMemoryDiscovery::new();
        let lookup = discovery.as_discovery_fn();
        assert!(lookup("api").is_err());

        discovery.register(ServiceInstance::new("svc-1", "api", "localhost", 9000));
        assert_eq!(lookup("api").unwrap().addresses, vec!["localhost:9000"]);
    }
}
