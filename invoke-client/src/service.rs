//! Named downstream services.

use crate::client::Client;
use crate::engine::Shared;
use crate::error::{InvokeError, Result};
use crate::guard::CommandConfig;
use http::Method;
use invoke_discovery::{Balancer, DiscoveryFn};
use std::sync::Arc;

/// A logical downstream service.
///
/// Immutable once created. Every request starts from a service verb such as
/// [`Service::get`].
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    name: String,
    discovery: Option<DiscoveryFn>,
    balancer: Balancer,
    shared: Arc<Shared>,
}

impl Service {
    pub(crate) fn new(name: String, discovery: Option<DiscoveryFn>, shared: Arc<Shared>) -> Self {
        let balancer = Balancer::new(shared.options.load_balance);
        Self {
            inner: Arc::new(ServiceInner {
                name,
                discovery,
                balancer,
                shared,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn use_tracing(&self) -> bool {
        self.inner.shared.options.use_tracing
    }

    pub fn use_circuit(&self) -> bool {
        self.inner.shared.options.use_circuit
    }

    /// Circuit parameters a new client starts from.
    pub fn circuit_defaults(&self) -> CommandConfig {
        self.inner.shared.guard.defaults()
    }

    /// Whether both handles refer to the same service instance.
    pub fn ptr_eq(&self, other: &Service) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }

    /// Resolve one `(address, identifier)` pair.
    ///
    /// An empty discovery answer yields `("", "")`.
    pub fn remote(&self) -> Result<(String, String)> {
        let discovery = self
            .inner
            .discovery
            .as_ref()
            .ok_or(InvokeError::DiscoveryNotConfigured)?;
        let endpoints = discovery(&self.inner.name)?;
        Ok(self.inner.balancer.select(&endpoints)?)
    }

    pub fn get(&self, path: impl Into<String>) -> Client {
        self.method(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> Client {
        self.method(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> Client {
        self.method(Method::PUT, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> Client {
        self.method(Method::DELETE, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> Client {
        self.method(Method::PATCH, path)
    }

    pub fn head(&self, path: impl Into<String>) -> Client {
        self.method(Method::HEAD, path)
    }

    /// Start a request with any method.
    pub fn method(&self, method: Method, path: impl Into<String>) -> Client {
        Client::new(self.clone(), method, path.into())
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("discovery", &self.inner.discovery.is_some())
            .field("load_balance", &self.inner.balancer.strategy())
            .finish()
    }
}
