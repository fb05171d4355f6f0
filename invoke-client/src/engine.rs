//! The invocation engine.

use crate::circuit_breaker::RollingBreakerFactory;
use crate::config::Options;
use crate::error::{InvokeError, Result};
use crate::guard::CircuitGuard;
use crate::response::{JsonParser, ResponseParser};
use crate::service::Service;
use invoke_discovery::{Endpoints, discovery_fn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// State every service and client of one engine shares.
pub(crate) struct Shared {
    pub(crate) options: Options,
    pub(crate) http: reqwest::Client,
    pub(crate) guard: CircuitGuard,
    pub(crate) parser: Arc<dyn ResponseParser>,
}

/// Entry point for outbound invocations.
///
/// Holds the registry of named services. Cloning is cheap and every clone
/// shares the same registry, circuit commands and HTTP client.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    services: Arc<RwLock<HashMap<String, Service>>>,
}

impl Engine {
    /// Validate `options` and build an engine.
    pub fn new(options: Options) -> Result<Self> {
        options.validate()?;

        // Connections are not reused between calls.
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| InvokeError::Configuration(format!("http client: {}", e)))?;

        let defaults = options.resolved();
        let factory = options
            .breaker_factory
            .clone()
            .unwrap_or_else(|| Arc::new(RollingBreakerFactory::default()));
        let parser = options
            .parser
            .clone()
            .unwrap_or_else(|| Arc::new(JsonParser));

        info!(
            caller = %options.caller,
            use_circuit = options.use_circuit,
            load_balance = ?options.load_balance,
            "Invoke engine initialized"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                guard: CircuitGuard::with_factory(defaults, factory),
                options,
                http,
                parser,
            }),
            services: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get the named service, registering it on first use.
    pub fn service(&self, name: &str) -> Service {
        if let Some(service) = self.services.read().get(name) {
            return service.clone();
        }

        let created = Service::new(
            name.to_string(),
            self.shared.options.discovery.clone(),
            self.shared.clone(),
        );

        self.services
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(service = %name, "Registering service");
                created
            })
            .clone()
    }

    /// An unregistered service pinned to `address`.
    ///
    /// The address doubles as the endpoint identifier.
    pub fn addr(&self, address: &str) -> Service {
        let endpoints = Endpoints::single(address);
        let discovery = discovery_fn(move |_| Ok(endpoints.clone()));
        Service::new(address.to_string(), Some(discovery), self.shared.clone())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.read().contains_key(name)
    }

    pub fn options(&self) -> &Options {
        &self.shared.options
    }

    /// Circuit commands created by this engine's clients.
    pub fn guard(&self) -> &CircuitGuard {
        &self.shared.guard
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("options", &self.shared.options)
            .field("services", &self.len())
            .finish()
    }
}
