// Invoke - fault-tolerant outbound HTTP invocation for Rust
//
// Named services are resolved through a discovery function, called through
// a fluent per-request builder, and guarded by per-endpoint circuit breakers.

// Re-export the client
pub use invoke_client::*;

// Re-export discovery
pub use invoke_discovery;
pub use invoke_discovery::{
    Balancer, DiscoveryError, DiscoveryFn, Endpoints, InMemoryDiscovery, LoadBalancingStrategy,
    ServiceInstance, discovery_fn, static_discovery,
};

/// Prelude for common imports.
///
/// ```
/// use invoke::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        CancellationToken, Client, Engine, EnvelopeParser, InvokeError, InvokeResponse,
        JsonParser, LoadBalancingStrategy, Options, ResponseParser, Result, Service,
        discovery_fn, static_discovery,
    };
}
