//! Service discovery for invoke
//!
//! This crate is the seam between the invocation client and whatever actually
//! knows where services live.
//!
//! ## Features
//!
//! - **Discovery function** - `name -> (addresses, identifiers)` as a plain closure
//! - **Load Balancing** - Round-robin, random, or first-available selection
//! - **In-memory registry** - For tests and local development
//!
//! ## Quick Start
//!
//! ```rust
//! use invoke_discovery::*;
//!
//! let registry = InMemoryDiscovery::new();
//! registry.register(ServiceInstance::new("users-1", "users", "10.0.0.5", 8080));
//!
//! let discovery = registry.as_discovery_fn();
//! let endpoints = discovery("users").unwrap();
//!
//! let balancer = Balancer::new(LoadBalancingStrategy::RoundRobin);
//! let (address, id) = balancer.select(&endpoints).unwrap();
//! assert_eq!(address, "10.0.0.5:8080");
//! assert_eq!(id, "users-1");
//! ```

pub mod balance;
pub mod memory;
pub mod service;

pub use balance::{Balancer, LoadBalancingStrategy};
pub use memory::InMemoryDiscovery;
pub use service::{
    DiscoveryError, DiscoveryFn, Endpoints, ServiceInstance, discovery_fn, static_discovery,
};
