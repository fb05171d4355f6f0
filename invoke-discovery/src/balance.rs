//! Endpoint selection

use crate::service::{DiscoveryError, Endpoints};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Load balancing strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    /// Round-robin selection
    RoundRobin,

    /// Random selection
    #[default]
    Random,

    /// Always pick first available
    First,
}

impl FromStr for LoadBalancingStrategy {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "random" => Ok(Self::Random),
            "round_robin" | "roundrobin" | "rr" => Ok(Self::RoundRobin),
            "first" => Ok(Self::First),
            other => Err(DiscoveryError::InvalidConfiguration(format!(
                "unknown load balance mode: {}",
                other
            ))),
        }
    }
}

/// Picks one `(address, id)` pair out of a discovery answer.
#[derive(Debug, Default)]
pub struct Balancer {
    strategy: LoadBalancingStrategy,
    round_robin_index: AtomicUsize,
}

impl Balancer {
    pub fn new(strategy: LoadBalancingStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> LoadBalancingStrategy {
        self.strategy
    }

    /// Select one endpoint.
    ///
    /// An empty answer selects `("", "")`; rejecting an empty remote is the
    /// caller's job.
    pub fn select(&self, endpoints: &Endpoints) -> Result<(String, String), DiscoveryError> {
        endpoints.check()?;

        if endpoints.is_empty() {
            return Ok((String::new(), String::new()));
        }

        let index = match self.strategy {
            LoadBalancingStrategy::RoundRobin => {
                self.round_robin_index.fetch_add(1, Ordering::Relaxed) % endpoints.len()
            }
            LoadBalancingStrategy::Random => rand::rng().random_range(0..endpoints.len()),
            LoadBalancingStrategy::First => 0,
        };

        Ok((
            endpoints.addresses[index].clone(),
            endpoints.ids[index].clone(),
        ))
    }
}
