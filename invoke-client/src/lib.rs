//! # Invoke Client
//!
//! Outbound HTTP invocation of named services, with discovery-based endpoint
//! selection, per-endpoint circuit breaking and success/failure telemetry.
//!
//! ## Features
//!
//! - **Fluent builder**: headers, queries, route tokens and payloads, with the
//!   first builder error latched until execution
//! - **Discovery**: services resolve through a pluggable discovery function
//! - **Circuit Breaker**: per `(endpoint, method, path)` command with timeout,
//!   concurrency ceiling and error-percentage tripping
//! - **Fallbacks**: replace the error of a rejected or failed call
//! - **Telemetry**: Prometheus counters and latency histograms
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoke_client::{Engine, Options};
//! use invoke_discovery::static_discovery;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(
//!         Options::builder()
//!             .discovery(static_discovery(["10.0.0.5:8080"]))
//!             .build(),
//!     )?;
//!
//!     let (status, user) = engine
//!         .service("users")
//!         .get("/user/:id")
//!         .route("id", "42")
//!         .query("verbose", "true")
//!         .exec::<User>()
//!         .await?;
//!
//!     println!("{}: {}", status, user.name);
//!     Ok(())
//! }
//! ```
//!
//! ## With Circuit Breaking
//!
//! ```rust,no_run
//! use invoke_client::{Engine, InvokeError, Options};
//! use invoke_discovery::static_discovery;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(
//!         Options::builder()
//!             .discovery(static_discovery(["10.0.0.7:9000"]))
//!             .use_circuit(true)
//!             .default_timeout(Duration::from_secs(2))
//!             .build(),
//!     )?;
//!
//!     let result = engine
//!         .service("orders")
//!         .post("/orders")
//!         .json(serde_json::json!({"item": "widget", "quantity": 5}))
//!         .max_concurrent(50)
//!         .fallback(|e| InvokeError::Remote {
//!             code: 503,
//!             message: format!("orders degraded: {}", e),
//!         })
//!         .exec::<serde_json::Value>()
//!         .await;
//!
//!     if let Err(e) = result {
//!         eprintln!("order failed: {}", e);
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod engine;
mod error;
mod request;
mod response;
mod service;

pub mod circuit_breaker;
pub mod guard;
pub mod path;
pub mod payload;
pub mod report;

pub use circuit_breaker::{
    Breaker, BreakerFactory, BreakerSettings, CircuitState, RollingBreaker, RollingBreakerFactory,
};
pub use client::Client;
pub use config::{
    DEFAULT_ERROR_PERCENT_THRESHOLD, DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_TIMEOUT, Options,
    OptionsBuilder,
};
pub use engine::Engine;
pub use error::{InvokeError, Result};
pub use guard::{CircuitCommand, CircuitGuard, CommandConfig, Fallback};
pub use payload::Payload;
pub use report::{
    Dimensions, MemoryReporter, NoopReporter, PrometheusReporter, ReportContext, ReportEvent,
    Reporter,
};
pub use response::{EnvelopeParser, InvokeResponse, JsonParser, ResponseParser};
pub use service::Service;

pub use tokio_util::sync::CancellationToken;
