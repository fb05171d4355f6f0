//! Named circuit commands.
//!
//! Every `(endpoint id, method, path)` tuple owns one [`CircuitCommand`]:
//! a breaker, an in-flight counter and the last configuration any client
//! pushed for it. Configuration updates race with in-flight calls; the last
//! writer wins.

use crate::circuit_breaker::{Breaker, BreakerFactory, CircuitState, RollingBreakerFactory};
use crate::error::{InvokeError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

/// Replaces the error of a rejected or failed call.
pub type Fallback = Arc<dyn Fn(InvokeError) -> InvokeError + Send + Sync>;

/// Per-command circuit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandConfig {
    /// Deadline for the guarded call.
    pub timeout: Duration,
    /// In-flight ceiling.
    pub max_concurrent_requests: u32,
    /// Error percentage that opens the circuit.
    pub error_percent_threshold: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_concurrent_requests: 2000,
            error_percent_threshold: 20,
        }
    }
}

impl CommandConfig {
    /// Replace zero fields with `defaults`.
    pub fn or_defaults(self, defaults: &CommandConfig) -> Self {
        Self {
            timeout: if self.timeout.is_zero() {
                defaults.timeout
            } else {
                self.timeout
            },
            max_concurrent_requests: if self.max_concurrent_requests == 0 {
                defaults.max_concurrent_requests
            } else {
                self.max_concurrent_requests
            },
            error_percent_threshold: if self.error_percent_threshold == 0 {
                defaults.error_percent_threshold
            } else {
                self.error_percent_threshold
            },
        }
    }
}

/// One named command.
pub struct CircuitCommand {
    name: String,
    config: RwLock<CommandConfig>,
    in_flight: AtomicU32,
    breaker: Arc<dyn Breaker>,
}

impl CircuitCommand {
    fn new(name: String, config: CommandConfig, breaker: Arc<dyn Breaker>) -> Self {
        Self {
            name,
            config: RwLock::new(config),
            in_flight: AtomicU32::new(0),
            breaker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> CommandConfig {
        *self.config.read()
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &Arc<dyn Breaker> {
        &self.breaker
    }

    fn update(&self, config: CommandConfig) {
        *self.config.write() = config;
        self.breaker.reconfigure(config.error_percent_threshold);
    }

    fn try_ticket(&self, max: u32) -> Option<Ticket<'_>> {
        let mut prev = self.in_flight.load(Ordering::Relaxed);
        loop {
            if prev >= max {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(Ticket { command: self })
    }

    async fn run<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let config = self.config();

        if !self.breaker.is_allowed() {
            debug!(command = %self.name, "Circuit breaker rejected request");
            return Err(InvokeError::OpenCircuit);
        }

        let Some(_ticket) = self.try_ticket(config.max_concurrent_requests) else {
            debug!(
                command = %self.name,
                max = config.max_concurrent_requests,
                "Concurrency ceiling reached"
            );
            self.breaker.record_failure();
            return Err(InvokeError::ConcurrencyLimit);
        };

        let pending = Pending {
            command: self,
            settled: false,
        };
        match tokio::time::timeout(config.timeout, fut).await {
            Ok(Ok(value)) => {
                pending.settle(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                pending.settle(false);
                Err(e)
            }
            Err(_) => {
                pending.settle(false);
                Err(InvokeError::Timeout(config.timeout))
            }
        }
    }
}

/// An admitted call whose outcome the breaker has not seen yet.
///
/// Dropping it unsettled, when the caller abandons the future, counts as a
/// failure so a half-open breaker re-opens instead of waiting forever.
struct Pending<'a> {
    command: &'a CircuitCommand,
    settled: bool,
}

impl Pending<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.command.breaker.record_success();
        } else {
            self.command.breaker.record_failure();
        }
    }
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(command = %self.command.name, "Guarded call dropped before completion");
            self.command.breaker.record_failure();
        }
    }
}

/// RAII in-flight slot.
struct Ticket<'a> {
    command: &'a CircuitCommand,
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        self.command.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Registry of named circuit commands.
pub struct CircuitGuard {
    defaults: CommandConfig,
    factory: Arc<dyn BreakerFactory>,
    commands: RwLock<HashMap<String, Arc<CircuitCommand>>>,
}

impl CircuitGuard {
    /// Create a guard with the default rolling breaker.
    pub fn new(defaults: CommandConfig) -> Self {
        Self::with_factory(defaults, Arc::new(RollingBreakerFactory::default()))
    }

    /// Create a guard that builds breakers with `factory`.
    pub fn with_factory(defaults: CommandConfig, factory: Arc<dyn BreakerFactory>) -> Self {
        Self {
            defaults,
            factory,
            commands: RwLock::new(HashMap::new()),
        }
    }

    pub fn defaults(&self) -> CommandConfig {
        self.defaults
    }

    /// Register `name` or update its configuration.
    pub fn configure(&self, name: &str, config: CommandConfig) -> Arc<CircuitCommand> {
        let config = config.or_defaults(&self.defaults);

        if let Some(command) = self.commands.read().get(name).cloned() {
            command.update(config);
            return command;
        }

        let mut commands = self.commands.write();
        let command = commands.entry(name.to_string()).or_insert_with(|| {
            debug!(command = %name, ?config, "Registering circuit command");
            Arc::new(CircuitCommand::new(
                name.to_string(),
                config,
                self.factory.create(name, config.error_percent_threshold),
            ))
        });
        command.update(config);
        command.clone()
    }

    /// Run `fut` under the command `name`.
    ///
    /// On any error the fallback, when present, runs once and its value
    /// becomes the returned error.
    pub async fn execute<T, Fut>(
        &self,
        name: &str,
        config: CommandConfig,
        fallback: Option<&Fallback>,
        fut: Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let command = self.configure(name, config);
        match command.run(fut).await {
            Ok(value) => Ok(value),
            Err(e) => match fallback {
                Some(fallback) => {
                    debug!(command = %name, error = %e, "Invoking fallback");
                    Err(fallback(e))
                }
                None => Err(e),
            },
        }
    }

    /// Look up a registered command.
    pub fn command(&self, name: &str) -> Option<Arc<CircuitCommand>> {
        self.commands.read().get(name).cloned()
    }

    /// Hold a command's breaker open, registering it first if needed.
    pub fn force_open(&self, name: &str) {
        let command = match self.command(name) {
            Some(command) => command,
            None => self.configure(name, self.defaults),
        };
        command.breaker.force_open();
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }
}
