//! Engine options.

use crate::circuit_breaker::BreakerFactory;
use crate::error::{InvokeError, Result};
use crate::guard::CommandConfig;
use crate::report::Reporter;
use crate::response::ResponseParser;
use invoke_discovery::{DiscoveryFn, LoadBalancingStrategy};
use std::sync::Arc;
use std::time::Duration;

/// Fallback circuit timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
/// Fallback in-flight ceiling per command.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: i64 = 2000;
/// Fallback error percentage that opens a circuit.
pub const DEFAULT_ERROR_PERCENT_THRESHOLD: i64 = 20;

/// Prefix of the environment variables read by [`Options::from_env`].
pub const ENV_PREFIX: &str = "INVOKE";

/// Engine options.
#[derive(Clone)]
pub struct Options {
    /// Discovery function bound to every named service.
    pub discovery: Option<DiscoveryFn>,
    /// Endpoint selection strategy.
    pub load_balance: LoadBalancingStrategy,
    /// Wrap each execution in a tracing span.
    pub use_tracing: bool,
    /// Emit one log event per execution.
    pub log: bool,
    /// Include headers, queries, routes and payload in log events.
    pub log_params: bool,
    /// Guard executions with circuit breakers.
    pub use_circuit: bool,
    /// Circuit timeout; zero selects [`DEFAULT_TIMEOUT`].
    pub default_timeout: Duration,
    /// In-flight ceiling; zero selects [`DEFAULT_MAX_CONCURRENT_REQUESTS`].
    pub default_max_concurrent_requests: i64,
    /// Error percentage; zero selects [`DEFAULT_ERROR_PERCENT_THRESHOLD`].
    pub default_error_percent_threshold: i64,
    /// Parser used by `Client::result`.
    pub parser: Option<Arc<dyn ResponseParser>>,
    /// Telemetry sink; `None` disables reporting.
    pub reporter: Option<Arc<dyn Reporter>>,
    /// Identity of this process in telemetry.
    pub caller: String,
    /// Breaker implementation for circuit commands.
    pub breaker_factory: Option<Arc<dyn BreakerFactory>>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            discovery: None,
            load_balance: LoadBalancingStrategy::default(),
            use_tracing: false,
            log: true,
            log_params: false,
            use_circuit: false,
            default_timeout: Duration::ZERO,
            default_max_concurrent_requests: 0,
            default_error_percent_threshold: 0,
            parser: None,
            reporter: None,
            caller: "unknown".to_string(),
            breaker_factory: None,
        }
    }
}

impl Options {
    /// Create a new options builder.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Check numeric defaults.
    pub fn validate(&self) -> Result<()> {
        if self.default_max_concurrent_requests < 0 {
            return Err(InvokeError::Configuration(format!(
                "default max concurrent requests must be >= 0, got {}",
                self.default_max_concurrent_requests
            )));
        }
        if !(0..=100).contains(&self.default_error_percent_threshold) {
            return Err(InvokeError::Configuration(format!(
                "default error percent threshold must be between 0 and 100, got {}",
                self.default_error_percent_threshold
            )));
        }
        if self.default_max_concurrent_requests > i64::from(u32::MAX) {
            return Err(InvokeError::Configuration(format!(
                "default max concurrent requests too large: {}",
                self.default_max_concurrent_requests
            )));
        }
        Ok(())
    }

    /// Circuit defaults with zero values replaced.
    pub fn resolved(&self) -> CommandConfig {
        let timeout = if self.default_timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.default_timeout
        };
        let max = match self.default_max_concurrent_requests {
            0 => DEFAULT_MAX_CONCURRENT_REQUESTS,
            n => n,
        };
        let percent = match self.default_error_percent_threshold {
            0 => DEFAULT_ERROR_PERCENT_THRESHOLD,
            n => n,
        };

        CommandConfig {
            timeout,
            max_concurrent_requests: u32::try_from(max).unwrap_or(u32::MAX),
            error_percent_threshold: u32::try_from(percent).unwrap_or(100),
        }
    }

    /// Load scalar settings from `INVOKE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load scalar settings through `lookup`, starting from the defaults.
    ///
    /// Keys are `INVOKE_CALLER`, `INVOKE_LOG`, `INVOKE_LOG_PARAMS`,
    /// `INVOKE_USE_TRACING`, `INVOKE_USE_CIRCUIT`, `INVOKE_LOAD_BALANCE`,
    /// `INVOKE_DEFAULT_TIMEOUT_MS`, `INVOKE_DEFAULT_MAX_CONCURRENT` and
    /// `INVOKE_DEFAULT_ERROR_PERCENT`.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(format!("{}_{}", ENV_PREFIX, name).as_str());
        let mut options = Options::default();

        if let Some(caller) = var("CALLER") {
            options.caller = caller;
        }
        if let Some(v) = var("LOG") {
            options.log = parse_bool("LOG", &v)?;
        }
        if let Some(v) = var("LOG_PARAMS") {
            options.log_params = parse_bool("LOG_PARAMS", &v)?;
        }
        if let Some(v) = var("USE_TRACING") {
            options.use_tracing = parse_bool("USE_TRACING", &v)?;
        }
        if let Some(v) = var("USE_CIRCUIT") {
            options.use_circuit = parse_bool("USE_CIRCUIT", &v)?;
        }
        if let Some(v) = var("LOAD_BALANCE") {
            options.load_balance = v
                .parse::<LoadBalancingStrategy>()
                .map_err(|e| InvokeError::Configuration(format!("{}_LOAD_BALANCE: {}", ENV_PREFIX, e)))?;
        }
        if let Some(v) = var("DEFAULT_TIMEOUT_MS") {
            let ms = parse_int("DEFAULT_TIMEOUT_MS", &v)?;
            let ms = u64::try_from(ms).map_err(|_| {
                InvokeError::Configuration(format!("default timeout must be >= 0, got {}ms", ms))
            })?;
            options.default_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = var("DEFAULT_MAX_CONCURRENT") {
            options.default_max_concurrent_requests = parse_int("DEFAULT_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = var("DEFAULT_ERROR_PERCENT") {
            options.default_error_percent_threshold = parse_int("DEFAULT_ERROR_PERCENT", &v)?;
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(InvokeError::Configuration(format!(
            "{}_{}: expected a boolean, got `{}`",
            ENV_PREFIX, name, other
        ))),
    }
}

fn parse_int(name: &str, value: &str) -> Result<i64> {
    value.trim().parse().map_err(|_| {
        InvokeError::Configuration(format!(
            "{}_{}: expected an integer, got `{}`",
            ENV_PREFIX, name, value
        ))
    })
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("discovery", &self.discovery.is_some())
            .field("load_balance", &self.load_balance)
            .field("use_tracing", &self.use_tracing)
            .field("log", &self.log)
            .field("log_params", &self.log_params)
            .field("use_circuit", &self.use_circuit)
            .field("default_timeout", &self.default_timeout)
            .field("default_max_concurrent_requests", &self.default_max_concurrent_requests)
            .field("default_error_percent_threshold", &self.default_error_percent_threshold)
            .field("parser", &self.parser.is_some())
            .field("reporter", &self.reporter.is_some())
            .field("caller", &self.caller)
            .field("breaker_factory", &self.breaker_factory.is_some())
            .finish()
    }
}

/// Builder for engine options.
#[derive(Debug, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the discovery function.
    pub fn discovery(mut self, discovery: DiscoveryFn) -> Self {
        self.options.discovery = Some(discovery);
        self
    }

    /// Set the endpoint selection strategy.
    pub fn load_balance(mut self, strategy: LoadBalancingStrategy) -> Self {
        self.options.load_balance = strategy;
        self
    }

    /// Enable or disable per-execution tracing spans.
    pub fn use_tracing(mut self, enable: bool) -> Self {
        self.options.use_tracing = enable;
        self
    }

    /// Enable or disable execution logging.
    pub fn log(mut self, enable: bool) -> Self {
        self.options.log = enable;
        self
    }

    /// Enable or disable parameter dumps in log events.
    pub fn log_params(mut self, enable: bool) -> Self {
        self.options.log_params = enable;
        self
    }

    /// Enable or disable circuit breaking.
    pub fn use_circuit(mut self, enable: bool) -> Self {
        self.options.use_circuit = enable;
        self
    }

    /// Set the default circuit timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_timeout = timeout;
        self
    }

    /// Set the default in-flight ceiling.
    pub fn default_max_concurrent_requests(mut self, max: i64) -> Self {
        self.options.default_max_concurrent_requests = max;
        self
    }

    /// Set the default error percentage threshold.
    pub fn default_error_percent_threshold(mut self, percent: i64) -> Self {
        self.options.default_error_percent_threshold = percent;
        self
    }

    /// Set the parser used by `Client::result`.
    pub fn parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.options.parser = Some(parser);
        self
    }

    /// Set the telemetry sink.
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.options.reporter = Some(reporter);
        self
    }

    /// Set this process's identity in telemetry.
    pub fn caller(mut self, caller: impl Into<String>) -> Self {
        self.options.caller = caller.into();
        self
    }

    /// Set the breaker implementation.
    pub fn breaker_factory(mut self, factory: Arc<dyn BreakerFactory>) -> Self {
        self.options.breaker_factory = Some(factory);
        self
    }

    /// Build the options.
    pub fn build(self) -> Options {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_fill_zero_values() {
        let options = Options::default();
        assert!(options.validate().is_ok());
        assert!(options.log);
        assert!(!options.log_params);
        assert_eq!(
            options.resolved(),
            CommandConfig {
                timeout: Duration::from_secs(60),
                max_concurrent_requests: 2000,
                error_percent_threshold: 20,
            }
        );
    }

    #[test]
    fn test_explicit_defaults_are_kept() {
        let options = Options::builder()
            .default_timeout(Duration::from_millis(250))
            .default_max_concurrent_requests(8)
            .default_error_percent_threshold(100)
            .build();
        assert!(options.validate().is_ok());
        assert_eq!(
            options.resolved(),
            CommandConfig {
                timeout: Duration::from_millis(250),
                max_concurrent_requests: 8,
                error_percent_threshold: 100,
            }
        );
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let negative = Options::builder().default_max_concurrent_requests(-1).build();
        assert!(matches!(negative.validate(), Err(InvokeError::Configuration(_))));

        for percent in [-1, 101] {
            let options = Options::builder().default_error_percent_threshold(percent).build();
            assert!(matches!(options.validate(), Err(InvokeError::Configuration(_))));
        }
    }

    #[test]
    fn test_from_vars() {
        let options = Options::from_vars(vars(&[
            ("INVOKE_CALLER", "gateway"),
            ("INVOKE_USE_CIRCUIT", "true"),
            ("INVOKE_LOG_PARAMS", "1"),
            ("INVOKE_LOAD_BALANCE", "round_robin"),
            ("INVOKE_DEFAULT_TIMEOUT_MS", "1500"),
            ("INVOKE_DEFAULT_MAX_CONCURRENT", "64"),
            ("INVOKE_DEFAULT_ERROR_PERCENT", "35"),
        ]))
        .unwrap();

        assert_eq!(options.caller, "gateway");
        assert!(options.use_circuit);
        assert!(options.log_params);
        assert_eq!(options.load_balance, LoadBalancingStrategy::RoundRobin);
        assert_eq!(options.default_timeout, Duration::from_millis(1500));
        assert_eq!(options.default_max_concurrent_requests, 64);
        assert_eq!(options.default_error_percent_threshold, 35);
    }

    #[test]
    fn test_from_vars_rejects_bad_values() {
        for pairs in [
            [("INVOKE_DEFAULT_TIMEOUT_MS", "-5")],
            [("INVOKE_DEFAULT_ERROR_PERCENT", "150")],
            [("INVOKE_LOG", "maybe")],
            [("INVOKE_DEFAULT_MAX_CONCURRENT", "lots")],
            [("INVOKE_LOAD_BALANCE", "weighted")],
        ] {
            assert!(
                matches!(Options::from_vars(vars(&pairs)), Err(InvokeError::Configuration(_))),
                "{pairs:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_from_env_without_variables_uses_defaults() {
        let options = Options::from_vars(|_| None).unwrap();
        assert_eq!(options.caller, "unknown");
        assert!(!options.use_circuit);
    }
}
