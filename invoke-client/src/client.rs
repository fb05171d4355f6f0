//! Per-request builder and execution.

use crate::engine::Shared;
use crate::error::{InvokeError, Result};
use crate::guard::{CommandConfig, Fallback};
use crate::payload::Payload;
use crate::report::{Dimensions, ReportContext};
use crate::request::RequestParts;
use crate::response::{InvokeResponse, ResponseParser, check_status, decode};
use crate::service::Service;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

/// A single outbound request.
///
/// Setters accumulate state. The first failing setter latches its error and
/// every later call passes it through untouched; executing a latched client
/// returns that error without any I/O. Execution consumes the client.
pub struct Client {
    service: Service,
    method: Method,
    path: String,
    created_at: Instant,
    state: std::result::Result<RequestParts, InvokeError>,
}

impl Client {
    pub(crate) fn new(service: Service, method: Method, path: String) -> Self {
        let circuit = service.circuit_defaults();
        Self {
            service,
            method,
            path,
            created_at: Instant::now(),
            state: Ok(RequestParts::new(circuit)),
        }
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path template, before route substitution.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// The latched error, if any setter failed.
    pub fn error(&self) -> Option<&InvokeError> {
        self.state.as_ref().err()
    }

    fn update<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut RequestParts) -> Result<()>,
    {
        if let Ok(parts) = &mut self.state {
            if let Err(e) = f(parts) {
                debug!(
                    service = %self.service.name(),
                    path = %self.path,
                    error = %e,
                    "Request builder failed"
                );
                self.state = Err(e);
            }
        }
        self
    }

    fn modify<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut RequestParts),
    {
        self.update(|parts| {
            f(parts);
            Ok(())
        })
    }

    /// Set a header. Invalid names or values latch a build error.
    pub fn header(self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.update(|parts| parts.set_header(name.as_ref(), value.as_ref()))
    }

    /// Set several headers.
    pub fn headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.update(|parts| {
            headers
                .into_iter()
                .try_for_each(|(k, v)| parts.set_header(k.as_ref(), v.as_ref()))
        })
    }

    /// Append a query value. Repeated keys keep every value in call order.
    pub fn query(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.modify(|parts| parts.add_query(key.into(), value.into()))
    }

    /// Append several values for one key.
    pub fn query_array<I, S>(self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modify(|parts| {
            parts
                .queries
                .entry(key.into())
                .or_default()
                .extend(values.into_iter().map(Into::into));
        })
    }

    /// Append several keys, each with its values.
    pub fn queries<I, K, V, S>(self, queries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.modify(|parts| {
            for (key, values) in queries {
                parts
                    .queries
                    .entry(key.into())
                    .or_default()
                    .extend(values.into_iter().map(Into::into));
            }
        })
    }

    /// Set a route token value, replacing any previous one.
    pub fn route(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.modify(|parts| parts.set_route(key.into(), value.into()))
    }

    /// Set several route token values.
    pub fn routes<I, K, V>(self, routes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.modify(|parts| {
            for (key, value) in routes {
                parts.set_route(key.into(), value.into());
            }
        })
    }

    /// Send `payload` as JSON. Serialization happens at build time.
    pub fn json<T>(self, payload: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        self.update(|parts| {
            parts.set_header("content-type", "application/json")?;
            parts.payload = Some(Payload::json(payload));
            Ok(())
        })
    }

    /// Send literal bytes with `content_type`.
    pub fn body(self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.update(|parts| {
            parts.set_header("content-type", content_type)?;
            parts.payload = Some(Payload::bytes(body));
            Ok(())
        })
    }

    /// Use `https`.
    pub fn tls(self) -> Self {
        self.modify(|parts| parts.scheme = "https")
    }

    /// Cancel the request when `token` fires.
    pub fn context(self, token: CancellationToken) -> Self {
        self.modify(|parts| parts.cancel = Some(token))
    }

    /// Set every circuit parameter. Zero values take the engine defaults.
    pub fn circuit(self, timeout_ms: u64, max_concurrent: u32, error_percent: u32) -> Self {
        self.modify(|parts| {
            parts.circuit = CommandConfig {
                timeout: Duration::from_millis(timeout_ms),
                max_concurrent_requests: max_concurrent,
                error_percent_threshold: error_percent,
            }
        })
    }

    /// Set the circuit timeout.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is zero, unless an earlier setter already failed.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.modify(|parts| {
            assert!(!timeout.is_zero(), "circuit timeout must be positive");
            parts.circuit.timeout = timeout
        })
    }

    /// Set the circuit in-flight ceiling.
    ///
    /// # Panics
    ///
    /// Panics if `max` is zero, unless an earlier setter already failed.
    pub fn max_concurrent(self, max: u32) -> Self {
        self.modify(|parts| {
            assert!(max > 0, "max concurrent requests must be positive");
            parts.circuit.max_concurrent_requests = max
        })
    }

    /// Set the error percentage that opens the circuit.
    ///
    /// # Panics
    ///
    /// Panics if `percent` is zero, unless an earlier setter already failed.
    pub fn error_threshold(self, percent: u32) -> Self {
        self.modify(|parts| {
            assert!(percent > 0, "error percent threshold must be positive");
            parts.circuit.error_percent_threshold = percent
        })
    }

    /// Replace the error of a rejected or failed guarded call.
    pub fn fallback<F>(self, fallback: F) -> Self
    where
        F: Fn(InvokeError) -> InvokeError + Send + Sync + 'static,
    {
        let fallback: Fallback = Arc::new(fallback);
        self.modify(|parts| parts.fallback = Some(fallback))
    }

    /// Execute and decode a 2xx JSON body into `T`.
    ///
    /// An empty body decodes as JSON `null`, so it succeeds for any `T`
    /// that accepts `null` (`Option<_>`, `()`, `serde_json::Value`).
    pub async fn exec<T: DeserializeOwned>(self) -> Result<(StatusCode, T)> {
        let (outcome, report) = self
            .run(|http, request| async move {
                let response = http.execute(request).await?;
                let status = response.status();
                check_status(status)?;
                let body = response.bytes().await?;
                Ok::<_, InvokeError>((status, decode::<T>(&body)?))
            })
            .await;
        report.finish(&outcome);
        outcome
    }

    /// Execute and return the raw response without checking its status.
    ///
    /// A failure is reported right away. A success is reported once the
    /// response is parsed.
    pub async fn response(self) -> Result<InvokeResponse> {
        let (outcome, report) = self
            .run(|http, request| async move { Ok::<_, InvokeError>(http.execute(request).await?) })
            .await;
        match outcome {
            Ok(response) => Ok(InvokeResponse::new(response, report)),
            Err(e) => {
                report.finish_with(Some(&e));
                Err(e)
            }
        }
    }

    /// Execute and parse with the engine's response parser.
    pub async fn result<T: DeserializeOwned>(self) -> Result<T> {
        let parser = self.service.shared().parser.clone();
        self.result_by(parser.as_ref()).await
    }

    /// Execute and parse with `parser`.
    pub async fn result_by<T: DeserializeOwned>(self, parser: &dyn ResponseParser) -> Result<T> {
        self.response().await?.parse(parser).await
    }

    async fn run<R, F, Fut>(self, attempt: F) -> (Result<R>, ReportContext)
    where
        F: FnOnce(reqwest::Client, reqwest::Request) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let started = Instant::now();
        let shared = self.service.shared().clone();
        let Client {
            service,
            method,
            path,
            created_at,
            state,
        } = self;

        let mut call = Call {
            interface: Dimensions::interface_name(method.as_str(), &path),
            service,
            method,
            path,
            created_at,
            host: String::new(),
            endpoint_id: String::new(),
        };

        let span = if shared.options.use_tracing {
            info_span!("invoke", service = %call.service.name(), interface = %call.interface)
        } else {
            Span::none()
        };

        let (outcome, parts) = match state {
            Ok(mut parts) => {
                let outcome = call.execute(&shared, &mut parts, attempt).instrument(span).await;
                (outcome, Some(parts))
            }
            Err(e) => (Err(e), None),
        };

        if shared.options.log {
            call.log(parts.as_ref(), outcome.as_ref().err(), shared.options.log_params);
        }

        let report = ReportContext::new(
            call.dimensions(&shared.options.caller),
            started,
            shared.options.reporter.clone(),
        );
        (outcome, report)
    }
}

/// A client that has started executing.
struct Call {
    service: Service,
    method: Method,
    path: String,
    interface: String,
    created_at: Instant,
    host: String,
    endpoint_id: String,
}

impl Call {
    async fn execute<R, F, Fut>(
        &mut self,
        shared: &Shared,
        parts: &mut RequestParts,
        attempt: F,
    ) -> Result<R>
    where
        F: FnOnce(reqwest::Client, reqwest::Request) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let (host, endpoint_id) = self.service.remote()?;
        self.host = host;
        self.endpoint_id = endpoint_id;

        if !shared.options.use_circuit {
            let token = parts.cancel.clone();
            let request = parts.build(&self.host, &self.method, &self.path)?;
            return cancellable(token, attempt(shared.http.clone(), request)).await;
        }

        let command = format!("{}{}{}", self.endpoint_id, self.method, self.path);
        let config = parts.circuit;
        let fallback = parts.fallback.clone();
        let child = parts.cancel.as_ref().map(CancellationToken::child_token);
        let token = child.clone();

        let guarded = async {
            let request = parts.build(&self.host, &self.method, &self.path)?;
            cancellable(token, attempt(shared.http.clone(), request)).await
        };
        let outcome = shared
            .guard
            .execute(&command, config, fallback.as_ref(), guarded)
            .await;

        if outcome.is_err() {
            if let Some(child) = child {
                child.cancel();
            }
        }
        outcome
    }

    fn dimensions(&self, caller: &str) -> Dimensions {
        Dimensions {
            caller: caller.to_string(),
            target: self.service.name().to_string(),
            endpoint: self.host.clone(),
            interface: self.interface.clone(),
        }
    }

    fn log(&self, parts: Option<&RequestParts>, error: Option<&InvokeError>, verbose: bool) {
        let cost = self.created_at.elapsed();
        let scheme = parts.map_or("http", |p| p.scheme);
        let params = if verbose { parts.map(Params::new) } else { None };

        match (error, params) {
            (None, None) => info!(
                service = %self.service.name(),
                service_id = %self.endpoint_id,
                method = %self.method,
                path = %self.path,
                endpoint = %self.host,
                scheme,
                ?cost,
                "Invoke service done"
            ),
            (None, Some(p)) => info!(
                service = %self.service.name(),
                service_id = %self.endpoint_id,
                method = %self.method,
                path = %self.path,
                endpoint = %self.host,
                scheme,
                ?cost,
                headers = ?p.headers,
                queries = ?p.queries,
                routes = ?p.routes,
                payload = p.payload.as_deref(),
                "Invoke service done"
            ),
            (Some(e), None) => warn!(
                service = %self.service.name(),
                service_id = %self.endpoint_id,
                method = %self.method,
                path = %self.path,
                endpoint = %self.host,
                scheme,
                ?cost,
                error = %e,
                "Invoke service failed"
            ),
            (Some(e), Some(p)) => warn!(
                service = %self.service.name(),
                service_id = %self.endpoint_id,
                method = %self.method,
                path = %self.path,
                endpoint = %self.host,
                scheme,
                ?cost,
                headers = ?p.headers,
                queries = ?p.queries,
                routes = ?p.routes,
                payload = p.payload.as_deref(),
                error = %e,
                "Invoke service failed"
            ),
        }
    }
}

struct Params<'a> {
    headers: &'a HeaderMap,
    queries: &'a BTreeMap<String, Vec<String>>,
    routes: &'a HashMap<String, String>,
    payload: Option<String>,
}

impl<'a> Params<'a> {
    fn new(parts: &'a RequestParts) -> Self {
        Self {
            headers: &parts.headers,
            queries: &parts.queries,
            routes: &parts.routes,
            payload: parts.payload_for_log(),
        }
    }
}

async fn cancellable<R, Fut>(token: Option<CancellationToken>, fut: Fut) -> Result<R>
where
    Fut: Future<Output = Result<R>>,
{
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(InvokeError::Cancelled),
            outcome = fut => outcome,
        },
        None => fut.await,
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service", &self.service.name())
            .field("method", &self.method)
            .field("path", &self.path)
            .field("error", &self.error())
            .finish()
    }
}
