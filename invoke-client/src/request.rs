//! Request state accumulated by a client.

use crate::error::{InvokeError, Result};
use crate::guard::{CommandConfig, Fallback};
use crate::path::{make_url, substitute};
use crate::payload::Payload;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;

/// Everything a client has been told before it executes.
pub(crate) struct RequestParts {
    pub(crate) scheme: &'static str,
    pub(crate) headers: HeaderMap,
    pub(crate) queries: BTreeMap<String, Vec<String>>,
    pub(crate) routes: HashMap<String, String>,
    pub(crate) payload: Option<Payload>,
    pub(crate) circuit: CommandConfig,
    pub(crate) fallback: Option<Fallback>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl RequestParts {
    pub(crate) fn new(circuit: CommandConfig) -> Self {
        Self {
            scheme: "http",
            headers: HeaderMap::new(),
            queries: BTreeMap::new(),
            routes: HashMap::new(),
            payload: None,
            circuit,
            fallback: None,
            cancel: None,
        }
    }

    /// Set a header, replacing any previous value.
    pub(crate) fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| InvokeError::Build(format!("invalid header name `{}`: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| InvokeError::Build(format!("invalid value for header `{}`: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub(crate) fn add_query(&mut self, key: String, value: String) {
        self.queries.entry(key).or_default().push(value);
    }

    pub(crate) fn set_route(&mut self, key: String, value: String) {
        self.routes.insert(key, value);
    }

    /// Turn the parts into a request against `host`.
    ///
    /// Runs route substitution, the empty-host check, URL assembly and
    /// payload evaluation, stopping at the first failure.
    pub(crate) fn build(
        &mut self,
        host: &str,
        method: &Method,
        path: &str,
    ) -> Result<reqwest::Request> {
        let segments = substitute(path, &self.routes)?;

        if host.is_empty() {
            return Err(InvokeError::EmptyRemote);
        }

        let url = make_url(self.scheme, host, &segments, &self.queries)?;

        let body = match self.payload.as_mut() {
            Some(payload) => Some(payload.resolve()?),
            None => None,
        };

        let mut request = reqwest::Request::new(method.clone(), url);
        *request.headers_mut() = self.headers.clone();
        if let Some(body) = body {
            *request.body_mut() = Some(body.into());
        }
        Ok(request)
    }

    /// Payload text for verbose logs; empty bodies and `{}` are skipped.
    pub(crate) fn payload_for_log(&self) -> Option<String> {
        let body = self.payload.as_ref()?.peek()?;
        let text = String::from_utf8_lossy(body);
        if text.is_empty() || text == "{}" {
            return None;
        }
        Some(text.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_last_write_wins() {
        let mut parts = RequestParts::new(CommandConfig::default());
        parts.set_header("X-Trace", "a").unwrap();
        parts.set_header("x-trace", "b").unwrap();
        assert_eq!(parts.headers.len(), 1);
        assert_eq!(parts.headers["x-trace"], "b");
    }

    #[test]
    fn test_invalid_headers() {
        let mut parts = RequestParts::new(CommandConfig::default());
        assert!(matches!(parts.set_header("bad header", "v"), Err(InvokeError::Build(_))));
        assert!(matches!(parts.set_header("ok", "line\nbreak"), Err(InvokeError::Build(_))));
    }

    #[test]
    fn test_build_order() {
        let mut parts = RequestParts::new(CommandConfig::default());
        // Routing runs before the empty-host check.
        assert!(matches!(
            parts.build("", &Method::GET, "/user/:id"),
            Err(InvokeError::Routing(_))
        ));
        assert!(matches!(
            parts.build("", &Method::GET, "/health"),
            Err(InvokeError::EmptyRemote)
        ));
    }

    #[test]
    fn test_build_request() {
        let mut parts = RequestParts::new(CommandConfig::default());
        parts.set_route("id".into(), "42".into());
        parts.add_query("verbose".into(), "true".into());
        parts.set_header("accept", "application/json").unwrap();
        parts.payload = Some(Payload::json(serde_json::json!({"a": 1})));

        let request = parts.build("10.0.0.5:8080", &Method::POST, "/user/:id").unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.url().as_str(), "http://10.0.0.5:8080/user/42?verbose=true");
        assert_eq!(request.headers()["accept"], "application/json");
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(&br#"{"a":1}"#[..])
        );
        assert_eq!(parts.payload_for_log().as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_empty_object_payload_not_logged() {
        let mut parts = RequestParts::new(CommandConfig::default());
        parts.payload = Some(Payload::json(serde_json::json!({})));
        parts.build("h:1", &Method::POST, "/").unwrap();
        assert_eq!(parts.payload_for_log(), None);
    }
}
