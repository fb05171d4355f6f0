//! Raw responses and result parsing.

use crate::error::{InvokeError, Result};
use crate::report::ReportContext;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Turns a completed response into a JSON value.
pub trait ResponseParser: Send + Sync {
    fn parse(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Result<Value>;
}

/// Accepts any 2xx response and parses its body as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl ResponseParser for JsonParser {
    fn parse(&self, status: StatusCode, _: &HeaderMap, body: &[u8]) -> Result<Value> {
        check_status(status)?;
        decode(body)
    }
}

/// Parses `{ "code", "message", "data" }` envelopes.
///
/// A non-zero `code` becomes [`InvokeError::Remote`]; otherwise `data` is
/// returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeParser;

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Value,
}

impl ResponseParser for EnvelopeParser {
    fn parse(&self, status: StatusCode, _: &HeaderMap, body: &[u8]) -> Result<Value> {
        check_status(status)?;
        let envelope: Envelope = serde_json::from_slice(body)?;
        if envelope.code != 0 {
            return Err(InvokeError::Remote {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope.data)
    }
}

/// Fail anything outside `[200, 300)`.
pub(crate) fn check_status(status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(InvokeError::Status {
            code: status.as_u16(),
        })
    }
}

/// Decode a JSON body; an empty body decodes as `null`.
pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(body)?)
}

/// A response whose outcome has not been reported yet.
///
/// The report is completed by [`InvokeResponse::parse`]. Callers that keep the
/// raw response through [`InvokeResponse::into_parts`] must call
/// [`ReportContext::finish`] themselves.
#[derive(Debug)]
pub struct InvokeResponse {
    inner: reqwest::Response,
    report: ReportContext,
}

impl InvokeResponse {
    pub(crate) fn new(inner: reqwest::Response, report: ReportContext) -> Self {
        Self { inner, report }
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn url(&self) -> &url::Url {
        self.inner.url()
    }

    pub fn report(&self) -> &ReportContext {
        &self.report
    }

    /// Split into the raw response and the pending report.
    pub fn into_parts(self) -> (reqwest::Response, ReportContext) {
        (self.inner, self.report)
    }

    /// Read the body and parse it with `parser`, then report the outcome.
    pub async fn parse<T: DeserializeOwned>(self, parser: &dyn ResponseParser) -> Result<T> {
        let (response, report) = self.into_parts();
        let status = response.status();
        let headers = response.headers().clone();

        let outcome = match response.bytes().await {
            Ok(body) => parse_body(parser, status, &headers, &body),
            Err(e) => Err(InvokeError::Transport(e)),
        };
        report.finish(&outcome);
        outcome
    }
}

fn parse_body<T: DeserializeOwned>(
    parser: &dyn ResponseParser,
    status: StatusCode,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<T> {
    let value = parser.parse(status, headers, body)?;
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_parser() {
        let headers = HeaderMap::new();
        let value = JsonParser
            .parse(StatusCode::OK, &headers, br#"{"id":42}"#)
            .unwrap();
        assert_eq!(value, json!({"id": 42}));

        assert_eq!(
            JsonParser.parse(StatusCode::NO_CONTENT, &headers, b"").unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_status_classification() {
        let headers = HeaderMap::new();
        for code in [100u16, 199, 300, 302, 404, 500] {
            let status = StatusCode::from_u16(code).unwrap();
            let err = JsonParser.parse(status, &headers, b"{}").unwrap_err();
            assert!(matches!(err, InvokeError::Status { code: c } if c == code));
        }
        for code in [200u16, 201, 299] {
            assert!(check_status(StatusCode::from_u16(code).unwrap()).is_ok());
        }
    }

    #[test]
    fn test_json_parser_rejects_garbage() {
        let err = JsonParser
            .parse(StatusCode::OK, &HeaderMap::new(), b"<html>")
            .unwrap_err();
        assert!(matches!(err, InvokeError::Decode(_)));
    }

    #[test]
    fn test_envelope_parser() {
        let headers = HeaderMap::new();
        let ok = EnvelopeParser
            .parse(
                StatusCode::OK,
                &headers,
                br#"{"code":0,"message":"ok","data":{"name":"ada"}}"#,
            )
            .unwrap();
        assert_eq!(ok, json!({"name": "ada"}));

        let err = EnvelopeParser
            .parse(
                StatusCode::OK,
                &headers,
                br#"{"code":1003,"message":"user not found"}"#,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            InvokeError::Remote { code: 1003, ref message } if message == "user not found"
        ));
    }

    #[test]
    fn test_decode_mismatch() {
        let err = parse_body::<Vec<u32>>(
            &JsonParser,
            StatusCode::OK,
            &HeaderMap::new(),
            &Bytes::from_static(br#"{"a":1}"#),
        )
        .unwrap_err();
        assert!(matches!(err, InvokeError::Decode(_)));
    }

    #[test]
    fn test_empty_body_decodes_as_null() {
        decode::<()>(b"").unwrap();
        assert_eq!(decode::<Option<u32>>(b"").unwrap(), None);
        assert_eq!(decode::<serde_json::Value>(b"").unwrap(), serde_json::Value::Null);
        assert!(matches!(decode::<String>(b""), Err(InvokeError::Decode(_))));
    }
}
