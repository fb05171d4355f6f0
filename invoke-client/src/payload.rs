//! Deferred request bodies.

use crate::error::{InvokeError, Result};
use bytes::Bytes;
use serde::Serialize;

type Thunk = Box<dyn FnOnce() -> std::result::Result<Bytes, String> + Send>;

enum State {
    Pending(Thunk),
    Ready(Bytes),
    Failed(String),
}

/// A request body computed once, at build time.
///
/// Serialization errors stay hidden until [`Payload::resolve`] runs.
pub struct Payload {
    state: State,
}

impl Payload {
    /// Serialize `value` as JSON when resolved.
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self {
            state: State::Pending(Box::new(move || {
                serde_json::to_vec(&value)
                    .map(Bytes::from)
                    .map_err(|e| format!("marshal json payload: {}", e))
            })),
        }
    }

    /// Literal bytes.
    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self {
            state: State::Ready(body.into()),
        }
    }

    /// Evaluate the body. Later calls return the cached outcome.
    pub fn resolve(&mut self) -> Result<Bytes> {
        let state = std::mem::replace(&mut self.state, State::Ready(Bytes::new()));
        let outcome = match state {
            State::Pending(thunk) => thunk(),
            State::Ready(body) => Ok(body),
            State::Failed(e) => Err(e),
        };

        self.state = match &outcome {
            Ok(body) => State::Ready(body.clone()),
            Err(e) => State::Failed(e.clone()),
        };
        outcome.map_err(InvokeError::Build)
    }

    /// The body, if it has already been resolved successfully.
    pub fn peek(&self) -> Option<&Bytes> {
        match &self.state {
            State::Ready(body) => Some(body),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            State::Pending(_) => f.write_str("Payload(<pending>)"),
            State::Ready(body) => write!(f, "Payload({} bytes)", body.len()),
            State::Failed(e) => write!(f, "Payload(<failed: {}>)", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    impl Serialize for Counting {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            s.serialize_str("counted")
        }
    }

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(S::Error::custom("refused"))
        }
    }

    #[test]
    fn test_json_is_lazy_and_evaluated_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut payload = Payload::json(Counting(calls.clone()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(payload.peek().is_none());

        assert_eq!(payload.resolve().unwrap(), Bytes::from_static(b"\"counted\""));
        assert_eq!(payload.resolve().unwrap(), Bytes::from_static(b"\"counted\""));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(payload.peek().is_some());
    }

    #[test]
    fn test_marshal_error_surfaces_on_resolve() {
        let mut payload = Payload::json(Broken);
        let err = payload.resolve().unwrap_err();
        assert!(matches!(err, InvokeError::Build(ref m) if m.contains("refused")));
        assert!(payload.resolve().is_err());
    }

    #[test]
    fn test_bytes_are_ready() {
        let mut payload = Payload::bytes(&b"raw"[..]);
        assert_eq!(payload.peek().map(|b| b.as_ref()), Some(&b"raw"[..]));
        assert_eq!(payload.resolve().unwrap().as_ref(), b"raw");
    }
}
