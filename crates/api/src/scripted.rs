//! Scripted transport for tests: replays canned responses for expected calls.

use std::sync::Mutex;

use serde_json::Value;
use tal_types::parse_basic;
use tracing::debug;

use crate::{Params, Transport, TransportError};

/// Parameter carrying a field selector; compared structurally.
const FIELDS_PARAM: &str = "fields";

/// A call observed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub path: String,
    pub params: Params,
}

#[derive(Debug, Clone)]
struct ExpectedCall {
    path: String,
    params: Params,
    reply: Result<Value, TransportError>,
}

impl ExpectedCall {
    fn matches(&self, path: &str, params: &Params) -> bool {
        if self.path != path || self.params.len() != params.len() {
            return false;
        }
        params.iter().all(|(name, value)| match self.params.get(name) {
            None => false,
            Some(expected) if name == FIELDS_PARAM => same_fields(expected, value),
            Some(expected) => expected == value,
        })
    }
}

fn same_fields(expected: &str, actual: &str) -> bool {
    match (parse_basic(expected), parse_basic(actual)) {
        (Ok(expected), Ok(actual)) => expected == actual,
        _ => expected == actual,
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    expected: Vec<ExpectedCall>,
    calls: Vec<RecordedCall>,
}

/// Transport answering from a list of expected calls.
///
/// Each expected call is consumed by the first request with the same path and
/// parameters. The `fields` parameter is compared as a selector, so field order does
/// not matter. Requests nothing matches fail with [`TransportError::Unexpected`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect<I, K, V>(&self, path: &str, params: I, response: Value)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.push(path, params, Ok(response));
    }

    pub fn expect_error<I, K, V>(&self, path: &str, params: I, error: TransportError)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.push(path, params, Err(error));
    }

    fn push<I, K, V>(&self, path: &str, params: I, reply: Result<Value, TransportError>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let params = params.into_iter().map(|(name, value)| (name.into(), value.into())).collect();
        if let Ok(mut state) = self.state.lock() {
            state.expected.push(ExpectedCall {
                path: path.to_string(),
                params,
                reply,
            });
        }
    }

    /// Number of expected calls not consumed yet.
    pub fn pending(&self) -> usize {
        self.state.lock().map(|state| state.expected.len()).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().map(|state| state.calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().map(|state| state.calls.len()).unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn call_method(&self, path: &str, params: &Params) -> Result<Value, TransportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|error| TransportError::unexpected(format!("script state poisoned: {error}")))?;
        state.calls.push(RecordedCall {
            path: path.to_string(),
            params: params.clone(),
        });

        let position = state.expected.iter().position(|call| call.matches(path, params));
        match position {
            Some(position) => {
                debug!(path, "scripted call matched");
                state.expected.remove(position).reply
            }
            None => Err(TransportError::unexpected(format!("no scripted call matches {path} with {params:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect()
    }

    #[test]
    fn fields_match_regardless_of_order() {
        let transport = ScriptedTransport::new();
        transport.expect("services/users/user", [("user_id", "1"), ("fields", "first_name|last_name")], json!({"a": 1}));

        let response = transport
            .call_method("services/users/user", &params(&[("fields", "last_name|first_name"), ("user_id", "1")]))
            .unwrap();
        assert_eq!(response, json!({"a": 1}));
        assert_eq!(transport.pending(), 0);
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn expected_calls_are_consumed_once() {
        let transport = ScriptedTransport::new();
        transport.expect("services/geo/room", [("room_id", "5")], json!(null));
        let call = params(&[("room_id", "5")]);
        assert_eq!(transport.call_method("services/geo/room", &call).unwrap(), Value::Null);
        assert!(matches!(
            transport.call_method("services/geo/room", &call),
            Err(TransportError::Unexpected { .. })
        ));
    }

    #[test]
    fn mismatched_params_are_unexpected() {
        let transport = ScriptedTransport::new();
        transport.expect("services/geo/room", [("room_id", "5")], json!({}));
        let result = transport.call_method("services/geo/room", &params(&[("room_id", "5"), ("fields", "number")]));
        assert!(matches!(result, Err(TransportError::Unexpected { .. })));
        assert_eq!(transport.pending(), 1);
    }

    #[test]
    fn replays_errors() {
        let transport = ScriptedTransport::new();
        let error = TransportError::bad_request("services/geo/room", Some("object_not_found"), "Room not found", None);
        transport.expect_error("services/geo/room", [("room_id", "9")], error.clone());
        assert_eq!(transport.call_method("services/geo/room", &params(&[("room_id", "9")])), Err(error));
    }
}
