//! Result types for script execution

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::ExecError;

/// Key holding plain-text output
pub const STDOUT_KEY: &str = "stdout";

/// Structured outcome of a script run
///
/// Serializes as a flat string map either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Output was a JSON object of string values
    Pairs(BTreeMap<String, String>),
    /// Output was plain text (trimmed)
    Text(String),
}

impl ExecutionResult {
    /// Flatten into the map a resource stores
    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, String> {
        match self {
            ExecutionResult::Pairs(map) => map,
            ExecutionResult::Text(text) => BTreeMap::from([(STDOUT_KEY.to_string(), text)]),
        }
    }

    /// Look up a key in the flattened view
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            ExecutionResult::Pairs(map) => map.get(key).map(String::as_str),
            ExecutionResult::Text(text) if key == STDOUT_KEY => Some(text),
            ExecutionResult::Text(_) => None,
        }
    }
}

impl Serialize for ExecutionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ExecutionResult::Pairs(map) => map.serialize(serializer),
            ExecutionResult::Text(text) => {
                BTreeMap::from([(STDOUT_KEY, text.as_str())]).serialize(serializer)
            }
        }
    }
}

/// Interpret captured standard output
///
/// A JSON object of strings becomes [`ExecutionResult::Pairs`]. Any other JSON
/// object or array is rejected since it cannot be stored as a flat map. Everything
/// else, JSON scalars included, is kept as trimmed text.
///
/// # Errors
/// Returns `ExecError::OutputContract` for structured JSON that is not a flat string map
pub fn normalize(raw: &[u8], program: &str) -> Result<ExecutionResult, ExecError> {
    if let Ok(pairs) = serde_json::from_slice::<BTreeMap<String, String>>(raw) {
        return Ok(ExecutionResult::Pairs(pairs));
    }

    if let Ok(Value::Object(_) | Value::Array(_)) = serde_json::from_slice::<Value>(raw) {
        return Err(ExecError::OutputContract {
            program: program.to_string(),
        });
    }

    Ok(ExecutionResult::Text(
        String::from_utf8_lossy(raw).trim().to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_pairs() {
        let result = normalize(b"{\"status\":\"ok\"}\n", "echo").unwrap();
        assert_eq!(
            result,
            ExecutionResult::Pairs(BTreeMap::from([("status".into(), "ok".into())]))
        );
        assert_eq!(result.get("status"), Some("ok"));
    }

    #[test]
    fn test_plain_text_trimmed() {
        let result = normalize(b"hello world\n", "echo").unwrap();
        assert_eq!(result, ExecutionResult::Text("hello world".into()));
        assert_eq!(
            result.into_map(),
            BTreeMap::from([("stdout".into(), "hello world".into())])
        );
    }

    #[test]
    fn test_nested_object_rejected() {
        let err = normalize(br#"{"a":{"b":1}}"#, "report.sh").unwrap_err();
        assert!(matches!(err, ExecError::OutputContract { ref program } if program == "report.sh"));
    }

    #[test]
    fn test_array_rejected() {
        let err = normalize(b"[1,2,3]", "echo").unwrap_err();
        assert!(matches!(err, ExecError::OutputContract { .. }));
    }

    #[test]
    fn test_scalar_json_is_text() {
        assert_eq!(
            normalize(b"42\n", "x").unwrap(),
            ExecutionResult::Text("42".into())
        );
        assert_eq!(
            normalize(b"", "x").unwrap(),
            ExecutionResult::Text(String::new())
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in [
            &b"{\"k\":\"v\"}"[..],
            &b"  some output  \n"[..],
            &b"\xff\xfe binary"[..],
        ] {
            assert_eq!(normalize(raw, "x").unwrap(), normalize(raw, "x").unwrap());
        }
    }

    #[test]
    fn test_serializes_as_flat_map() {
        let text = serde_json::to_string(&ExecutionResult::Text("hi".into())).unwrap();
        assert_eq!(text, r#"{"stdout":"hi"}"#);
    }
}
