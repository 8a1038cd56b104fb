//! Execution requests
//!
//! [`RawRequest`] mirrors the attribute names of a script-package resource and
//! accepts loosely typed values. [`ExecutionRequest::from_raw`] validates it in a
//! single pass and produces the typed request the engine works with.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{ExecError, ValidationErrors};

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Label used in messages when the program has no public token
pub const SENSITIVE_LABEL: &str = "<sensitive>";

/// Loosely typed request as read from a resource definition
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawRequest {
    pub program: Vec<Value>,
    pub program_sensitive: Vec<Value>,
    pub query: BTreeMap<String, Value>,
    pub query_sensitive: BTreeMap<String, Value>,
    pub source: Option<String>,
    pub source_user: Option<String>,
    pub source_password: Option<String>,
    pub source_no_check_cert: bool,
    pub destination: Option<String>,
    pub remote_host: Option<String>,
    pub remote_port: Option<Value>,
    pub remote_user: Option<String>,
    pub remote_password: Option<String>,
    pub remote_key: Option<String>,
    pub bastion_host: Option<String>,
    pub bastion_port: Option<Value>,
    pub bastion_user: Option<String>,
    pub bastion_password: Option<String>,
    pub bastion_private_key: Option<String>,
    pub trace: bool,
}

/// Command tokens split into a loggable and a secret part
///
/// Execution always sees the public tokens followed by the sensitive ones.
#[derive(Clone, PartialEq, Eq)]
pub struct Program {
    public: Vec<String>,
    sensitive: Vec<Zeroizing<String>>,
}

impl Program {
    pub fn new(public: Vec<String>, sensitive: Vec<String>) -> Self {
        Self {
            public,
            sensitive: sensitive.into_iter().map(Zeroizing::new).collect(),
        }
    }

    /// Program made only of public tokens
    pub fn public<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(tokens.into_iter().map(Into::into).collect(), Vec::new())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.public.is_empty() && self.sensitive.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.public.len() + self.sensitive.len()
    }

    /// All tokens, public first
    #[must_use]
    pub fn tokens(&self) -> Vec<&str> {
        self.public
            .iter()
            .map(String::as_str)
            .chain(self.sensitive.iter().map(|s| s.as_str()))
            .collect()
    }

    /// Tokens joined with single spaces, as run by a remote shell
    #[must_use]
    pub fn command_line(&self) -> Zeroizing<String> {
        Zeroizing::new(self.tokens().join(" "))
    }

    /// Name safe to show in logs and errors
    #[must_use]
    pub fn label(&self) -> &str {
        self.public.first().map_or(SENSITIVE_LABEL, String::as_str)
    }

    /// Public tokens followed by one placeholder per sensitive token
    #[must_use]
    pub fn redacted(&self) -> String {
        let mut parts: Vec<&str> = self.public.iter().map(String::as_str).collect();
        parts.extend(self.sensitive.iter().map(|_| "***"));
        parts.join(" ")
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Program").field(&self.redacted()).finish()
    }
}

/// Parameter object written to the program's standard input
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    public: BTreeMap<String, String>,
    sensitive: BTreeMap<String, Zeroizing<String>>,
}

impl Parameters {
    pub fn new(public: BTreeMap<String, String>, sensitive: BTreeMap<String, String>) -> Self {
        Self {
            public,
            sensitive: sensitive
                .into_iter()
                .map(|(k, v)| (k, Zeroizing::new(v)))
                .collect(),
        }
    }

    /// Public entries overlaid with sensitive ones
    #[must_use]
    pub fn merged(&self) -> BTreeMap<&str, &str> {
        let mut merged: BTreeMap<&str, &str> = self
            .public
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (k, v) in &self.sensitive {
            merged.insert(k.as_str(), v.as_str());
        }
        merged
    }

    /// JSON encoding of the merged map
    ///
    /// # Errors
    /// Returns `ExecError::Internal` if serialization fails
    pub fn to_json(&self) -> Result<Zeroizing<Vec<u8>>, ExecError> {
        serde_json::to_vec(&self.merged())
            .map(Zeroizing::new)
            .map_err(|e| ExecError::Internal(format!("error converting query to JSON: {e}")))
    }
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("public", &self.public)
            .field("sensitive_keys", &self.sensitive.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Address and credentials of one SSH endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<Zeroizing<String>>,
    /// Base64-encoded private key
    pub private_key: Option<Zeroizing<String>>,
}

impl ConnectionDescriptor {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            user: None,
            password: None,
            private_key: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Zeroizing::new(password.into()));
        self
    }

    #[must_use]
    pub fn with_private_key(mut self, base64_key: impl Into<String>) -> Self {
        self.private_key = Some(Zeroizing::new(base64_key.into()));
        self
    }

    /// `host:port` for messages
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Where the script comes from and how to fetch it
#[derive(Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub uri: Option<String>,
    pub destination: Option<String>,
    pub user: Option<String>,
    pub password: Option<Zeroizing<String>>,
    pub no_check_cert: bool,
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSpec")
            .field("uri", &self.uri)
            .field("destination", &self.destination)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("no_check_cert", &self.no_check_cert)
            .finish()
    }
}

/// Validated unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub program: Program,
    pub parameters: Parameters,
    pub source: SourceSpec,
    pub remote: Option<ConnectionDescriptor>,
    pub bastion: Option<ConnectionDescriptor>,
    pub trace: bool,
}

impl ExecutionRequest {
    /// Validate a raw request, reporting every problem at once
    ///
    /// # Errors
    /// Returns `ExecError::Validation` listing all offending fields
    pub fn from_raw(raw: &RawRequest) -> Result<Self, ExecError> {
        let mut errors = ValidationErrors::new();

        let public = string_elements("program", &raw.program, &mut errors);
        let sensitive = string_elements("program_sensitive", &raw.program_sensitive, &mut errors);
        if raw.program.is_empty() && raw.program_sensitive.is_empty() {
            errors.push("program", "program list must contain at least one element");
        }

        let query = string_values("query", &raw.query, &mut errors);
        let query_sensitive = string_values("query_sensitive", &raw.query_sensitive, &mut errors);

        let remote_host = non_empty(raw.remote_host.as_deref());
        let bastion_host = non_empty(raw.bastion_host.as_deref());
        let remote_port = port("remote_port", raw.remote_port.as_ref(), &mut errors);
        let bastion_port = port("bastion_port", raw.bastion_port.as_ref(), &mut errors);

        if bastion_host.is_some() && remote_host.is_none() {
            errors.push("bastion_host", "bastion_host requires remote_host");
        }

        if !errors.is_empty() {
            return Err(ExecError::Validation(errors));
        }

        let remote = remote_host.map(|host| ConnectionDescriptor {
            host: host.to_string(),
            port: remote_port,
            user: owned(raw.remote_user.as_deref()),
            password: secret(raw.remote_password.as_deref()),
            private_key: secret(raw.remote_key.as_deref()),
        });
        let bastion = bastion_host.map(|host| ConnectionDescriptor {
            host: host.to_string(),
            port: bastion_port,
            user: owned(raw.bastion_user.as_deref()),
            password: secret(raw.bastion_password.as_deref()),
            private_key: secret(raw.bastion_private_key.as_deref()),
        });

        Ok(Self {
            program: Program::new(public, sensitive),
            parameters: Parameters::new(query, query_sensitive),
            source: SourceSpec {
                uri: owned(raw.source.as_deref()),
                destination: owned(raw.destination.as_deref()),
                user: owned(raw.source_user.as_deref()),
                password: secret(raw.source_password.as_deref()),
                no_check_cert: raw.source_no_check_cert,
            },
            remote,
            bastion,
            trace: raw.trace,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn owned(value: Option<&str>) -> Option<String> {
    non_empty(value).map(str::to_string)
}

fn secret(value: Option<&str>) -> Option<Zeroizing<String>> {
    non_empty(value).map(|v| Zeroizing::new(v.to_string()))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_elements(field: &str, values: &[Value], errors: &mut ValidationErrors) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        match value {
            Value::String(s) => out.push(s.clone()),
            other => errors.push(
                format!("{field}[{i}]"),
                format!(
                    "{field} element {i} is {}, a string is required",
                    type_name(other)
                ),
            ),
        }
    }
    out
}

fn string_values(
    field: &str,
    values: &BTreeMap<String, Value>,
    errors: &mut ValidationErrors,
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in values {
        match value {
            Value::String(s) => {
                out.insert(key.clone(), s.clone());
            }
            other => errors.push(
                format!("{field}.{key}"),
                format!("value is {}, a string is required", type_name(other)),
            ),
        }
    }
    out
}

fn port(field: &str, value: Option<&Value>, errors: &mut ValidationErrors) -> u16 {
    let parsed = match value {
        None | Some(Value::Null) => return DEFAULT_SSH_PORT,
        Some(Value::String(s)) if s.is_empty() => return DEFAULT_SSH_PORT,
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Some(_) => None,
    };
    match parsed {
        Some(p) if p > 0 => p,
        _ => {
            errors.push(field, "must be a port number between 1 and 65535");
            DEFAULT_SSH_PORT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn raw_with_program(program: Vec<Value>) -> RawRequest {
        RawRequest {
            program,
            ..RawRequest::default()
        }
    }

    #[test]
    fn test_empty_program_rejected() {
        let err = ExecutionRequest::from_raw(&RawRequest::default()).unwrap_err();
        match err {
            ExecError::Validation(errors) => assert!(errors.has_field("program")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_non_string_elements_all_reported() {
        let raw = RawRequest {
            program: vec![json!("run.sh"), json!(3)],
            program_sensitive: vec![json!(true)],
            query: BTreeMap::from([("count".to_string(), json!(2))]),
            ..RawRequest::default()
        };

        let err = ExecutionRequest::from_raw(&raw).unwrap_err();
        let ExecError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("program[1]"));
        assert!(errors.has_field("program_sensitive[0]"));
        assert!(errors.has_field("query.count"));
        assert_eq!(errors.iter().count(), 3);
    }

    #[test]
    fn test_sensitive_only_program_is_valid() {
        let raw = RawRequest {
            program_sensitive: vec![json!("secret-tool"), json!("--token=abc")],
            ..RawRequest::default()
        };
        let request = ExecutionRequest::from_raw(&raw).unwrap();
        assert_eq!(request.program.label(), SENSITIVE_LABEL);
        assert_eq!(request.program.redacted(), "*** ***");
    }

    #[test]
    fn test_bastion_requires_remote_host() {
        let raw = RawRequest {
            program: vec![json!("true")],
            bastion_host: Some("jump".into()),
            ..RawRequest::default()
        };
        let ExecError::Validation(errors) = ExecutionRequest::from_raw(&raw).unwrap_err() else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("bastion_host"));
    }

    #[test]
    fn test_ports_accept_strings_and_numbers() {
        let raw = RawRequest {
            program: vec![json!("true")],
            remote_host: Some("10.0.0.5".into()),
            remote_port: Some(json!(2222)),
            bastion_host: Some("jump".into()),
            bastion_port: Some(json!("2200")),
            ..RawRequest::default()
        };
        let request = ExecutionRequest::from_raw(&raw).unwrap();
        assert_eq!(request.remote.unwrap().port, 2222);
        assert_eq!(request.bastion.unwrap().port, 2200);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let raw = RawRequest {
            program: vec![json!("true")],
            remote_host: Some("h".into()),
            bastion_host: Some("jump".into()),
            bastion_port: Some(json!("ssh")),
            ..RawRequest::default()
        };
        let ExecError::Validation(errors) = ExecutionRequest::from_raw(&raw).unwrap_err() else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("bastion_port"));
    }

    #[test]
    fn test_empty_strings_are_absent() {
        let raw = RawRequest {
            program: vec![json!("true")],
            remote_host: Some(String::new()),
            source: Some(String::new()),
            ..RawRequest::default()
        };
        let request = ExecutionRequest::from_raw(&raw).unwrap();
        assert!(request.remote.is_none());
        assert!(request.source.uri.is_none());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let descriptor = ConnectionDescriptor::new("h")
            .with_user("root")
            .with_password("hunter2");
        let program = Program::new(vec!["deploy".into()], vec!["--pw=hunter2".into()]);
        let params = Parameters::new(
            BTreeMap::new(),
            BTreeMap::from([("token".to_string(), "hunter2".to_string())]),
        );

        let rendered = format!("{descriptor:?} {program:?} {params:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("deploy ***"));
    }

    #[test]
    fn test_command_line_joins_public_then_sensitive() {
        let program = Program::new(
            vec!["./install.sh".into(), "-v".into()],
            vec!["--key".into(), "abc".into()],
        );
        assert_eq!(program.command_line().as_str(), "./install.sh -v --key abc");
        assert_eq!(program.label(), "./install.sh");
    }

    #[test]
    fn test_parameters_json() {
        let params = Parameters::new(
            BTreeMap::from([("a".to_string(), "1".to_string())]),
            BTreeMap::from([("b".to_string(), "2".to_string())]),
        );
        let json = params.to_json().unwrap();
        assert_eq!(json.as_slice(), br#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn test_program_from_raw_keeps_order() {
        let raw = raw_with_program(vec![json!("a"), json!("b")]);
        let request = ExecutionRequest::from_raw(&raw).unwrap();
        assert_eq!(request.program.tokens(), vec!["a", "b"]);
    }

    proptest! {
        #[test]
        fn prop_merge_preserves_order_and_length(
            public in proptest::collection::vec("[a-z]{1,8}", 0..6),
            sensitive in proptest::collection::vec("[A-Z]{1,8}", 0..6),
        ) {
            prop_assume!(!public.is_empty() || !sensitive.is_empty());
            let program = Program::new(public.clone(), sensitive.clone());
            let tokens = program.tokens();

            prop_assert_eq!(tokens.len(), public.len() + sensitive.len());
            let expected: Vec<&str> = public
                .iter()
                .chain(sensitive.iter())
                .map(String::as_str)
                .collect();
            prop_assert_eq!(tokens, expected);
        }

        #[test]
        fn prop_sensitive_parameters_win(
            public in proptest::collection::btree_map("[a-d]", "[a-z]{0,6}", 0..4),
            sensitive in proptest::collection::btree_map("[a-d]", "[A-Z]{1,6}", 0..4),
        ) {
            let params = Parameters::new(public.clone(), sensitive.clone());
            let merged = params.merged();

            for (k, v) in &sensitive {
                prop_assert_eq!(merged.get(k.as_str()).copied(), Some(v.as_str()));
            }
            for (k, v) in &public {
                if !sensitive.contains_key(k) {
                    prop_assert_eq!(merged.get(k.as_str()).copied(), Some(v.as_str()));
                }
            }
        }
    }
}
