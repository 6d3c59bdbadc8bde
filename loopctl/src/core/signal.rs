//! Signal contract validation.
//!
//! A worker reply is an envelope (`session_id`, `structured_output`, ...). The
//! validator turns the raw reply into exactly one signal of its driver's
//! variant or a [`ValidationError`] naming which layer of the contract was
//! broken:
//!
//! 1. the reply is not JSON at all (`MalformedOutput`),
//! 2. the reply has no `structured_output` payload (`ContractMissing`),
//! 3. the payload's `status` is outside the variant's closed set (`UnknownStatus`),
//! 4. the payload fails the JSON Schema or typed mapping (`ContractViolation`).

use std::marker::PhantomData;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{ContractSignal, SignalKind};

/// Why a worker reply could not become a signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed worker output: {0}")]
    MalformedOutput(String),
    #[error("worker output has no structured_output payload")]
    ContractMissing,
    #[error("unknown {kind} status '{status}'")]
    UnknownStatus { kind: SignalKind, status: String },
    #[error("{kind} payload violates contract: {detail}")]
    ContractViolation { kind: SignalKind, detail: String },
}

impl ValidationError {
    /// Stable category label used in log lines and run records.
    pub fn category(&self) -> &'static str {
        match self {
            ValidationError::MalformedOutput(_) => "malformed_output",
            ValidationError::ContractMissing => "contract_missing",
            ValidationError::UnknownStatus { .. } => "unknown_status",
            ValidationError::ContractViolation { .. } => "contract_violation",
        }
    }
}

/// The outer reply of one worker invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Token the next invocation must carry.
    pub continuation_token: Option<String>,
    /// Contract payload, `None` when absent or `null`.
    pub structured_output: Option<Value>,
}

/// Parse the outer reply without looking at the payload.
pub fn parse_envelope(raw: &str) -> Result<Envelope, ValidationError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|err| ValidationError::MalformedOutput(err.to_string()))?;

    let continuation_token = value
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let structured_output = value
        .get("structured_output")
        .filter(|payload| !payload.is_null())
        .cloned();

    Ok(Envelope {
        continuation_token,
        structured_output,
    })
}

/// Validates payloads of one signal variant against its compiled schema.
pub struct SignalValidator<S> {
    schema: Validator,
    signal: PhantomData<fn() -> S>,
}

impl<S: ContractSignal> SignalValidator<S> {
    /// Compile `schema_text` (Draft 2020-12) for the variant `S`.
    pub fn new(schema_text: &str) -> Result<Self> {
        let kind = S::KIND;
        let schema_json: Value = serde_json::from_str(schema_text)
            .with_context(|| format!("parse {kind} signal schema"))?;
        let schema = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema_json)
            .with_context(|| format!("compile {kind} signal schema"))?;
        Ok(Self {
            schema,
            signal: PhantomData,
        })
    }

    /// Validate a full raw reply.
    pub fn validate(&self, raw: &str) -> Result<S, ValidationError> {
        let envelope = parse_envelope(raw)?;
        self.validate_payload(envelope.structured_output)
    }

    /// Validate an already-extracted payload.
    pub fn validate_payload(&self, payload: Option<Value>) -> Result<S, ValidationError> {
        let payload = payload.ok_or(ValidationError::ContractMissing)?;
        self.check_status(&payload)?;

        let messages: Vec<String> = self
            .schema
            .iter_errors(&payload)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(self.violation(messages.join("; ")));
        }

        serde_json::from_value::<S>(payload).map_err(|err| self.violation(err.to_string()))
    }

    fn check_status(&self, payload: &Value) -> Result<(), ValidationError> {
        let Some(object) = payload.as_object() else {
            return Err(self.violation("payload is not an object".to_string()));
        };
        let status = match object.get("status") {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(self.violation(format!("status must be a string (got {other})")));
            }
            None => return Err(self.violation("missing status".to_string())),
        };
        if !S::STATUSES.contains(&status) {
            return Err(ValidationError::UnknownStatus {
                kind: S::KIND,
                status: status.to_string(),
            });
        }
        Ok(())
    }

    fn violation(&self, detail: String) -> ValidationError {
        ValidationError::ContractViolation {
            kind: S::KIND,
            detail,
        }
    }
}
