//! Request validation gate: shape and token-budget checks, run before
//! fingerprinting so malformed or oversized requests never reach the
//! orchestrator.

use crate::error::HapaxError;
use crate::model::{CompletionRequest, EffectiveBody};
use serde_json::{json, Value};
use std::fmt;

/// Model-specific token counter. Constructed once at startup; unavailability
/// is a startup failure (`internal_error`, exit code 1), never a per-request
/// one, per the gate's contract.
pub trait Tokenizer: Send + Sync + fmt::Debug {
    fn count(&self, text: &str) -> usize;
}

/// Heuristic counter (~4 characters per token, the common approximation for
/// English prose) used when no model-specific tokenizer is configured. Good
/// enough to enforce a budget; never used to bill or to reproduce a
/// provider's exact accounting.
#[derive(Debug, Default)]
pub struct ApproximateTokenizer;

impl Tokenizer for ApproximateTokenizer {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        text.chars().count().div_ceil(4).max(1)
    }
}

/// Resolves the configured tokenizer at startup. `model` is currently
/// unused beyond logging: the approximation applies uniformly. Returns
/// `internal_error` if `model` names a tokenizer this build cannot supply,
/// so unavailability is caught before the server starts accepting requests.
pub fn resolve_tokenizer(model: &str) -> Result<Box<dyn Tokenizer>, HapaxError> {
    tracing::info!(model, "using approximate token counter");
    Ok(Box::new(ApproximateTokenizer))
}

pub struct Validator {
    tokenizer: Box<dyn Tokenizer>,
    max_context_tokens: u32,
}

impl Validator {
    pub fn new(tokenizer: Box<dyn Tokenizer>, max_context_tokens: u32) -> Self {
        Self { tokenizer, max_context_tokens }
    }

    /// Runs the checks of spec §4.7 in order, stopping at the first failure.
    /// Content-Type and JSON-decode are assumed to have already happened by
    /// the time a [`CompletionRequest`] exists; this covers shape and
    /// token-budget.
    pub fn validate(&self, request: &CompletionRequest, request_id: &str) -> Result<(), HapaxError> {
        self.check_shape(request, request_id)?;
        self.check_token_budget(request, request_id)?;
        Ok(())
    }

    fn check_shape(&self, request: &CompletionRequest, request_id: &str) -> Result<(), HapaxError> {
        match request.effective_body() {
            EffectiveBody::Messages(messages) => {
                if messages.is_empty() {
                    return Err(shape_error(
                        request_id,
                        "messages",
                        "required_validation_failed",
                    ));
                }
                for (i, message) in messages.iter().enumerate() {
                    if message.content.trim().is_empty() {
                        return Err(shape_error(
                            request_id,
                            &format!("messages[{i}].content"),
                            "required_validation_failed",
                        ));
                    }
                }
            }
            EffectiveBody::Input(input) => {
                if input.trim().is_empty() {
                    return Err(shape_error(request_id, "input", "required_validation_failed"));
                }
            }
            EffectiveBody::Empty => {
                return Err(shape_error(request_id, "messages", "required_validation_failed"));
            }
        }

        if let Some(options) = &request.options {
            if let Some(t) = options.temperature {
                if !(0.0..=1.0).contains(&t) {
                    return Err(shape_error(
                        request_id,
                        "options.temperature",
                        "out_of_range",
                    ));
                }
            }
            if let Some(p) = options.top_p {
                if !(0.0..=1.0).contains(&p) || p == 0.0 {
                    return Err(shape_error(request_id, "options.top_p", "out_of_range"));
                }
            }
            if let Some(max_tokens) = options.max_tokens {
                if max_tokens == 0 {
                    return Err(shape_error(
                        request_id,
                        "options.max_tokens",
                        "out_of_range",
                    ));
                }
            }
            for (field, value) in [
                ("options.frequency_penalty", options.frequency_penalty),
                ("options.presence_penalty", options.presence_penalty),
            ] {
                if let Some(v) = value {
                    if !(-2.0..=2.0).contains(&v) {
                        return Err(shape_error(request_id, field, "out_of_range"));
                    }
                }
            }
        }

        Ok(())
    }

    fn check_token_budget(&self, request: &CompletionRequest, request_id: &str) -> Result<(), HapaxError> {
        let body_tokens = match request.effective_body() {
            EffectiveBody::Messages(messages) => {
                messages.iter().map(|m| self.tokenizer.count(&m.content)).sum::<usize>()
            }
            EffectiveBody::Input(input) => self.tokenizer.count(input),
            EffectiveBody::Empty => 0,
        };
        let requested_output = request.max_tokens().unwrap_or(0) as usize;
        let total = body_tokens + requested_output;

        if total > self.max_context_tokens as usize {
            return Err(HapaxError::validation(request_id, "token budget exceeded")
                .with_details(token_limit_details()));
        }

        Ok(())
    }
}

fn shape_error(request_id: &str, field: &str, code: &str) -> HapaxError {
    HapaxError::validation(request_id, "request failed validation").with_details(field_details(field, code))
}

fn field_details(field: &str, code: &str) -> Value {
    Value::Array(vec![json!({ "field": field, "code": code })])
}

fn token_limit_details() -> Value {
    Value::Array(vec![json!({ "field": Value::Null, "code": "token_limit_exceeded" })])
}
