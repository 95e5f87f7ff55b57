//! Wire and domain types for completion requests and responses.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
}

/// A completion request as received over the wire.
///
/// Invariant: at least one of `messages`/`input` is present; if both are
/// present, `messages` wins (checked by [`crate::validation`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
}

impl CompletionRequest {
    /// The effective body this request resolves to, per the "messages wins" rule.
    pub fn effective_body(&self) -> EffectiveBody<'_> {
        match &self.messages {
            Some(messages) => EffectiveBody::Messages(messages),
            None => match &self.input {
                Some(input) => EffectiveBody::Input(input),
                None => EffectiveBody::Empty,
            },
        }
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.options.as_ref().and_then(|o| o.max_tokens)
    }
}

pub enum EffectiveBody<'a> {
    Messages(&'a [Message]),
    Input(&'a str),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub completion: String,
}
