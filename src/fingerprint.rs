//! Deterministic request fingerprinting for single-flight deduplication.
//!
//! Canonicalizes a [`CompletionRequest`] into a stable byte form and hashes it
//! with SHA-256, truncated to a 128-bit digest. Collisions are treated as a
//! conformance failure of the hash, not as a design trade-off: there is no
//! fallback comparison against the original request.

use crate::model::{CompletionRequest, EffectiveBody, Message, Role};
use sha2::{Digest, Sha256};
use std::fmt;

/// A 128-bit digest over a canonicalized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Only fields that affect the model's output are folded into the digest:
/// request-id and cache/retry preferences never reach this function.
pub fn fingerprint(request: &CompletionRequest) -> Fingerprint {
    let mut buf = Vec::new();
    write_canonical(&mut buf, request);

    let mut hasher = Sha256::new();
    hasher.update(&buf);
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Fingerprint(bytes)
}

fn write_canonical(buf: &mut Vec<u8>, request: &CompletionRequest) {
    match request.effective_body() {
        EffectiveBody::Messages(messages) => {
            buf.extend_from_slice(b"messages\0");
            for message in messages {
                write_role(buf, message.role);
                buf.push(0);
                write_normalized_content(buf, &message.content);
                buf.push(0);
            }
        }
        EffectiveBody::Input(input) => {
            buf.extend_from_slice(b"input\0");
            write_normalized_content(buf, input);
        }
        EffectiveBody::Empty => {
            buf.extend_from_slice(b"empty\0");
        }
    }

    if let Some(options) = &request.options {
        buf.extend_from_slice(b"\0opts\0");
        write_opt_f64(buf, "temperature", options.temperature);
        write_opt_f64(buf, "top_p", options.top_p);
        write_opt_u32(buf, "max_tokens", options.max_tokens);
        write_opt_f64(buf, "frequency_penalty", options.frequency_penalty);
        write_opt_f64(buf, "presence_penalty", options.presence_penalty);
        // `cache` and `retry` are transport preferences, not model-affecting;
        // they are deliberately excluded from the digest.
    }
}

fn write_role(buf: &mut Vec<u8>, role: Role) {
    let s = match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    };
    buf.extend_from_slice(s.as_bytes());
}

/// Strips trailing whitespace but preserves internal characters verbatim,
/// per the canonicalization rule: insignificant whitespace is normalized,
/// nothing else is.
fn write_normalized_content(buf: &mut Vec<u8>, content: &str) {
    buf.extend_from_slice(content.trim_end().as_bytes());
}

fn write_opt_f64(buf: &mut Vec<u8>, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        buf.extend_from_slice(key.as_bytes());
        buf.push(b'=');
        buf.extend_from_slice(&v.to_bits().to_be_bytes());
        buf.push(0);
    }
}

fn write_opt_u32(buf: &mut Vec<u8>, key: &str, value: Option<u32>) {
    if let Some(v) = value {
        buf.extend_from_slice(key.as_bytes());
        buf.push(b'=');
        buf.extend_from_slice(&v.to_be_bytes());
        buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Options;

    fn msg(role: Role, content: &str) -> Message {
        Message { role, content: content.to_string() }
    }

    #[test]
    fn identical_requests_fingerprint_equal() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            ..Default::default()
        };
        let b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn trailing_whitespace_is_normalized() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            ..Default::default()
        };
        let b = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping   \n")]),
            ..Default::default()
        };
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn internal_whitespace_is_preserved() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping  pong")]),
            ..Default::default()
        };
        let b = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping pong")]),
            ..Default::default()
        };
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn differing_content_fingerprints_differ() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            ..Default::default()
        };
        let b = CompletionRequest {
            messages: Some(vec![msg(Role::User, "pong")]),
            ..Default::default()
        };
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn message_order_is_significant() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "a"), msg(Role::Assistant, "b")]),
            ..Default::default()
        };
        let b = CompletionRequest {
            messages: Some(vec![msg(Role::Assistant, "b"), msg(Role::User, "a")]),
            ..Default::default()
        };
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn model_affecting_options_change_fingerprint() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            options: Some(Options { temperature: Some(0.2), ..Default::default() }),
            ..Default::default()
        };
        let b = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            options: Some(Options { temperature: Some(0.8), ..Default::default() }),
            ..Default::default()
        };
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn non_model_affecting_options_are_excluded() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            options: Some(Options { cache: Some(true), retry: Some(false), ..Default::default() }),
            ..Default::default()
        };
        let b = CompletionRequest {
            messages: Some(vec![msg(Role::User, "ping")]),
            options: Some(Options { cache: Some(false), retry: Some(true), ..Default::default() }),
            ..Default::default()
        };
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn messages_and_input_hash_distinctly() {
        let a = CompletionRequest {
            messages: Some(vec![msg(Role::User, "x")]),
            ..Default::default()
        };
        let b = CompletionRequest { input: Some("x".to_string()), ..Default::default() };
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
