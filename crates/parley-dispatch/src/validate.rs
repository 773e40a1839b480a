//! Payload validation and sanitization.
//!
//! Runs before a message is enqueued. Validation failures are reported to the
//! sender as `invalid_payload`; nothing invalid reaches a handler.

use crate::error::DispatchError;
use crate::message::ClientMessage;

/// Maximum size of a user message body in bytes.
pub const MAX_CONTENT_BYTES: usize = 32 * 1024;

/// Maximum number of messages returned by a history request.
pub const MAX_HISTORY_LIMIT: usize = 500;

/// Maximum length of an agent name.
const MAX_AGENT_NAME_LEN: usize = 64;

/// Validate a routable client message in place, sanitizing text fields.
pub fn validate(msg: &mut ClientMessage) -> Result<(), DispatchError> {
    match msg {
        ClientMessage::StartAgent { agent, .. } => {
            if !valid_agent_name(agent) {
                return Err(DispatchError::Invalid(format!(
                    "Agent name must match [a-z0-9_-]{{1,{MAX_AGENT_NAME_LEN}}}"
                )));
            }
            Ok(())
        }
        ClientMessage::UserMessage { content, .. } => {
            let sanitized = sanitize_content(content);
            if sanitized.is_empty() {
                return Err(DispatchError::Invalid("Message content is empty".into()));
            }
            if sanitized.len() > MAX_CONTENT_BYTES {
                return Err(DispatchError::Invalid(format!(
                    "Message content exceeds {MAX_CONTENT_BYTES} bytes"
                )));
            }
            *content = sanitized;
            Ok(())
        }
        ClientMessage::GetThreadHistory { limit, .. } => {
            if let Some(l) = limit {
                *l = (*l).clamp(1, MAX_HISTORY_LIMIT);
            }
            Ok(())
        }
        ClientMessage::StopAgent { .. } => Ok(()),
        ClientMessage::ResumeThread { .. }
        | ClientMessage::Ping
        | ClientMessage::Auth { .. } => {
            Err(DispatchError::Invalid("Message is not routable".into()))
        }
    }
}

/// Strip control characters (other than newline and tab) and trim whitespace.
pub fn sanitize_content(content: &str) -> String {
    content
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

fn valid_agent_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_AGENT_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}
