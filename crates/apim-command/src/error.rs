use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("command content error: {0}")]
    Content(#[from] serde_json::Error),
    #[error("store call '{operation}' timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u128 },
}

/// Failure raised by a command listener. Never escapes the fan-out.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot decode payload of command {command_id}: {source}")]
    Payload {
        command_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Handler(String),
}

impl ListenerError {
    pub fn payload(command_id: impl Into<String>, source: serde_json::Error) -> Self {
        ListenerError::Payload {
            command_id: command_id.into(),
            source,
        }
    }
}
