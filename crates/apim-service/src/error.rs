use apim_json::{PatchError, SchemaError};
use thiserror::Error;

pub type ManagementResult<T> = Result<T, ManagementError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure surfaced by a management service to its caller.
///
/// `Validation` and `NotFound` describe caller input. `Technical` wraps
/// anything that went wrong underneath, with the operation and keys involved
/// kept in the message.
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("{message}")]
    Technical {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("'{user}' is not allowed to use {permission} on '{reference_id}'")]
    Forbidden {
        user: String,
        permission: String,
        reference_id: String,
    },
}

impl ManagementError {
    pub fn technical(message: impl Into<String>, source: impl Into<BoxedSource>) -> Self {
        ManagementError::Technical {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ManagementError::NotFound { kind, id: id.into() }
    }

    pub fn is_technical(&self) -> bool {
        matches!(self, ManagementError::Technical { .. })
    }
}

impl From<SchemaError> for ManagementError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Violations(messages) => ManagementError::Validation(messages),
            SchemaError::InvalidJson(_) => ManagementError::Validation(vec![err.to_string()]),
            // A broken schema is ours, not the caller's.
            SchemaError::InvalidSchema(_) => {
                ManagementError::technical("plugin schema cannot be compiled", err)
            }
        }
    }
}

impl From<PatchError> for ManagementError {
    fn from(err: PatchError) -> Self {
        ManagementError::Validation(vec![err.to_string()])
    }
}

/// Failure reported by a backing repository. Never returned as is by a
/// service; see [`ManagementError::technical`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Technical(String),
}
