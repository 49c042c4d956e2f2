use std::sync::Arc;

use thiserror::Error;

use crate::phase::Phase;

/// Error payload carried by a failed outcome.
///
/// Shared so the Driver can keep its own copy of the fault it reported.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    /// A Driver report carried a fault nobody downstream handled.
    #[error("Unhandled failure reported at {phase}: {source}")]
    Upstream {
        phase: Phase,
        #[source]
        source: BoxError,
    },

    #[error("Outcome for {phase} was already requested")]
    AlreadyRequested { phase: Phase },

    #[error("Outcome for {requested} requested after {last}")]
    OutOfOrder { requested: Phase, last: Phase },

    #[error("Outcome for {phase} was already settled")]
    AlreadySettled { phase: Phase },

    #[error("Workflow has not been started")]
    NotStarted,

    #[error("Bridge dropped before {phase} settled")]
    Abandoned { phase: Phase },

    #[error("Workflow failed: {0}")]
    Workflow(String),

    #[error("Request scope entry {key} holds a different type")]
    ScopeTypeMismatch { key: String },

    #[error("Host thread pool is closed")]
    HostClosed,
}

impl Error {
    /// Errors that signal the four-phase protocol was driven incorrectly.
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(
            self,
            Error::AlreadyRequested { .. }
                | Error::OutOfOrder { .. }
                | Error::AlreadySettled { .. }
                | Error::NotStarted
        )
    }

    /// The phase this error is attached to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Upstream { phase, .. }
            | Error::AlreadyRequested { phase }
            | Error::AlreadySettled { phase }
            | Error::Abandoned { phase } => Some(*phase),
            Error::OutOfOrder { requested, .. } => Some(*requested),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
