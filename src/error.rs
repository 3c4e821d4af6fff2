//! Error types for the webhook CA controller

use std::fmt;

use thiserror::Error;

use crate::pki::PkiError;

/// Main error type for CA reconciliation
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// CA generation failed or stored CA material could not be decoded
    #[error("pki error: {0}")]
    Pki(#[from] PkiError),

    /// A resource the controller writes into does not exist
    #[error("{kind} {name} not found")]
    MissingResource {
        /// Kubernetes kind of the missing resource
        kind: &'static str,
        /// Name of the missing resource
        name: String,
    },

    /// A version-checked write kept losing to concurrent writers
    #[error("{operation}: still conflicting after {attempts} attempts")]
    ConflictExhausted {
        /// Operation that was retried
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Last conflict returned by the API server
        #[source]
        source: Box<Error>,
    },

    /// At least one dependent configuration did not receive the CA bundle
    #[error(
        "ca bundle propagation failed for {} of {targets} targets: {}",
        .failures.len(),
        summarize(.failures)
    )]
    Propagation {
        /// Every failed target, in no particular order
        failures: Vec<PropagationFailure>,
        /// Number of targets the bundle was pushed to
        targets: usize,
    },

    /// The derived leaf secret could not be invalidated after a CA rotation
    #[error("failed to invalidate leaf secret {secret} after CA rotation: {source}")]
    Cascade {
        /// Name of the leaf secret
        secret: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },

    /// Invalid controller configuration
    #[error("validation error: {0}")]
    Validation(String),

    /// A propagation task panicked or was cancelled
    #[error("task error: {0}")]
    Task(String),
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a task error with the given message
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Create a missing resource error
    pub fn missing_resource(kind: &'static str, name: impl Into<String>) -> Self {
        Self::MissingResource {
            kind,
            name: name.into(),
        }
    }

    /// Whether this is an optimistic concurrency conflict (HTTP 409)
    ///
    /// Conflicts are the only errors retried locally; everything else
    /// propagates to the controller's error policy.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

/// One dependent configuration that failed to converge on the CA bundle
#[derive(Debug)]
pub struct PropagationFailure {
    /// Kubernetes kind of the target
    pub kind: &'static str,
    /// Name of the target
    pub name: String,
    /// Terminal error of the target's task
    pub error: Error,
}

impl fmt::Display for PropagationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.kind, self.name, self.error)
    }
}

fn summarize(failures: &[PropagationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}
