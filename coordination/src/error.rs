//! Error taxonomy for environments, managers and the orchestrator
//!
//! Errors raised inside a worker cross the wire as a [`RemoteError`] carrying
//! an [`ErrorKind`], and are rebuilt into the matching [`EnvError`] variant on
//! the calling side so callers can match on typed failures regardless of
//! where they originated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::AgentAddress;

/// Result type for environment operations
pub type EnvResult<T> = Result<T, EnvError>;

/// Errors surfaced by managers, transports and the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("Endpoint unreachable: {endpoint} ({reason})")]
    Unreachable { endpoint: String, reason: String },

    #[error("Call to {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Could not reach host manager ({0})")]
    UnreachableHost(String),

    #[error("No host manager has been set for this environment")]
    NoHostLink,

    #[error("Host manager already bound to {0}")]
    HostAlreadyBound(String),

    #[error("Agent name '{0}' already exists in this environment")]
    DuplicateName(String),

    #[error("Could not instantiate agent: {0}")]
    Instantiation(String),

    #[error("No such agent: {0}")]
    UnknownAgent(String),

    #[error("Agent failed: {0}")]
    Agent(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Unexpected reply to {method}: {reply}")]
    UnexpectedReply { method: &'static str, reply: String },

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker launch failed: {0}")]
    Launch(String),

    #[error("No worker environments to place agents on")]
    NoWorkers,

    #[error("Registry closed")]
    Registry,
}

impl EnvError {
    pub fn unreachable(endpoint: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Unreachable {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unknown_agent(addr: &AgentAddress) -> Self {
        Self::UnknownAgent(addr.to_string())
    }

    /// Whether the failure means the target could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::UnreachableHost(_)
        )
    }

    /// Wire kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unreachable { .. } => ErrorKind::Unreachable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UnreachableHost(_) => ErrorKind::UnreachableHost,
            Self::NoHostLink => ErrorKind::NoHostLink,
            Self::HostAlreadyBound(_) => ErrorKind::HostAlreadyBound,
            Self::DuplicateName(_) => ErrorKind::DuplicateName,
            Self::Instantiation(_) => ErrorKind::Instantiation,
            Self::UnknownAgent(_) => ErrorKind::UnknownAgent,
            Self::Agent(_) => ErrorKind::Agent,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Serializable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unreachable,
    Timeout,
    UnreachableHost,
    NoHostLink,
    HostAlreadyBound,
    DuplicateName,
    Instantiation,
    UnknownAgent,
    Agent,
    Internal,
}

/// Error as carried in an RPC reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&EnvError> for RemoteError {
    fn from(e: &EnvError) -> Self {
        let message = match e {
            // Keep the bare payload so the variant can be rebuilt verbatim
            EnvError::UnreachableHost(s)
            | EnvError::HostAlreadyBound(s)
            | EnvError::DuplicateName(s)
            | EnvError::Instantiation(s)
            | EnvError::UnknownAgent(s)
            | EnvError::Agent(s)
            | EnvError::Remote(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            kind: e.kind(),
            message,
        }
    }
}

impl RemoteError {
    /// Rebuild a typed error; `endpoint` is the peer that returned it
    pub fn into_env_error(self, endpoint: &str) -> EnvError {
        match self.kind {
            ErrorKind::Unreachable => EnvError::unreachable(endpoint, self.message),
            ErrorKind::Timeout => EnvError::Remote(self.message),
            ErrorKind::UnreachableHost => EnvError::UnreachableHost(self.message),
            ErrorKind::NoHostLink => EnvError::NoHostLink,
            ErrorKind::HostAlreadyBound => EnvError::HostAlreadyBound(self.message),
            ErrorKind::DuplicateName => EnvError::DuplicateName(self.message),
            ErrorKind::Instantiation => EnvError::Instantiation(self.message),
            ErrorKind::UnknownAgent => EnvError::UnknownAgent(self.message),
            ErrorKind::Agent => EnvError::Agent(self.message),
            ErrorKind::Internal => EnvError::Remote(self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_round_trip_keeps_variant() {
        let err = EnvError::DuplicateName("A1".into());
        let remote = RemoteError::from(&err);
        assert_eq!(remote.kind, ErrorKind::DuplicateName);
        let json = serde_json::to_string(&remote).unwrap();
        let back: RemoteError = serde_json::from_str(&json).unwrap();
        match back.into_env_error("h:1") {
            EnvError::DuplicateName(name) => assert_eq!(name, "A1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(EnvError::unreachable("h:1", "refused").is_unreachable());
        assert!(EnvError::Timeout {
            endpoint: "h:1".into(),
            timeout: Duration::from_secs(1)
        }
        .is_unreachable());
        assert!(!EnvError::NoHostLink.is_unreachable());
    }
}
