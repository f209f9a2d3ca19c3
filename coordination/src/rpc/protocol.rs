//! Request/reply vocabulary shared by every manager endpoint
//!
//! One enum carries the whole RPC surface. Local managers serve the agent
//! lifecycle and candidate calls; the master serves the worker→host calls
//! (`add_candidate`, `get_artifacts`, `handle`, `is_ready`). Anything an
//! endpoint does not serve is answered with an error, never dropped.
//!
//! Wire form is JSON, `{"method": "...", "params": {...}}` for requests and
//! `{"Ok": {...}}` / `{"Err": {"kind": "...", "message": "..."}}` for replies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::address::AgentAddress;
use crate::artifact::{Artifact, Candidate, CandidateId, VoteList};
use crate::error::{EnvError, EnvResult, RemoteError};

/// A call addressed to a manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    Spawn {
        class: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        args: serde_json::Value,
    },
    SpawnN {
        class: String,
        n: usize,
        #[serde(default)]
        args: serde_json::Value,
    },
    GetAgents {
        #[serde(default)]
        class: Option<String>,
        #[serde(default)]
        addresses_only: bool,
    },
    TriggerAll {
        #[serde(default)]
        args: serde_json::Value,
    },
    TriggerAgent {
        address: AgentAddress,
        #[serde(default)]
        args: serde_json::Value,
    },
    Candidates,
    Artifacts,
    ValidateCandidates {
        candidates: Vec<Candidate>,
    },
    Vote {
        candidates: Vec<Candidate>,
    },
    GetVotes {
        candidates: Vec<Candidate>,
    },
    ClearCandidates,
    AddArtifacts {
        artifacts: Vec<Artifact>,
    },
    ConnectAgents {
        agent: AgentAddress,
        peers: Vec<AgentAddress>,
    },
    SetHostManager {
        address: AgentAddress,
    },
    HostManager,
    IsReady,
    Stop {
        #[serde(default)]
        folder: Option<PathBuf>,
    },
    Report {
        message: serde_json::Value,
    },
    Handle {
        message: serde_json::Value,
    },
    AddCandidate {
        candidate: Candidate,
    },
    GetArtifacts,
}

impl Request {
    /// Wire name of the method, for logs and error messages
    pub fn method(&self) -> &'static str {
        match self {
            Request::Spawn { .. } => "spawn",
            Request::SpawnN { .. } => "spawn_n",
            Request::GetAgents { .. } => "get_agents",
            Request::TriggerAll { .. } => "trigger_all",
            Request::TriggerAgent { .. } => "trigger_agent",
            Request::Candidates => "candidates",
            Request::Artifacts => "artifacts",
            Request::ValidateCandidates { .. } => "validate_candidates",
            Request::Vote { .. } => "vote",
            Request::GetVotes { .. } => "get_votes",
            Request::ClearCandidates => "clear_candidates",
            Request::AddArtifacts { .. } => "add_artifacts",
            Request::ConnectAgents { .. } => "connect_agents",
            Request::SetHostManager { .. } => "set_host_manager",
            Request::HostManager => "host_manager",
            Request::IsReady => "is_ready",
            Request::Stop { .. } => "stop",
            Request::Report { .. } => "report",
            Request::Handle { .. } => "handle",
            Request::AddCandidate { .. } => "add_candidate",
            Request::GetArtifacts => "get_artifacts",
        }
    }
}

/// An agent created by `spawn`; the address doubles as its handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedAgent {
    pub address: AgentAddress,
    pub class: String,
    pub name: String,
}

/// One row of a full `get_agents` listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub address: AgentAddress,
    pub class: String,
    pub name: String,
    pub age: u64,
}

/// What one agent did when triggered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "candidate", rename_all = "snake_case")]
pub enum ActOutcome {
    Idle,
    Proposed(CandidateId),
    Published(CandidateId),
}

/// Per-agent result of a trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResult {
    pub address: AgentAddress,
    pub outcome: ActOutcome,
}

/// Successful answer to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Unit,
    Bool(bool),
    Count(usize),
    Spawned(SpawnedAgent),
    SpawnedMany(Vec<SpawnedAgent>),
    Agents(Vec<AgentInfo>),
    Addresses(Vec<AgentAddress>),
    Triggered(Vec<TriggerResult>),
    TriggeredOne(Option<TriggerResult>),
    Candidates(Vec<Candidate>),
    Artifacts(Vec<Artifact>),
    Votes(VoteList),
    VoteSet(Vec<VoteList>),
    Host(Option<AgentAddress>),
    Json(serde_json::Value),
}

/// What travels back over the wire for every request
pub type RpcResponse = Result<Reply, RemoteError>;

impl Reply {
    fn kind(&self) -> &'static str {
        match self {
            Reply::Unit => "unit",
            Reply::Bool(_) => "bool",
            Reply::Count(_) => "count",
            Reply::Spawned(_) => "spawned",
            Reply::SpawnedMany(_) => "spawned_many",
            Reply::Agents(_) => "agents",
            Reply::Addresses(_) => "addresses",
            Reply::Triggered(_) => "triggered",
            Reply::TriggeredOne(_) => "triggered_one",
            Reply::Candidates(_) => "candidates",
            Reply::Artifacts(_) => "artifacts",
            Reply::Votes(_) => "votes",
            Reply::VoteSet(_) => "vote_set",
            Reply::Host(_) => "host",
            Reply::Json(_) => "json",
        }
    }

    fn unexpected(self, method: &'static str) -> EnvError {
        EnvError::UnexpectedReply {
            method,
            reply: self.kind().to_string(),
        }
    }

    pub fn into_unit(self, method: &'static str) -> EnvResult<()> {
        match self {
            Reply::Unit => Ok(()),
            other => Err(other.unexpected(method)),
        }
    }
}

macro_rules! reply_accessors {
    ($($name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl Reply {
            $(
                pub fn $name(self, method: &'static str) -> EnvResult<$ty> {
                    match self {
                        Reply::$variant(value) => Ok(value),
                        other => Err(other.unexpected(method)),
                    }
                }
            )*
        }
    };
}

reply_accessors! {
    into_bool => Bool(bool),
    into_count => Count(usize),
    into_spawned => Spawned(SpawnedAgent),
    into_spawned_many => SpawnedMany(Vec<SpawnedAgent>),
    into_agents => Agents(Vec<AgentInfo>),
    into_addresses => Addresses(Vec<AgentAddress>),
    into_triggered => Triggered(Vec<TriggerResult>),
    into_triggered_one => TriggeredOne(Option<TriggerResult>),
    into_candidates => Candidates(Vec<Candidate>),
    into_artifacts => Artifacts(Vec<Artifact>),
    into_votes => Votes(VoteList),
    into_vote_set => VoteSet(Vec<VoteList>),
    into_host => Host(Option<AgentAddress>),
    into_json => Json(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_request_wire_shape() {
        let req = Request::GetAgents {
            class: Some("Novelty".into()),
            addresses_only: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "get_agents");
        assert_eq!(json["params"]["class"], "Novelty");
        assert_eq!(req.method(), "get_agents");

        let unit: Request = serde_json::from_str(r#"{"method":"clear_candidates"}"#).unwrap();
        assert_eq!(unit, Request::ClearCandidates);
    }

    #[test]
    fn test_optional_params_default() {
        let req: Request =
            serde_json::from_str(r#"{"method":"spawn","params":{"class":"Novelty"}}"#).unwrap();
        assert_eq!(
            req,
            Request::Spawn {
                class: "Novelty".into(),
                name: None,
                args: serde_json::Value::Null,
            }
        );
    }

    #[test]
    fn test_response_round_trip() {
        let ok: RpcResponse = Ok(Reply::Bool(true));
        let json = serde_json::to_string(&ok).unwrap();
        let back: RpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ok);

        let err: RpcResponse = Err(RemoteError {
            kind: ErrorKind::NoHostLink,
            message: "no host".into(),
        });
        let json = serde_json::to_string(&err).unwrap();
        let back: RpcResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_accessor_mismatch() {
        let err = Reply::Count(3).into_bool("is_ready").unwrap_err();
        match err {
            EnvError::UnexpectedReply { method, reply } => {
                assert_eq!(method, "is_ready");
                assert_eq!(reply, "count");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(Reply::Count(3).into_count("spawn_n").unwrap(), 3);
    }
}
