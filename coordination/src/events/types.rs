//! Lifecycle events published by the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::AgentAddress;
use crate::artifact::CandidateId;
use crate::voting::VotingMethod;

/// Unique identifier for events
pub type EventId = String;

/// Everything observable about a multi-environment run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    /// A worker's manager answered and holds a host link
    WorkerReady {
        worker: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent was placed on a worker
    AgentSpawned {
        worker: String,
        address: AgentAddress,
        class: String,
        timestamp: DateTime<Utc>,
    },

    /// Local candidate sets were collected into the global set
    CandidatesGathered {
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Cross-worker intersection finished
    CandidatesValidated {
        before: usize,
        after: usize,
        timestamp: DateTime<Utc>,
    },

    /// The voting engine produced an acceptance list
    VotingCompleted {
        method: VotingMethod,
        candidates: usize,
        ballots: usize,
        accepted: usize,
        timestamp: DateTime<Utc>,
    },

    /// A candidate entered the artifact registry
    ArtifactAccepted {
        candidate: CandidateId,
        creator: String,
        score: f64,
        env_time: u64,
        timestamp: DateTime<Utc>,
    },

    /// Global and local candidate sets were emptied
    CandidatesCleared { timestamp: DateTime<Utc> },

    /// A worker was asked to stop during shutdown
    WorkerStopped {
        worker: String,
        clean: bool,
        timestamp: DateTime<Utc>,
    },

    /// Every worker is gone and the pool is terminated
    EnvironmentDestroyed {
        workers: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SwarmEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SwarmEvent::WorkerReady { timestamp, .. }
            | SwarmEvent::AgentSpawned { timestamp, .. }
            | SwarmEvent::CandidatesGathered { timestamp, .. }
            | SwarmEvent::CandidatesValidated { timestamp, .. }
            | SwarmEvent::VotingCompleted { timestamp, .. }
            | SwarmEvent::ArtifactAccepted { timestamp, .. }
            | SwarmEvent::CandidatesCleared { timestamp }
            | SwarmEvent::WorkerStopped { timestamp, .. }
            | SwarmEvent::EnvironmentDestroyed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            SwarmEvent::WorkerReady { .. } => "worker_ready",
            SwarmEvent::AgentSpawned { .. } => "agent_spawned",
            SwarmEvent::CandidatesGathered { .. } => "candidates_gathered",
            SwarmEvent::CandidatesValidated { .. } => "candidates_validated",
            SwarmEvent::VotingCompleted { .. } => "voting_completed",
            SwarmEvent::ArtifactAccepted { .. } => "artifact_accepted",
            SwarmEvent::CandidatesCleared { .. } => "candidates_cleared",
            SwarmEvent::WorkerStopped { .. } => "worker_stopped",
            SwarmEvent::EnvironmentDestroyed { .. } => "environment_destroyed",
        }
    }

    /// Get the worker endpoint if this event is worker-scoped
    pub fn worker(&self) -> Option<&str> {
        match self {
            SwarmEvent::WorkerReady { worker, .. }
            | SwarmEvent::AgentSpawned { worker, .. }
            | SwarmEvent::WorkerStopped { worker, .. } => Some(worker),
            _ => None,
        }
    }

    /// Create a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SwarmEvent::VotingCompleted {
            method: VotingMethod::Irv,
            candidates: 3,
            ballots: 6,
            accepted: 1,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"voting_completed\""));
        assert!(json.contains("\"method\":\"irv\""));
        let parsed: SwarmEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type(), "voting_completed");
    }

    #[test]
    fn test_event_accessors() {
        let event = SwarmEvent::AgentSpawned {
            worker: "127.0.0.1:5560".to_string(),
            address: AgentAddress::new("127.0.0.1:5560", 1),
            class: "Novelty".to_string(),
            timestamp: Utc::now(),
        };

        assert_eq!(event.worker(), Some("127.0.0.1:5560"));
        assert_eq!(event.event_type(), "agent_spawned");
        assert_eq!(
            SwarmEvent::CandidatesCleared {
                timestamp: Utc::now()
            }
            .worker(),
            None
        );
    }
}
