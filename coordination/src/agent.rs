//! Agent capability contract and class registry
//!
//! Agents are the domain-specific collaborators hosted by a worker's local
//! manager. The coordination layer only needs them to act, evaluate and vote;
//! how an agent invents or judges an artifact is its own business.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::address::AgentAddress;
use crate::artifact::{Artifact, Candidate, Vote, VoteList};

/// Error type for agent construction and behaviour
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unknown agent class: {0}")]
    UnknownClass(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("{0}")]
    Failed(String),
}

/// What an agent did during one act
#[derive(Debug, Clone)]
pub enum Action {
    /// Nothing worth proposing this tick
    Idle,
    /// Add to the worker's local candidate set for the next gather
    Propose(Candidate),
    /// Push straight to the master's global candidate set via the host link
    Publish(Candidate),
}

/// Read-only view handed to an agent when it acts
#[derive(Debug, Clone)]
pub struct ActContext {
    pub address: AgentAddress,
    /// Agent age after this tick's increment
    pub age: u64,
    /// Artifacts this worker has been told about so far
    pub artifacts: Arc<Vec<Artifact>>,
    /// Caller-supplied trigger arguments, `Null` when none
    pub args: serde_json::Value,
}

/// Capability every hosted agent provides
#[async_trait]
pub trait Agent: Send + Sync {
    /// Display name, unique within the hosting environment
    fn name(&self) -> &str;

    /// Address the agent was spawned at; identifies its candidates
    fn address(&self) -> &AgentAddress;

    /// Create (or decline to create) a candidate for this tick
    async fn act(&mut self, ctx: &ActContext) -> Result<Action, AgentError>;

    /// Score a candidate; higher is better
    fn evaluate(&self, candidate: &Candidate) -> f64;

    /// Candidates from other agents scoring below this are vetoed
    fn veto_threshold(&self) -> f64 {
        f64::NEG_INFINITY
    }

    /// Return the subset of `candidates` this agent accepts.
    ///
    /// An agent never vetoes its own candidates.
    fn validate(&self, candidates: &[Candidate]) -> Vec<Candidate> {
        let threshold = self.veto_threshold();
        candidates
            .iter()
            .filter(|c| c.is_created_by(self.address()) || self.evaluate(c) >= threshold)
            .cloned()
            .collect()
    }

    /// Score every candidate, ordered best to worst
    fn vote(&self, candidates: &[Candidate]) -> VoteList {
        let mut votes: VoteList = candidates
            .iter()
            .map(|c| Vote::new(c.id.clone(), self.evaluate(c)))
            .collect();
        votes.sort_by(|a, b| b.score.total_cmp(&a.score));
        votes
    }

    /// Called for every artifact the environment accepts
    fn domain_artifact_added(&mut self, _artifact: &Artifact) {}

    /// Learn about another agent; returns false if already known
    fn add_connection(&mut self, _peer: AgentAddress) -> bool {
        false
    }

    /// Flush any state before the worker shuts down
    fn close(&mut self, _folder: Option<&Path>) -> Option<serde_json::Value> {
        None
    }
}

/// Everything a constructor receives when an agent is spawned
#[derive(Debug, Clone)]
pub struct AgentInit {
    pub address: AgentAddress,
    pub name: String,
    pub args: serde_json::Value,
}

impl AgentInit {
    /// Deserialize one keyword argument, `None` when absent
    pub fn arg<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AgentError> {
        match self.args.get(key) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| AgentError::InvalidArgs(format!("{key}: {e}"))),
        }
    }

    /// Deserialize the whole argument object
    pub fn args_as<T: DeserializeOwned>(&self) -> Result<T, AgentError> {
        let args = if self.args.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.args.clone()
        };
        serde_json::from_value(args).map_err(|e| AgentError::InvalidArgs(e.to_string()))
    }
}

/// Constructor stored per agent class
pub type AgentConstructor =
    Arc<dyn Fn(AgentInit) -> Result<Box<dyn Agent>, AgentError> + Send + Sync>;

/// Maps class names to constructors; shared by every local manager
#[derive(Clone, Default)]
pub struct AgentRegistry {
    constructors: HashMap<String, AgentConstructor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class: impl Into<String>, constructor: F)
    where
        F: Fn(AgentInit) -> Result<Box<dyn Agent>, AgentError> + Send + Sync + 'static,
    {
        self.constructors.insert(class.into(), Arc::new(constructor));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, class: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(AgentInit) -> Result<Box<dyn Agent>, AgentError> + Send + Sync + 'static,
    {
        self.register(class, constructor);
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.constructors.contains_key(class)
    }

    pub fn classes(&self) -> Vec<String> {
        let mut classes: Vec<String> = self.constructors.keys().cloned().collect();
        classes.sort();
        classes
    }

    pub fn instantiate(&self, class: &str, init: AgentInit) -> Result<Box<dyn Agent>, AgentError> {
        let constructor = self
            .constructors
            .get(class)
            .ok_or_else(|| AgentError::UnknownClass(class.to_string()))?;
        constructor(init)
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("classes", &self.classes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: String,
        address: AgentAddress,
        score: f64,
        threshold: f64,
    }

    #[async_trait]
    impl Agent for Fixed {
        fn name(&self) -> &str {
            &self.name
        }

        fn address(&self) -> &AgentAddress {
            &self.address
        }

        async fn act(&mut self, _ctx: &ActContext) -> Result<Action, AgentError> {
            Ok(Action::Idle)
        }

        fn evaluate(&self, candidate: &Candidate) -> f64 {
            self.score + candidate.payload.len() as f64
        }

        fn veto_threshold(&self) -> f64 {
            self.threshold
        }
    }

    fn fixed(threshold: f64) -> Fixed {
        Fixed {
            name: "A1".into(),
            address: AgentAddress::new("h:1", 1),
            score: 0.0,
            threshold,
        }
    }

    #[test]
    fn test_default_validate_keeps_own_and_passing() {
        let agent = fixed(2.0);
        let own = Candidate::new("v", "tcp://h:1/1", vec![]);
        let weak = Candidate::new("v", "tcp://h:1/2", vec![1]);
        let strong = Candidate::new("v", "tcp://h:1/3", vec![1, 2, 3]);
        let valid = agent.validate(&[own.clone(), weak, strong.clone()]);
        assert_eq!(valid, vec![own, strong]);
    }

    #[test]
    fn test_same_name_elsewhere_is_not_the_creator() {
        let agent = fixed(2.0);
        // Slot 1 on another worker carries the same default name
        let twin = Candidate::new("v", "tcp://h:2/1", vec![]);
        assert!(agent.validate(&[twin]).is_empty());
    }

    #[test]
    fn test_default_vote_orders_best_first() {
        let agent = fixed(0.0);
        let a = Candidate::new("v", "A2", vec![1]);
        let b = Candidate::new("v", "A3", vec![1, 2, 3]);
        let votes = agent.vote(&[a.clone(), b.clone()]);
        assert_eq!(votes[0].candidate, b.id);
        assert_eq!(votes[1].candidate, a.id);
    }

    #[test]
    fn test_registry_unknown_class() {
        let registry = AgentRegistry::new();
        let init = AgentInit {
            address: AgentAddress::new("h:1", 1),
            name: "A1".into(),
            args: serde_json::Value::Null,
        };
        assert!(matches!(
            registry.instantiate("Missing", init),
            Err(AgentError::UnknownClass(_))
        ));
    }

    #[test]
    fn test_init_args() {
        let init = AgentInit {
            address: AgentAddress::new("h:1", 1),
            name: "A1".into(),
            args: serde_json::json!({"threshold": 0.5, "bad": "x"}),
        };
        assert_eq!(init.arg::<f64>("threshold").unwrap(), Some(0.5));
        assert_eq!(init.arg::<f64>("missing").unwrap(), None);
        assert!(init.arg::<f64>("bad").is_err());
    }
}
