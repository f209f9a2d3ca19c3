//! Candidate and artifact envelopes
//!
//! Payloads are opaque bytes to the coordination layer. Identity is derived
//! from serializable fields only (kind, creator and payload), so two copies of
//! the same candidate compare equal after crossing any number of process
//! boundaries. The creator is the creating agent's address, which is unique
//! across every worker; agent names are only labels.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::AgentAddress;

/// Content-derived identity of a candidate
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(String);

impl CandidateId {
    /// Derive the identity for a (kind, creator, payload) triple
    pub fn derive(kind: &str, creator: &str, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for field in [kind.as_bytes(), creator.as_bytes()] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hasher.update(payload);
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form for logs
        write!(f, "{}", &self.0[..self.0.len().min(12)])
    }
}

/// A proposed, not-yet-accepted unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Identity used for every set operation
    pub id: CandidateId,
    /// Artifact kind tag (e.g. "vector", "image")
    pub kind: String,
    /// Address of the creating agent
    pub creator: String,
    /// Opaque artifact content
    pub payload: Vec<u8>,
    /// Per-agent evaluations, keyed by agent address
    #[serde(default)]
    pub evaluations: BTreeMap<String, f64>,
    /// Per-agent framing metadata, keyed by agent address
    #[serde(default)]
    pub framings: BTreeMap<String, serde_json::Value>,
    /// Creator's age when the candidate was made
    #[serde(default)]
    pub created_at_age: u64,
}

impl Candidate {
    pub fn new(kind: impl Into<String>, creator: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let creator = creator.into();
        let id = CandidateId::derive(&kind, &creator, &payload);
        Self {
            id,
            kind,
            creator,
            payload,
            evaluations: BTreeMap::new(),
            framings: BTreeMap::new(),
            created_at_age: 0,
        }
    }

    /// Record an agent's evaluation and optional framing
    pub fn with_evaluation(
        mut self,
        agent: impl Into<String>,
        score: f64,
        framing: Option<serde_json::Value>,
    ) -> Self {
        let agent = agent.into();
        if let Some(framing) = framing {
            self.framings.insert(agent.clone(), framing);
        }
        self.evaluations.insert(agent, score);
        self
    }

    pub fn with_age(mut self, age: u64) -> Self {
        self.created_at_age = age;
        self
    }

    /// The creator's own evaluation, if recorded
    pub fn creator_evaluation(&self) -> Option<f64> {
        self.evaluations.get(&self.creator).copied()
    }

    /// Whether the agent at `address` created this candidate
    pub fn is_created_by(&self, address: &AgentAddress) -> bool {
        self.creator == address.to_string()
    }

    /// Attribute the candidate to the agent at `creator`.
    ///
    /// The id is re-derived, and the creator's own evaluation and framing
    /// move to the new key.
    pub fn attributed_to(mut self, creator: &AgentAddress) -> Self {
        let creator = creator.to_string();
        if self.creator == creator {
            return self;
        }
        if let Some(score) = self.evaluations.remove(&self.creator) {
            self.evaluations.insert(creator.clone(), score);
        }
        if let Some(framing) = self.framings.remove(&self.creator) {
            self.framings.insert(creator.clone(), framing);
        }
        self.id = CandidateId::derive(&self.kind, &creator, &self.payload);
        self.creator = creator;
        self
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Candidate {}

impl Hash for Candidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} by {}", self.kind, self.id, self.creator)
    }
}

/// A globally accepted candidate; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub candidate: Candidate,
    /// Environment age at acceptance
    pub env_time: u64,
    pub accepted_at: DateTime<Utc>,
    /// Score the voting method assigned
    pub score: f64,
}

impl Artifact {
    pub fn accept(candidate: Candidate, env_time: u64, score: f64) -> Self {
        Self {
            candidate,
            env_time,
            accepted_at: Utc::now(),
            score,
        }
    }

    pub fn id(&self) -> &CandidateId {
        &self.candidate.id
    }

    pub fn creator(&self) -> &str {
        &self.candidate.creator
    }
}

/// One agent's score (or rank) for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub candidate: CandidateId,
    pub score: f64,
}

impl Vote {
    pub fn new(candidate: CandidateId, score: f64) -> Self {
        Self { candidate, score }
    }
}

/// The ordered votes one agent returns for a batch of candidates
pub type VoteList = Vec<Vote>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_evaluations() {
        let a = Candidate::new("vector", "A1", vec![1, 2, 3]);
        let b = Candidate::new("vector", "A1", vec![1, 2, 3]).with_evaluation("A2", 0.4, None);
        assert_eq!(a, b);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_identity_separates_fields() {
        let base = Candidate::new("vector", "A1", vec![1, 2, 3]);
        assert_ne!(base, Candidate::new("vector", "A2", vec![1, 2, 3]));
        assert_ne!(base, Candidate::new("image", "A1", vec![1, 2, 3]));
        assert_ne!(base, Candidate::new("vector", "A1", vec![1, 2]));
        // Length prefixes keep field boundaries unambiguous
        assert_ne!(
            Candidate::new("ab", "c", vec![]).id,
            Candidate::new("a", "bc", vec![]).id
        );
    }

    #[test]
    fn test_attribution_rederives_identity() {
        let first = AgentAddress::new("w:0", 1);
        let second = AgentAddress::new("w:1", 1);
        let a = Candidate::new("vector", "A1", vec![7]).with_evaluation("A1", 0.3, None);
        let b = Candidate::new("vector", "A1", vec![7]);

        let a = a.attributed_to(&first);
        let b = b.attributed_to(&second);
        // Same label and payload, different agents
        assert_ne!(a, b);
        assert!(a.is_created_by(&first));
        assert!(!a.is_created_by(&second));
        assert_eq!(a.creator_evaluation(), Some(0.3));
        assert_eq!(a.clone().attributed_to(&first).id, a.id);
    }

    #[test]
    fn test_wire_round_trip_preserves_payload_and_identity() {
        let payload: Vec<u8> = (0..=255).collect();
        let original = Candidate::new("bytes", "A3", payload.clone())
            .with_evaluation("A3", 0.75, Some(serde_json::json!({"args": [1, 2]})))
            .with_age(4);
        let json = serde_json::to_vec(&original).unwrap();
        let back: Candidate = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, original);
        assert_eq!(back.payload, payload);
        assert_eq!(back.creator_evaluation(), Some(0.75));
        assert_eq!(back.created_at_age, 4);
    }
}
