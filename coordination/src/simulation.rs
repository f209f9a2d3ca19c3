//! Round driver
//!
//! One round:
//!
//! ```text
//! tick age → trigger_all → gather → validate → vote → accept + broadcast → clear
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::artifact::Artifact;
use crate::config::VotingConfig;
use crate::error::EnvResult;
use crate::orchestrator::MultiEnvironment;
use crate::voting::VotingMethod;

/// What happened in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Environment age the round ran at
    pub age: u64,
    /// Candidates gathered from the workers
    pub proposed: usize,
    /// Candidates that survived validation
    pub validated: usize,
    /// Artifacts accepted this round
    pub accepted: Vec<Artifact>,
}

/// Runs rounds against a [`MultiEnvironment`]
pub struct Simulation {
    env: MultiEnvironment,
    method: VotingMethod,
    accepted: usize,
    trigger_args: Value,
}

impl Simulation {
    /// Simulation using the environment's configured voting method
    pub fn new(env: MultiEnvironment) -> Self {
        let VotingConfig {
            method, accepted, ..
        } = env.config().voting.clone();
        Self {
            env,
            method,
            accepted,
            trigger_args: Value::Null,
        }
    }

    pub fn with_method(mut self, method: VotingMethod, accepted: usize) -> Self {
        self.method = method;
        self.accepted = accepted;
        self
    }

    /// Arguments passed to every agent's act
    pub fn with_trigger_args(mut self, args: Value) -> Self {
        self.trigger_args = args;
        self
    }

    pub fn env(&self) -> &MultiEnvironment {
        &self.env
    }

    /// Hand the environment back, e.g. to destroy it
    pub fn into_env(self) -> MultiEnvironment {
        self.env
    }

    /// Run a single round
    pub async fn step(&mut self) -> EnvResult<RoundReport> {
        let age = self.env.tick().await?;
        self.env.trigger_all(self.trigger_args.clone()).await?;
        // Opportunistic pushes may already sit in the global set
        self.env.gather_candidates().await?;
        let proposed = self.env.candidates().await?.len();
        let validated = self.env.validate_candidates().await?.len();
        let ranking = self.env.perform_voting(self.method, self.accepted).await?;
        let accepted = self.env.add_artifacts(ranking).await?;
        self.env.clear_candidates().await?;

        info!(
            age,
            proposed,
            validated,
            accepted = accepted.len(),
            "Round finished"
        );
        Ok(RoundReport {
            age,
            proposed,
            validated,
            accepted,
        })
    }

    /// Run `n` rounds; stops at the first failing round
    pub async fn steps(&mut self, n: usize) -> EnvResult<Vec<RoundReport>> {
        let mut reports = Vec::with_capacity(n);
        for _ in 0..n {
            reports.push(self.step().await?);
        }
        Ok(reports)
    }
}
