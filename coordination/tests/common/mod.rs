//! Shared fixtures for the orchestration integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use coordination::{
    ActContext, Action, Agent, AgentAddress, AgentError, AgentInit, AgentRegistry, Artifact,
    Candidate, MemoryTransport, MultiEnvConfig, MultiEnvironment, RpcConfig, TaskLauncher,
};
use serde::Deserialize;
use serde_json::{json, Value};

pub const PROBE: &str = "Probe";

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Propose,
    Publish,
    Idle,
    Fail,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeArgs {
    pub mode: Mode,
    /// Score per creator address
    pub scores: HashMap<String, f64>,
    pub default_score: f64,
    /// Other agents' candidates scoring below this are vetoed
    pub veto_threshold: f64,
    /// Fixed payload instead of the agent's own address
    pub payload: Option<String>,
}

impl Default for ProbeArgs {
    fn default() -> Self {
        Self {
            mode: Mode::Propose,
            scores: HashMap::new(),
            default_score: 0.5,
            veto_threshold: 0.0,
            payload: None,
        }
    }
}

/// Proposes its own address as payload; judges by a fixed score table and
/// validates with the default threshold rule
pub struct Probe {
    name: String,
    address: AgentAddress,
    args: ProbeArgs,
    peers: HashSet<AgentAddress>,
    seen: usize,
}

impl Probe {
    pub fn new(init: AgentInit) -> Result<Self, AgentError> {
        Ok(Self {
            args: init.args_as()?,
            name: init.name,
            address: init.address,
            peers: HashSet::new(),
            seen: 0,
        })
    }

    fn candidate(&self, age: u64) -> Candidate {
        let payload = match &self.args.payload {
            Some(payload) => payload.clone().into_bytes(),
            None => self.address.to_string().into_bytes(),
        };
        Candidate::new("probe", self.address.to_string(), payload).with_age(age)
    }
}

#[async_trait]
impl Agent for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &AgentAddress {
        &self.address
    }

    async fn act(&mut self, ctx: &ActContext) -> Result<Action, AgentError> {
        match self.args.mode {
            Mode::Propose => Ok(Action::Propose(self.candidate(ctx.age))),
            Mode::Publish => Ok(Action::Publish(self.candidate(ctx.age))),
            Mode::Idle => Ok(Action::Idle),
            Mode::Fail => Err(AgentError::Failed("probe failure".into())),
        }
    }

    fn evaluate(&self, candidate: &Candidate) -> f64 {
        self.args
            .scores
            .get(&candidate.creator)
            .copied()
            .unwrap_or(self.args.default_score)
    }

    fn veto_threshold(&self) -> f64 {
        self.args.veto_threshold
    }

    fn domain_artifact_added(&mut self, _artifact: &Artifact) {
        self.seen += 1;
    }

    fn add_connection(&mut self, peer: AgentAddress) -> bool {
        self.peers.insert(peer)
    }

    fn close(&mut self, _folder: Option<&Path>) -> Option<Value> {
        Some(json!({ "seen": self.seen, "peers": self.peers.len() }))
    }
}

pub fn registry() -> AgentRegistry {
    AgentRegistry::new().with(PROBE, |init| {
        Probe::new(init).map(|p| Box::new(p) as Box<dyn Agent>)
    })
}

pub fn config() -> MultiEnvConfig {
    let mut config = MultiEnvConfig {
        name: "test-env".into(),
        ready_poll_interval_ms: 10,
        startup_timeout_ms: 2_000,
        ..Default::default()
    };
    config.voting.seed = Some(7);
    config
}

/// Environment over `workers` in-memory workers; the network is returned
/// for fault injection
pub async fn memory_env(workers: usize) -> (MultiEnvironment, Arc<MemoryTransport>) {
    let net = MemoryTransport::new(RpcConfig::default()).shared();
    let launcher = TaskLauncher::memory(registry(), net.clone());
    let env = MultiEnvironment::start(config(), Box::new(launcher), workers)
        .await
        .expect("environment starts");
    (env, net)
}

/// Creator key of the `id`-th agent spawned on `worker`
pub fn creator(worker: &str, id: u32) -> String {
    AgentAddress::new(worker, id).to_string()
}
