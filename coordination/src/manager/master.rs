//! Master manager: the orchestrator's relay to every local manager
//!
//! Outbound, each method takes a worker endpoint and forwards one RPC.
//! Inbound, it is the host every local manager reports to: opportunistic
//! candidate pushes land in the global registry and artifact pulls read
//! from it. It keeps no state of its own beyond the registry handle.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::address::AgentAddress;
use crate::artifact::{Artifact, Candidate, VoteList};
use crate::error::{EnvError, EnvResult};
use crate::orchestrator::registry::RegistryHandle;
use crate::rpc::protocol::{AgentInfo, Reply, Request, SpawnedAgent, TriggerResult};
use crate::rpc::server::RpcHandler;
use crate::rpc::transport::SharedTransport;

/// Relay between the orchestrator and its workers
pub struct MasterManager {
    address: AgentAddress,
    transport: SharedTransport,
    registry: RegistryHandle,
}

/// Shared reference to the master manager
pub type SharedMasterManager = Arc<MasterManager>;

impl MasterManager {
    pub fn new(
        endpoint: impl Into<String>,
        transport: SharedTransport,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            address: AgentAddress::manager(endpoint),
            transport,
            registry,
        }
    }

    /// Create a shared reference to this manager
    pub fn shared(self) -> SharedMasterManager {
        Arc::new(self)
    }

    pub fn address(&self) -> &AgentAddress {
        &self.address
    }

    async fn call(&self, worker: &str, request: Request) -> EnvResult<Reply> {
        debug!(worker, method = request.method(), "Forwarding");
        self.transport.call(worker, request).await
    }

    /// Whether `worker` accepts connections at all
    pub async fn probe(&self, worker: &str) -> bool {
        self.transport.probe(worker).await
    }

    pub async fn spawn(
        &self,
        worker: &str,
        class: &str,
        name: Option<String>,
        args: Value,
    ) -> EnvResult<SpawnedAgent> {
        self.call(
            worker,
            Request::Spawn {
                class: class.to_string(),
                name,
                args,
            },
        )
        .await?
        .into_spawned("spawn")
    }

    pub async fn spawn_n(
        &self,
        worker: &str,
        class: &str,
        n: usize,
        args: Value,
    ) -> EnvResult<Vec<SpawnedAgent>> {
        self.call(
            worker,
            Request::SpawnN {
                class: class.to_string(),
                n,
                args,
            },
        )
        .await?
        .into_spawned_many("spawn_n")
    }

    pub async fn get_agents(&self, worker: &str, class: Option<&str>) -> EnvResult<Vec<AgentInfo>> {
        self.call(
            worker,
            Request::GetAgents {
                class: class.map(str::to_string),
                addresses_only: false,
            },
        )
        .await?
        .into_agents("get_agents")
    }

    pub async fn get_addresses(
        &self,
        worker: &str,
        class: Option<&str>,
    ) -> EnvResult<Vec<AgentAddress>> {
        self.call(
            worker,
            Request::GetAgents {
                class: class.map(str::to_string),
                addresses_only: true,
            },
        )
        .await?
        .into_addresses("get_agents")
    }

    pub async fn trigger_all(&self, worker: &str, args: Value) -> EnvResult<Vec<TriggerResult>> {
        self.call(worker, Request::TriggerAll { args })
            .await?
            .into_triggered("trigger_all")
    }

    /// Trigger one agent on whichever worker hosts it
    pub async fn trigger_agent(
        &self,
        address: &AgentAddress,
        args: Value,
    ) -> EnvResult<Option<TriggerResult>> {
        self.call(
            address.endpoint(),
            Request::TriggerAgent {
                address: address.clone(),
                args,
            },
        )
        .await?
        .into_triggered_one("trigger_agent")
    }

    pub async fn candidates(&self, worker: &str) -> EnvResult<Vec<Candidate>> {
        self.call(worker, Request::Candidates)
            .await?
            .into_candidates("candidates")
    }

    pub async fn artifacts(&self, worker: &str) -> EnvResult<Vec<Artifact>> {
        self.call(worker, Request::Artifacts)
            .await?
            .into_artifacts("artifacts")
    }

    pub async fn validate_candidates(
        &self,
        worker: &str,
        candidates: Vec<Candidate>,
    ) -> EnvResult<Vec<Candidate>> {
        self.call(worker, Request::ValidateCandidates { candidates })
            .await?
            .into_candidates("validate_candidates")
    }

    pub async fn vote(&self, worker: &str, candidates: Vec<Candidate>) -> EnvResult<VoteList> {
        self.call(worker, Request::Vote { candidates })
            .await?
            .into_votes("vote")
    }

    pub async fn get_votes(
        &self,
        worker: &str,
        candidates: Vec<Candidate>,
    ) -> EnvResult<Vec<VoteList>> {
        self.call(worker, Request::GetVotes { candidates })
            .await?
            .into_vote_set("get_votes")
    }

    pub async fn clear_candidates(&self, worker: &str) -> EnvResult<()> {
        self.call(worker, Request::ClearCandidates)
            .await?
            .into_unit("clear_candidates")
    }

    pub async fn add_artifacts(&self, worker: &str, artifacts: Vec<Artifact>) -> EnvResult<()> {
        self.call(worker, Request::AddArtifacts { artifacts })
            .await?
            .into_unit("add_artifacts")
    }

    /// Introduce `peers` to `agent`; returns how many were new to it
    pub async fn connect_agents(
        &self,
        agent: &AgentAddress,
        peers: Vec<AgentAddress>,
    ) -> EnvResult<usize> {
        self.call(
            agent.endpoint(),
            Request::ConnectAgents {
                agent: agent.clone(),
                peers,
            },
        )
        .await?
        .into_count("connect_agents")
    }

    /// Tell `worker` that this master is its host
    pub async fn set_host_manager(&self, worker: &str) -> EnvResult<()> {
        self.call(
            worker,
            Request::SetHostManager {
                address: self.address.clone(),
            },
        )
        .await?
        .into_unit("set_host_manager")
    }

    pub async fn host_manager(&self, worker: &str) -> EnvResult<Option<AgentAddress>> {
        self.call(worker, Request::HostManager)
            .await?
            .into_host("host_manager")
    }

    pub async fn is_ready(&self, worker: &str) -> EnvResult<bool> {
        self.call(worker, Request::IsReady)
            .await?
            .into_bool("is_ready")
    }

    /// Stop `worker` and return its summary
    pub async fn kill(&self, worker: &str, folder: Option<PathBuf>) -> EnvResult<Value> {
        let summary = self
            .call(worker, Request::Stop { folder })
            .await?
            .into_json("stop")?;
        self.transport.disconnect(worker).await;
        info!(worker, "Worker killed");
        Ok(summary)
    }

    // ── inbound, from workers ──

    /// Worker-to-master candidate push, outside batch gathering
    pub async fn add_candidate(&self, candidate: Candidate) -> EnvResult<()> {
        debug!(candidate = %candidate.id, creator = %candidate.creator, "Candidate pushed");
        self.registry.add_candidates(vec![candidate]).await?;
        Ok(())
    }

    /// The global artifact registry, for a worker that asks
    pub async fn get_artifacts(&self) -> EnvResult<Vec<Artifact>> {
        self.registry.artifacts().await
    }

    /// Receiving end of a worker's `report`
    pub fn handle_message(&self, message: &Value) -> Value {
        info!(%message, "Report received");
        json!({ "handled_by": self.address.to_string() })
    }
}

#[async_trait]
impl RpcHandler for MasterManager {
    async fn handle(&self, request: Request) -> EnvResult<Reply> {
        match request {
            Request::AddCandidate { candidate } => {
                self.add_candidate(candidate).await.map(|()| Reply::Unit)
            }
            Request::GetArtifacts | Request::Artifacts => {
                self.get_artifacts().await.map(Reply::Artifacts)
            }
            Request::Handle { message } | Request::Report { message } => {
                Ok(Reply::Json(self.handle_message(&message)))
            }
            Request::IsReady => Ok(Reply::Bool(true)),
            Request::HostManager => Ok(Reply::Host(None)),
            other => Err(EnvError::Remote(format!(
                "{} is served by local managers",
                other.method()
            ))),
        }
    }
}
