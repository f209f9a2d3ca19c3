//! Local manager: the privileged endpoint inside one worker environment
//!
//! Owns the worker's agents and its per-round candidate set. It is the only
//! thing allowed to spawn agents or mutate local registries, and it answers
//! every call through [`RpcHandler`], so the orchestrator never touches
//! worker state except by request.
//!
//! ```text
//!   MasterManager ──rpc──▶ LocalManager ──▶ agent A1, A2, …
//!        ▲                     │
//!        └──── host link ──────┘  (report, add_candidate, get_artifacts)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::{AgentAddress, MANAGER_ID};
use crate::agent::{ActContext, Action, Agent, AgentInit, AgentRegistry};
use crate::artifact::{Artifact, Candidate, Vote, VoteList};
use crate::config::RpcConfig;
use crate::error::{EnvError, EnvResult};
use crate::rpc::protocol::{ActOutcome, AgentInfo, Reply, Request, SpawnedAgent, TriggerResult};
use crate::rpc::server::RpcHandler;
use crate::rpc::transport::SharedTransport;
use crate::validation;

type AgentCell = Arc<Mutex<Box<dyn Agent>>>;

struct AgentSlot {
    address: AgentAddress,
    class: String,
    name: String,
    age: u64,
    agent: AgentCell,
}

impl AgentSlot {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            address: self.address.clone(),
            class: self.class.clone(),
            name: self.name.clone(),
            age: self.age,
        }
    }
}

#[derive(Default)]
struct LocalState {
    /// Path segment for the next agent; 0 belongs to the manager
    next_id: u32,
    /// Keyed by path segment, so iteration is spawn order
    agents: BTreeMap<u32, AgentSlot>,
    candidates: Vec<Candidate>,
    artifacts: Arc<Vec<Artifact>>,
}

impl LocalState {
    fn cells(&self) -> Vec<AgentCell> {
        self.agents.values().map(|s| s.agent.clone()).collect()
    }

    fn add_candidate(&mut self, candidate: Candidate) -> bool {
        if self.candidates.iter().any(|c| c.id == candidate.id) {
            return false;
        }
        self.candidates.push(candidate);
        true
    }
}

/// Manager of one worker environment
pub struct LocalManager {
    address: AgentAddress,
    registry: AgentRegistry,
    transport: SharedTransport,
    rpc: RpcConfig,
    state: Mutex<LocalState>,
    host: OnceLock<AgentAddress>,
    shutdown: CancellationToken,
}

impl LocalManager {
    /// Manager for the environment listening on `endpoint`
    pub fn new(
        endpoint: impl Into<String>,
        registry: AgentRegistry,
        transport: SharedTransport,
        rpc: RpcConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            address: AgentAddress::manager(endpoint),
            registry,
            transport,
            rpc,
            state: Mutex::new(LocalState {
                next_id: MANAGER_ID + 1,
                ..Default::default()
            }),
            host: OnceLock::new(),
            shutdown,
        }
    }

    /// Create a shared reference to this manager
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn address(&self) -> &AgentAddress {
        &self.address
    }

    pub fn endpoint(&self) -> &str {
        self.address.endpoint()
    }

    /// Fires once `stop` has run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ── agent lifecycle ──

    /// Instantiate one agent of `class`; `name` defaults to `A<n>`.
    ///
    /// Only caller-supplied names are checked for duplicates.
    pub async fn spawn(
        &self,
        class: &str,
        name: Option<String>,
        args: Value,
    ) -> EnvResult<SpawnedAgent> {
        let mut state = self.state.lock().await;
        self.spawn_locked(&mut state, class, name, args)
    }

    /// Instantiate `n` agents of `class` in one call
    pub async fn spawn_n(&self, class: &str, n: usize, args: Value) -> EnvResult<Vec<SpawnedAgent>> {
        let mut state = self.state.lock().await;
        let mut spawned = Vec::with_capacity(n);
        for _ in 0..n {
            spawned.push(self.spawn_locked(&mut state, class, None, args.clone())?);
        }
        Ok(spawned)
    }

    fn spawn_locked(
        &self,
        state: &mut LocalState,
        class: &str,
        name: Option<String>,
        args: Value,
    ) -> EnvResult<SpawnedAgent> {
        let id = state.next_id;
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) if state.agents.values().any(|s| s.name == name) => {
                return Err(EnvError::DuplicateName(name));
            }
            Some(name) => name,
            None => format!("A{id}"),
        };

        let address = AgentAddress::new(self.endpoint(), id);
        let init = AgentInit {
            address: address.clone(),
            name: name.clone(),
            args,
        };
        let agent = self
            .registry
            .instantiate(class, init)
            .map_err(|e| EnvError::Instantiation(e.to_string()))?;

        state.next_id += 1;
        state.agents.insert(
            id,
            AgentSlot {
                address: address.clone(),
                class: class.to_string(),
                name: name.clone(),
                age: 0,
                agent: Arc::new(Mutex::new(agent)),
            },
        );
        debug!(%address, class, %name, "Spawned agent");

        Ok(SpawnedAgent {
            address,
            class: class.to_string(),
            name,
        })
    }

    /// Live agents, never including the manager itself
    pub async fn get_agents(&self, class: Option<&str>) -> Vec<AgentInfo> {
        let state = self.state.lock().await;
        state
            .agents
            .values()
            .filter(|s| !s.address.is_manager())
            .filter(|s| class.map_or(true, |c| s.class == c))
            .map(AgentSlot::info)
            .collect()
    }

    // ── acting ──

    /// Age every agent by one tick, then let them all act concurrently.
    ///
    /// Results come back in agent order. The first failing agent fails the
    /// whole call.
    pub async fn trigger_all(&self, args: Value) -> EnvResult<Vec<TriggerResult>> {
        let (batch, artifacts) = {
            let mut state = self.state.lock().await;
            let artifacts = state.artifacts.clone();
            let batch: Vec<(AgentAddress, u64, AgentCell)> = state
                .agents
                .values_mut()
                .map(|slot| {
                    slot.age += 1;
                    (slot.address.clone(), slot.age, slot.agent.clone())
                })
                .collect();
            (batch, artifacts)
        };

        let acts = batch.into_iter().map(|(address, age, cell)| {
            let ctx = ActContext {
                address,
                age,
                artifacts: artifacts.clone(),
                args: args.clone(),
            };
            async move {
                let action = cell
                    .lock()
                    .await
                    .act(&ctx)
                    .await
                    .map_err(|e| EnvError::Agent(format!("{}: {e}", ctx.address)))?;
                Ok::<_, EnvError>((ctx.address, action))
            }
        });
        let actions = try_join_all(acts).await?;

        let mut results = Vec::with_capacity(actions.len());
        for (address, action) in actions {
            let outcome = self.apply_action(&address, action).await?;
            results.push(TriggerResult { address, outcome });
        }
        debug!(endpoint = self.endpoint(), agents = results.len(), "Triggered all agents");
        Ok(results)
    }

    /// Age and act a single agent; the manager address is skipped
    pub async fn trigger_agent(
        &self,
        address: &AgentAddress,
        args: Value,
    ) -> EnvResult<Option<TriggerResult>> {
        if address.is_manager() {
            debug!(%address, "Skipping manager from acting");
            return Ok(None);
        }
        let (age, cell, artifacts) = {
            let mut state = self.state.lock().await;
            let artifacts = state.artifacts.clone();
            let slot = state
                .agents
                .get_mut(&address.id())
                .filter(|s| &s.address == address)
                .ok_or_else(|| EnvError::unknown_agent(address))?;
            slot.age += 1;
            (slot.age, slot.agent.clone(), artifacts)
        };

        let ctx = ActContext {
            address: address.clone(),
            age,
            artifacts,
            args,
        };
        let action = cell
            .lock()
            .await
            .act(&ctx)
            .await
            .map_err(|e| EnvError::Agent(format!("{address}: {e}")))?;
        let outcome = self.apply_action(address, action).await?;
        Ok(Some(TriggerResult {
            address: address.clone(),
            outcome,
        }))
    }

    /// Candidates are attributed to the acting agent's address
    async fn apply_action(&self, address: &AgentAddress, action: Action) -> EnvResult<ActOutcome> {
        match action {
            Action::Idle => Ok(ActOutcome::Idle),
            Action::Propose(candidate) => {
                let candidate = candidate.attributed_to(address);
                let id = candidate.id.clone();
                self.state.lock().await.add_candidate(candidate);
                Ok(ActOutcome::Proposed(id))
            }
            Action::Publish(candidate) => {
                let candidate = candidate.attributed_to(address);
                let id = candidate.id.clone();
                self.call_host(Request::AddCandidate { candidate })
                    .await?
                    .into_unit("add_candidate")?;
                Ok(ActOutcome::Published(id))
            }
        }
    }

    // ── candidates and artifacts ──

    pub async fn candidates(&self) -> Vec<Candidate> {
        self.state.lock().await.candidates.clone()
    }

    pub async fn artifacts(&self) -> Vec<Artifact> {
        self.state.lock().await.artifacts.as_ref().clone()
    }

    /// Candidates every local agent accepts, in input order
    pub async fn validate_candidates(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let cells = self.state.lock().await.cells();
        let mut accepted = Vec::with_capacity(cells.len());
        for cell in cells {
            accepted.push(cell.lock().await.validate(&candidates));
        }
        let valid = validation::intersect(&candidates, accepted);
        debug!(
            endpoint = self.endpoint(),
            before = candidates.len(),
            after = valid.len(),
            "Validated candidates locally"
        );
        valid
    }

    /// One vote list per local agent, in agent order
    pub async fn get_votes(&self, candidates: &[Candidate]) -> Vec<VoteList> {
        let cells = self.state.lock().await.cells();
        let mut votes = Vec::with_capacity(cells.len());
        for cell in cells {
            votes.push(cell.lock().await.vote(candidates));
        }
        votes
    }

    /// The manager's own ballot: every candidate scores 1.0
    pub fn vote(&self, candidates: &[Candidate]) -> VoteList {
        candidates
            .iter()
            .map(|c| Vote::new(c.id.clone(), 1.0))
            .collect()
    }

    pub async fn clear_candidates(&self) {
        self.state.lock().await.candidates.clear();
    }

    /// Record newly accepted artifacts and tell every agent about them
    pub async fn add_artifacts(&self, artifacts: Vec<Artifact>) {
        let cells = {
            let mut state = self.state.lock().await;
            Arc::make_mut(&mut state.artifacts).extend(artifacts.iter().cloned());
            state.cells()
        };
        for cell in cells {
            let mut agent = cell.lock().await;
            for artifact in &artifacts {
                agent.domain_artifact_added(artifact);
            }
        }
    }

    /// Introduce `peers` to the local agent at `agent`; returns how many were new
    pub async fn connect_agents(
        &self,
        agent: &AgentAddress,
        peers: Vec<AgentAddress>,
    ) -> EnvResult<usize> {
        let cell = {
            let state = self.state.lock().await;
            state
                .agents
                .get(&agent.id())
                .filter(|s| &s.address == agent)
                .map(|s| s.agent.clone())
                .ok_or_else(|| EnvError::unknown_agent(agent))?
        };
        let mut cell = cell.lock().await;
        Ok(peers
            .into_iter()
            .filter(|p| p != agent)
            .filter(|p| cell.add_connection(p.clone()))
            .count())
    }

    // ── host link ──

    /// Bind the host link; binding the same address again is a no-op
    pub fn set_host_manager(&self, address: AgentAddress) -> EnvResult<()> {
        match self.host.get() {
            Some(current) if *current == address => Ok(()),
            Some(current) => Err(EnvError::HostAlreadyBound(current.to_string())),
            None => {
                let bound = self.host.get_or_init(|| address.clone());
                if *bound != address {
                    return Err(EnvError::HostAlreadyBound(bound.to_string()));
                }
                info!(endpoint = self.endpoint(), host = %address, "Host manager set");
                Ok(())
            }
        }
    }

    pub fn host_manager(&self) -> Option<AgentAddress> {
        self.host.get().cloned()
    }

    /// Ready once the host link exists and the worker is not stopping
    pub fn is_ready(&self) -> bool {
        self.host.get().is_some() && !self.shutdown.is_cancelled()
    }

    async fn call_host(&self, request: Request) -> EnvResult<Reply> {
        let host = self.host.get().ok_or(EnvError::NoHostLink)?;
        let method = request.method();
        let timeout = self.rpc.host_timeout();
        let call = self.transport.call(host.endpoint(), request);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) if e.is_unreachable() => {
                warn!(endpoint = self.endpoint(), method, error = %e, "Host unreachable");
                Err(EnvError::UnreachableHost(e.to_string()))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EnvError::UnreachableHost(format!(
                "{} did not answer {method} within {timeout:?}",
                host.endpoint()
            ))),
        }
    }

    /// Forward `message` up the host link
    pub async fn report(&self, message: Value) -> EnvResult<Value> {
        self.call_host(Request::Handle { message })
            .await?
            .into_json("handle")
    }

    /// Pull the global artifact registry through the host link
    pub async fn host_artifacts(&self) -> EnvResult<Vec<Artifact>> {
        self.call_host(Request::GetArtifacts)
            .await?
            .into_artifacts("get_artifacts")
    }

    /// Receiving end of a `report` aimed at this manager
    pub fn handle_message(&self, message: &Value) -> Value {
        debug!(endpoint = self.endpoint(), %message, "Handled message");
        json!({ "handled_by": self.address.to_string() })
    }

    // ── shutdown ──

    /// Close every agent, optionally write the summary to `folder`, then
    /// fire the shutdown token. The token fires even when the write fails.
    /// Calling twice is not supported.
    pub async fn stop(&self, folder: Option<PathBuf>) -> EnvResult<Value> {
        let slots: Vec<(AgentInfo, AgentCell)> = {
            let state = self.state.lock().await;
            state
                .agents
                .values()
                .map(|s| (s.info(), s.agent.clone()))
                .collect()
        };

        let count = slots.len();
        let mut agents = Vec::with_capacity(count);
        for (info, cell) in slots {
            let summary = cell.lock().await.close(folder.as_deref());
            agents.push(json!({
                "address": info.address,
                "class": info.class,
                "name": info.name,
                "age": info.age,
                "summary": summary,
            }));
        }

        let (candidates, artifacts) = {
            let state = self.state.lock().await;
            (state.candidates.len(), state.artifacts.len())
        };
        let summary = json!({
            "endpoint": self.endpoint(),
            "host": self.host_manager(),
            "agents": agents,
            "candidates": candidates,
            "artifacts": artifacts,
        });

        let written = match folder.as_deref() {
            Some(folder) => {
                write_summary(folder, &summary_file_name(self.endpoint()), &summary).await
            }
            None => Ok(()),
        };

        info!(endpoint = self.endpoint(), agents = count, "Worker stopping");
        self.shutdown.cancel();
        written.map(|()| summary)
    }
}

/// File-system safe summary name for an endpoint
pub fn summary_file_name(endpoint: &str) -> String {
    let safe: String = endpoint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("worker_{safe}.json")
}

/// Write `summary` as pretty JSON to `folder/file_name`
pub async fn write_summary(folder: &Path, file_name: &str, summary: &Value) -> EnvResult<()> {
    tokio::fs::create_dir_all(folder).await?;
    let path = folder.join(file_name);
    let bytes = serde_json::to_vec_pretty(summary)?;
    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), "Summary written");
    Ok(())
}

#[async_trait]
impl RpcHandler for LocalManager {
    async fn handle(&self, request: Request) -> EnvResult<Reply> {
        match request {
            Request::Spawn { class, name, args } => {
                self.spawn(&class, name, args).await.map(Reply::Spawned)
            }
            Request::SpawnN { class, n, args } => {
                self.spawn_n(&class, n, args).await.map(Reply::SpawnedMany)
            }
            Request::GetAgents {
                class,
                addresses_only,
            } => {
                let agents = self.get_agents(class.as_deref()).await;
                Ok(if addresses_only {
                    Reply::Addresses(agents.into_iter().map(|a| a.address).collect())
                } else {
                    Reply::Agents(agents)
                })
            }
            Request::TriggerAll { args } => self.trigger_all(args).await.map(Reply::Triggered),
            Request::TriggerAgent { address, args } => self
                .trigger_agent(&address, args)
                .await
                .map(Reply::TriggeredOne),
            Request::Candidates => Ok(Reply::Candidates(self.candidates().await)),
            Request::Artifacts => Ok(Reply::Artifacts(self.artifacts().await)),
            Request::ValidateCandidates { candidates } => Ok(Reply::Candidates(
                self.validate_candidates(candidates).await,
            )),
            Request::Vote { candidates } => Ok(Reply::Votes(self.vote(&candidates))),
            Request::GetVotes { candidates } => {
                Ok(Reply::VoteSet(self.get_votes(&candidates).await))
            }
            Request::ClearCandidates => {
                self.clear_candidates().await;
                Ok(Reply::Unit)
            }
            Request::AddArtifacts { artifacts } => {
                self.add_artifacts(artifacts).await;
                Ok(Reply::Unit)
            }
            Request::ConnectAgents { agent, peers } => {
                self.connect_agents(&agent, peers).await.map(Reply::Count)
            }
            Request::SetHostManager { address } => {
                self.set_host_manager(address).map(|()| Reply::Unit)
            }
            Request::HostManager => Ok(Reply::Host(self.host_manager())),
            Request::IsReady => Ok(Reply::Bool(self.is_ready())),
            Request::Stop { folder } => self.stop(folder).await.map(Reply::Json),
            Request::Report { message } => self.report(message).await.map(Reply::Json),
            Request::Handle { message } => Ok(Reply::Json(self.handle_message(&message))),
            other @ (Request::AddCandidate { .. } | Request::GetArtifacts) => Err(
                EnvError::Remote(format!("{} is served by the master manager", other.method())),
            ),
        }
    }
}
