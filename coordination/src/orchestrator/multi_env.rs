//! MultiEnvironment: the top-level orchestrator
//!
//! Owns the worker pool, the master manager and the global registries, and
//! drives every round by fanning requests out to the local managers.
//!
//! ```text
//!                     ┌──────────────────────────┐
//!                     │     MultiEnvironment     │
//!                     │ registry ◀── master ─────┼──▶ worker-0 (LocalManager)
//!                     │ voting engine            ├──▶ worker-1 (LocalManager)
//!                     │ event bus                ├──▶ worker-2 (LocalManager)
//!                     └──────────────────────────┘
//! ```
//!
//! Fan-outs are issued concurrently and merged in worker order. Any failing
//! worker fails the whole operation with the first error in worker order.
//! `is_ready`, `wait_slaves` and `destroy` are the exceptions: they never
//! fail on an unreachable worker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::pool::WorkerLauncher;
use super::registry::RegistryHandle;
use crate::address::AgentAddress;
use crate::artifact::{Artifact, Candidate};
use crate::config::MultiEnvConfig;
use crate::error::{EnvError, EnvResult};
use crate::events::{EventBus, SharedEventBus, SwarmEvent};
use crate::manager::{write_summary, MasterManager, SharedMasterManager};
use crate::rpc::protocol::{AgentInfo, SpawnedAgent, TriggerResult};
use crate::validation;
use crate::voting::{Ranking, VoteSet, VotingEngine, VotingMethod};

/// A worker and how many agents it hosted when last asked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerDescriptor {
    pub endpoint: String,
    pub agents: usize,
}

/// Index of the first worker holding the fewest agents
fn first_minimum(counts: &[usize]) -> Option<usize> {
    counts
        .iter()
        .enumerate()
        .min_by_key(|(_, count)| **count)
        .map(|(index, _)| index)
}

/// Orchestrator over a pool of worker environments
pub struct MultiEnvironment {
    config: MultiEnvConfig,
    master: SharedMasterManager,
    registry: RegistryHandle,
    workers: Vec<String>,
    launcher: Mutex<Box<dyn WorkerLauncher>>,
    voting: Mutex<VotingEngine>,
    rng: Mutex<StdRng>,
    /// Global agent list, valid until the next spawn
    agents: Mutex<Option<Vec<AgentInfo>>>,
    events: SharedEventBus,
}

impl MultiEnvironment {
    /// Start the master, launch `workers` environments and bind each of
    /// them to the master as its host.
    ///
    /// If anything fails after launch the pool is terminated before the
    /// error is returned.
    pub async fn start(
        config: MultiEnvConfig,
        mut launcher: Box<dyn WorkerLauncher>,
        workers: usize,
    ) -> EnvResult<Self> {
        let registry = RegistryHandle::spawn();
        let transport = launcher.transport();

        let (master_endpoint, endpoints) = match Self::bring_up(launcher.as_mut(), workers).await
        {
            Ok(bound) => bound,
            Err(e) => {
                launcher.terminate().await;
                return Err(e);
            }
        };
        let master = MasterManager::new(master_endpoint, transport, registry.clone()).shared();
        if let Err(e) = launcher.serve_master(master.clone()).await {
            launcher.terminate().await;
            return Err(e);
        }

        let rng = match config.voting.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let env = Self {
            voting: Mutex::new(VotingEngine::new(config.voting.seed)),
            rng: Mutex::new(rng),
            config,
            master,
            registry,
            workers: endpoints,
            launcher: Mutex::new(launcher),
            agents: Mutex::new(None),
            events: EventBus::new().shared(),
        };

        if let Err(e) = env.connect_workers().await {
            env.launcher.lock().await.terminate().await;
            return Err(e);
        }
        info!(
            name = %env.config.name,
            master = %env.master.address(),
            workers = env.workers.len(),
            "Environment ready"
        );
        Ok(env)
    }

    async fn bring_up(
        launcher: &mut dyn WorkerLauncher,
        workers: usize,
    ) -> EnvResult<(String, Vec<String>)> {
        let master = launcher.bind_master().await?;
        let endpoints = launcher.launch(workers).await?;
        Ok((master, endpoints))
    }

    async fn connect_workers(&self) -> EnvResult<()> {
        let timeout = self.config.startup_timeout();
        if !self.wait_slaves(timeout, false).await {
            return Err(EnvError::Launch(format!(
                "workers not connectable within {timeout:?}"
            )));
        }
        try_join_all(self.workers.iter().map(|w| self.master.set_host_manager(w))).await?;
        for worker in &self.workers {
            self.events.publish(SwarmEvent::WorkerReady {
                worker: worker.clone(),
                timestamp: chrono::Utc::now(),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &MultiEnvConfig {
        &self.config
    }

    pub fn master(&self) -> &SharedMasterManager {
        &self.master
    }

    /// Worker endpoints in iteration order
    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub fn events(&self) -> SharedEventBus {
        self.events.clone()
    }

    // ── age ──

    pub async fn age(&self) -> EnvResult<u64> {
        self.registry.age().await
    }

    /// Advance the environment age; returns the new age
    pub async fn tick(&self) -> EnvResult<u64> {
        self.registry.tick().await
    }

    // ── population ──

    /// Agent counts per worker, read fresh
    pub async fn worker_descriptors(&self) -> EnvResult<Vec<WorkerDescriptor>> {
        let counts = try_join_all(
            self.workers
                .iter()
                .map(|w| self.master.get_addresses(w, None)),
        )
        .await?;
        Ok(self
            .workers
            .iter()
            .zip(counts)
            .map(|(endpoint, addresses)| WorkerDescriptor {
                endpoint: endpoint.clone(),
                agents: addresses.len(),
            })
            .collect())
    }

    /// Endpoint of the worker with the fewest agents; ties go to the first
    pub async fn least_loaded(&self) -> EnvResult<String> {
        let descriptors = self.worker_descriptors().await?;
        let counts: Vec<usize> = descriptors.iter().map(|d| d.agents).collect();
        first_minimum(&counts)
            .map(|i| descriptors[i].endpoint.clone())
            .ok_or(EnvError::NoWorkers)
    }

    /// Spawn one agent, on `worker` or else on the least loaded worker
    pub async fn spawn(
        &self,
        class: &str,
        args: Value,
        worker: Option<&str>,
    ) -> EnvResult<SpawnedAgent> {
        self.spawn_named(class, None, args, worker).await
    }

    /// [`spawn`](Self::spawn) with an explicit agent name
    pub async fn spawn_named(
        &self,
        class: &str,
        name: Option<String>,
        args: Value,
        worker: Option<&str>,
    ) -> EnvResult<SpawnedAgent> {
        let worker = match worker {
            Some(worker) => worker.to_string(),
            None => self.least_loaded().await?,
        };
        let spawned = self.master.spawn(&worker, class, name, args).await?;
        self.invalidate_agents().await;
        self.announce_spawn(&worker, &spawned);
        Ok(spawned)
    }

    /// Spawn `n` agents of `class`.
    ///
    /// With no `worker` the agents are spread so every worker ends within
    /// one agent of the others (given the counts read up front), and each
    /// worker receives a single batch call.
    pub async fn spawn_n(
        &self,
        class: &str,
        n: usize,
        args: Value,
        worker: Option<&str>,
    ) -> EnvResult<Vec<SpawnedAgent>> {
        let plan: Vec<(String, usize)> = match worker {
            Some(worker) => vec![(worker.to_string(), n)],
            None => {
                let descriptors = self.worker_descriptors().await?;
                if descriptors.is_empty() {
                    return Err(EnvError::NoWorkers);
                }
                let mut counts: Vec<usize> = descriptors.iter().map(|d| d.agents).collect();
                let mut batch = vec![0usize; counts.len()];
                for _ in 0..n {
                    if let Some(i) = first_minimum(&counts) {
                        counts[i] += 1;
                        batch[i] += 1;
                    }
                }
                descriptors
                    .into_iter()
                    .zip(batch)
                    .filter(|(_, k)| *k > 0)
                    .map(|(d, k)| (d.endpoint, k))
                    .collect()
            }
        };

        let batches = try_join_all(plan.iter().map(|(worker, k)| {
            self.master.spawn_n(worker, class, *k, args.clone())
        }))
        .await?;
        self.invalidate_agents().await;

        let mut spawned = Vec::with_capacity(n);
        for ((worker, _), batch) in plan.iter().zip(batches) {
            for agent in batch {
                self.announce_spawn(worker, &agent);
                spawned.push(agent);
            }
        }
        Ok(spawned)
    }

    fn announce_spawn(&self, worker: &str, spawned: &SpawnedAgent) {
        debug!(worker, address = %spawned.address, class = %spawned.class, "Agent spawned");
        self.events.publish(SwarmEvent::AgentSpawned {
            worker: worker.to_string(),
            address: spawned.address.clone(),
            class: spawned.class.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    async fn invalidate_agents(&self) {
        *self.agents.lock().await = None;
    }

    /// Every live agent across all workers, in worker order.
    ///
    /// The unfiltered list is cached until the next spawn.
    pub async fn get_agents(&self, class: Option<&str>) -> EnvResult<Vec<AgentInfo>> {
        if class.is_none() {
            if let Some(agents) = self.agents.lock().await.as_ref() {
                return Ok(agents.clone());
            }
        }
        let per_worker = try_join_all(
            self.workers
                .iter()
                .map(|w| self.master.get_agents(w, class)),
        )
        .await?;
        let agents: Vec<AgentInfo> = per_worker.into_iter().flatten().collect();
        if class.is_none() {
            *self.agents.lock().await = Some(agents.clone());
        }
        Ok(agents)
    }

    /// Addresses of every live agent, in worker order
    pub async fn get_addresses(&self) -> EnvResult<Vec<AgentAddress>> {
        Ok(self
            .get_agents(None)
            .await?
            .into_iter()
            .map(|a| a.address)
            .collect())
    }

    /// A uniformly chosen worker endpoint
    pub async fn random_addr(&self) -> Option<String> {
        let mut rng = self.rng.lock().await;
        self.workers.choose(&mut *rng).cloned()
    }

    /// A uniformly chosen agent other than `exclude`
    pub async fn random_agent(
        &self,
        exclude: Option<&AgentAddress>,
    ) -> EnvResult<Option<AgentAddress>> {
        let candidates: Vec<AgentAddress> = self
            .get_addresses()
            .await?
            .into_iter()
            .filter(|a| Some(a) != exclude)
            .collect();
        let mut rng = self.rng.lock().await;
        Ok(candidates.choose(&mut *rng).cloned())
    }

    /// Give every agent up to `n` distinct random peers from the global
    /// agent list; returns how many connections were new
    pub async fn create_initial_connections(&self, n: usize) -> EnvResult<usize> {
        let agents = self.get_addresses().await?;
        let plan: Vec<(AgentAddress, Vec<AgentAddress>)> = {
            let mut rng = self.rng.lock().await;
            agents
                .iter()
                .map(|agent| {
                    let mut peers: Vec<AgentAddress> =
                        agents.iter().filter(|a| *a != agent).cloned().collect();
                    peers.shuffle(&mut *rng);
                    peers.truncate(n);
                    (agent.clone(), peers)
                })
                .collect()
        };
        let added = try_join_all(
            plan.into_iter()
                .map(|(agent, peers)| async move { self.master.connect_agents(&agent, peers).await }),
        )
        .await?;
        let total: usize = added.into_iter().sum();
        debug!(agents = agents.len(), per_agent = n, total, "Initial connections created");
        Ok(total)
    }

    // ── acting ──

    /// Trigger every agent on every worker; results in worker order
    pub async fn trigger_all(&self, args: Value) -> EnvResult<Vec<TriggerResult>> {
        let per_worker = try_join_all(
            self.workers
                .iter()
                .map(|w| self.master.trigger_all(w, args.clone())),
        )
        .await?;
        Ok(per_worker.into_iter().flatten().collect())
    }

    pub async fn trigger_agent(
        &self,
        address: &AgentAddress,
        args: Value,
    ) -> EnvResult<Option<TriggerResult>> {
        self.master.trigger_agent(address, args).await
    }

    // ── candidates ──

    /// Collect every worker's local candidates into the global set.
    ///
    /// Returns the concatenation in worker order; the global set keeps one
    /// copy per candidate id.
    pub async fn gather_candidates(&self) -> EnvResult<Vec<Candidate>> {
        let per_worker =
            try_join_all(self.workers.iter().map(|w| self.master.candidates(w))).await?;
        let gathered: Vec<Candidate> = per_worker.into_iter().flatten().collect();
        let added = self.registry.add_candidates(gathered.clone()).await?;
        debug!(gathered = gathered.len(), added, "Candidates gathered");
        self.events.publish(SwarmEvent::CandidatesGathered {
            count: gathered.len(),
            timestamp: chrono::Utc::now(),
        });
        Ok(gathered)
    }

    /// Current global candidate set
    pub async fn candidates(&self) -> EnvResult<Vec<Candidate>> {
        self.registry.candidates().await
    }

    /// Keep only the candidates no worker vetoed
    pub async fn validate_candidates(&self) -> EnvResult<Vec<Candidate>> {
        let current = self.registry.candidates().await?;
        let per_worker = try_join_all(
            self.workers
                .iter()
                .map(|w| self.master.validate_candidates(w, current.clone())),
        )
        .await?;
        let valid = validation::intersect(&current, per_worker);
        // Pushes that arrived during the fan-out wait for the next round
        self.registry.retain_validated(&current, &valid).await?;
        debug!(before = current.len(), after = valid.len(), "Candidates validated");
        self.events.publish(SwarmEvent::CandidatesValidated {
            before: current.len(),
            after: valid.len(),
            timestamp: chrono::Utc::now(),
        });
        Ok(valid)
    }

    /// Every worker's vote lists for `candidates`, in worker order
    pub async fn gather_votes(&self, candidates: &[Candidate]) -> EnvResult<VoteSet> {
        let per_worker = try_join_all(
            self.workers
                .iter()
                .map(|w| self.master.get_votes(w, candidates.to_vec())),
        )
        .await?;
        Ok(per_worker.into_iter().flatten().collect())
    }

    /// Rank the global candidate set with `method`.
    ///
    /// An empty candidate set is logged and yields an empty ranking.
    pub async fn perform_voting(
        &self,
        method: VotingMethod,
        accepted: usize,
    ) -> EnvResult<Ranking> {
        let candidates = self.registry.candidates().await?;
        if candidates.is_empty() {
            warn!(%method, "No candidates to vote on");
            return Ok(Vec::new());
        }
        let votes = self.gather_votes(&candidates).await?;
        let ranking = self
            .voting
            .lock()
            .await
            .rank(method, &candidates, &votes, accepted);
        info!(
            %method,
            candidates = candidates.len(),
            ballots = votes.len(),
            accepted = ranking.len(),
            "Voting completed"
        );
        self.events.publish(SwarmEvent::VotingCompleted {
            method,
            candidates: candidates.len(),
            ballots: votes.len(),
            accepted: ranking.len(),
            timestamp: chrono::Utc::now(),
        });
        Ok(ranking)
    }

    /// Empty every worker's local set, then the global one
    pub async fn clear_candidates(&self) -> EnvResult<()> {
        try_join_all(self.workers.iter().map(|w| self.master.clear_candidates(w))).await?;
        self.registry.clear_candidates().await?;
        self.events.publish(SwarmEvent::CandidatesCleared {
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    // ── artifacts ──

    /// Accept one candidate as an artifact at the current age
    pub async fn add_artifact(&self, candidate: Candidate, score: f64) -> EnvResult<Artifact> {
        let artifact = Artifact::accept(candidate, self.registry.age().await?, score);
        self.accept(vec![artifact.clone()]).await?;
        Ok(artifact)
    }

    /// Accept a ranking's candidates as artifacts at the current age
    pub async fn add_artifacts(&self, ranking: Ranking) -> EnvResult<Vec<Artifact>> {
        let env_time = self.registry.age().await?;
        let artifacts: Vec<Artifact> = ranking
            .into_iter()
            .map(|(candidate, score)| Artifact::accept(candidate, env_time, score))
            .collect();
        self.accept(artifacts.clone()).await?;
        Ok(artifacts)
    }

    /// Record artifacts globally and broadcast them to every worker
    async fn accept(&self, artifacts: Vec<Artifact>) -> EnvResult<()> {
        if artifacts.is_empty() {
            return Ok(());
        }
        self.registry.add_artifacts(artifacts.clone()).await?;
        try_join_all(
            self.workers
                .iter()
                .map(|w| self.master.add_artifacts(w, artifacts.clone())),
        )
        .await?;
        for artifact in &artifacts {
            info!(
                candidate = %artifact.id(),
                creator = artifact.creator(),
                score = artifact.score,
                env_time = artifact.env_time,
                "Artifact accepted"
            );
            self.events.publish(SwarmEvent::ArtifactAccepted {
                candidate: artifact.id().clone(),
                creator: artifact.creator().to_string(),
                score: artifact.score,
                env_time: artifact.env_time,
                timestamp: artifact.accepted_at,
            });
        }
        Ok(())
    }

    pub async fn artifacts(&self) -> EnvResult<Vec<Artifact>> {
        self.registry.artifacts().await
    }

    /// Artifacts created by the agent at `creator`
    pub async fn artifacts_by(&self, creator: &AgentAddress) -> EnvResult<Vec<Artifact>> {
        self.registry.artifacts_by(creator).await
    }

    // ── readiness ──

    /// True when the registry answers and every worker reports ready.
    /// An unreachable worker counts as not ready.
    pub async fn is_ready(&self) -> bool {
        if self.registry.age().await.is_err() {
            return false;
        }
        let checks = self.workers.iter().map(|w| self.master.is_ready(w));
        join_all(checks)
            .await
            .into_iter()
            .all(|ready| matches!(ready, Ok(true)))
    }

    async fn worker_up(&self, worker: &str, check_ready: bool) -> bool {
        if !self.master.probe(worker).await {
            return false;
        }
        !check_ready || matches!(self.master.is_ready(worker).await, Ok(true))
    }

    /// Poll until every worker accepts connections (and, with
    /// `check_ready`, reports ready). False once `timeout` passes.
    pub async fn wait_slaves(&self, timeout: Duration, check_ready: bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending: Vec<&str> = self.workers.iter().map(String::as_str).collect();
        loop {
            let up = join_all(pending.iter().map(|w| self.worker_up(w, check_ready))).await;
            pending = pending
                .into_iter()
                .zip(up)
                .filter(|(_, up)| !up)
                .map(|(w, _)| w)
                .collect();
            if pending.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(waiting = ?pending, ?timeout, "Workers not up before deadline");
                return false;
            }
            tokio::time::sleep(self.config.ready_poll_interval()).await;
        }
    }

    // ── shutdown ──

    /// Summary of the environment; written to `<folder>/<name>.json` when
    /// a folder is given
    pub async fn save_info(&self, folder: Option<&Path>) -> EnvResult<Value> {
        let artifacts = self.registry.artifacts().await?;
        let info = json!({
            "name": self.config.name,
            "master": self.master.address(),
            "workers": self.workers,
            "age": self.registry.age().await?,
            "artifacts": artifacts
                .iter()
                .map(|a| json!({
                    "id": a.id(),
                    "creator": a.creator(),
                    "env_time": a.env_time,
                    "score": a.score,
                    "accepted_at": a.accepted_at,
                }))
                .collect::<Vec<_>>(),
        });
        if let Some(folder) = folder {
            write_summary(folder, &format!("{}.json", self.config.name), &info).await?;
        }
        Ok(info)
    }

    /// Save the summary, stop every worker one after another, then
    /// terminate the pool no matter what went wrong before.
    pub async fn destroy(self, folder: Option<PathBuf>) -> Value {
        let info = match self.save_info(folder.as_deref()).await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "Could not save environment info");
                Value::Null
            }
        };

        let mut stopped = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let entry = match self.master.kill(worker, folder.clone()).await {
                Ok(summary) => json!({ "worker": worker, "summary": summary }),
                Err(e) => {
                    warn!(worker = %worker, error = %e, "Worker did not stop cleanly");
                    json!({ "worker": worker, "error": e.to_string() })
                }
            };
            self.events.publish(SwarmEvent::WorkerStopped {
                worker: worker.clone(),
                clean: entry.get("error").is_none(),
                timestamp: chrono::Utc::now(),
            });
            stopped.push(entry);
        }

        self.launcher.lock().await.terminate().await;
        self.events.publish(SwarmEvent::EnvironmentDestroyed {
            workers: self.workers.len(),
            timestamp: chrono::Utc::now(),
        });
        info!(name = %self.config.name, "Environment destroyed");
        json!({ "info": info, "workers": stopped })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_minimum_wins_ties() {
        assert_eq!(first_minimum(&[2, 1, 1, 3]), Some(1));
        assert_eq!(first_minimum(&[0, 0, 0]), Some(0));
        assert_eq!(first_minimum(&[]), None);
    }
}
