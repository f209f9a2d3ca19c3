//! Global candidate and artifact registries
//!
//! A single tokio task owns both collections plus the environment age.
//! Fan-out tasks, the master manager and the simulation all talk to it
//! through a cloneable [`RegistryHandle`], so every mutation is serialized
//! by the actor rather than by a lock.
//!
//! ```text
//!  MultiEnvironment ─┐
//!  MasterManager ────┼── mpsc<Command> ──▶ registry task (candidates, artifacts, age)
//!  Simulation ───────┘        ▲                     │
//!                             └──── oneshot reply ◀─┘
//! ```

use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::address::AgentAddress;
use crate::artifact::{Artifact, Candidate, CandidateId};
use crate::error::{EnvError, EnvResult};

const COMMAND_BUFFER: usize = 256;

enum Command {
    AddCandidates {
        candidates: Vec<Candidate>,
        reply: oneshot::Sender<usize>,
    },
    Candidates {
        reply: oneshot::Sender<Vec<Candidate>>,
    },
    RetainCandidates {
        examined: HashSet<CandidateId>,
        keep: HashSet<CandidateId>,
        reply: oneshot::Sender<usize>,
    },
    ClearCandidates,
    AddArtifacts {
        artifacts: Vec<Artifact>,
        reply: oneshot::Sender<usize>,
    },
    Artifacts {
        creator: Option<String>,
        reply: oneshot::Sender<Vec<Artifact>>,
    },
    Age {
        reply: oneshot::Sender<u64>,
    },
    Tick {
        reply: oneshot::Sender<u64>,
    },
}

#[derive(Default)]
struct Registry {
    candidates: Vec<Candidate>,
    artifacts: Vec<Artifact>,
    age: u64,
}

impl Registry {
    fn apply(&mut self, command: Command) {
        match command {
            Command::AddCandidates { candidates, reply } => {
                let mut added = 0;
                for candidate in candidates {
                    if !self.candidates.iter().any(|c| c.id == candidate.id) {
                        self.candidates.push(candidate);
                        added += 1;
                    }
                }
                let _ = reply.send(added);
            }
            Command::Candidates { reply } => {
                let _ = reply.send(self.candidates.clone());
            }
            Command::RetainCandidates {
                examined,
                keep,
                reply,
            } => {
                let before = self.candidates.len();
                self.candidates
                    .retain(|c| !examined.contains(&c.id) || keep.contains(&c.id));
                let _ = reply.send(before - self.candidates.len());
            }
            Command::ClearCandidates => self.candidates.clear(),
            Command::AddArtifacts { artifacts, reply } => {
                self.artifacts.extend(artifacts);
                let _ = reply.send(self.artifacts.len());
            }
            Command::Artifacts { creator, reply } => {
                let artifacts = match creator {
                    Some(creator) => self
                        .artifacts
                        .iter()
                        .filter(|a| a.creator() == creator)
                        .cloned()
                        .collect(),
                    None => self.artifacts.clone(),
                };
                let _ = reply.send(artifacts);
            }
            Command::Age { reply } => {
                let _ = reply.send(self.age);
            }
            Command::Tick { reply } => {
                self.age += 1;
                let _ = reply.send(self.age);
            }
        }
    }
}

/// Cloneable handle to the registry task
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Start the registry task on the current runtime
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(COMMAND_BUFFER);
        tokio::spawn(async move {
            let mut registry = Registry::default();
            while let Some(command) = rx.recv().await {
                registry.apply(command);
            }
            debug!(
                artifacts = registry.artifacts.len(),
                "Registry task finished"
            );
        });
        Self { tx }
    }

    async fn send(&self, command: Command) -> EnvResult<()> {
        self.tx.send(command).await.map_err(|_| EnvError::Registry)
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> EnvResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| EnvError::Registry)
    }

    /// Append candidates not already present (by id); returns how many were new
    pub async fn add_candidates(&self, candidates: Vec<Candidate>) -> EnvResult<usize> {
        self.ask(|reply| Command::AddCandidates { candidates, reply })
            .await
    }

    pub async fn candidates(&self) -> EnvResult<Vec<Candidate>> {
        self.ask(|reply| Command::Candidates { reply }).await
    }

    /// Drop every candidate in `examined` that is not in `valid`; returns
    /// how many were dropped. Candidates added since `examined` was read
    /// are left alone.
    pub async fn retain_validated(
        &self,
        examined: &[Candidate],
        valid: &[Candidate],
    ) -> EnvResult<usize> {
        let examined = examined.iter().map(|c| c.id.clone()).collect();
        let keep = valid.iter().map(|c| c.id.clone()).collect();
        self.ask(|reply| Command::RetainCandidates {
            examined,
            keep,
            reply,
        })
        .await
    }

    pub async fn clear_candidates(&self) -> EnvResult<()> {
        self.send(Command::ClearCandidates).await
    }

    /// Append to the artifact registry; returns its new length
    pub async fn add_artifacts(&self, artifacts: Vec<Artifact>) -> EnvResult<usize> {
        self.ask(|reply| Command::AddArtifacts { artifacts, reply })
            .await
    }

    pub async fn artifacts(&self) -> EnvResult<Vec<Artifact>> {
        self.ask(|reply| Command::Artifacts {
            creator: None,
            reply,
        })
        .await
    }

    /// Artifacts created by the agent at `creator`
    pub async fn artifacts_by(&self, creator: &AgentAddress) -> EnvResult<Vec<Artifact>> {
        self.ask(|reply| Command::Artifacts {
            creator: Some(creator.to_string()),
            reply,
        })
        .await
    }

    pub async fn age(&self) -> EnvResult<u64> {
        self.ask(|reply| Command::Age { reply }).await
    }

    /// Advance the environment age by one; returns the new age
    pub async fn tick(&self) -> EnvResult<u64> {
        self.ask(|reply| Command::Tick { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(n: u8) -> AgentAddress {
        AgentAddress::new("w:0", u32::from(n))
    }

    fn c(n: u8) -> Candidate {
        Candidate::new("t", agent(n).to_string(), vec![n])
    }

    #[tokio::test]
    async fn test_candidates_dedupe_by_id() {
        let registry = RegistryHandle::spawn();
        assert_eq!(registry.add_candidates(vec![c(1), c(2)]).await.unwrap(), 2);
        assert_eq!(registry.add_candidates(vec![c(2), c(3)]).await.unwrap(), 1);
        assert_eq!(registry.candidates().await.unwrap(), vec![c(1), c(2), c(3)]);

        let examined = registry.candidates().await.unwrap();
        assert_eq!(
            registry.retain_validated(&examined, &[c(2)]).await.unwrap(),
            2
        );
        assert_eq!(registry.candidates().await.unwrap(), vec![c(2)]);
        registry.clear_candidates().await.unwrap();
        registry.clear_candidates().await.unwrap();
        assert!(registry.candidates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_artifacts_append_only_and_filter() {
        let registry = RegistryHandle::spawn();
        let first = Artifact::accept(c(1), 1, 0.5);
        let second = Artifact::accept(c(2), 2, 0.7);
        assert_eq!(registry.add_artifacts(vec![first.clone()]).await.unwrap(), 1);
        assert_eq!(registry.add_artifacts(vec![second]).await.unwrap(), 2);
        registry.clear_candidates().await.unwrap();
        assert_eq!(registry.artifacts().await.unwrap().len(), 2);
        assert_eq!(registry.artifacts_by(&agent(1)).await.unwrap(), vec![first]);
        assert!(registry.artifacts_by(&agent(9)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_keeps_late_pushes() {
        let registry = RegistryHandle::spawn();
        registry.add_candidates(vec![c(1), c(2)]).await.unwrap();
        let examined = registry.candidates().await.unwrap();

        // Pushed by a worker while the validation fan-out was in flight
        registry.add_candidates(vec![c(3)]).await.unwrap();

        let dropped = registry.retain_validated(&examined, &[c(1)]).await.unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(registry.candidates().await.unwrap(), vec![c(1), c(3)]);
    }

    #[tokio::test]
    async fn test_age_ticks() {
        let registry = RegistryHandle::spawn();
        assert_eq!(registry.age().await.unwrap(), 0);
        assert_eq!(registry.tick().await.unwrap(), 1);
        assert_eq!(registry.tick().await.unwrap(), 2);
        assert_eq!(registry.age().await.unwrap(), 2);
    }
}
