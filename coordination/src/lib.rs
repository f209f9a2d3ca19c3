//! Multi-Environment Coordination Library
//!
//! This library provides the orchestration and consensus layer for agents
//! spread across isolated worker environments:
//!
//! - Local managers hosting agents inside each worker
//! - A master manager relaying every call and acting as the workers' host
//! - The `MultiEnvironment` orchestrator: balanced spawning, concurrent
//!   fan-out, candidate validation by intersection and voting
//! - A voting engine (IRV, mean, best, least-worst, random)
//! - Length-delimited JSON RPC over TCP, plus an in-memory transport
//!
//! # Usage
//!
//! ```bash
//! # Run three worker processes and ten rounds of mean voting
//! swarm-agents run --workers 3 --agents 2 --rounds 10 --method mean
//!
//! # Run a single worker environment by hand
//! swarm-agents worker --listen 127.0.0.1:5560
//! ```

pub mod address;
pub mod agent;
pub mod artifact;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod rpc;
pub mod simulation;
pub mod validation;
pub mod voting;

// Re-export addressing and wire model types
pub use address::{AddressParseError, AgentAddress, MANAGER_ID};
pub use artifact::{Artifact, Candidate, CandidateId, Vote, VoteList};

// Re-export agent contract types
pub use agent::{ActContext, Action, Agent, AgentConstructor, AgentError, AgentInit, AgentRegistry};

// Re-export error and config types
pub use config::{ConfigError, ConfigResult, MultiEnvConfig, RpcConfig, VotingConfig};
pub use error::{EnvError, EnvResult, ErrorKind, RemoteError};

// Re-export event types
pub use events::{EventBus, EventBusExt, EventFilter, SharedEventBus, SwarmEvent};

// Re-export manager and orchestrator types
pub use manager::{LocalManager, MasterManager, SharedMasterManager};
pub use orchestrator::{
    serve_worker, MultiEnvironment, ProcessLauncher, RegistryHandle, TaskLauncher,
    WorkerDescriptor, WorkerLauncher, WorkerServer,
};

// Re-export RPC types
pub use rpc::{
    ActOutcome, AgentInfo, MemoryTransport, Reply, Request, RpcHandler, RpcServer, RpcTransport,
    SharedTransport, SpawnedAgent, TcpTransport, TriggerResult,
};

// Re-export simulation and voting types
pub use simulation::{RoundReport, Simulation};
pub use voting::{Ranking, VoteSet, VotingEngine, VotingError, VotingMethod, VotingResult};
