//! Demonstration agents for multi-environment swarms.
//!
//! The `swarm-agents` binary runs either side of the system: `worker`
//! serves one environment hosting these agents, `run` starts an
//! orchestrator over a pool of workers and drives voting rounds.

pub mod agents;

pub use agents::registry;
