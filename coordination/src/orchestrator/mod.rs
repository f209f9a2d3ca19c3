//! Orchestration across worker environments
//!
//! - `multi_env`: the [`MultiEnvironment`] orchestrator
//! - `registry`: actor owning the global candidate and artifact sets
//! - `pool`: launchers that bring workers up and tear them down

pub mod multi_env;
pub mod pool;
pub mod registry;

pub use multi_env::{MultiEnvironment, WorkerDescriptor};
pub use pool::{
    serve_worker, ProcessLauncher, TaskLauncher, WorkerLauncher, WorkerServer,
    MEMORY_MASTER_ENDPOINT,
};
pub use registry::RegistryHandle;
