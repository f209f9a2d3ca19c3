//! Manager endpoints
//!
//! - [`LocalManager`]: one per worker, owns that worker's agents
//! - [`MasterManager`]: one per orchestrator, relays to every worker and
//!   acts as their host

pub mod local;
pub mod master;

pub use local::{summary_file_name, write_summary, LocalManager};
pub use master::{MasterManager, SharedMasterManager};
