//! Lifecycle events for multi-environment runs
//!
//! The orchestrator publishes a [`SwarmEvent`] at every state change of a
//! round so that drivers, dashboards and tests can follow along without
//! polling workers.
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ MultiEnvironment │────▶│  Event Bus   │────▶│  Subscribers │
//! │    (publish)     │     │  (broadcast) │     │   (recv)     │
//! └──────────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    EventBus, EventBusError, EventBusExt, EventBusResult, EventFilter, FilteredReceiver,
    SharedEventBus,
};
pub use types::{EventId, SwarmEvent};
