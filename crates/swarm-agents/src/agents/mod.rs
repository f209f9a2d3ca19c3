//! Demonstration agents.
//!
//! Both agents search the same bounded plane (see [`vector`]) so their
//! candidates can be judged by each other:
//!
//! - [`NoveltyAgent`] ("novelty"): proposes points far from what it remembers
//! - [`TargetAgent`] ("target"): walks toward a point and publishes progress
//!   directly to the master

pub mod novelty;
pub mod target;
pub mod vector;

use coordination::{Agent, AgentRegistry};

pub use novelty::{NoveltyAgent, NoveltyArgs};
pub use target::{TargetAgent, TargetArgs};

pub const NOVELTY: &str = "novelty";
pub const TARGET: &str = "target";

/// Registry holding every demonstration agent class
pub fn registry() -> AgentRegistry {
    AgentRegistry::new()
        .with(NOVELTY, |init| {
            NoveltyAgent::new(init).map(|a| Box::new(a) as Box<dyn Agent>)
        })
        .with(TARGET, |init| {
            TargetAgent::new(init).map(|a| Box::new(a) as Box<dyn Agent>)
        })
}
