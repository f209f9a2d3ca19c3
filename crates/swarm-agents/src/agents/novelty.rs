//! Novelty-seeking agent
//!
//! Keeps a short-term memory of points it has seen and scores a candidate
//! by its distance to the closest remembered point. Each act it samples
//! `search_width` points around its current position, keeps the best, and
//! proposes it if it clears its own critic threshold.
//!
//! With a positive `desired_novelty` the score becomes a hedonic value: a
//! Gaussian around the desired distance, so too novel is as bad as too
//! familiar.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use coordination::{
    ActContext, Action, Agent, AgentAddress, AgentError, AgentInit, Artifact, Candidate,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::vector::{self, Point};

/// How the agent learns from artifacts already accepted in the domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMethod {
    None,
    Random,
    Closest,
}

/// What the agent does after a round where it proposed nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Jump {
    None,
    Random,
}

/// Spawn arguments; every field is optional
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoveltyArgs {
    /// Desired novelty; non-positive means maximise novelty
    pub desired_novelty: f64,
    pub search_width: usize,
    pub memsize: usize,
    pub learning_method: LearningMethod,
    pub learning_amount: usize,
    pub learn_on_add: bool,
    /// Other agents' candidates scoring below this are vetoed
    pub veto_threshold: f64,
    /// Own inventions scoring below this are not proposed
    pub critic_threshold: f64,
    pub jump: Jump,
    pub move_radius: f64,
    pub seed: Option<u64>,
}

impl Default for NoveltyArgs {
    fn default() -> Self {
        Self {
            desired_novelty: -1.0,
            search_width: 10,
            memsize: 36,
            learning_method: LearningMethod::Closest,
            learning_amount: 3,
            learn_on_add: true,
            veto_threshold: 0.10,
            critic_threshold: 0.10,
            jump: Jump::None,
            move_radius: 10.0,
            seed: None,
        }
    }
}

/// Bounded list of remembered points, newest first
#[derive(Debug, Clone)]
struct ShortTermMemory {
    capacity: usize,
    points: VecDeque<Point>,
}

impl ShortTermMemory {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: VecDeque::new(),
        }
    }

    fn learn(&mut self, point: Point) {
        if self.points.len() == self.capacity {
            self.points.pop_back();
        }
        self.points.push_front(point);
    }

    /// Distance to the closest remembered point, `None` while empty
    fn distance(&self, point: &Point) -> Option<f64> {
        self.points
            .iter()
            .map(|p| vector::distance(p, point))
            .min_by(f64::total_cmp)
    }
}

pub struct NoveltyAgent {
    name: String,
    address: AgentAddress,
    args: NoveltyArgs,
    position: Point,
    memory: ShortTermMemory,
    rng: StdRng,
    /// Own candidates that cleared the critic, oldest first
    created: Vec<Point>,
    /// Own candidates accepted into the domain
    accepted: usize,
    peers: Vec<AgentAddress>,
}

impl NoveltyAgent {
    pub fn new(init: AgentInit) -> Result<Self, AgentError> {
        let args: NoveltyArgs = init.args_as()?;
        if args.search_width == 0 {
            return Err(AgentError::InvalidArgs("search_width must be at least 1".into()));
        }
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let position = vector::random_point(&mut rng);
        Ok(Self {
            name: init.name,
            address: init.address,
            memory: ShortTermMemory::new(args.memsize),
            args,
            position,
            rng,
            created: Vec::new(),
            accepted: 0,
            peers: Vec::new(),
        })
    }

    /// Gaussian bump around the desired novelty, 1.0 at the peak
    fn hedonic(&self, novelty: f64) -> f64 {
        let spread = 4.0;
        let z = (novelty - self.args.desired_novelty) / spread;
        (-0.5 * z * z).exp()
    }

    fn score_point(&mut self, point: &Point) -> f64 {
        let novelty = match self.memory.distance(point) {
            Some(d) => d / vector::diameter(),
            // Nothing learned yet: everything is equally surprising
            None => self.rng.gen::<f64>(),
        };
        if self.args.desired_novelty > 0.0 {
            self.hedonic(novelty * vector::diameter())
        } else {
            novelty
        }
    }

    fn invent(&mut self) -> (Point, f64) {
        let origin = self.position;
        let first = vector::step(&mut self.rng, &origin, self.args.move_radius);
        let mut best = (first, self.score_point(&first));
        for _ in 1..self.args.search_width {
            let point = vector::step(&mut self.rng, &origin, self.args.move_radius);
            let score = self.score_point(&point);
            if score > best.1 {
                best = (point, score);
            }
        }
        best
    }

    fn learn_from_domain(&mut self, artifacts: &[Artifact]) {
        let points: Vec<Point> = artifacts
            .iter()
            .filter_map(|a| vector::decode(&a.candidate.payload))
            .collect();
        if points.is_empty() {
            return;
        }
        let amount = self.args.learning_amount.min(points.len());
        match self.args.learning_method {
            LearningMethod::None => {}
            LearningMethod::Random => {
                for point in points.choose_multiple(&mut self.rng, amount) {
                    self.memory.learn(*point);
                }
            }
            LearningMethod::Closest => {
                let mut by_distance: Vec<(f64, Point)> = points
                    .into_iter()
                    .map(|p| (vector::distance(&p, &self.position), p))
                    .collect();
                by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
                for (_, point) in by_distance.into_iter().take(amount) {
                    self.memory.learn(point);
                }
            }
        }
    }

    /// Mean distance from each created point to the closest earlier one
    fn mean_creation_distance(&self) -> f64 {
        let distances: Vec<f64> = self
            .created
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(i, p)| {
                self.created[..i]
                    .iter()
                    .map(|q| vector::distance(p, q))
                    .min_by(f64::total_cmp)
            })
            .collect();
        if distances.is_empty() {
            return 0.0;
        }
        distances.iter().sum::<f64>() / distances.len() as f64
    }
}

#[async_trait]
impl Agent for NoveltyAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &AgentAddress {
        &self.address
    }

    async fn act(&mut self, ctx: &ActContext) -> Result<Action, AgentError> {
        self.learn_from_domain(&ctx.artifacts);

        let (point, score) = self.invent();
        self.position = point;
        debug!(agent = %self.name, x = point[0], y = point[1], score, "Invented");

        if score < self.args.critic_threshold {
            if self.args.jump == Jump::Random {
                self.position = vector::random_point(&mut self.rng);
            }
            return Ok(Action::Idle);
        }

        self.memory.learn(point);
        self.created.push(point);
        let me = self.address.to_string();
        let candidate = Candidate::new(vector::KIND, me.clone(), vector::encode(&point))
            .with_evaluation(me, score, Some(json!({ "args": point })))
            .with_age(ctx.age);
        Ok(Action::Propose(candidate))
    }

    fn evaluate(&self, candidate: &Candidate) -> f64 {
        let Some(point) = vector::decode(&candidate.payload) else {
            return 0.0;
        };
        // Deterministic for voting: an empty memory sees everything as maximally novel
        let novelty = self
            .memory
            .distance(&point)
            .map_or(1.0, |d| d / vector::diameter());
        if self.args.desired_novelty > 0.0 {
            self.hedonic(novelty * vector::diameter())
        } else {
            novelty
        }
    }

    fn veto_threshold(&self) -> f64 {
        self.args.veto_threshold
    }

    fn domain_artifact_added(&mut self, artifact: &Artifact) {
        if artifact.candidate.is_created_by(&self.address) {
            self.accepted += 1;
        }
        if self.args.learn_on_add {
            if let Some(point) = vector::decode(&artifact.candidate.payload) {
                self.memory.learn(point);
            }
        }
    }

    fn add_connection(&mut self, peer: AgentAddress) -> bool {
        if self.peers.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    fn close(&mut self, _folder: Option<&Path>) -> Option<Value> {
        Some(json!({
            "created": self.created.len(),
            "accepted": self.accepted,
            "connections": self.peers.len(),
            "mean_distance": self.mean_creation_distance(),
            "position": self.position,
        }))
    }
}
