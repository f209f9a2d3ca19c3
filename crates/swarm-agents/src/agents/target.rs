//! Target-seeking agent
//!
//! Walks toward a fixed target point and publishes every point that beats
//! its best so far straight to the master's global candidate set, without
//! waiting for the next gather. Judges other agents' points by how close
//! they land to its own target.

use async_trait::async_trait;
use coordination::{
    ActContext, Action, Agent, AgentAddress, AgentError, AgentInit, Artifact, Candidate,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::{json, Value};

use super::vector::{self, Point};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetArgs {
    /// Random when absent
    pub target: Option<Point>,
    /// Fraction of the remaining distance covered per act
    pub pace: f64,
    /// Per-axis noise added to every step
    pub jitter: f64,
    pub veto_threshold: f64,
    pub seed: Option<u64>,
}

impl Default for TargetArgs {
    fn default() -> Self {
        Self {
            target: None,
            pace: 0.25,
            jitter: 5.0,
            veto_threshold: 0.5,
            seed: None,
        }
    }
}

pub struct TargetAgent {
    name: String,
    address: AgentAddress,
    target: Point,
    position: Point,
    best: f64,
    pace: f64,
    jitter: f64,
    veto_threshold: f64,
    rng: StdRng,
    published: usize,
    accepted: usize,
}

impl TargetAgent {
    pub fn new(init: AgentInit) -> Result<Self, AgentError> {
        let args: TargetArgs = init.args_as()?;
        if !(0.0..=1.0).contains(&args.pace) {
            return Err(AgentError::InvalidArgs(format!(
                "pace must be within [0, 1], got {}",
                args.pace
            )));
        }
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let target = match args.target {
            Some(target) => vector::clamp(target),
            None => vector::random_point(&mut rng),
        };
        let position = vector::random_point(&mut rng);
        Ok(Self {
            name: init.name,
            address: init.address,
            target,
            position,
            best: f64::NEG_INFINITY,
            pace: args.pace,
            jitter: args.jitter,
            veto_threshold: args.veto_threshold,
            rng,
            published: 0,
            accepted: 0,
        })
    }

    /// 1.0 on the target, 0.0 at the far corner
    fn closeness(&self, point: &Point) -> f64 {
        1.0 - vector::distance(point, &self.target) / vector::diameter()
    }
}

#[async_trait]
impl Agent for TargetAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> &AgentAddress {
        &self.address
    }

    async fn act(&mut self, ctx: &ActContext) -> Result<Action, AgentError> {
        let toward = [
            self.position[0] + (self.target[0] - self.position[0]) * self.pace,
            self.position[1] + (self.target[1] - self.position[1]) * self.pace,
        ];
        self.position = vector::step(&mut self.rng, &toward, self.jitter);

        let score = self.closeness(&self.position);
        if score <= self.best {
            return Ok(Action::Idle);
        }
        self.best = score;
        self.published += 1;
        let me = self.address.to_string();
        let candidate = Candidate::new(vector::KIND, me.clone(), vector::encode(&self.position))
            .with_evaluation(me, score, Some(json!({ "args": self.position })))
            .with_age(ctx.age);
        Ok(Action::Publish(candidate))
    }

    fn evaluate(&self, candidate: &Candidate) -> f64 {
        vector::decode(&candidate.payload).map_or(0.0, |p| self.closeness(&p))
    }

    fn veto_threshold(&self) -> f64 {
        self.veto_threshold
    }

    fn domain_artifact_added(&mut self, artifact: &Artifact) {
        if artifact.candidate.is_created_by(&self.address) {
            self.accepted += 1;
        }
    }

    fn close(&mut self, _folder: Option<&std::path::Path>) -> Option<Value> {
        Some(json!({
            "published": self.published,
            "accepted": self.accepted,
            "best": self.best.max(0.0),
            "target": self.target,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn agent(args: Value) -> TargetAgent {
        TargetAgent::new(AgentInit {
            address: AgentAddress::new("w:1", 2),
            name: "T1".into(),
            args,
        })
        .unwrap()
    }

    fn ctx(age: u64) -> ActContext {
        ActContext {
            address: AgentAddress::new("w:1", 2),
            age,
            artifacts: Arc::new(Vec::new()),
            args: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_first_act_publishes() {
        let mut a = agent(json!({ "seed": 9, "target": [0.0, 0.0] }));
        assert!(matches!(a.act(&ctx(1)).await.unwrap(), Action::Publish(_)));
    }

    #[tokio::test]
    async fn test_without_jitter_each_step_improves() {
        let mut a = agent(json!({ "seed": 9, "target": [10.0, 10.0], "jitter": 0.0, "pace": 0.5 }));
        for age in 1..=5 {
            match a.act(&ctx(age)).await.unwrap() {
                Action::Publish(c) => assert_eq!(c.created_at_age, age),
                other => panic!("expected a publish, got {other:?}"),
            }
        }
        assert_eq!(a.close(None).unwrap()["published"], 5);
    }

    #[test]
    fn test_evaluate_prefers_points_near_target() {
        let a = agent(json!({ "seed": 1, "target": [50.0, 50.0] }));
        let near = Candidate::new(vector::KIND, "X", vector::encode(&[49.0, 50.0]));
        let far = Candidate::new(vector::KIND, "X", vector::encode(&[-150.0, -150.0]));
        assert!(a.evaluate(&near) > a.evaluate(&far));
        assert!((a.evaluate(&Candidate::new(vector::KIND, "X", vector::encode(&[50.0, 50.0])))
            - 1.0)
            .abs()
            < 1e-12);
    }

    #[test]
    fn test_rejects_pace_out_of_range() {
        let result = TargetAgent::new(AgentInit {
            address: AgentAddress::new("w:1", 2),
            name: "T1".into(),
            args: json!({ "pace": 1.5 }),
        });
        assert!(matches!(result, Err(AgentError::InvalidArgs(_))));
    }
}
