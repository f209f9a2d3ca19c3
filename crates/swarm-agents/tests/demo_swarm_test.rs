//! Demo swarm smoke test: novelty and target agents over in-memory workers.
//!
//! Runs the real agent classes through full rounds and checks that
//! artifacts accumulate, reach every worker, and show up in the shutdown
//! summaries.

use coordination::{
    ActOutcome, MemoryTransport, MultiEnvConfig, MultiEnvironment, RpcConfig, Simulation,
    TaskLauncher, VotingMethod,
};
use serde_json::json;
use swarm_agents::agents::{self, vector};

async fn start(workers: usize) -> MultiEnvironment {
    let net = MemoryTransport::new(RpcConfig::default()).shared();
    let launcher = TaskLauncher::memory(agents::registry(), net);
    let config = MultiEnvConfig {
        name: "demo".into(),
        ready_poll_interval_ms: 10,
        ..Default::default()
    };
    MultiEnvironment::start(config, Box::new(launcher), workers)
        .await
        .expect("environment starts")
}

#[tokio::test]
async fn test_mixed_swarm_accepts_every_round() {
    let env = start(2).await;
    // Permissive thresholds so every novelty agent proposes and nobody vetoes
    env.spawn_n(
        agents::NOVELTY,
        2,
        json!({ "critic_threshold": 0.0, "veto_threshold": 0.0 }),
        None,
    )
    .await
    .unwrap();
    env.spawn_n(agents::TARGET, 2, json!({ "veto_threshold": 0.0 }), None)
        .await
        .unwrap();
    assert_eq!(env.get_agents(None).await.unwrap().len(), 4);
    // Only novelty agents keep a peer list
    assert_eq!(env.create_initial_connections(1).await.unwrap(), 2);

    let mut sim = Simulation::new(env).with_method(VotingMethod::Mean, 2);
    let reports = sim.steps(3).await.unwrap();
    for report in &reports {
        assert!(report.proposed >= 2, "age {}: {report:?}", report.age);
        assert_eq!(report.validated, report.proposed);
        assert_eq!(report.accepted.len(), 2);
        for artifact in &report.accepted {
            assert!(vector::decode(&artifact.candidate.payload).is_some());
        }
    }

    let env = sim.env();
    assert_eq!(env.artifacts().await.unwrap().len(), 6);
    for worker in env.workers() {
        assert_eq!(env.master().artifacts(worker).await.unwrap().len(), 6);
    }

    let summary = sim.into_env().destroy(None).await;
    let workers = summary["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 2);
    for worker in workers {
        let agents = worker["summary"]["agents"].as_array().unwrap();
        assert_eq!(agents.len(), 2);
        assert!(agents.iter().all(|a| a["summary"].is_object()));
    }
}

#[tokio::test]
async fn test_target_agents_publish_first_round() {
    let env = start(1).await;
    env.spawn_n(agents::TARGET, 3, json!({ "seed": 4 }), None)
        .await
        .unwrap();

    let results = env.trigger_all(serde_json::Value::Null).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| matches!(r.outcome, ActOutcome::Published(_))));
    // Same seed and payloads, different agents: three distinct candidates
    assert_eq!(env.candidates().await.unwrap().len(), 3);
    env.destroy(None).await;
}

#[tokio::test]
async fn test_bad_agent_args_are_rejected() {
    let env = start(1).await;
    let err = env
        .spawn(agents::NOVELTY, json!({ "search_width": 0 }), None)
        .await
        .unwrap_err();
    assert!(matches!(err, coordination::EnvError::Instantiation(_)));
    assert!(env.get_agents(None).await.unwrap().is_empty());
    env.destroy(None).await;
}
