//! Voting engine
//!
//! Pure ranking over a candidate set and a vote set (one vote list per
//! agent). Every method returns `(candidate, score)` pairs ordered best
//! first:
//!
//! | Method        | Score                        | Size                    |
//! |---------------|------------------------------|-------------------------|
//! | `irv`         | elimination rank (0 = never a first preference) | `accepted` |
//! | `mean`        | arithmetic mean of received scores | `accepted`        |
//! | `best`        | highest single score         | 1                       |
//! | `least_worst` | best of the per-agent worst  | 1                       |
//! | `random`      | 0.0                          | `accepted`              |
//!
//! Votes that name a candidate outside the candidate set are ignored.

pub mod cardinal;
pub mod irv;

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::{Candidate, VoteList};

/// Error type for voting operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VotingError {
    #[error("Unknown voting method '{0}' (expected irv, mean, best, least_worst or random)")]
    UnknownMethod(String),
}

/// Result type for voting operations
pub type VotingResult<T> = Result<T, VotingError>;

/// All vote lists gathered for one round
pub type VoteSet = Vec<VoteList>;

/// Ordered acceptance list, best first
pub type Ranking = Vec<(Candidate, f64)>;

/// Supported voting methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    /// Instant run-off over ordinal ballots
    Irv,
    /// Highest mean score
    #[default]
    Mean,
    /// Highest single score
    Best,
    /// Highest of every agent's lowest score
    LeastWorst,
    /// Uniform shuffle
    Random,
}

impl VotingMethod {
    pub const ALL: [VotingMethod; 5] = [
        VotingMethod::Irv,
        VotingMethod::Mean,
        VotingMethod::Best,
        VotingMethod::LeastWorst,
        VotingMethod::Random,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VotingMethod::Irv => "irv",
            VotingMethod::Mean => "mean",
            VotingMethod::Best => "best",
            VotingMethod::LeastWorst => "least_worst",
            VotingMethod::Random => "random",
        }
    }
}

impl fmt::Display for VotingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VotingMethod {
    type Err = VotingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "irv" => Ok(VotingMethod::Irv),
            "mean" => Ok(VotingMethod::Mean),
            "best" => Ok(VotingMethod::Best),
            "least_worst" => Ok(VotingMethod::LeastWorst),
            "random" => Ok(VotingMethod::Random),
            _ => Err(VotingError::UnknownMethod(s.to_string())),
        }
    }
}

/// Dispatches to the ranking functions; owns the RNG for `random`
#[derive(Debug)]
pub struct VotingEngine {
    rng: StdRng,
}

impl VotingEngine {
    /// Engine with a fixed seed, or OS entropy when `None`
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Rank `candidates` using `votes`, returning at most `accepted` entries
    /// (exactly one for `best` and `least_worst` when any vote exists).
    pub fn rank(
        &mut self,
        method: VotingMethod,
        candidates: &[Candidate],
        votes: &[VoteList],
        accepted: usize,
    ) -> Ranking {
        if candidates.is_empty() {
            return Vec::new();
        }
        let ranking = match method {
            VotingMethod::Irv => {
                let mut ordering = irv::rank(candidates, votes);
                ordering.truncate(accepted);
                ordering
            }
            VotingMethod::Mean => cardinal::mean(candidates, votes, accepted),
            VotingMethod::Best => cardinal::best(candidates, votes).into_iter().collect(),
            VotingMethod::LeastWorst => cardinal::least_worst(candidates, votes)
                .into_iter()
                .collect(),
            VotingMethod::Random => self.random(candidates, accepted),
        };
        debug!(
            method = %method,
            candidates = candidates.len(),
            ballots = votes.len(),
            accepted = ranking.len(),
            "Ranked candidates"
        );
        ranking
    }

    fn random(&mut self, candidates: &[Candidate], accepted: usize) -> Ranking {
        let mut shuffled = candidates.to_vec();
        shuffled.shuffle(&mut self.rng);
        shuffled.truncate(accepted);
        shuffled.into_iter().map(|c| (c, 0.0)).collect()
    }
}

impl Default for VotingEngine {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Vote;

    fn cands(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new("t", format!("A{}", i + 1), vec![i as u8]))
            .collect()
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("IRV".parse::<VotingMethod>().unwrap(), VotingMethod::Irv);
        assert_eq!(
            "least-worst".parse::<VotingMethod>().unwrap(),
            VotingMethod::LeastWorst
        );
        for method in VotingMethod::ALL {
            assert_eq!(method.as_str().parse::<VotingMethod>().unwrap(), method);
        }
        assert!(matches!(
            "plurality".parse::<VotingMethod>(),
            Err(VotingError::UnknownMethod(_))
        ));
    }

    #[test]
    fn test_empty_candidates_rank_empty() {
        let mut engine = VotingEngine::new(Some(1));
        for method in VotingMethod::ALL {
            assert!(engine.rank(method, &[], &[], 3).is_empty());
        }
    }

    #[test]
    fn test_random_is_seeded_subset_with_zero_scores() {
        let candidates = cands(5);
        let a = VotingEngine::new(Some(7)).rank(VotingMethod::Random, &candidates, &[], 3);
        let b = VotingEngine::new(Some(7)).rank(VotingMethod::Random, &candidates, &[], 3);
        assert_eq!(a.len(), 3);
        assert_eq!(a, b);
        assert!(a.iter().all(|(c, s)| *s == 0.0 && candidates.contains(c)));
    }

    #[test]
    fn test_best_ignores_accepted_count() {
        let candidates = cands(3);
        let votes = vec![vec![
            Vote::new(candidates[1].id.clone(), 0.9),
            Vote::new(candidates[0].id.clone(), 0.1),
        ]];
        let mut engine = VotingEngine::new(Some(1));
        let ranking = engine.rank(VotingMethod::Best, &candidates, &votes, 3);
        assert_eq!(ranking, vec![(candidates[1].clone(), 0.9)]);
    }
}
