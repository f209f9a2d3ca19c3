//! Candidate validation by intersection
//!
//! Validation runs at two levels with the same fold:
//!
//! ```text
//! worker:  agent₁ ∩ agent₂ ∩ … ∩ agentₖ      (any agent's veto removes)
//! global:  current ∩ worker₁ ∩ … ∩ workerₙ   (any worker's veto removes)
//! ```
//!
//! Membership is decided by [`CandidateId`], so candidates that were
//! serialized, shipped to a worker and sent back still match. The result
//! keeps the order of the starting set and is always a subset of it.

use std::collections::HashSet;

use crate::artifact::{Candidate, CandidateId};

/// Candidates of `current` that appear in every one of `accepted`.
///
/// With no accepting sets at all nothing has vetoed, so `current` survives
/// whole (minus duplicate ids).
pub fn intersect<I, S>(current: &[Candidate], accepted: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = S>,
    S: AsRef<[Candidate]>,
{
    let mut surviving: HashSet<&CandidateId> = current.iter().map(|c| &c.id).collect();
    for subset in accepted {
        let ids: HashSet<&CandidateId> = subset.as_ref().iter().map(|c| &c.id).collect();
        surviving.retain(|id| ids.contains(*id));
        if surviving.is_empty() {
            break;
        }
    }

    let mut emitted = HashSet::new();
    current
        .iter()
        .filter(|c| surviving.contains(&c.id) && emitted.insert(&c.id))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(n: u8) -> Candidate {
        Candidate::new("t", format!("A{n}"), vec![n])
    }

    #[test]
    fn test_three_worker_example() {
        let current = vec![c(1), c(2), c(3)];
        let a = vec![c(1), c(2)];
        let b = vec![c(2), c(3)];
        let all = vec![c(1), c(2), c(3)];
        assert_eq!(intersect(&current, [a, b, all]), vec![c(2)]);
    }

    #[test]
    fn test_no_sets_keeps_everything() {
        let current = vec![c(1), c(2), c(2)];
        let none: Vec<Vec<Candidate>> = Vec::new();
        assert_eq!(intersect(&current, none), vec![c(1), c(2)]);
    }

    #[test]
    fn test_foreign_candidates_never_added() {
        let current = vec![c(1)];
        let result = intersect(&current, [vec![c(1), c(9)]]);
        assert_eq!(result, vec![c(1)]);
    }

    #[test]
    fn test_matches_after_wire_round_trip() {
        let current = vec![c(1), c(2)];
        let shipped: Vec<Candidate> =
            serde_json::from_str(&serde_json::to_string(&current[1..]).unwrap()).unwrap();
        assert_eq!(intersect(&current, [shipped]), vec![c(2)]);
    }

    #[test]
    fn test_empty_subset_vetoes_all() {
        let current = vec![c(1), c(2)];
        assert!(intersect(&current, [Vec::<Candidate>::new()]).is_empty());
    }
}
