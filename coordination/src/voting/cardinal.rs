//! Score-based voting: mean, best and least-worst

use std::collections::{HashMap, HashSet};

use crate::artifact::{Candidate, CandidateId, Vote, VoteList};

/// Top `accepted` candidates by mean received score.
///
/// Candidates nobody scored are left out rather than counted as zero.
/// Equal means keep candidate-set order.
pub fn mean(
    candidates: &[Candidate],
    votes: &[VoteList],
    accepted: usize,
) -> Vec<(Candidate, f64)> {
    let mut sums: HashMap<&CandidateId, (f64, usize)> = HashMap::new();
    for vote in votes.iter().flatten() {
        let entry = sums.entry(&vote.candidate).or_insert((0.0, 0));
        entry.0 += vote.score;
        entry.1 += 1;
    }

    let mut seen = HashSet::new();
    let mut means: Vec<(Candidate, f64)> = candidates
        .iter()
        .filter(|c| seen.insert(&c.id))
        .filter_map(|c| {
            sums.get(&c.id)
                .map(|&(sum, count)| (c.clone(), sum / count as f64))
        })
        .collect();
    means.sort_by(|a, b| b.1.total_cmp(&a.1));
    means.truncate(accepted);
    means
}

/// Candidate holding the single highest score any agent gave
pub fn best(candidates: &[Candidate], votes: &[VoteList]) -> Option<(Candidate, f64)> {
    pick(candidates, votes, |list| {
        list.into_iter().reduce(|top, v| if v.score > top.score { v } else { top })
    })
}

/// Among each agent's lowest-scored candidate, the one scored highest
pub fn least_worst(candidates: &[Candidate], votes: &[VoteList]) -> Option<(Candidate, f64)> {
    pick(candidates, votes, |list| {
        list.into_iter().reduce(|low, v| if v.score < low.score { v } else { low })
    })
}

/// Take one representative vote per list and keep the highest-scored;
/// the earliest list wins ties
fn pick<'v, F>(
    candidates: &[Candidate],
    votes: &'v [VoteList],
    representative: F,
) -> Option<(Candidate, f64)>
where
    F: Fn(Vec<&'v Vote>) -> Option<&'v Vote>,
{
    let by_id: HashMap<&CandidateId, &Candidate> =
        candidates.iter().map(|c| (&c.id, c)).collect();

    let mut chosen: Option<&Vote> = None;
    for list in votes {
        let known: Vec<&Vote> = list
            .iter()
            .filter(|v| by_id.contains_key(&v.candidate))
            .collect();
        if let Some(vote) = representative(known) {
            if chosen.map_or(true, |c| vote.score > c.score) {
                chosen = Some(vote);
            }
        }
    }
    chosen.and_then(|v| by_id.get(&v.candidate).map(|c| ((*c).clone(), v.score)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cands(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new("t", format!("c{}", i + 1), vec![]))
            .collect()
    }

    fn list(candidates: &[Candidate], scores: &[(usize, f64)]) -> VoteList {
        scores
            .iter()
            .map(|&(i, s)| Vote::new(candidates[i].id.clone(), s))
            .collect()
    }

    #[test]
    fn test_mean_orders_and_truncates() {
        let c = cands(3);
        let votes = vec![
            list(&c, &[(0, 1.0), (1, 0.2), (2, 0.6)]),
            list(&c, &[(0, 0.0), (1, 0.4), (2, 0.6)]),
        ];
        let ranking = mean(&c, &votes, 2);
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].0, c[2]);
        assert!((ranking[0].1 - 0.6).abs() < 1e-12);
        assert_eq!(ranking[1].0, c[0]);
        assert!((ranking[1].1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean_ties_keep_candidate_order() {
        let c = cands(3);
        let votes = vec![list(&c, &[(2, 0.5), (1, 0.5), (0, 0.5)])];
        let ranking = mean(&c, &votes, 3);
        let order: Vec<&Candidate> = ranking.iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec![&c[0], &c[1], &c[2]]);
    }

    #[test]
    fn test_best_and_least_worst() {
        let c = cands(3);
        let votes = vec![
            list(&c, &[(0, 0.9), (1, 0.5), (2, 0.1)]),
            list(&c, &[(1, 0.95), (2, 0.3), (0, 0.2)]),
        ];
        assert_eq!(best(&c, &votes), Some((c[1].clone(), 0.95)));
        assert_eq!(least_worst(&c, &votes), Some((c[0].clone(), 0.2)));
    }

    #[test]
    fn test_best_tie_goes_to_first_list() {
        let c = cands(2);
        let votes = vec![list(&c, &[(1, 0.7)]), list(&c, &[(0, 0.7)])];
        assert_eq!(best(&c, &votes), Some((c[1].clone(), 0.7)));
    }

    #[test]
    fn test_no_votes_pick_nothing() {
        let c = cands(2);
        assert_eq!(best(&c, &[]), None);
        assert_eq!(least_worst(&c, &[vec![]]), None);
        assert!(mean(&c, &[], 2).is_empty());
    }
}
