//! Instant run-off voting
//!
//! Each vote list is read as one ballot ranking candidates best to worst.
//! Rounds repeat until a single candidate holds first preferences:
//!
//! 1. Count first preferences, ordered by count with ties in order of first
//!    appearance.
//! 2. Candidates still standing with no first preferences go to the bottom
//!    of the ranking at rank 0, in candidate-set order.
//! 3. The last entry of the count order (fewest votes, latest to appear on a
//!    tie) is eliminated at the next rank up.
//!
//! The survivor takes the top rank and the ranking is reversed so the
//! result runs best to worst.

use std::collections::{HashMap, HashSet};

use crate::artifact::{Candidate, CandidateId, VoteList};

/// Full ranking of `candidates`, best first; the score is the elimination rank
pub fn rank(candidates: &[Candidate], votes: &[VoteList]) -> Vec<(Candidate, f64)> {
    let by_id: HashMap<&CandidateId, &Candidate> =
        candidates.iter().map(|c| (&c.id, c)).collect();

    let mut ballots: Vec<Vec<&CandidateId>> = votes
        .iter()
        .map(|list| {
            let mut seen = HashSet::new();
            list.iter()
                .map(|v| &v.candidate)
                .filter(|id| by_id.contains_key(id) && seen.insert(*id))
                .collect()
        })
        .collect();

    let mut standing: Vec<&CandidateId> = Vec::new();
    for c in candidates {
        if !standing.contains(&&c.id) {
            standing.push(&c.id);
        }
    }

    // Worst first
    let mut ranking: Vec<(&CandidateId, usize)> = Vec::with_capacity(standing.len());
    let mut order = first_preferences(&ballots);

    while order.len() > 1 {
        push_zeros(&standing, &order, &mut ranking);
        let loser = order[order.len() - 1];
        ranking.push((loser, ranking.len() + 1));

        standing.retain(|id| order.contains(id) && *id != loser);
        for ballot in &mut ballots {
            ballot.retain(|id| standing.contains(id));
        }
        order = first_preferences(&ballots);
    }

    push_zeros(&standing, &order, &mut ranking);
    if let Some(&winner) = order.first() {
        ranking.push((winner, ranking.len() + 1));
    }

    ranking
        .into_iter()
        .rev()
        .filter_map(|(id, rank)| by_id.get(id).map(|c| ((*c).clone(), rank as f64)))
        .collect()
}

/// Append standing candidates without first preferences at rank 0
fn push_zeros<'a>(
    standing: &[&'a CandidateId],
    order: &[&'a CandidateId],
    ranking: &mut Vec<(&'a CandidateId, usize)>,
) {
    for &id in standing {
        if !order.contains(&id) {
            ranking.push((id, 0));
        }
    }
}

/// Candidates holding first preferences, most votes first, ties by first appearance
fn first_preferences<'a>(ballots: &[Vec<&'a CandidateId>]) -> Vec<&'a CandidateId> {
    let mut counts: Vec<(&CandidateId, usize)> = Vec::new();
    for first in ballots.iter().filter_map(|b| b.first()) {
        match counts.iter().position(|(id, _)| id == first) {
            Some(pos) => counts[pos].1 += 1,
            None => counts.push((*first, 1)),
        }
    }
    // Stable sort keeps appearance order within equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Vote;

    fn cands(n: usize) -> Vec<Candidate> {
        (0..n)
            .map(|i| Candidate::new("t", format!("c{}", i + 1), vec![]))
            .collect()
    }

    fn ballot(candidates: &[Candidate], order: &[usize]) -> VoteList {
        order
            .iter()
            .enumerate()
            .map(|(pos, &i)| Vote::new(candidates[i].id.clone(), (order.len() - pos) as f64))
            .collect()
    }

    fn names(ranking: &[(Candidate, f64)]) -> Vec<String> {
        ranking.iter().map(|(c, _)| c.creator.clone()).collect()
    }

    #[test]
    fn test_majority_winner() {
        let c = cands(3);
        let votes = vec![
            ballot(&c, &[1, 0, 2]),
            ballot(&c, &[1, 2, 0]),
            ballot(&c, &[0, 1, 2]),
        ];
        let ranking = rank(&c, &votes);
        assert_eq!(names(&ranking)[0], "c2");
        assert_eq!(ranking.len(), 3);
    }

    #[test]
    fn test_zero_preference_candidates_rank_lowest() {
        let c = cands(4);
        let votes = vec![
            ballot(&c, &[0, 1, 2, 3]),
            ballot(&c, &[0, 2, 1, 3]),
            ballot(&c, &[1, 0, 2, 3]),
        ];
        let ranking = rank(&c, &votes);
        assert_eq!(names(&ranking), vec!["c1", "c2", "c4", "c3"]);
        assert_eq!(ranking[2].1, 0.0);
        assert_eq!(ranking[3].1, 0.0);
    }

    #[test]
    fn test_no_ballots_keeps_every_candidate() {
        let c = cands(3);
        let ranking = rank(&c, &[]);
        assert_eq!(names(&ranking), vec!["c3", "c2", "c1"]);
        assert!(ranking.iter().all(|(_, s)| *s == 0.0));
    }

    #[test]
    fn test_unknown_ids_ignored() {
        let c = cands(2);
        let stranger = Candidate::new("t", "x", vec![9]);
        let votes = vec![vec![
            Vote::new(stranger.id.clone(), 1.0),
            Vote::new(c[1].id.clone(), 0.5),
            Vote::new(c[0].id.clone(), 0.1),
        ]];
        let ranking = rank(&c, &votes);
        assert_eq!(names(&ranking), vec!["c2", "c1"]);
    }
}
