//! Candidate ranking

use crate::types::InsightCandidate;

/// Concatenate candidate groups and stable-sort by ascending tier.
///
/// Candidates of equal tier keep their original relative order.
pub fn rank_candidates<I>(groups: I) -> Vec<InsightCandidate>
where
    I: IntoIterator<Item = Vec<InsightCandidate>>,
{
    let mut ranked: Vec<InsightCandidate> = groups.into_iter().flatten().collect();
    // slice::sort_by_key is stable
    ranked.sort_by_key(|c| c.tier);
    ranked
}
