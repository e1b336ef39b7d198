//! Reciprocal rank fusion, time decay, and score normalization (spec §4.5
//! steps 2, 4, 5). Pure functions, independent of storage so they're cheap
//! to test directly.

/// RRF constant. Spec §4.5 step 4 fixes k=60 (the standard TREC value).
pub const RRF_K: f64 = 60.0;

/// Default decay rate (spec §4.5 step 5): a memory not accessed in ~200
/// days has decayed to about half its original weight.
pub const DEFAULT_DECAY_LAMBDA: f64 = 0.005;

/// Reciprocal rank fusion: `1 / (k + rank)`, `rank` is 1-based.
pub fn rrf_score(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

/// Combine a BM25-ranked list and a vector-ranked list of ids into a single
/// fused ranking (spec §4.5 step 4). Ids present in both lists sum their RRF
/// contributions. Returns `(id, fused_score)` pairs sorted descending.
pub fn fuse_rankings(fts_ranked_ids: &[String], vec_ranked_ids: &[String]) -> Vec<(String, f64)> {
    use std::collections::HashMap;

    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (i, id) in fts_ranked_ids.iter().enumerate() {
        *scores.entry(id.as_str()).or_insert(0.0) += rrf_score(i + 1, RRF_K);
    }
    for (i, id) in vec_ranked_ids.iter().enumerate() {
        *scores.entry(id.as_str()).or_insert(0.0) += rrf_score(i + 1, RRF_K);
    }

    let mut fused: Vec<(String, f64)> = scores.into_iter().map(|(id, s)| (id.to_string(), s)).collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
    fused
}

/// Exponential time decay: `exp(-lambda * age_days)`.
pub fn time_decay(age_days: f64, lambda: f64) -> f64 {
    (-lambda * age_days).exp()
}

/// Access-count boost: `1 + log(1 + access_count) * 0.1` (spec §4.5 step 5).
pub fn access_boost(access_count: u64) -> f64 {
    1.0 + ((1.0 + access_count as f64).ln()) * 0.1
}

/// Combine a fused rank score with recency and access-count boosting.
pub fn post_score(fused: f64, age_days: f64, access_count: u64, lambda: f64) -> f64 {
    fused * time_decay(age_days, lambda) * access_boost(access_count)
}

/// Normalize a list of `(id, score)` pairs so the maximum is exactly 1.0
/// (spec §4.5 step 5). Leaves an empty list untouched; a single entry with
/// score 0 is mapped to 1.0 so it can still be surfaced.
pub fn normalize_scores(scored: &mut [(String, f64)]) {
    let max = scored.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
    if max <= 0.0 {
        for (_, s) in scored.iter_mut() {
            *s = 1.0;
        }
        return;
    }
    for (_, s) in scored.iter_mut() {
        *s /= max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrf_score_decreases_with_rank() {
        let r1 = rrf_score(1, RRF_K);
        let r2 = rrf_score(2, RRF_K);
        assert!(r1 > r2);
    }

    #[test]
    fn fuse_rankings_sums_contributions_for_overlap() {
        let fts = vec!["a".to_string(), "b".to_string()];
        let vec = vec!["b".to_string(), "c".to_string()];
        let fused = fuse_rankings(&fts, &vec);
        let b_score = fused.iter().find(|(id, _)| id == "b").unwrap().1;
        let a_score = fused.iter().find(|(id, _)| id == "a").unwrap().1;
        assert!(b_score > a_score, "id present in both lists should outrank id present in one");
    }

    #[test]
    fn fuse_rankings_sorts_descending() {
        let fts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let fused = fuse_rankings(&fts, &[]);
        assert_eq!(fused[0].0, "a");
        assert!(fused[0].1 >= fused[1].1 && fused[1].1 >= fused[2].1);
    }

    #[test]
    fn time_decay_is_one_at_zero_age() {
        assert_eq!(time_decay(0.0, DEFAULT_DECAY_LAMBDA), 1.0);
    }

    #[test]
    fn time_decay_shrinks_with_age() {
        let recent = time_decay(1.0, DEFAULT_DECAY_LAMBDA);
        let old = time_decay(365.0, DEFAULT_DECAY_LAMBDA);
        assert!(recent > old);
    }

    #[test]
    fn access_boost_increases_with_count() {
        assert!(access_boost(10) > access_boost(0));
        assert_eq!(access_boost(0), 1.0);
    }

    #[test]
    fn normalize_scores_maxes_out_at_one() {
        let mut scored = vec![("a".to_string(), 0.5), ("b".to_string(), 0.25)];
        normalize_scores(&mut scored);
        assert_eq!(scored[0].1, 1.0);
        assert_eq!(scored[1].1, 0.5);
    }

    #[test]
    fn normalize_scores_handles_all_zero() {
        let mut scored = vec![("a".to_string(), 0.0)];
        normalize_scores(&mut scored);
        assert_eq!(scored[0].1, 1.0);
    }
}
