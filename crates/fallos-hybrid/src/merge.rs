//! Candidate merging and final selection.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

use fallos_core::types::{CandidateHit, DenseHit, ParagraphRecord, Position};

/// Lexical positions with no dense hit; their payloads must be fetched by id.
pub fn missing_positions(dense: &[DenseHit], lexical: &[(Position, f32)]) -> Vec<Position> {
    let seen: BTreeSet<Position> = dense.iter().map(|h| h.position).collect();
    lexical.iter().map(|(p, _)| *p).filter(|p| !seen.contains(p)).collect()
}

/// Merge dense and lexical hits into one candidate per position, in position order.
///
/// Dense hits seed the map with their cosine score. Lexical-only positions are
/// seeded with their raw BM25 score using payloads from `fetched`. Positions
/// found by both score `dense + lexical * lexical_weight`.
pub fn merge_hits(
    dense: Vec<DenseHit>,
    lexical: &[(Position, f32)],
    mut fetched: HashMap<Position, ParagraphRecord>,
    lexical_weight: f32,
) -> Vec<CandidateHit> {
    let mut by_position: BTreeMap<Position, CandidateHit> = BTreeMap::new();
    for hit in dense {
        by_position.entry(hit.position).or_insert(CandidateHit {
            position: hit.position,
            combined_score: hit.score,
            dense_score: Some(hit.score),
            lexical_score: None,
            payload: hit.payload,
        });
    }
    for &(position, score) in lexical {
        if let Some(existing) = by_position.get_mut(&position) {
            if existing.lexical_score.is_none() && existing.dense_score.is_some() {
                existing.combined_score += score * lexical_weight;
                existing.lexical_score = Some(score);
            }
            continue;
        }
        match fetched.remove(&position) {
            Some(payload) => {
                by_position.insert(
                    position,
                    CandidateHit { position, combined_score: score, dense_score: None, lexical_score: Some(score), payload },
                );
            }
            None => warn!(position, "lexical hit missing from the dense store; dropped"),
        }
    }
    by_position.into_values().collect()
}

/// The `n` best candidates, score descending with ties broken by ascending position.
pub fn select_top(mut candidates: Vec<CandidateHit>, n: usize) -> Vec<CandidateHit> {
    candidates.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score).then(a.position.cmp(&b.position)));
    candidates.truncate(n);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(id: &str) -> ParagraphRecord {
        ParagraphRecord {
            case_id: id.to_string(),
            section: "S".into(),
            paragraph_index: 0,
            text: format!("texto {id}"),
            source_path: format!("{id}.json"),
            central_idea: None,
            cited_articles: vec![],
            preliminary_matter: None,
        }
    }

    fn dense(position: Position, score: f32) -> DenseHit { DenseHit { position, score, payload: payload(&position.to_string()) } }

    #[test]
    fn both_sources_combine_with_weight() {
        let merged = merge_hits(vec![dense(1, 0.8)], &[(1, 4.0)], HashMap::new(), 0.5);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].combined_score - 2.8).abs() < 1e-6);
        assert_eq!(merged[0].dense_score, Some(0.8));
        assert_eq!(merged[0].lexical_score, Some(4.0));
    }

    #[test]
    fn single_source_positions_keep_raw_scores() {
        let fetched = HashMap::from([(7, payload("7"))]);
        let merged = merge_hits(vec![dense(2, 0.6)], &[(7, 3.5)], fetched, 0.5);
        let by_pos: HashMap<_, _> = merged.iter().map(|c| (c.position, c.combined_score)).collect();
        assert!((by_pos[&2] - 0.6).abs() < 1e-6);
        assert!((by_pos[&7] - 3.5).abs() < 1e-6, "lexical-only hit is not halved");
    }

    #[test]
    fn lexical_hit_without_payload_is_dropped() {
        let merged = merge_hits(vec![], &[(5, 1.0)], HashMap::new(), 0.5);
        assert!(merged.is_empty());
        assert_eq!(missing_positions(&[dense(1, 0.1)], &[(1, 1.0), (5, 1.0)]), vec![5]);
    }

    #[test]
    fn ties_break_by_ascending_position() {
        let merged = merge_hits(vec![dense(9, 0.5), dense(3, 0.5), dense(4, 0.9)], &[], HashMap::new(), 0.5);
        let top: Vec<Position> = select_top(merged, 2).iter().map(|c| c.position).collect();
        assert_eq!(top, vec![4, 3]);
    }
}
