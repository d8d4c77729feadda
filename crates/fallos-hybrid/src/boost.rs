//! Additive domain boost from a ruling's enrichment metadata.
use std::collections::HashSet;

use fallos_core::config::ScoringSettings;
use fallos_core::types::{CandidateHit, ParagraphRecord};

/// Question keywords shorter than this never trigger the central-idea boost.
const MIN_KEYWORD_CHARS: usize = 3;

fn normalized_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
}

#[derive(Debug, Clone, Copy)]
pub struct DomainBooster {
    cited_article: f32,
    preliminary_matter: f32,
    central_idea: f32,
}

impl DomainBooster {
    pub fn new(settings: &ScoringSettings) -> Self {
        Self {
            cited_article: settings.cited_article_boost,
            preliminary_matter: settings.preliminary_matter_boost,
            central_idea: settings.central_idea_boost,
        }
    }

    /// Boost owed to `payload` for `question`:
    /// - cited article: once per `(citation, article number)` pair whose number is a
    ///   question word or whose source name appears in the question
    /// - preliminary matter: when it appears in the question
    /// - central idea: when a question keyword is one of its words
    pub fn boost_for(&self, payload: &ParagraphRecord, question: &str) -> f32 {
        let q_lower = question.to_lowercase();
        let q_words: HashSet<String> = normalized_words(question).collect();
        let mut boost = 0.0;

        for citation in &payload.cited_articles {
            let source = citation.source.trim().to_lowercase();
            let source_named = !source.is_empty() && q_lower.contains(&source);
            for number in &citation.article_numbers {
                if source_named || q_words.contains(&number.to_string()) {
                    boost += self.cited_article;
                }
            }
        }

        if let Some(matter) = payload.preliminary_matter.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            if q_lower.contains(&matter.to_lowercase()) {
                boost += self.preliminary_matter;
            }
        }

        if let Some(idea) = payload.central_idea.as_deref() {
            let idea_words: HashSet<String> = normalized_words(idea).collect();
            if q_words.iter().any(|w| w.chars().count() >= MIN_KEYWORD_CHARS && idea_words.contains(w)) {
                boost += self.central_idea;
            }
        }
        boost
    }

    pub fn apply(&self, question: &str, candidates: &mut [CandidateHit]) {
        for c in candidates {
            c.combined_score += self.boost_for(&c.payload, question);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fallos_core::types::Citation;

    fn payload() -> ParagraphRecord {
        ParagraphRecord {
            case_id: "X".into(),
            section: "S".into(),
            paragraph_index: 0,
            text: "texto".into(),
            source_path: "x.json".into(),
            central_idea: Some("Prescripción de la acción disciplinaria".into()),
            cited_articles: vec![Citation { source: "Ley 7046".into(), article_numbers: vec![12, 14] }],
            preliminary_matter: Some("Empleo público".into()),
        }
    }

    fn booster() -> DomainBooster { DomainBooster::new(&ScoringSettings::default()) }

    #[test]
    fn article_number_in_question_boosts_once_per_matching_number() {
        let b = booster().boost_for(&payload(), "¿qué dice el artículo 12?");
        assert!((b - 0.3).abs() < 1e-6, "got {b}");
    }

    #[test]
    fn named_source_boosts_every_cited_number() {
        let b = booster().boost_for(&payload(), "alcance de la ley 7046");
        assert!((b - 0.6).abs() < 1e-6, "got {b}");
    }

    #[test]
    fn matter_and_idea_boosts_add_up() {
        let b = booster().boost_for(&payload(), "prescripción en el empleo público");
        assert!((b - 0.3).abs() < 1e-6, "0.1 matter + 0.2 idea, got {b}");
    }

    #[test]
    fn short_words_do_not_trigger_idea_boost() {
        assert_eq!(booster().boost_for(&payload(), "de la"), 0.0);
    }

    #[test]
    fn boost_is_order_independent() {
        let mut a = vec![
            CandidateHit { position: 0, combined_score: 1.0, dense_score: Some(1.0), lexical_score: None, payload: payload() },
        ];
        booster().apply("artículo 14", &mut a);
        booster().apply("", &mut a);
        assert!((a[0].combined_score - 1.3).abs() < 1e-6);
    }
}
