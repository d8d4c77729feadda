//! Domain types shared by the loader, both indexes and the query engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Index of a paragraph in loader traversal order.
///
/// The same value keys the paragraph's vector in the dense collection and its
/// slot in the lexical index's parallel text array.
pub type Position = u64;

/// One `{source, article_numbers}` entry of a ruling's cited-articles metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub article_numbers: Vec<i64>,
}

/// One retrievable paragraph of a ruling.
///
/// - `case_id`: the ruling identifier (`METADATOS.ID_FALLO`), never empty
/// - `section`: name of the `CONTENIDO` section the paragraph belongs to
/// - `paragraph_index`: index of the entry inside its section
/// - `text`: trimmed paragraph text
/// - `source_path`: corpus-relative path, `/`-separated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParagraphRecord {
    pub case_id: String,
    pub section: String,
    pub paragraph_index: usize,
    pub text: String,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_idea: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cited_articles: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preliminary_matter: Option<String>,
}

impl ParagraphRecord {
    pub fn has_enrichment(&self) -> bool {
        self.central_idea.is_some() || !self.cited_articles.is_empty() || self.preliminary_matter.is_some()
    }
}

/// Retrieval strategy; also the `search_type` label carried by each hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    Dense,
    #[default]
    Hybrid,
    HybridEnriched,
}

impl SearchType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Hybrid => "hybrid",
            Self::HybridEnriched => "hybrid_enriched",
        }
    }

    pub fn uses_lexical(self) -> bool { !matches!(self, Self::Dense) }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for SearchType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dense" => Ok(Self::Dense),
            "hybrid" => Ok(Self::Hybrid),
            "hybrid_enriched" | "hybrid-enriched" | "enriched" => Ok(Self::HybridEnriched),
            other => Err(crate::error::Error::InvalidConfig(format!("unknown search strategy '{other}'"))),
        }
    }
}

/// A hit returned by the dense store.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseHit {
    pub position: Position,
    pub score: f32,
    pub payload: ParagraphRecord,
}

/// A merged candidate during a single query. `dense_score` and `lexical_score`
/// record which sources contributed.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateHit {
    pub position: Position,
    pub combined_score: f32,
    pub dense_score: Option<f32>,
    pub lexical_score: Option<f32>,
    pub payload: ParagraphRecord,
}

/// The outward hit shape handed to callers (HTTP layer, terminal UI, generator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub case_id: String,
    pub section: String,
    pub paragraph_text: String,
    pub source_path: String,
    pub paragraph_index: usize,
    pub search_type: SearchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central_idea: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cited_articles: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preliminary_matter: Option<String>,
}

impl SearchHit {
    pub fn from_candidate(candidate: CandidateHit, search_type: SearchType) -> Self {
        let p = candidate.payload;
        Self {
            score: candidate.combined_score,
            case_id: p.case_id,
            section: p.section,
            paragraph_text: p.text,
            source_path: p.source_path,
            paragraph_index: p.paragraph_index,
            search_type,
            central_idea: p.central_idea,
            cited_articles: p.cited_articles,
            preliminary_matter: p.preliminary_matter,
        }
    }
}

/// On-disk footprint of a built generation. `dense_bytes` is `None` when the
/// store is remote or in-process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSizes {
    pub lexical_bytes: u64,
    pub text_array_bytes: u64,
    pub dense_bytes: Option<u64>,
}

/// Outcome of a full index build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub build_id: String,
    pub paragraph_count: usize,
    pub index_sizes: IndexSizes,
    pub duration: Duration,
    pub documents_skipped: usize,
    pub short_paragraphs: usize,
    pub peak_memory_bytes: Option<u64>,
}
