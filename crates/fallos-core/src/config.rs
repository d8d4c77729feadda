//! Settings loader and path helpers.
//!
//! Uses Figment to merge built-in defaults + `config.toml` + `config.<env>.toml` +
//! `FALLOS_*` env vars (nested keys split on `__`, e.g. `FALLOS_SEARCH__K_DENSE=50`).
//! Every option is enumerated and defaulted here; nothing else reads the environment
//! for tunables.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::SearchType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the `*.json` rulings corpus.
    pub corpus_dir: PathBuf,
    /// Holds the generation manifest and lexical generations.
    pub index_dir: PathBuf,
    pub corpus: CorpusSettings,
    pub embedding: EmbeddingSettings,
    pub reranker: RerankerSettings,
    pub dense: DenseSettings,
    pub lexical: LexicalSettings,
    pub search: SearchSettings,
    pub scoring: ScoringSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusSettings {
    pub min_paragraph_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: Option<PathBuf>,
    pub dimension: usize,
    pub max_batch_size: usize,
    pub max_seq_len: usize,
    pub use_fake: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerSettings {
    pub model_dir: Option<PathBuf>,
    pub max_seq_len: usize,
    pub batch_size: usize,
    /// Paragraph text is cut to this many characters before scoring.
    pub max_chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseSettings {
    /// LanceDB URI: a local directory or a remote `db://` endpoint.
    pub uri: String,
    pub collection: String,
    pub upload_batch_size: usize,
    /// Below this row count no ANN index is trained; search stays exhaustive.
    pub ann_min_rows: usize,
    pub retained_generations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalSettings {
    pub large_corpus_threshold: usize,
    pub min_token_len: usize,
    pub max_token_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub strategy: SearchType,
    pub k_dense: usize,
    pub k_lex: usize,
    pub max_top_n: usize,
    pub default_top_n: usize,
    pub enable_reranking: bool,
    pub enable_query_cache: bool,
    pub query_cache_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub lexical_weight: f32,
    pub cited_article_boost: f32,
    pub preliminary_matter_boost: f32,
    pub central_idea_boost: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("datasets/fallos_json"),
            index_dir: PathBuf::from("indexes"),
            corpus: CorpusSettings::default(),
            embedding: EmbeddingSettings::default(),
            reranker: RerankerSettings::default(),
            dense: DenseSettings::default(),
            lexical: LexicalSettings::default(),
            search: SearchSettings::default(),
            scoring: ScoringSettings::default(),
        }
    }
}

impl Default for CorpusSettings {
    fn default() -> Self { Self { min_paragraph_chars: 10 } }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { model_dir: None, dimension: 384, max_batch_size: 64, max_seq_len: 256, use_fake: false }
    }
}

impl Default for RerankerSettings {
    fn default() -> Self { Self { model_dir: None, max_seq_len: 512, batch_size: 32, max_chars: 500 } }
}

impl Default for DenseSettings {
    fn default() -> Self {
        Self {
            uri: "indexes/lancedb".to_string(),
            collection: "fallos".to_string(),
            upload_batch_size: 500,
            ann_min_rows: 10_000,
            retained_generations: 2,
        }
    }
}

impl Default for LexicalSettings {
    fn default() -> Self { Self { large_corpus_threshold: 50_000, min_token_len: 3, max_token_len: 20 } }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            strategy: SearchType::Hybrid,
            k_dense: 30,
            k_lex: 30,
            max_top_n: 20,
            default_top_n: 8,
            enable_reranking: true,
            enable_query_cache: true,
            query_cache_size: 100,
        }
    }
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self { lexical_weight: 0.5, cited_article_boost: 0.3, preliminary_matter_boost: 0.1, central_idea_boost: 0.2 }
    }
}

impl Settings {
    /// Load from the current directory.
    pub fn load() -> Result<Self> { Self::load_from(Path::new(".")) }

    /// Load `config.toml` (+ `config.<RUST_ENV>.toml`) from `dir`, apply `FALLOS_*`
    /// overrides, resolve relative paths against `dir` and validate.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("FALLOS_").split("__"));

        let settings: Settings = figment
            .extract()
            .map_err(|e| Error::InvalidConfig(format!("failed to read settings: {e}")))?;
        let settings = settings.resolve_paths(dir);
        settings.validate()?;
        Ok(settings)
    }

    /// Expand `~`/`${VAR}` in every path option and anchor relative ones at `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        self.corpus_dir = resolve_with_base(base, self.corpus_dir.to_string_lossy());
        self.index_dir = resolve_with_base(base, self.index_dir.to_string_lossy());
        self.embedding.model_dir = self.embedding.model_dir.map(|p| resolve_with_base(base, p.to_string_lossy()));
        self.reranker.model_dir = self.reranker.model_dir.map(|p| resolve_with_base(base, p.to_string_lossy()));
        if !self.dense.uri.contains("://") {
            self.dense.uri = resolve_with_base(base, &self.dense.uri).to_string_lossy().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.embedding.dimension == 0 { return invalid("embedding.dimension must be positive"); }
        if self.embedding.max_batch_size == 0 { return invalid("embedding.max_batch_size must be positive"); }
        if self.embedding.max_seq_len == 0 { return invalid("embedding.max_seq_len must be positive"); }
        if self.reranker.batch_size == 0 { return invalid("reranker.batch_size must be positive"); }
        if self.dense.upload_batch_size == 0 { return invalid("dense.upload_batch_size must be positive"); }
        if self.dense.collection.trim().is_empty() { return invalid("dense.collection must not be empty"); }
        if self.dense.retained_generations == 0 { return invalid("dense.retained_generations must be at least 1"); }
        if self.search.k_dense == 0 || self.search.k_lex == 0 { return invalid("search.k_dense and search.k_lex must be positive"); }
        if self.search.max_top_n == 0 { return invalid("search.max_top_n must be positive"); }
        if self.search.default_top_n == 0 || self.search.default_top_n > self.search.max_top_n {
            return invalid("search.default_top_n must be within 1..=max_top_n");
        }
        if self.lexical.min_token_len > self.lexical.max_token_len {
            return invalid("lexical.min_token_len must not exceed lexical.max_token_len");
        }
        if !self.scoring.lexical_weight.is_finite() { return invalid("scoring.lexical_weight must be finite"); }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
