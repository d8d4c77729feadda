use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Stage of an index build, reported when a build aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    LoadCorpus,
    Embed,
    DenseIndex,
    LexicalIndex,
    Publish,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LoadCorpus => "load-corpus",
            Self::Embed => "embed",
            Self::DenseIndex => "dense-index",
            Self::LexicalIndex => "lexical-index",
            Self::Publish => "publish",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document without ID_FALLO in {path}")]
    MissingCaseIdentifier { path: PathBuf },

    #[error("Malformed document in {path}: {reason}")]
    MalformedDocument { path: PathBuf, reason: String },

    #[error("Missing index artifact: {0}")]
    MissingIndexArtifact(PathBuf),

    #[error("Dense store failure: {0}")]
    RemoteStore(String),

    #[error("No paragraphs found under {0}")]
    EmptyCorpus(PathBuf),

    #[error("Build aborted at stage '{stage}': {source}")]
    BuildStage {
        stage: BuildStage,
        #[source]
        source: Box<Error>,
    },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Re-ranking failed: {0}")]
    Rerank(String),

    #[error("Lexical index failure: {0}")]
    Lexical(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Per-document failures are skipped and counted, never propagated.
    pub fn is_document_level(&self) -> bool {
        matches!(self, Self::MissingCaseIdentifier { .. } | Self::MalformedDocument { .. })
    }

    /// Tag an error with the build stage that raised it. Already tagged errors keep their stage.
    pub fn at_stage(self, stage: BuildStage) -> Self {
        match self {
            tagged @ Self::BuildStage { .. } => tagged,
            other => Self::BuildStage { stage, source: Box::new(other) },
        }
    }

    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            Self::BuildStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
