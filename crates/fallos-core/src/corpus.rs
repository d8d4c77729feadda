//! Corpus loader: walks a directory of ruling JSON files and yields paragraphs.
//!
//! Traversal order is deterministic (files sorted by path, sections in document
//! order, entries in list order); the running index of a paragraph in that order
//! is its [`Position`](crate::types::Position).
use serde_json::{Map, Value};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::{Citation, ParagraphRecord};

/// Result of parsing one document inside a file.
#[derive(Debug)]
pub enum DocumentOutcome {
    Parsed { case_id: String, paragraphs: Vec<ParagraphRecord>, short_paragraphs: usize },
    Skipped(Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub files_seen: usize,
    pub documents_parsed: usize,
    pub documents_skipped: usize,
    pub paragraphs_emitted: usize,
    pub short_paragraphs: usize,
    pub case_ids: BTreeSet<String>,
}

impl LoaderStats {
    pub fn distinct_cases(&self) -> usize { self.case_ids.len() }
}

#[derive(Debug, Clone)]
pub struct CorpusLoader {
    root: PathBuf,
    min_paragraph_chars: usize,
}

impl CorpusLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into(), min_paragraph_chars: 10 } }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.corpus_dir).with_min_paragraph_chars(settings.corpus.min_paragraph_chars)
    }

    pub fn with_min_paragraph_chars(mut self, min: usize) -> Self {
        self.min_paragraph_chars = min;
        self
    }

    pub fn root(&self) -> &Path { &self.root }

    /// All `*.json` files under the root, sorted by path.
    pub fn list_files(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("corpus directory not found: {}", self.root.display()),
            )));
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable corpus entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "json"))
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();
        Ok(files)
    }

    /// Lazy paragraph sequence. Every call re-reads the corpus from disk.
    pub fn paragraphs(&self) -> Result<Paragraphs> {
        let files = self.list_files()?;
        Ok(Paragraphs { loader: self.clone(), files: files.into(), buffer: VecDeque::new(), stats: LoaderStats::default() })
    }

    /// Materialize the whole sequence together with the walk statistics.
    pub fn load(&self) -> Result<(Vec<ParagraphRecord>, LoaderStats)> {
        let mut iter = self.paragraphs()?;
        let records: Vec<ParagraphRecord> = iter.by_ref().collect();
        let stats = iter.into_stats();
        debug!(
            files = stats.files_seen,
            documents = stats.documents_parsed,
            skipped = stats.documents_skipped,
            paragraphs = stats.paragraphs_emitted,
            "corpus loaded"
        );
        Ok((records, stats))
    }

    /// Parse a single file into per-document outcomes. An unreadable or
    /// non-JSON file yields one skipped outcome.
    pub fn parse_file(&self, path: &Path) -> Vec<DocumentOutcome> {
        let value: Value = match fs::read(path).map_err(Error::from).and_then(|b| Ok(serde_json::from_slice::<Value>(&b)?)) {
            Ok(v) => v,
            Err(e) => {
                return vec![DocumentOutcome::Skipped(Error::MalformedDocument {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })]
            }
        };
        let source_path = self.relative_path(path);
        match value {
            Value::Array(docs) => docs.iter().map(|d| self.parse_document(path, &source_path, d)).collect(),
            doc => vec![self.parse_document(path, &source_path, &doc)],
        }
    }

    fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn parse_document(&self, path: &Path, source_path: &str, doc: &Value) -> DocumentOutcome {
        let malformed = |reason: &str| {
            DocumentOutcome::Skipped(Error::MalformedDocument { path: path.to_path_buf(), reason: reason.to_string() })
        };
        let Some(doc) = doc.as_object() else { return malformed("document is not an object") };
        let Some(case_id) = case_identifier(doc) else {
            return DocumentOutcome::Skipped(Error::MissingCaseIdentifier { path: path.to_path_buf() });
        };
        let Some(content) = doc.get("CONTENIDO").and_then(Value::as_object) else {
            return malformed("CONTENIDO missing or not an object");
        };

        let central_idea = non_empty_str(doc.get("IDEA_CENTRAL"));
        let preliminary_matter = non_empty_str(doc.get("MATERIA_PRELIMINAR"));
        let cited_articles = citations(doc);

        let mut paragraphs = Vec::new();
        let mut short_paragraphs = 0usize;
        for (section, entries) in content {
            let entries: Vec<&Value> = match entries {
                Value::Array(list) => list.iter().collect(),
                Value::String(_) => vec![entries],
                _ => continue,
            };
            for (paragraph_index, entry) in entries.into_iter().enumerate() {
                let Some(text) = entry.as_str().map(str::trim) else {
                    short_paragraphs += 1;
                    continue;
                };
                if text.chars().count() < self.min_paragraph_chars {
                    short_paragraphs += 1;
                    continue;
                }
                paragraphs.push(ParagraphRecord {
                    case_id: case_id.clone(),
                    section: section.clone(),
                    paragraph_index,
                    text: text.to_string(),
                    source_path: source_path.to_string(),
                    central_idea: central_idea.clone(),
                    cited_articles: cited_articles.clone(),
                    preliminary_matter: preliminary_matter.clone(),
                });
            }
        }
        DocumentOutcome::Parsed { case_id, paragraphs, short_paragraphs }
    }
}

fn case_identifier(doc: &Map<String, Value>) -> Option<String> {
    let id = doc.get("METADATOS")?.get("ID_FALLO")?;
    let id = match id {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn citations(doc: &Map<String, Value>) -> Vec<Citation> {
    let Some(list) = doc
        .get("METADATOS")
        .and_then(|m| m.get("ARTICULOS_CITADOS"))
        .and_then(|a| a.get("citations"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    list.iter()
        .filter_map(Value::as_object)
        .map(|c| Citation {
            source: c.get("main_source").and_then(Value::as_str).unwrap_or_default().trim().to_string(),
            article_numbers: c
                .get("cited_articles")
                .and_then(Value::as_array)
                .map(|nums| nums.iter().filter_map(article_number).collect())
                .unwrap_or_default(),
        })
        .filter(|c| !c.source.is_empty() || !c.article_numbers.is_empty())
        .collect()
}

fn article_number(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Lazy, file-at-a-time paragraph iterator. Running statistics are available
/// at any point through [`Paragraphs::stats`].
#[derive(Debug)]
pub struct Paragraphs {
    loader: CorpusLoader,
    files: VecDeque<PathBuf>,
    buffer: VecDeque<ParagraphRecord>,
    stats: LoaderStats,
}

impl Paragraphs {
    pub fn stats(&self) -> &LoaderStats { &self.stats }

    pub fn into_stats(self) -> LoaderStats { self.stats }

    fn fill_from(&mut self, file: &Path) {
        self.stats.files_seen += 1;
        for outcome in self.loader.parse_file(file) {
            match outcome {
                DocumentOutcome::Parsed { case_id, paragraphs, short_paragraphs } => {
                    self.stats.documents_parsed += 1;
                    self.stats.short_paragraphs += short_paragraphs;
                    self.stats.case_ids.insert(case_id);
                    self.buffer.extend(paragraphs);
                }
                DocumentOutcome::Skipped(err) => {
                    self.stats.documents_skipped += 1;
                    warn!(file = %file.display(), error = %err, "skipping document");
                }
            }
        }
    }
}

impl Iterator for Paragraphs {
    type Item = ParagraphRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(p) = self.buffer.pop_front() {
                self.stats.paragraphs_emitted += 1;
                return Some(p);
            }
            let file = self.files.pop_front()?;
            self.fill_from(&file);
        }
    }
}
