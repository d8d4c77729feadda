//! Corpus change detection.
//!
//! A fingerprint hashes `(relative path, size, mtime)` of every corpus file.
//! It is persisted as JSON next to the indexes and overwritten whenever a
//! difference is detected.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::corpus::CorpusLoader;
use crate::error::Result;

pub const FIRST_INDEXING: &str = "first indexing";
pub const MODIFICATIONS_DETECTED: &str = "modifications detected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusFingerprint {
    pub hash: String,
    pub file_count: u64,
    pub total_bytes: u64,
    pub last_check: DateTime<Utc>,
}

fn mtime_nanos(meta: &fs::Metadata) -> u128 {
    meta.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map_or(0, |d| d.as_nanos())
}

impl CorpusFingerprint {
    pub fn compute(corpus_root: &Path) -> Result<Self> {
        let loader = CorpusLoader::new(corpus_root);
        let mut hasher = blake3::Hasher::new();
        let mut file_count = 0u64;
        let mut total_bytes = 0u64;
        for path in loader.list_files()? {
            let meta = fs::metadata(&path)?;
            let rel = path.strip_prefix(corpus_root).unwrap_or(&path).to_string_lossy().replace('\\', "/");
            hasher.update(rel.as_bytes());
            hasher.update(&[0]);
            hasher.update(&meta.len().to_le_bytes());
            hasher.update(&mtime_nanos(&meta).to_le_bytes());
            file_count += 1;
            total_bytes += meta.len();
        }
        Ok(Self { hash: hasher.finalize().to_hex().to_string(), file_count, total_bytes, last_check: Utc::now() })
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Atomic replace: write to a sibling temp file, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Human-readable difference against an older fingerprint, e.g. `+3 files, +2048 bytes`.
    pub fn describe_change_from(&self, previous: &Self) -> String {
        let files = i128::from(self.file_count) - i128::from(previous.file_count);
        let bytes = i128::from(self.total_bytes) - i128::from(previous.total_bytes);
        if files == 0 && bytes == 0 {
            MODIFICATIONS_DETECTED.to_string()
        } else {
            format!("{files:+} files, {bytes:+} bytes")
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&serde_json::to_vec_pretty(value)?)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub changed: bool,
    pub description: String,
    pub current: CorpusFingerprint,
    pub previous: Option<CorpusFingerprint>,
}

/// Compares the corpus against the last persisted fingerprint.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    corpus_root: PathBuf,
    metadata_path: PathBuf,
}

impl ChangeDetector {
    pub const METADATA_FILE: &'static str = "dataset_metadata.json";

    pub fn new(corpus_root: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self { corpus_root: corpus_root.into(), metadata_path: metadata_path.into() }
    }

    /// Detector persisting its fingerprint under `index_dir`.
    pub fn in_index_dir(corpus_root: impl Into<PathBuf>, index_dir: &Path) -> Self {
        Self::new(corpus_root, index_dir.join(Self::METADATA_FILE))
    }

    pub fn metadata_path(&self) -> &Path { &self.metadata_path }

    /// Compare the corpus with the stored fingerprint without persisting anything.
    pub fn compare(&self) -> Result<ChangeReport> {
        let current = CorpusFingerprint::compute(&self.corpus_root)?;
        let previous = CorpusFingerprint::load(&self.metadata_path)?;
        let (changed, description) = match &previous {
            None => (true, FIRST_INDEXING.to_string()),
            Some(prev) if prev.hash == current.hash => (false, String::new()),
            Some(prev) => (true, current.describe_change_from(prev)),
        };
        Ok(ChangeReport { changed, description, current, previous })
    }

    /// Store `fingerprint` as the new baseline.
    pub fn record(&self, fingerprint: &CorpusFingerprint) -> Result<()> { fingerprint.save(&self.metadata_path) }

    /// [`ChangeDetector::compare`], then persist the current fingerprint when it
    /// differs (or when none exists yet).
    pub fn check(&self) -> Result<ChangeReport> {
        let report = self.compare()?;
        if report.changed {
            self.record(&report.current)?;
            info!(corpus = %self.corpus_root.display(), change = %report.description, "corpus changed");
        }
        Ok(report)
    }

    /// `(changed, description)`; see [`ChangeDetector::check`].
    pub fn fingerprint_changed(&self) -> Result<(bool, String)> {
        let report = self.check()?;
        Ok((report.changed, report.description))
    }

    /// Corpus files modified after the last persisted check. Every file when
    /// no fingerprint exists yet.
    pub fn files_modified_since_last_check(&self) -> Result<Vec<PathBuf>> {
        let since = CorpusFingerprint::load(&self.metadata_path)?.map(|f| f.last_check);
        files_modified_since(&self.corpus_root, since)
    }
}

/// Corpus files whose mtime is newer than `since` (all files when `None`).
pub fn files_modified_since(corpus_root: &Path, since: Option<DateTime<Utc>>) -> Result<Vec<PathBuf>> {
    let files = CorpusLoader::new(corpus_root).list_files()?;
    let Some(since) = since else { return Ok(files) };
    let since: SystemTime = since.into();
    let mut out = Vec::new();
    for path in files {
        let modified = fs::metadata(&path)?.modified()?;
        if modified > since {
            out.push(path);
        }
    }
    Ok(out)
}
