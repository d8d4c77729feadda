//! Index generations and the manifest that names the live one.
//!
//! Each build writes a fresh dense collection (`<collection>__<build_id>`) and a
//! fresh lexical directory (`generations/<build_id>/`), then atomically replaces
//! `ACTIVE.json`. Readers pin whatever generation the manifest named when they
//! opened, so a rebuild never exposes a missing or half-written index.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use fallos_core::error::{Error, Result};
use fallos_core::fingerprint::write_json_atomic;
use fallos_core::traits::DenseStore;
use fallos_lexical::TokenFilter;

pub const MANIFEST_FILE: &str = "ACTIVE.json";
pub const GENERATIONS_DIR: &str = "generations";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub build_id: String,
    pub collection: String,
    /// Lexical directory, relative to the index directory.
    pub lexical_dir: PathBuf,
    pub paragraph_count: usize,
    pub dimension: usize,
    pub token_filter: Option<TokenFilter>,
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn path(index_dir: &Path) -> PathBuf { index_dir.join(MANIFEST_FILE) }

    /// The live manifest; `MissingIndexArtifact` when nothing was ever published.
    pub fn load(index_dir: &Path) -> Result<Self> {
        let path = Self::path(index_dir);
        if !path.exists() {
            return Err(Error::MissingIndexArtifact(path));
        }
        Ok(serde_json::from_slice(&fs::read(&path)?)?)
    }

    pub fn load_optional(index_dir: &Path) -> Result<Option<Self>> {
        match Self::load(index_dir) {
            Ok(m) => Ok(Some(m)),
            Err(Error::MissingIndexArtifact(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically make this generation the live one.
    pub fn publish(&self, index_dir: &Path) -> Result<()> {
        write_json_atomic(&Self::path(index_dir), self)?;
        info!(build_id = %self.build_id, collection = %self.collection, paragraphs = self.paragraph_count, "generation published");
        Ok(())
    }

    pub fn lexical_path(&self, index_dir: &Path) -> PathBuf { index_dir.join(&self.lexical_dir) }
}

/// Sortable, filesystem- and table-name-safe id, e.g. `20260101T120000123456789`.
pub fn new_build_id() -> String { Utc::now().format("%Y%m%dT%H%M%S%9f").to_string() }

pub fn collection_name(base: &str, build_id: &str) -> String { format!("{base}__{build_id}") }

pub fn generation_dir(build_id: &str) -> PathBuf { Path::new(GENERATIONS_DIR).join(build_id) }

/// Build ids with a lexical directory on disk, oldest first.
pub fn list_generations(index_dir: &Path) -> Result<Vec<String>> {
    let dir = index_dir.join(GENERATIONS_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = fs::read_dir(&dir)?
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort();
    Ok(ids)
}

/// Remove one generation's artifacts. Missing pieces are ignored.
pub async fn remove_generation<S: DenseStore>(store: &S, index_dir: &Path, base_collection: &str, build_id: &str) -> Result<()> {
    store.drop_collection(&collection_name(base_collection, build_id)).await?;
    let dir = index_dir.join(generation_dir(build_id));
    if dir.exists() {
        fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Keep the live generation plus the newest others up to `retain` in total;
/// delete the rest, including dense collections orphaned by failed builds.
pub async fn collect_garbage<S: DenseStore>(
    store: &S,
    index_dir: &Path,
    base_collection: &str,
    live: &IndexManifest,
    retain: usize,
) -> Result<Vec<String>> {
    let mut keep: BTreeSet<String> = BTreeSet::from([live.build_id.clone()]);
    for id in list_generations(index_dir)?.into_iter().rev() {
        if keep.len() >= retain.max(1) {
            break;
        }
        keep.insert(id);
    }

    let prefix = format!("{base_collection}__");
    let mut doomed: BTreeSet<String> = list_generations(index_dir)?.into_iter().filter(|id| !keep.contains(id)).collect();
    for name in store.collection_names().await? {
        if let Some(id) = name.strip_prefix(&prefix) {
            if !keep.contains(id) {
                doomed.insert(id.to_string());
            }
        }
    }

    let mut removed = Vec::new();
    for id in doomed {
        match remove_generation(store, index_dir, base_collection, &id).await {
            Ok(()) => removed.push(id),
            Err(e) => warn!(build_id = %id, error = %e, "failed to remove old generation"),
        }
    }
    if !removed.is_empty() {
        info!(removed = removed.len(), kept = keep.len(), "old generations removed");
    }
    Ok(removed)
}
