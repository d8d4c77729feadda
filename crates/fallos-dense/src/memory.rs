//! In-process dense store with exhaustive cosine search.
//!
//! Used by tests and single-process deployments. Fault switches let callers
//! simulate store outages.
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fallos_core::error::{Error, Result};
use fallos_core::traits::{DenseIndex, DenseStore};
use fallos_core::types::{DenseHit, ParagraphRecord, Position};

#[derive(Debug, Default)]
struct Points {
    dim: usize,
    rows: BTreeMap<Position, (Vec<f32>, ParagraphRecord)>,
}

type Slot = Arc<RwLock<Option<Points>>>;

#[derive(Debug, Default)]
struct Faults {
    upload: AtomicBool,
    search: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemoryDenseStore {
    collections: Arc<RwLock<HashMap<String, Slot>>>,
    faults: Arc<Faults>,
}

impl MemoryDenseStore {
    pub fn new() -> Self { Self::default() }

    /// Make every subsequent upload fail.
    pub fn fail_uploads(&self, fail: bool) { self.faults.upload.store(fail, Ordering::SeqCst); }

    /// Make every subsequent search and fetch fail.
    pub fn fail_searches(&self, fail: bool) { self.faults.search.store(fail, Ordering::SeqCst); }

    fn slot(&self, name: &str) -> Slot {
        self.collections.write().entry(name.to_string()).or_default().clone()
    }
}

#[async_trait]
impl DenseStore for MemoryDenseStore {
    type Collection = MemoryCollection;

    async fn open_collection(&self, name: &str) -> Result<MemoryCollection> {
        Ok(MemoryCollection { name: name.to_string(), slot: self.slot(name), faults: self.faults.clone() })
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        if let Some(slot) = self.collections.write().remove(name) {
            *slot.write() = None;
        }
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|(_, slot)| slot.read().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

pub struct MemoryCollection {
    name: String,
    slot: Slot,
    faults: Arc<Faults>,
}

impl MemoryCollection {
    fn missing(&self) -> Error { Error::RemoteStore(format!("collection {} does not exist", self.name)) }

    fn check_search_fault(&self) -> Result<()> {
        if self.faults.search.load(Ordering::SeqCst) {
            return Err(Error::RemoteStore(format!("collection {} unavailable", self.name)));
        }
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
}

#[async_trait]
impl DenseIndex for MemoryCollection {
    fn name(&self) -> &str { &self.name }

    async fn rebuild(&self, dimension: usize) -> Result<()> {
        *self.slot.write() = Some(Points { dim: dimension, rows: BTreeMap::new() });
        Ok(())
    }

    async fn upload(&self, ids: &[Position], vectors: &[Vec<f32>], payloads: &[ParagraphRecord], batch_size: usize) -> Result<()> {
        if ids.len() != vectors.len() || ids.len() != payloads.len() {
            return Err(Error::RemoteStore("ids, vectors and payloads differ in length".to_string()));
        }
        let batch_size = batch_size.max(1);
        for (batch_no, start) in (0..ids.len()).step_by(batch_size).enumerate() {
            if self.faults.upload.load(Ordering::SeqCst) {
                return Err(Error::RemoteStore(format!("upload batch {batch_no} rejected")));
            }
            let end = (start + batch_size).min(ids.len());
            let mut guard = self.slot.write();
            let points = guard.as_mut().ok_or_else(|| self.missing())?;
            for i in start..end {
                if vectors[i].len() != points.dim {
                    return Err(Error::RemoteStore(format!(
                        "upload batch {batch_no}: vector of dimension {} (collection has {})",
                        vectors[i].len(),
                        points.dim
                    )));
                }
                points.rows.insert(ids[i], (vectors[i].clone(), payloads[i].clone()));
            }
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<DenseHit>> {
        self.check_search_fault()?;
        let guard = self.slot.read();
        let points = guard.as_ref().ok_or_else(|| self.missing())?;
        let mut hits: Vec<DenseHit> = points
            .rows
            .iter()
            .map(|(pos, (vector, payload))| DenseHit { position: *pos, score: cosine(query, vector), payload: payload.clone() })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.position.cmp(&b.position)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn fetch(&self, ids: &[Position]) -> Result<Vec<(Position, ParagraphRecord)>> {
        self.check_search_fault()?;
        let guard = self.slot.read();
        let points = guard.as_ref().ok_or_else(|| self.missing())?;
        Ok(ids.iter().filter_map(|id| points.rows.get(id).map(|(_, p)| (*id, p.clone()))).collect())
    }

    async fn count(&self) -> Result<usize> { Ok(self.slot.read().as_ref().map_or(0, |p| p.rows.len())) }
}
