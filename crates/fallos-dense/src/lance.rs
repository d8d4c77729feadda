//! LanceDB-backed dense store. One table per collection, cosine distance.
use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::path::PathBuf;
use tracing::{debug, info};

use fallos_core::config::DenseSettings;
use fallos_core::error::{Error, Result};
use fallos_core::traits::{DenseIndex, DenseStore};
use fallos_core::types::{DenseHit, ParagraphRecord, Position};

use crate::ann::{build_ivfpq_index, compute_ivfpq_params};
use crate::schema::{build_arrow_schema, rows_from_batch, scores_from_batch, to_record_batch, POSITION};
use crate::table::{drop_table, ensure_table, open_db, store_err, table_exists};

#[derive(Clone)]
pub struct LanceStore {
    conn: Connection,
    uri: String,
    ann_min_rows: usize,
    show_progress: bool,
}

impl LanceStore {
    pub async fn connect(uri: &str) -> Result<Self> {
        Ok(Self { conn: open_db(uri).await?, uri: uri.to_string(), ann_min_rows: 10_000, show_progress: false })
    }

    pub async fn from_settings(settings: &DenseSettings) -> Result<Self> {
        Ok(Self::connect(&settings.uri).await?.with_ann_min_rows(settings.ann_min_rows))
    }

    pub fn with_ann_min_rows(mut self, rows: usize) -> Self {
        self.ann_min_rows = rows;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn local_table_dir(&self, name: &str) -> Option<PathBuf> {
        (!self.uri.contains("://")).then(|| PathBuf::from(&self.uri).join(format!("{name}.lance")))
    }
}

#[async_trait]
impl DenseStore for LanceStore {
    type Collection = LanceCollection;

    async fn open_collection(&self, name: &str) -> Result<LanceCollection> {
        Ok(LanceCollection {
            conn: self.conn.clone(),
            name: name.to_string(),
            ann_min_rows: self.ann_min_rows,
            show_progress: self.show_progress,
        })
    }

    async fn drop_collection(&self, name: &str) -> Result<()> { drop_table(&self.conn, name).await }

    async fn collection_names(&self) -> Result<Vec<String>> {
        self.conn.table_names().execute().await.map_err(|e| store_err("listing tables", e))
    }

    async fn collection_size(&self, name: &str) -> Result<Option<u64>> {
        let Some(dir) = self.local_table_dir(name) else { return Ok(None) };
        if !dir.exists() {
            return Ok(None);
        }
        Ok(Some(
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter_map(|e| e.metadata().ok())
                .filter(std::fs::Metadata::is_file)
                .map(|m| m.len())
                .sum(),
        ))
    }
}

pub struct LanceCollection {
    conn: Connection,
    name: String,
    ann_min_rows: usize,
    show_progress: bool,
}

impl LanceCollection {
    async fn table(&self) -> Result<Table> {
        self.conn
            .open_table(&self.name)
            .execute()
            .await
            .map_err(|e| store_err(&format!("opening collection {}", self.name), e))
    }

    fn progress(&self, total: usize) -> ProgressBar {
        let pb = if self.show_progress { ProgressBar::new(total as u64) } else { ProgressBar::hidden() };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} vectors ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

#[async_trait]
impl DenseIndex for LanceCollection {
    fn name(&self) -> &str { &self.name }

    async fn rebuild(&self, dimension: usize) -> Result<()> {
        drop_table(&self.conn, &self.name).await?;
        ensure_table(&self.conn, &self.name, build_arrow_schema(dimension)?).await?;
        info!(collection = %self.name, dimension, "collection recreated");
        Ok(())
    }

    async fn upload(&self, ids: &[Position], vectors: &[Vec<f32>], payloads: &[ParagraphRecord], batch_size: usize) -> Result<()> {
        if ids.len() != vectors.len() || ids.len() != payloads.len() {
            return Err(Error::RemoteStore(format!(
                "upload of {} ids with {} vectors and {} payloads",
                ids.len(),
                vectors.len(),
                payloads.len()
            )));
        }
        let Some(dim) = vectors.first().map(Vec::len) else { return Ok(()) };
        let table = self.table().await?;
        let batch_size = batch_size.max(1);
        // An empty table takes plain appends; otherwise rows are upserted by position.
        let append = table.count_rows(None).await.map_err(|e| store_err(&format!("counting {}", self.name), e))? == 0;
        let pb = self.progress(ids.len());

        for (batch_no, start) in (0..ids.len()).step_by(batch_size).enumerate() {
            let end = (start + batch_size).min(ids.len());
            let rb = to_record_batch(&ids[start..end], &vectors[start..end], &payloads[start..end], dim)?;
            let schema = rb.schema();
            let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
            let context = || format!("upload batch {batch_no} (positions {start}..{end})");
            if append {
                table.add(reader).execute().await.map_err(|e| store_err(&context(), e))?;
            } else {
                let mut mi = table.merge_insert(&[POSITION]);
                mi.when_matched_update_all(None).when_not_matched_insert_all();
                mi.execute(reader).await.map_err(|e| store_err(&context(), e))?;
            }
            pb.set_position(end as u64);
            debug!(collection = %self.name, batch = batch_no, rows = end - start, "uploaded batch");
        }
        pb.finish_and_clear();
        info!(collection = %self.name, vectors = ids.len(), batch_size, append, "upload finished");
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<DenseHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        let mut stream = table
            .vector_search(query.to_vec())
            .map_err(|e| store_err("vector search", e))?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .map_err(|e| store_err("vector search", e))?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(|e| store_err("reading search results", e))? {
            let scores = scores_from_batch(&batch)?;
            for ((position, payload), score) in rows_from_batch(&batch)?.into_iter().zip(scores) {
                hits.push(DenseHit { position, score, payload });
            }
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.position.cmp(&b.position)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn fetch(&self, ids: &[Position]) -> Result<Vec<(Position, ParagraphRecord)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table().await?;
        let list = ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        let mut stream = table
            .query()
            .only_if(format!("{POSITION} IN ({list})"))
            .limit(ids.len())
            .execute()
            .await
            .map_err(|e| store_err("fetching payloads", e))?;
        let mut rows = Vec::with_capacity(ids.len());
        while let Some(batch) = stream.try_next().await.map_err(|e| store_err("reading payloads", e))? {
            rows.extend(rows_from_batch(&batch)?);
        }
        Ok(rows)
    }

    async fn count(&self) -> Result<usize> {
        if !table_exists(&self.conn, &self.name).await? {
            return Ok(0);
        }
        self.table()
            .await?
            .count_rows(None)
            .await
            .map_err(|e| store_err(&format!("counting {}", self.name), e))
    }

    async fn finalize(&self) -> Result<()> {
        let rows = self.count().await?;
        if rows < self.ann_min_rows {
            debug!(collection = %self.name, rows, threshold = self.ann_min_rows, "exhaustive search, no ANN index");
            return Ok(());
        }
        let dim = self
            .table()
            .await?
            .schema()
            .await
            .map_err(|e| store_err("reading schema", e))?
            .field_with_name(crate::schema::VECTOR)
            .ok()
            .and_then(|f| match f.data_type() {
                arrow_schema::DataType::FixedSizeList(_, d) => usize::try_from(*d).ok(),
                _ => None,
            })
            .ok_or_else(|| Error::RemoteStore(format!("collection {} has no vector column", self.name)))?;
        let params = compute_ivfpq_params(rows, dim);
        build_ivfpq_index(&self.conn, &self.name, &format!("{}_ivfpq", self.name), &params).await
    }
}
