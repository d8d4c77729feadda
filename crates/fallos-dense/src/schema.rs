//! Arrow layout of a paragraph collection and conversions to and from record batches.
use arrow_array::{Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

use fallos_core::error::{Error, Result};
use fallos_core::types::{Citation, ParagraphRecord, Position};

pub const POSITION: &str = "position";
pub const VECTOR: &str = "vector";
pub const DISTANCE: &str = "_distance";

pub fn build_arrow_schema(dim: usize) -> Result<Arc<Schema>> {
    let dim = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("vector dimension {dim} too large")))?;
    Ok(Arc::new(Schema::new(vec![
        Field::new(POSITION, DataType::Int64, false),
        Field::new("case_id", DataType::Utf8, false),
        Field::new("section", DataType::Utf8, false),
        Field::new("paragraph_index", DataType::Int64, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("source_path", DataType::Utf8, false),
        Field::new("central_idea", DataType::Utf8, true),
        Field::new("preliminary_matter", DataType::Utf8, true),
        // JSON-encoded `[Citation]`
        Field::new("cited_articles", DataType::Utf8, true),
        Field::new(VECTOR, DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ])))
}

fn to_i64(v: u64) -> Result<i64> {
    i64::try_from(v).map_err(|_| Error::RemoteStore(format!("position {v} out of range")))
}

/// One record batch for aligned `ids`/`vectors`/`payloads` slices.
pub fn to_record_batch(ids: &[Position], vectors: &[Vec<f32>], payloads: &[ParagraphRecord], dim: usize) -> Result<RecordBatch> {
    let schema = build_arrow_schema(dim)?;
    let positions = ids.iter().map(|p| to_i64(*p)).collect::<Result<Vec<_>>>()?;
    let paragraph_indices = payloads
        .iter()
        .map(|p| to_i64(p.paragraph_index as u64))
        .collect::<Result<Vec<_>>>()?;
    let cited = payloads
        .iter()
        .map(|p| {
            if p.cited_articles.is_empty() {
                Ok(None)
            } else {
                serde_json::to_string(&p.cited_articles).map(Some)
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let vectors: Vec<Option<Vec<Option<f32>>>> =
        vectors.iter().map(|v| Some(v.iter().copied().map(Some).collect())).collect();
    let dim_i32 = i32::try_from(dim).map_err(|_| Error::InvalidConfig(format!("vector dimension {dim} too large")))?;

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(positions)),
            Arc::new(StringArray::from_iter_values(payloads.iter().map(|p| p.case_id.as_str()))),
            Arc::new(StringArray::from_iter_values(payloads.iter().map(|p| p.section.as_str()))),
            Arc::new(Int64Array::from(paragraph_indices)),
            Arc::new(StringArray::from_iter_values(payloads.iter().map(|p| p.text.as_str()))),
            Arc::new(StringArray::from_iter_values(payloads.iter().map(|p| p.source_path.as_str()))),
            Arc::new(StringArray::from_iter(payloads.iter().map(|p| p.central_idea.as_deref()))),
            Arc::new(StringArray::from_iter(payloads.iter().map(|p| p.preliminary_matter.as_deref()))),
            Arc::new(StringArray::from(cited)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                vectors.into_iter(),
                dim_i32,
            )),
        ],
    )
    .map_err(|e| Error::RemoteStore(format!("building record batch: {e}")))
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::RemoteStore(format!("column '{name}' missing or mistyped")))
}

fn optional(col: &StringArray, row: usize) -> Option<String> {
    (!col.is_null(row)).then(|| col.value(row).to_string())
}

/// Decode every row of a result batch into `(position, payload)`.
pub fn rows_from_batch(batch: &RecordBatch) -> Result<Vec<(Position, ParagraphRecord)>> {
    let position = column::<Int64Array>(batch, POSITION)?;
    let case_id = column::<StringArray>(batch, "case_id")?;
    let section = column::<StringArray>(batch, "section")?;
    let paragraph_index = column::<Int64Array>(batch, "paragraph_index")?;
    let text = column::<StringArray>(batch, "text")?;
    let source_path = column::<StringArray>(batch, "source_path")?;
    let central_idea = column::<StringArray>(batch, "central_idea")?;
    let preliminary_matter = column::<StringArray>(batch, "preliminary_matter")?;
    let cited = column::<StringArray>(batch, "cited_articles")?;

    (0..batch.num_rows())
        .map(|i| {
            let cited_articles: Vec<Citation> = match optional(cited, i) {
                Some(json) => serde_json::from_str(&json)?,
                None => Vec::new(),
            };
            let record = ParagraphRecord {
                case_id: case_id.value(i).to_string(),
                section: section.value(i).to_string(),
                paragraph_index: usize::try_from(paragraph_index.value(i)).unwrap_or_default(),
                text: text.value(i).to_string(),
                source_path: source_path.value(i).to_string(),
                central_idea: optional(central_idea, i),
                cited_articles,
                preliminary_matter: optional(preliminary_matter, i),
            };
            let pos = u64::try_from(position.value(i))
                .map_err(|_| Error::RemoteStore(format!("negative position {}", position.value(i))))?;
            Ok((pos, record))
        })
        .collect()
}

/// Cosine similarity per row, derived from the `_distance` column (`1 - distance`).
pub fn scores_from_batch(batch: &RecordBatch) -> Result<Vec<f32>> {
    let distance = column::<Float32Array>(batch, DISTANCE)?;
    Ok((0..batch.num_rows()).map(|i| 1.0 - distance.value(i)).collect())
}
