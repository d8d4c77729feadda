//! IVF_PQ index training for large collections.
use lancedb::index::{vector::IvfPqIndexBuilder, Index};
use lancedb::{Connection, DistanceType};
use tracing::info;

use fallos_core::error::Result;

use crate::schema::VECTOR;
use crate::table::store_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfPqParams {
    pub nlist: usize,
    pub m: usize,
    pub nbits: usize,
}

pub fn compute_ivfpq_params(total_rows: usize, dim: usize) -> IvfPqParams {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let sqrt_n = (total_rows as f64).sqrt() as usize;
    let mut nlist = std::cmp::max(16, 2 * sqrt_n);
    nlist = std::cmp::min(nlist, 65536);
    // Clamp nlist to be less than total_rows for tiny datasets
    if total_rows > 1 {
        nlist = std::cmp::min(nlist, total_rows - 1);
    } else {
        nlist = 1;
    }
    // sub-vectors must divide the dimension
    let mut m = if dim >= 1024 { 32 } else { 16 };
    while m > 1 && dim % m != 0 {
        m -= 1;
    }
    IvfPqParams { nlist, m, nbits: 8 }
}

pub async fn build_ivfpq_index(conn: &Connection, table: &str, index_name: &str, params: &IvfPqParams) -> Result<()> {
    let tbl = conn
        .open_table(table)
        .execute()
        .await
        .map_err(|e| store_err(&format!("opening {table}"), e))?;
    tbl.create_index(
        &[VECTOR],
        Index::IvfPq(
            IvfPqIndexBuilder::default()
                .distance_type(DistanceType::Cosine)
                .num_partitions(u32::try_from(params.nlist).unwrap_or(u32::MAX))
                .num_sub_vectors(u32::try_from(params.m).unwrap_or(u32::MAX)),
        ),
    )
    .name(index_name.to_string())
    .execute()
    .await
    .map_err(|e| store_err(&format!("training {index_name}"), e))?;
    info!(table, index = index_name, nlist = params.nlist, m = params.m, "IVF_PQ index built");
    Ok(())
}
