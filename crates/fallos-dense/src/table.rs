//! LanceDB connection and housekeeping helpers.
use arrow_array::RecordBatchIterator;
use arrow_schema::Schema;
use lancedb::{connect, Connection};
use std::sync::Arc;

use fallos_core::error::{Error, Result};

pub(crate) fn store_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::RemoteStore(format!("{context}: {e}"))
}

pub async fn open_db(uri: &str) -> Result<Connection> {
    connect(uri).execute().await.map_err(|e| store_err(&format!("connecting to {uri}"), e))
}

pub async fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let names = conn.table_names().execute().await.map_err(|e| store_err("listing tables", e))?;
    Ok(names.iter().any(|n| n == name))
}

pub async fn ensure_table(conn: &Connection, name: &str, schema: Arc<Schema>) -> Result<()> {
    if table_exists(conn, name).await? {
        return Ok(());
    }
    // create empty table with 0 rows
    let iter = RecordBatchIterator::new(vec![].into_iter(), schema.clone());
    conn.create_table(name, Box::new(iter))
        .execute()
        .await
        .map_err(|e| store_err(&format!("creating table {name}"), e))?;
    Ok(())
}

pub async fn drop_table(conn: &Connection, name: &str) -> Result<()> {
    if !table_exists(conn, name).await? {
        return Ok(());
    }
    conn.drop_table(name, &[]).await.map_err(|e| store_err(&format!("dropping table {name}"), e))
}
