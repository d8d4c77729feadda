use fallos_core::error::Error;
use fallos_core::traits::{DenseIndex, DenseStore};
use fallos_core::types::{Citation, ParagraphRecord};
use fallos_dense::{LanceStore, MemoryDenseStore};
use tempfile::TempDir;

fn record(i: usize) -> ParagraphRecord {
    ParagraphRecord {
        case_id: format!("F-{i}"),
        section: "CONSIDERANDO".to_string(),
        paragraph_index: i,
        text: format!("párrafo número {i} del fallo"),
        source_path: format!("dir/{i}.json"),
        central_idea: (i % 2 == 0).then(|| "idea central".to_string()),
        cited_articles: if i == 1 { vec![Citation { source: "Ley 7046".into(), article_numbers: vec![5, 6] }] } else { vec![] },
        preliminary_matter: None,
    }
}

fn unit(dim: usize, hot: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[hot % dim] = 1.0;
    v
}

async fn exercise<S: DenseStore>(store: &S) -> anyhow::Result<()> {
    let col = store.open_collection("fallos__test").await?;
    col.rebuild(8).await?;
    assert_eq!(col.count().await?, 0);

    let ids: Vec<u64> = (0..5).collect();
    let vectors: Vec<Vec<f32>> = (0..5).map(|i| unit(8, i)).collect();
    let payloads: Vec<ParagraphRecord> = (0..5).map(record).collect();
    col.upload(&ids, &vectors, &payloads, 2).await?;
    assert_eq!(col.count().await?, 5);

    // re-uploading the same batch is idempotent
    col.upload(&ids[..2], &vectors[..2], &payloads[..2], 2).await?;
    assert_eq!(col.count().await?, 5);

    let hits = col.search(&unit(8, 3), 2).await?;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].position, 3);
    assert!((hits[0].score - 1.0).abs() < 1e-4);
    assert_eq!(hits[0].payload, record(3));

    let mut fetched = col.fetch(&[1, 4, 99]).await?;
    fetched.sort_by_key(|(p, _)| *p);
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched[0].1, record(1));
    assert_eq!(fetched[0].1.cited_articles[0].article_numbers, vec![5, 6]);

    col.finalize().await?;
    assert!(store.collection_names().await?.contains(&"fallos__test".to_string()));

    col.rebuild(8).await?;
    assert_eq!(col.count().await?, 0, "rebuild drops previous points");

    store.drop_collection("fallos__test").await?;
    assert!(!store.collection_names().await?.contains(&"fallos__test".to_string()));
    Ok(())
}

#[tokio::test]
async fn memory_store_round_trip() -> anyhow::Result<()> {
    exercise(&MemoryDenseStore::new()).await
}

#[tokio::test]
async fn lance_store_round_trip() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = LanceStore::connect(&tmp.path().to_string_lossy()).await?;
    exercise(&store).await
}

#[tokio::test]
async fn memory_store_faults_surface_as_remote_store_errors() -> anyhow::Result<()> {
    let store = MemoryDenseStore::new();
    let col = store.open_collection("c").await?;
    col.rebuild(4).await?;
    store.fail_uploads(true);
    let err = col.upload(&[0], &[unit(4, 0)], &[record(0)], 1).await.unwrap_err();
    assert!(matches!(err, Error::RemoteStore(_)));
    store.fail_uploads(false);
    col.upload(&[0], &[unit(4, 0)], &[record(0)], 1).await?;

    store.fail_searches(true);
    assert!(matches!(col.search(&unit(4, 0), 1).await, Err(Error::RemoteStore(_))));
    store.fail_searches(false);
    assert_eq!(col.search(&unit(4, 0), 1).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn searching_a_dropped_collection_fails() -> anyhow::Result<()> {
    let store = MemoryDenseStore::new();
    let col = store.open_collection("gone").await?;
    col.rebuild(4).await?;
    store.drop_collection("gone").await?;
    assert!(matches!(col.search(&unit(4, 0), 1).await, Err(Error::RemoteStore(_))));
    Ok(())
}

#[tokio::test]
async fn lance_upload_into_filled_table_upserts_by_position() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = LanceStore::connect(&tmp.path().to_string_lossy()).await?;
    let col = store.open_collection("fallos__upsert").await?;
    col.rebuild(8).await?;

    let ids: Vec<u64> = (0..5).collect();
    let vectors: Vec<Vec<f32>> = (0..5).map(|i| unit(8, i)).collect();
    let payloads: Vec<ParagraphRecord> = (0..5).map(record).collect();
    col.upload(&ids, &vectors, &payloads, 2).await?;
    assert_eq!(col.count().await?, 5);

    // positions 3 and 4 are replaced, 5 and 6 are new
    let ids: Vec<u64> = (3..7).collect();
    let vectors: Vec<Vec<f32>> = (3..7).map(|i| unit(8, i)).collect();
    let mut payloads: Vec<ParagraphRecord> = (3..7).map(record).collect();
    payloads[0].text = "texto corregido".to_string();
    col.upload(&ids, &vectors, &payloads, 3).await?;
    assert_eq!(col.count().await?, 7);

    let fetched = col.fetch(&[3]).await?;
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].1.text, "texto corregido");
    Ok(())
}
