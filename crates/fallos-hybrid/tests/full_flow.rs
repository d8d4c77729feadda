use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use fallos_core::error::{BuildStage, Error};
use fallos_core::traits::{CrossEncoder, DenseIndex, DenseStore, Embedder};
use fallos_core::types::SearchType;
use fallos_core::Settings;
use fallos_dense::{MemoryCollection, MemoryDenseStore};
use fallos_embed::{HashEmbedder, OverlapCrossEncoder};
use fallos_hybrid::manifest::list_generations;
use fallos_hybrid::{index_status, HybridQueryEngine, IndexBuilder, IndexManifest};
use fallos_lexical::{tokenize, LexicalIndex};

const DIM: usize = 384;

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn ruling(id: &str, text: &str) -> String {
    serde_json::json!({"METADATOS": {"ID_FALLO": id}, "CONTENIDO": {"CONSIDERANDO": [text]}}).to_string()
}

fn settings(root: &Path) -> Settings {
    let mut s = Settings::default();
    s.corpus_dir = root.join("corpus");
    s.index_dir = root.join("indexes");
    s.embedding.dimension = DIM;
    s.embedding.use_fake = true;
    s.search.enable_reranking = false;
    s.search.k_dense = 3;
    s.search.k_lex = 3;
    s
}

fn embedder() -> Arc<dyn Embedder> { Arc::new(HashEmbedder::new(DIM)) }

fn ley_7046_corpus(corpus: &Path) {
    write(corpus, "a.json", &ruling("F-1", "art. 3 de la ley 7046 sobre el régimen disciplinario docente"));
    write(corpus, "b.json", &ruling("F-2", "ley 7046 establece el estatuto del docente provincial"));
    write(corpus, "c.json", &ruling("F-3", "unrelated text about contracts"));
}

async fn built(root: &Path, s: &Settings, store: &MemoryDenseStore) -> IndexManifest {
    ley_7046_corpus(&s.corpus_dir);
    IndexBuilder::new(s.clone(), store.clone(), embedder()).build(&s.corpus_dir).await.expect("build");
    IndexManifest::load(&s.index_dir).unwrap_or_else(|e| panic!("manifest under {}: {e}", root.display()))
}

async fn engine(s: &Settings, store: &MemoryDenseStore) -> HybridQueryEngine<MemoryCollection> {
    let reranker: Option<Arc<dyn CrossEncoder>> = s.search.enable_reranking.then(|| Arc::new(OverlapCrossEncoder) as Arc<dyn CrossEncoder>);
    HybridQueryEngine::open(s, store, embedder(), reranker).await.expect("open engine")
}

fn dot(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

#[tokio::test]
async fn ley_7046_paragraphs_outrank_unrelated_text_by_formula() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    let manifest = built(tmp.path(), &s, &store).await;

    let hits = engine(&s, &store).await.query("ley 7046", 3).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[2].case_id, "F-3");
    assert!(hits.iter().all(|h| h.search_type == SearchType::Hybrid));

    // recompute every score from its sources
    let lexical = LexicalIndex::open(&manifest.lexical_path(&s.index_dir)).unwrap();
    let bm25 = lexical.score(&tokenize("ley 7046")).unwrap();
    let e = embedder();
    let q = e.embed_batch(&["ley 7046".to_string()]).unwrap().remove(0);
    let vectors = e.embed_batch(lexical.texts()).unwrap();
    let expected: HashMap<String, f32> = ["F-1", "F-2", "F-3"]
        .iter()
        .enumerate()
        .map(|(i, id)| (id.to_string(), dot(&q, &vectors[i]) + bm25[i] * 0.5))
        .collect();
    for h in &hits {
        assert!((h.score - expected[&h.case_id]).abs() < 1e-4, "{}: {} vs {}", h.case_id, h.score, expected[&h.case_id]);
    }
    assert!(hits[0].score >= hits[1].score && hits[1].score > hits[2].score);
}

#[tokio::test]
async fn ranking_does_not_depend_on_file_order() {
    let order = |names: [&'static str; 3]| async move {
        let tmp = TempDir::new().unwrap();
        let s = settings(tmp.path());
        write(&s.corpus_dir, &format!("{}.json", names[0]), &ruling("F-1", "art. 3 de la ley 7046 sobre el régimen disciplinario docente"));
        write(&s.corpus_dir, &format!("{}.json", names[1]), &ruling("F-2", "ley 7046 establece el estatuto del docente provincial"));
        write(&s.corpus_dir, &format!("{}.json", names[2]), &ruling("F-3", "unrelated text about contracts"));
        let store = MemoryDenseStore::new();
        IndexBuilder::new(s.clone(), store.clone(), embedder()).build(&s.corpus_dir).await.unwrap();
        let hits = engine(&s, &store).await.query("ley 7046", 3).await.unwrap();
        hits.into_iter().map(|h| h.case_id).collect::<Vec<_>>()
    };
    assert_eq!(order(["a", "b", "c"]).await, order(["c", "b", "a"]).await);
}

#[tokio::test]
async fn dense_ids_match_lexical_positions() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    write(&s.corpus_dir, "multi.json", r#"{"METADATOS": {"ID_FALLO": "M"}, "CONTENIDO": {
        "VISTOS": ["primer párrafo del fallo M", "corto", "segundo párrafo del fallo M"],
        "RESUELVE": "se resuelve rechazar el recurso"}}"#);
    write(&s.corpus_dir, "z.json", &ruling("Z", "último fallo del corpus de prueba"));
    IndexBuilder::new(s.clone(), store.clone(), embedder()).build(&s.corpus_dir).await.unwrap();

    let manifest = IndexManifest::load(&s.index_dir).unwrap();
    assert_eq!(manifest.paragraph_count, 4);
    let lexical = LexicalIndex::open(&manifest.lexical_path(&s.index_dir)).unwrap();
    let collection = store.open_collection(&manifest.collection).await.unwrap();
    let ids: Vec<u64> = (0..4).collect();
    let mut fetched = collection.fetch(&ids).await.unwrap();
    fetched.sort_by_key(|(p, _)| *p);
    assert_eq!(fetched.len(), 4);
    for (position, record) in fetched {
        assert_eq!(lexical.text(position), Some(record.text.as_str()));
    }
    assert_eq!(lexical.text(3), Some("último fallo del corpus de prueba"));
}

#[tokio::test]
async fn rebuilding_unchanged_corpus_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    let first = built(tmp.path(), &s, &store).await;

    let builder = IndexBuilder::new(s.clone(), store.clone(), embedder());
    let summary = builder.build(&s.corpus_dir).await.unwrap();
    let second = IndexManifest::load(&s.index_dir).unwrap();

    assert_ne!(first.build_id, second.build_id);
    assert_eq!(summary.paragraph_count, first.paragraph_count);
    assert!(summary.index_sizes.lexical_bytes > 0);
    assert!(summary.index_sizes.text_array_bytes > 0);

    let mapping = |m: &IndexManifest| {
        let store = store.clone();
        let name = m.collection.clone();
        async move {
            let col = store.open_collection(&name).await.unwrap();
            let mut rows = col.fetch(&[0, 1, 2]).await.unwrap();
            rows.sort_by_key(|(p, _)| *p);
            rows.into_iter().map(|(p, r)| (p, r.case_id)).collect::<Vec<_>>()
        }
    };
    assert_eq!(mapping(&first).await, mapping(&second).await);
}

#[tokio::test]
async fn old_generations_are_collected() {
    let tmp = TempDir::new().unwrap();
    let mut s = settings(tmp.path());
    s.dense.retained_generations = 2;
    let store = MemoryDenseStore::new();
    ley_7046_corpus(&s.corpus_dir);
    let builder = IndexBuilder::new(s.clone(), store.clone(), embedder());
    for _ in 0..3 {
        builder.build(&s.corpus_dir).await.unwrap();
    }

    let live = IndexManifest::load(&s.index_dir).unwrap();
    let generations = list_generations(&s.index_dir).unwrap();
    assert_eq!(generations.len(), 2);
    assert!(generations.contains(&live.build_id));
    let collections = store.collection_names().await.unwrap();
    assert_eq!(collections.len(), 2);
    assert!(collections.contains(&live.collection));
}

#[tokio::test]
async fn missing_artifacts_fail_engine_construction() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();

    let err = HybridQueryEngine::open(&s, &store, embedder(), None).await.err().expect("no manifest yet");
    assert!(matches!(&err, Error::MissingIndexArtifact(p) if p.ends_with("ACTIVE.json")), "{err}");

    let manifest = built(tmp.path(), &s, &store).await;
    fs::remove_file(manifest.lexical_path(&s.index_dir).join("corpus.json")).unwrap();
    let err = HybridQueryEngine::open(&s, &store, embedder(), None).await.err().expect("text array removed");
    assert!(matches!(&err, Error::MissingIndexArtifact(p) if p.ends_with("corpus.json")), "{err}");
}

#[tokio::test]
async fn dense_strategy_needs_no_lexical_index() {
    let tmp = TempDir::new().unwrap();
    let mut s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    let manifest = built(tmp.path(), &s, &store).await;
    fs::remove_dir_all(manifest.lexical_path(&s.index_dir)).unwrap();

    s.search.strategy = SearchType::Dense;
    let hits = engine(&s, &store).await.query("ley 7046", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.search_type == SearchType::Dense));
    assert!(hits.iter().all(|h| h.case_id != "F-3"));
}

#[tokio::test]
async fn failed_build_keeps_previous_generation_live() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    let live = built(tmp.path(), &s, &store).await;

    store.fail_uploads(true);
    let err = IndexBuilder::new(s.clone(), store.clone(), embedder()).build(&s.corpus_dir).await.unwrap_err();
    assert_eq!(err.stage(), Some(BuildStage::DenseIndex));
    assert!(err.to_string().contains("dense-index"), "{err}");
    store.fail_uploads(false);

    assert_eq!(IndexManifest::load(&s.index_dir).unwrap(), live);
    assert_eq!(list_generations(&s.index_dir).unwrap(), vec![live.build_id.clone()]);
    assert_eq!(store.collection_names().await.unwrap(), vec![live.collection.clone()]);
    assert_eq!(engine(&s, &store).await.query("ley 7046", 3).await.unwrap().len(), 3);
}

#[tokio::test]
async fn empty_corpus_aborts_before_touching_indexes() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    write(&s.corpus_dir, "empty.json", r#"{"METADATOS": {"ID_FALLO": "E"}, "CONTENIDO": {"S": ["corto"]}}"#);
    let err = IndexBuilder::new(s.clone(), MemoryDenseStore::new(), embedder()).build(&s.corpus_dir).await.unwrap_err();
    assert_eq!(err.stage(), Some(BuildStage::LoadCorpus));
    assert!(matches!(&err, Error::BuildStage { source, .. } if matches!(**source, Error::EmptyCorpus(_))));
    assert!(!IndexManifest::path(&s.index_dir).exists());
}

#[tokio::test]
async fn store_outage_fails_only_the_affected_query() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    built(tmp.path(), &s, &store).await;
    let engine = engine(&s, &store).await;

    store.fail_searches(true);
    let err = engine.query("ley 7046", 3).await.unwrap_err();
    assert!(matches!(err, Error::RemoteStore(_)), "{err}");
    store.fail_searches(false);
    assert_eq!(engine.query("ley 7046", 3).await.unwrap().len(), 3);
}

#[tokio::test]
async fn reranking_replaces_combined_scores() {
    let tmp = TempDir::new().unwrap();
    let mut s = settings(tmp.path());
    s.search.enable_reranking = true;
    let store = MemoryDenseStore::new();
    built(tmp.path(), &s, &store).await;
    let engine = engine(&s, &store).await;

    let question = "estatuto del docente";
    let reranked = engine.query(question, 3).await.unwrap();
    let texts: Vec<String> = reranked.iter().map(|h| h.paragraph_text.clone()).collect();
    let expected = OverlapCrossEncoder.score_pairs(question, &texts).unwrap();
    for (hit, score) in reranked.iter().zip(expected) {
        assert!((hit.score - score).abs() < 1e-6);
    }
    assert_eq!(reranked[0].case_id, "F-2");
    assert!(reranked.windows(2).all(|w| w[0].score >= w[1].score));

    let plain = engine.query_with(question, 3, Some(false)).await.unwrap();
    assert!(plain.iter().any(|p| reranked.iter().any(|r| r.case_id == p.case_id && (r.score - p.score).abs() > 1e-3)));
}

#[tokio::test]
async fn enriched_strategy_adds_citation_boost() {
    let tmp = TempDir::new().unwrap();
    let mut s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    write(&s.corpus_dir, "cited.json", r#"{
      "METADATOS": {"ID_FALLO": "C", "ARTICULOS_CITADOS": {"citations": [{"main_source": "Ley 7046", "cited_articles": [12]}]}},
      "CONTENIDO": {"CONSIDERANDO": ["el artículo 12 regula la licencia docente"]}}"#);
    write(&s.corpus_dir, "plain.json", &ruling("P", "el artículo 12 regula la licencia docente"));
    IndexBuilder::new(s.clone(), store.clone(), embedder()).build(&s.corpus_dir).await.unwrap();

    let question = "artículo 12";
    let base = engine(&s, &store).await.query(question, 2).await.unwrap();
    s.search.strategy = SearchType::HybridEnriched;
    let enriched = engine(&s, &store).await.query(question, 2).await.unwrap();

    let score = |hits: &[fallos_core::types::SearchHit], id: &str| hits.iter().find(|h| h.case_id == id).unwrap().score;
    assert!((score(&enriched, "C") - score(&base, "C") - 0.3).abs() < 1e-4);
    assert!((score(&enriched, "P") - score(&base, "P")).abs() < 1e-6);
    assert_eq!(enriched[0].case_id, "C");
    assert_eq!(enriched[0].search_type, SearchType::HybridEnriched);
    assert_eq!(enriched[0].cited_articles[0].article_numbers, vec![12]);
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    built(tmp.path(), &s, &store).await;
    let engine = engine(&s, &store).await;

    for (q, n) in [("   ", 3), ("ley", 0), ("ley", s.search.max_top_n + 1)] {
        assert!(matches!(engine.query(q, n).await, Err(Error::InvalidQuery(_))), "{q:?} {n}");
    }
    assert!(engine.query("palabra ausente", 3).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_queries_share_one_engine() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    built(tmp.path(), &s, &store).await;
    let engine = Arc::new(engine(&s, &store).await);

    let expected = engine.query("ley 7046", 3).await.unwrap();
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            let q = if i % 2 == 0 { "ley 7046" } else { "contracts" };
            tokio::spawn(async move { (q, engine.query(q, 3).await) })
        })
        .collect();
    for res in futures::future::join_all(tasks).await {
        let (q, hits) = res.unwrap();
        let hits = hits.unwrap();
        if q == "ley 7046" {
            assert_eq!(hits, expected);
        }
    }
    let stats = engine.stats();
    assert_eq!(stats.cached_queries, 2);
    assert_eq!(stats.paragraphs, Some(3));
}

#[tokio::test]
async fn build_if_changed_follows_the_fingerprint() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    ley_7046_corpus(&s.corpus_dir);
    let builder = IndexBuilder::new(s.clone(), MemoryDenseStore::new(), embedder());

    assert!(builder.build_if_changed(&s.corpus_dir).await.unwrap().is_some());
    assert!(builder.build_if_changed(&s.corpus_dir).await.unwrap().is_none());

    write(&s.corpus_dir, "d.json", &ruling("F-4", "nuevo fallo agregado al corpus"));
    let report = builder.check_changes(&s.corpus_dir).unwrap();
    assert!(report.changed);
    assert!(report.description.contains("+1 files"), "{}", report.description);
    let summary = builder.build_if_changed(&s.corpus_dir).await.unwrap().expect("rebuilt");
    assert_eq!(summary.paragraph_count, 4);

    let err = builder.update_incremental(&s.corpus_dir).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}

/// Drops a new ruling into the corpus the first time it is asked to embed.
struct CorpusGrowingEmbedder {
    inner: HashEmbedder,
    corpus: PathBuf,
    grown: AtomicBool,
}

impl Embedder for CorpusGrowingEmbedder {
    fn dim(&self) -> usize { self.inner.dim() }
    fn max_len(&self) -> usize { self.inner.max_len() }
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if !self.grown.swap(true, Ordering::SeqCst) {
            write(&self.corpus, "late.json", &ruling("F-9", "fallo agregado durante la indexación"));
        }
        self.inner.embed_batch(texts)
    }
}

#[tokio::test]
async fn file_added_during_a_build_triggers_the_next_one() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    ley_7046_corpus(&s.corpus_dir);
    let growing = Arc::new(CorpusGrowingEmbedder { inner: HashEmbedder::new(DIM), corpus: s.corpus_dir.clone(), grown: AtomicBool::new(false) });
    let builder = IndexBuilder::new(s.clone(), MemoryDenseStore::new(), growing);

    let summary = builder.build(&s.corpus_dir).await.unwrap();
    assert_eq!(summary.paragraph_count, 3);
    assert!(s.corpus_dir.join("late.json").exists());

    let report = builder.check_changes(&s.corpus_dir).unwrap();
    assert!(report.changed, "late file must not be recorded as indexed");
    let rebuilt = builder.build_if_changed(&s.corpus_dir).await.unwrap().expect("rebuilt");
    assert_eq!(rebuilt.paragraph_count, 4);
}

#[tokio::test]
async fn dense_strategy_opens_without_a_cross_encoder() {
    let tmp = TempDir::new().unwrap();
    let mut s = settings(tmp.path());
    let store = MemoryDenseStore::new();
    built(tmp.path(), &s, &store).await;

    s.search.strategy = SearchType::Dense;
    s.search.enable_reranking = true;
    let engine = HybridQueryEngine::open(&s, &store, embedder(), None).await.expect("dense engine without reranker");
    assert!(!engine.stats().reranking);
    assert_eq!(engine.query_with("ley 7046", 2, Some(true)).await.unwrap().len(), 2);

    s.search.strategy = SearchType::Hybrid;
    let err = HybridQueryEngine::open(&s, &store, embedder(), None).await.err().expect("hybrid needs a reranker");
    assert!(matches!(err, Error::InvalidConfig(_)), "{err}");
}

#[tokio::test]
async fn status_reports_the_live_generation() {
    let tmp = TempDir::new().unwrap();
    let s = settings(tmp.path());
    let store = MemoryDenseStore::new();

    let empty = index_status(&s, &store).await.unwrap();
    assert!(empty.live.is_none());

    let manifest = built(tmp.path(), &s, &store).await;
    let status = index_status(&s, &store).await.unwrap();
    assert_eq!(status.live.as_ref().map(|m| m.build_id.as_str()), Some(manifest.build_id.as_str()));
    assert_eq!(status.dense_points, Some(3));
    assert!(status.sizes.unwrap().lexical_bytes > 0);
}
