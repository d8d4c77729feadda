use std::fs;
use std::path::Path;
use tempfile::TempDir;

use fallos_core::corpus::{CorpusLoader, DocumentOutcome};
use fallos_core::error::Error;
use fallos_core::types::SearchType;
use fallos_core::Settings;

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

const RULING_A: &str = r#"{
  "METADATOS": {"ID_FALLO": "A-1", "ARTICULOS_CITADOS": {"citations": [{"main_source": "Ley 7046", "cited_articles": [12, "14"]}]}},
  "IDEA_CENTRAL": "Prescripción de la acción disciplinaria",
  "MATERIA_PRELIMINAR": "empleo público",
  "CONTENIDO": {
    "VISTOS": ["La presente causa trata sobre la ley 7046.", "corto", "   "],
    "CONSIDERANDO": "Un único párrafo largo dentro de la sección."
  }
}"#;

#[test]
fn loader_counts_valid_paragraphs_in_document_order() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "a.json", RULING_A);

    let (records, stats) = CorpusLoader::new(tmp.path()).load().expect("load");

    assert_eq!(records.len(), 2, "only entries with at least 10 trimmed chars survive");
    assert_eq!(stats.short_paragraphs, 2);
    assert_eq!(records[0].section, "VISTOS");
    assert_eq!(records[0].paragraph_index, 0);
    assert_eq!(records[1].section, "CONSIDERANDO");
    assert_eq!(records[1].paragraph_index, 0);
    assert_eq!(records[0].source_path, "a.json");
    assert_eq!(records[0].cited_articles[0].article_numbers, vec![12, 14]);
    assert_eq!(records[0].preliminary_matter.as_deref(), Some("empleo público"));
}

#[test]
fn loader_skips_document_without_case_id_and_keeps_siblings() {
    let tmp = TempDir::new().unwrap();
    let body = r#"[
      {"METADATOS": {"ID_FALLO": 101}, "CONTENIDO": {"S": ["Primer párrafo válido del fallo."]}},
      {"METADATOS": {}, "CONTENIDO": {"S": ["Párrafo de un fallo sin identificador."]}},
      {"METADATOS": {"ID_FALLO": "103"}, "CONTENIDO": {"S": ["Tercer párrafo válido del fallo."]}}
    ]"#;
    write(tmp.path(), "batch.json", body);

    let loader = CorpusLoader::new(tmp.path());
    let outcomes = loader.parse_file(&tmp.path().join("batch.json"));
    assert!(matches!(outcomes[1], DocumentOutcome::Skipped(Error::MissingCaseIdentifier { .. })));

    let (records, stats) = loader.load().unwrap();
    assert_eq!(stats.documents_skipped, 1);
    assert_eq!(stats.documents_parsed, 2);
    let ids: Vec<_> = records.iter().map(|r| r.case_id.as_str()).collect();
    assert_eq!(ids, vec!["101", "103"]);
}

#[test]
fn loader_is_deterministic_and_restartable() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "b/2.json", r#"{"METADATOS": {"ID_FALLO": "B"}, "CONTENIDO": {"X": ["texto del fallo B"]}}"#);
    write(tmp.path(), "a/1.json", r#"{"METADATOS": {"ID_FALLO": "A"}, "CONTENIDO": {"X": ["texto del fallo A"]}}"#);
    write(tmp.path(), "notes.txt", "ignored");
    write(tmp.path(), "broken.json", "{ not json");

    let loader = CorpusLoader::new(tmp.path());
    let first: Vec<_> = loader.paragraphs().unwrap().map(|p| p.case_id).collect();
    let second: Vec<_> = loader.paragraphs().unwrap().map(|p| p.case_id).collect();
    assert_eq!(first, vec!["A", "B"]);
    assert_eq!(first, second);

    let (_, stats) = loader.load().unwrap();
    assert_eq!(stats.files_seen, 3);
    assert_eq!(stats.documents_skipped, 1, "unparseable file counts as one skipped document");
    assert_eq!(stats.distinct_cases(), 2);
}

#[test]
fn malformed_contenido_is_skipped() {
    let tmp = TempDir::new().unwrap();
    write(tmp.path(), "m.json", r#"{"METADATOS": {"ID_FALLO": "M"}, "CONTENIDO": ["no", "es", "objeto"]}"#);
    let outcomes = CorpusLoader::new(tmp.path()).parse_file(&tmp.path().join("m.json"));
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        DocumentOutcome::Skipped(e) => assert!(e.is_document_level()),
        DocumentOutcome::Parsed { .. } => panic!("expected skip"),
    }
}

#[test]
fn missing_corpus_root_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let err = CorpusLoader::new(tmp.path().join("nope")).load().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn settings_defaults_and_toml_overrides() {
    let tmp = TempDir::new().unwrap();
    let defaults = Settings::load_from(tmp.path()).expect("defaults load");
    assert_eq!(defaults.search.k_dense, 30);
    assert_eq!(defaults.search.max_top_n, 20);
    assert_eq!(defaults.dense.upload_batch_size, 500);
    assert!((defaults.scoring.lexical_weight - 0.5).abs() < f32::EPSILON);
    assert_eq!(defaults.index_dir, tmp.path().join("indexes"));

    fs::write(
        tmp.path().join("config.toml"),
        "corpus_dir = \"data\"\n[search]\nstrategy = \"hybrid_enriched\"\nk_lex = 12\n",
    )
    .unwrap();
    let s = Settings::load_from(tmp.path()).unwrap();
    assert_eq!(s.search.strategy, SearchType::HybridEnriched);
    assert_eq!(s.search.k_lex, 12);
    assert_eq!(s.search.k_dense, 30, "untouched keys keep their defaults");
    assert_eq!(s.corpus_dir, tmp.path().join("data"));
}

#[test]
fn settings_validation_rejects_bad_values() {
    let mut s = Settings::default();
    s.search.k_dense = 0;
    assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));

    let mut s = Settings::default();
    s.lexical.min_token_len = 30;
    assert!(s.validate().is_err());

    assert!(Settings::default().validate().is_ok());
}

#[test]
fn build_stage_tagging_keeps_first_stage() {
    let err = Error::RemoteStore("batch 3".into()).at_stage(fallos_core::BuildStage::DenseIndex);
    let err = err.at_stage(fallos_core::BuildStage::Publish);
    assert_eq!(err.stage(), Some(fallos_core::BuildStage::DenseIndex));
    assert!(err.to_string().contains("dense-index"));
}
