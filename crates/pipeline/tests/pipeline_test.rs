//! End-to-end scenarios over the file-backed stores: seed documents in,
//! graph snapshot out.

use models::{FailureCategory, IngestionRun, QuarantinedDocument, RunStatus};
use pipeline::{BackendKind, Config, IngestionPipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn schemas_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/schemas")
}

fn config(out_dir: &Path, workers: usize) -> Config {
    Config {
        schemas_dir: schemas_dir(),
        out_dir: out_dir.to_path_buf(),
        schema_backend: BackendKind::File,
        store_backend: BackendKind::File,
        graph_backend: BackendKind::File,
        postgres_url: None,
        workers,
        document_timeout_secs: 30,
        batch_size: 100,
        run_id: None,
    }
}

/// Run one pipeline over the given inputs and return the final run record.
async fn run_pipeline(out_dir: &Path, workers: usize, inputs: &[&Path]) -> IngestionRun {
    let config = config(out_dir, workers);
    let registry = Arc::new(pipeline::load_registry(&config).await.unwrap());
    let (docs, graph) = pipeline::open_stores(&config).await.unwrap();

    let ingest = Arc::new(
        IngestionPipeline::new(&config, registry, docs, graph)
            .await
            .unwrap(),
    );
    ingest
        .run(inputs.iter().map(|p| p.to_path_buf()).collect())
        .await
        .unwrap();
    ingest.close().await.unwrap()
}

fn write_input(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn snapshot(out_dir: &Path) -> serde_json::Value {
    let text = std::fs::read_to_string(out_dir.join("graph_snapshot.json")).unwrap();
    serde_json::from_str(&text).unwrap()
}

fn find_node<'v>(snapshot: &'v serde_json::Value, label: &str, id: &str) -> Option<&'v serde_json::Value> {
    snapshot["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|n| n["label"] == label && n["id"] == id)
}

fn find_edge<'v>(
    snapshot: &'v serde_json::Value,
    rel_type: &str,
    from_id: &str,
    to_id: &str,
) -> Option<&'v serde_json::Value> {
    snapshot["relationships"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["type"] == rel_type && r["from"]["id"] == from_id && r["to"]["id"] == to_id)
}

fn quarantined(out_dir: &Path) -> Vec<QuarantinedDocument> {
    let text = std::fs::read_to_string(out_dir.join("quarantine/quarantined.jsonl")).unwrap();
    text.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_s1_eis_person_with_document() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(
        tmp.path(),
        "person.json",
        r#"{"root":{"result":{"unzr":"U1","last_name":"Ivanov","documents":[{"series":"AA","number":"123","date_issue":"2020-01-01","dep_out":"Org"}]}}}"#,
    );
    let out = tmp.path().join("out");

    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.metrics.documents_processed, 1);

    let graph = snapshot(&out);
    let person_id = tree::sha256_hex("Person|U1".as_bytes());
    let document_id = tree::sha256_hex("Document|AA|123".as_bytes());

    let person = find_node(&graph, "Person", &person_id).expect("person node");
    assert_eq!(person["properties"]["last_name"], "Ivanov");

    let document = find_node(&graph, "Document", &document_id).expect("document node");
    assert_eq!(document["properties"]["date_issue"], "2020-01-01");

    // Relationship existence: the edge and both endpoints are present.
    assert!(find_edge(&graph, "HAS_DOCUMENT", &person_id, &document_id).is_some());
    assert_eq!(graph["relationships"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_s2_vehicle_with_owner() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(
        tmp.path(),
        "cars.json",
        r#"{"root":{"CARS":[{"VIN":"ABC12345","OWNER":{"CODE":"1234567890","LNAME":"Doe"}}]}}"#,
    );
    let out = tmp.path().join("out");

    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.status, RunStatus::Success);

    let graph = snapshot(&out);
    let vehicle_id = tree::sha256_hex("Vehicle|ABC12345".as_bytes());
    let person_id = tree::sha256_hex("Person|1234567890".as_bytes());

    assert!(find_node(&graph, "Vehicle", &vehicle_id).is_some());
    assert!(find_node(&graph, "Person", &person_id).is_some());

    let edge = find_edge(&graph, "OWNS_VEHICLE", &person_id, &vehicle_id).expect("ownership edge");
    assert_eq!(edge["properties"]["role"], "owner");
}

#[tokio::test]
async fn test_s3_predicate_ambiguity_quarantines() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_input(
        tmp.path(),
        "claim.json",
        r#"{"claim":{"code":"C-1","kind":"transfer"}}"#,
    );
    let out = tmp.path().join("out");

    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.status, RunStatus::Warning);
    assert_eq!(run.metrics.documents_quarantined, 1);

    let records = quarantined(&out);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FailureCategory::VariantAmbiguous);

    let tied = records[0].details["tied"].as_array().unwrap();
    let tied: Vec<&str> = tied.iter().map(|v| v.as_str().unwrap()).collect();
    assert_eq!(tied, vec!["claims_east_v1", "claims_west_v1"]);
}

#[tokio::test]
async fn test_s4_immutable_conflict_across_runs() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");

    let first = write_input(
        tmp.path(),
        "profile_a.json",
        r#"{"profile":{"rnokpp":"X","birth_date":"1990-01-01"}}"#,
    );
    let run = run_pipeline(&out, 1, &[&first]).await;
    assert_eq!(run.status, RunStatus::Success);

    let second = write_input(
        tmp.path(),
        "profile_b.json",
        r#"{"profile":{"rnokpp":"X","birth_date":"1990-01-02"}}"#,
    );
    let run = run_pipeline(&out, 1, &[&second]).await;
    assert_eq!(run.status, RunStatus::Warning);
    assert_eq!(run.metrics.immutable_conflicts, 1);

    // The first value persists; the second document is quarantined.
    let graph = snapshot(&out);
    let person_id = tree::sha256_hex("Person|X".as_bytes());
    let person = find_node(&graph, "Person", &person_id).expect("person node");
    assert_eq!(person["properties"]["birth_date"], "1990-01-01");

    let records = quarantined(&out);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FailureCategory::ImmutableConflict);
}

#[tokio::test]
async fn test_s5_doc_scoped_fallback_never_merges() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");

    // Neither the vehicle nor the owner carries an identity property,
    // and the two documents differ only in a free-text field.
    let first = write_input(
        tmp.path(),
        "shadow_a.json",
        r#"{"root":{"CARS":[{"DESCRIPTION":"black sedan","OWNER":{"LNAME":"Shadow"}}]}}"#,
    );
    let second = write_input(
        tmp.path(),
        "shadow_b.json",
        r#"{"root":{"CARS":[{"DESCRIPTION":"gray sedan","OWNER":{"LNAME":"Shadow"}}]}}"#,
    );

    let run = run_pipeline(&out, 1, &[&first, &second]).await;
    assert_eq!(run.status, RunStatus::Success);

    let graph = snapshot(&out);
    let nodes = graph["nodes"].as_array().unwrap();
    let edges = graph["relationships"].as_array().unwrap();

    // Two distinct doc-scoped pairs with one edge each, never merged.
    assert_eq!(nodes.len(), 4);
    assert_eq!(edges.len(), 2);
    for node in nodes {
        assert!(node["id"].as_str().unwrap().starts_with("DOCSCOPED:"));
    }
}

#[tokio::test]
async fn test_s6_trailing_comma_recovery_and_idempotent_reruns() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let input = write_input(
        tmp.path(),
        "person.json",
        r#"{"root":{"result":{"unzr":"U9","last_name":"Petrov","documents":[],}}}"#,
    );

    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.metrics.documents_processed, 1);
    let first_graph = snapshot(&out);

    // A second run over the same bytes skips by raw hash and leaves the
    // graph byte-identical.
    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.metrics.documents_skipped, 1);
    assert_eq!(run.metrics.documents_processed, 0);
    assert_eq!(snapshot(&out), first_graph);
}

#[tokio::test]
async fn test_unparseable_document_quarantines_with_preview() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let input = write_input(tmp.path(), "broken.json", "{ this is not json at all");

    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.status, RunStatus::Warning);

    let records = quarantined(&out);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, FailureCategory::ParseError);
    assert!(records[0].message.starts_with("json_parse_error:"));
}

#[tokio::test]
async fn test_unmatched_document_quarantines_with_attempts() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("out");
    let input = write_input(tmp.path(), "other.json", r#"{"something": "else"}"#);

    let run = run_pipeline(&out, 4, &[&input]).await;
    assert_eq!(run.status, RunStatus::Warning);

    let records = quarantined(&out);
    assert_eq!(records[0].reason, FailureCategory::SchemaNotFound);
    // Every variant of every register reports why it did not match.
    let attempts = records[0].details["attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 5);
    assert!(attempts.iter().all(|a| a["matched"] == false));
}
