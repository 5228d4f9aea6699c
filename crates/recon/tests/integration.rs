use std::io::Write;
use std::path::PathBuf;

use taxgraph_recon::load::{load_documents, load_entities, load_records};
use taxgraph_recon::model::{Evidence, Level};
use taxgraph_recon::{
    Engine, EngineConfig, FindingKind, MemoryStore, Period, RecordStore, ReconError, Severity,
};

const BUYER: &str = "29AABCB1234C1ZA";
const SUPPLIER: &str = "27AAPFU0939F1ZV";
const CANCELLED: &str = "07AAACX9999Q1ZY";
const CYCLE_A: &str = "24AAACC1111A1ZW";
const CYCLE_B: &str = "24AAACC2222B1ZO";
const CYCLE_C: &str = "24AAACC3333C1ZG";

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn read_fixture(name: &str) -> String {
    let path = fixtures_dir().join(name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

fn load_store() -> MemoryStore {
    let records = load_records("records.csv", &read_fixture("records.csv")).unwrap();
    let entities = load_entities("entities.csv", &read_fixture("entities.csv")).unwrap();
    let documents = load_documents("documents.csv", &read_fixture("documents.csv")).unwrap();
    assert_eq!(records.skipped, 0);
    MemoryStore::with_data(records.rows, entities.rows, documents.rows)
}

fn fixture_engine() -> Engine<MemoryStore> {
    let config = EngineConfig::from_toml(&read_fixture("engine.toml")).unwrap();
    Engine::new(load_store(), config).unwrap()
}

fn january() -> Period {
    Period::parse("012025").unwrap()
}

// -------------------------------------------------------------------------
// Reconciliation (L1 + L2)
// -------------------------------------------------------------------------

#[test]
fn reconcile_buyer() {
    let engine = fixture_engine();
    let out = engine.run_reconciliation(BUYER, &january()).unwrap();

    assert_eq!(out.meta.period, "012025");
    assert_eq!(out.match_summary.exact, 1);
    assert_eq!(out.match_summary.partial, 1);
    assert_eq!(out.match_summary.unpaired_a, 1);
    assert_eq!(out.match_summary.unpaired_b, 1);
    assert_eq!(out.summary.skipped_records, 1);
    // b-2001's supplier is cancelled, so only the other two chains verify
    assert_eq!(out.summary.total_itc_claimed, 36_000.0);
    assert_eq!(out.summary.itc_verified, 27_000.0);

    let kinds: Vec<FindingKind> = out.findings.iter().map(|f| f.kind).collect();
    assert_eq!(out.findings.len(), 4);
    assert!(kinds.contains(&FindingKind::DateMismatch));
    assert!(kinds.contains(&FindingKind::MissingInSourceB));
    assert!(kinds.contains(&FindingKind::MissingInSourceA));
    assert!(kinds.contains(&FindingKind::PhantomInvoice));

    let missing_a = out
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::MissingInSourceA)
        .unwrap();
    assert_eq!(missing_a.severity, Severity::Critical);
    assert_eq!(missing_a.issuer_id, CANCELLED);

    let phantom = out
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::PhantomInvoice)
        .unwrap();
    assert_eq!(phantom.level, Level::L2);
    assert_eq!(phantom.severity, Severity::Critical);

    let missing_b = out
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::MissingInSourceB)
        .unwrap();
    assert_eq!(missing_b.severity, Severity::High);
    assert_eq!(missing_b.impact.amount_at_risk, 5_400.0);

    for pair in out.findings.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn reconcile_unknown_entity() {
    let engine = fixture_engine();
    let err = engine
        .run_reconciliation("29ZZZZZ0000Z1ZZ", &january())
        .unwrap_err();
    assert!(matches!(err, ReconError::UnknownEntity(_)));
}

#[test]
fn reconcile_other_period_is_empty() {
    let engine = fixture_engine();
    let out = engine
        .run_reconciliation(BUYER, &Period::parse("2025-02").unwrap())
        .unwrap();
    assert!(out.findings.is_empty());
    assert_eq!(out.summary.total_findings, 0);
}

// -------------------------------------------------------------------------
// Network (L3 + L4)
// -------------------------------------------------------------------------

#[test]
fn network_finds_inflating_loop() {
    let engine = fixture_engine();
    let out = engine.run_network_analysis(&january().window()).unwrap();

    assert!(out.cycle_status.completed);
    assert!(!out.cycle_status.truncated);
    assert_eq!(out.findings.len(), 1);

    let f = &out.findings[0];
    assert_eq!(f.kind, FindingKind::CircularTrade);
    // two members below 40 compliance
    assert_eq!(f.severity, Severity::Critical);
    let Evidence::Cycle {
        members,
        inflation_ratio,
        low_compliance_count,
        ..
    } = &f.evidence
    else {
        panic!("expected cycle evidence");
    };
    assert_eq!(members, &vec![CYCLE_A.to_string(), CYCLE_B.to_string(), CYCLE_C.to_string()]);
    assert!((inflation_ratio - 1.21).abs() < 1e-9);
    assert_eq!(*low_compliance_count, 2);

    assert_eq!(out.stats.nodes, 6);
    assert_eq!(out.entity_metrics.len(), 6);
    assert!(out.converged);
    let total_pagerank: f64 = out.entity_metrics.values().map(|m| m.pagerank).sum();
    assert!((total_pagerank - 1.0).abs() < 1e-6);
    assert_eq!(
        out.entity_metrics[CANCELLED].base_risk,
        90.0,
        "cancelled registration floors base risk"
    );

    let cycle_community = out.entity_metrics[CYCLE_A].community_id;
    assert_eq!(out.entity_metrics[CYCLE_B].community_id, cycle_community);
    assert_eq!(out.entity_metrics[CYCLE_C].community_id, cycle_community);
    assert_ne!(out.entity_metrics[BUYER].community_id, cycle_community);
}

#[test]
fn second_network_run_reads_previous_risk() {
    let engine = fixture_engine();
    let first = engine.run_network_analysis(&january().window()).unwrap();
    assert!(first.entity_metrics.values().all(|m| m.avg_neighbor_risk == 0.0));

    let second = engine.run_network_analysis(&january().window()).unwrap();
    let buyer = &second.entity_metrics[BUYER];
    assert!(buyer.avg_neighbor_risk > 0.0);
    assert!(buyer.risk_score > first.entity_metrics[BUYER].risk_score);
    assert_eq!(
        engine.store().read_entity_risk(BUYER).unwrap(),
        Some(buyer.risk_score)
    );
}

#[test]
fn tiny_edge_cap_flags_cycle_step() {
    let mut config = EngineConfig::from_toml(&read_fixture("engine.toml")).unwrap();
    config.cycles.max_edges = 2;
    let engine = Engine::new(load_store(), config).unwrap();
    let out = engine.run_network_analysis(&january().window()).unwrap();
    assert!(!out.cycle_status.completed);
    assert!(out.findings.is_empty());
    assert!(out.propagation_status.completed);
    assert_eq!(out.entity_metrics.len(), 6);
}

// -------------------------------------------------------------------------
// Full pipeline + batch
// -------------------------------------------------------------------------

#[test]
fn full_run_keeps_only_relevant_cycles() {
    let engine = fixture_engine();

    let buyer = engine.run_full(BUYER, &january()).unwrap();
    assert!(buyer
        .reconciliation
        .findings
        .iter()
        .all(|f| f.level != Level::L3));
    assert!(buyer.entity_metrics.is_some());
    assert!(buyer.community.is_some());

    let member = engine.run_full(CYCLE_B, &january()).unwrap();
    let levels: Vec<Level> = member.reconciliation.findings.iter().map(|f| f.level).collect();
    assert!(levels.contains(&Level::L3));
    // c-1 and c-2 have no buyer-side record
    assert_eq!(
        member
            .reconciliation
            .findings
            .iter()
            .filter(|f| f.kind == FindingKind::MissingInSourceB)
            .count(),
        2
    );
    assert_eq!(member.reconciliation.summary.by_kind["CIRCULAR_TRADE"], 1);
}

#[test]
fn full_run_uses_vendor_risk() {
    let engine = fixture_engine();
    let before = engine.run_reconciliation(BUYER, &january()).unwrap();
    let after = engine.run_full(BUYER, &january()).unwrap();

    let score_of = |findings: &[taxgraph_recon::Finding]| {
        findings
            .iter()
            .find(|f| f.kind == FindingKind::MissingInSourceA)
            .map(|f| f.score)
            .unwrap()
    };
    assert!(score_of(&after.reconciliation.findings) > score_of(&before.findings));
}

#[test]
fn batch_matches_single_runs() {
    let engine = fixture_engine();
    let ids: Vec<String> = [BUYER, SUPPLIER, CANCELLED, CYCLE_A]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let results = engine.run_reconciliation_batch(&ids, &january());
    assert_eq!(results.len(), ids.len());
    for (id, result) in &results {
        let single = engine.run_reconciliation(id, &january()).unwrap();
        let batch = result.as_ref().unwrap();
        assert_eq!(batch.summary.total_findings, single.summary.total_findings, "{id}");
        assert_eq!(batch.match_summary, single.match_summary, "{id}");
    }
}

// -------------------------------------------------------------------------
// Config + output
// -------------------------------------------------------------------------

#[test]
fn config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[similarity]\nexact_threshold = 99.0\n").unwrap();
    drop(file);

    let config = EngineConfig::from_toml(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(config.similarity.exact_threshold, 99.0);
    assert!(Engine::new(load_store(), config).is_ok());

    std::fs::write(&path, "[propagation]\ndamping = 0.0\n").unwrap();
    let err = EngineConfig::from_toml(&std::fs::read_to_string(&path).unwrap()).unwrap_err();
    assert!(matches!(err, ReconError::ConfigValidation(_)));
}

#[test]
fn outcome_json_shape() {
    let engine = fixture_engine();
    let out = engine.run_reconciliation(BUYER, &january()).unwrap();
    let json = serde_json::to_value(&out).unwrap();

    assert!(json["meta"]["engine_version"].is_string());
    assert_eq!(json["match_summary"]["exact"], 1);
    let first = &json["findings"][0];
    assert!(first["kind"].as_str().unwrap().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
    assert!(first["impact"]["amount_at_risk"].is_number());
    assert!(first["evidence"]["type"].is_string());
    assert_eq!(first["status"], "OPEN");
    assert!(first["risk_category"].is_string());
    assert!(first["root_cause"]["evidence_paths"].is_array());
    assert_eq!(first["resolution_actions"][0]["action_id"], 1);
    assert!(json["summary"]["itc_verified"].is_number());
}
