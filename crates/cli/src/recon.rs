//! `tgraph reconcile | network | validate`: load a config plus CSV
//! snapshots into the in-memory store and drive the engine.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Args, ValueEnum};
use log::info;
use serde::Serialize;

use taxgraph_recon::load::{load_documents, load_entities, load_records, Loaded};
use taxgraph_recon::model::{CommunityRisk, EntityMetrics};
use taxgraph_recon::{
    ClaimDocuments, Engine, EngineConfig, Entity, Finding, FullOutcome, MemoryStore,
    NetworkOutcome, Period, Record, ReconOutcome, Severity, StepStatus, Window,
};

use crate::exit_codes::{
    EXIT_CONFIG_INVALID, EXIT_DATA, EXIT_ERROR, EXIT_FINDINGS, EXIT_STEP_INCOMPLETE, EXIT_USAGE,
};
use crate::CliError;

// ============================================================================
// Arguments
// ============================================================================

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FailOn {
    Low,
    Medium,
    High,
    Critical,
}

impl FailOn {
    fn severity(self) -> Severity {
        match self {
            Self::Low => Severity::Low,
            Self::Medium => Severity::Medium,
            Self::High => Severity::High,
            Self::Critical => Severity::Critical,
        }
    }
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Print JSON to stdout instead of only the human summary
    #[arg(long)]
    pub json: bool,

    /// Write JSON output to file
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Path to the engine TOML config
    pub config: PathBuf,

    /// Return period (MMYYYY or YYYY-MM)
    #[arg(long, short = 'p')]
    pub period: String,

    /// Entity to reconcile (repeatable)
    #[arg(long = "entity", short = 'e', required_unless_present = "all")]
    pub entities: Vec<String>,

    /// Reconcile every entity in the entity snapshot
    #[arg(long, conflicts_with = "entities")]
    pub all: bool,

    /// Also run cycle detection and risk propagation over the period
    #[arg(long)]
    pub full: bool,

    /// Exit non-zero when any finding is at or above this severity
    #[arg(long, value_enum)]
    pub fail_on: Option<FailOn>,

    #[command(flatten)]
    pub out: OutputArgs,
}

#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Path to the engine TOML config
    pub config: PathBuf,

    /// Analyze the month of this return period
    #[arg(long, short = 'p', required_unless_present = "from")]
    pub period: Option<String>,

    /// Window start (YYYY-MM-DD)
    #[arg(long, conflicts_with = "period", requires = "to")]
    pub from: Option<NaiveDate>,

    /// Window end (YYYY-MM-DD, inclusive)
    #[arg(long, requires = "from")]
    pub to: Option<NaiveDate>,

    /// Exit non-zero if cycle detection or propagation did not complete
    #[arg(long)]
    pub strict: bool,

    /// Exit non-zero when any cycle finding is at or above this severity
    #[arg(long, value_enum)]
    pub fail_on: Option<FailOn>,

    #[command(flatten)]
    pub out: OutputArgs,
}

// ============================================================================
// Loading
// ============================================================================

struct Snapshot {
    records: Loaded<Record>,
    entities: Loaded<Entity>,
    documents: Loaded<ClaimDocuments>,
}

fn read_config(path: &Path) -> Result<EngineConfig, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        CliError::new(EXIT_CONFIG_INVALID, format!("cannot read config {}: {e}", path.display()))
    })?;
    EngineConfig::from_toml(&text).map_err(CliError::from)
}

fn read_data(base_dir: &Path, file: &str) -> Result<String, CliError> {
    let path = base_dir.join(file);
    std::fs::read_to_string(&path)
        .map_err(|e| CliError::new(EXIT_DATA, format!("cannot read {}: {e}", path.display())))
}

fn empty<T>() -> Loaded<T> {
    Loaded {
        rows: Vec::new(),
        skipped: 0,
    }
}

/// CSV paths in `[data]` are resolved relative to the config file.
fn load_snapshot(config_path: &Path, config: &EngineConfig) -> Result<Snapshot, CliError> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));

    let records_file = config.data.records.as_deref().ok_or_else(|| {
        CliError::new(EXIT_CONFIG_INVALID, "config has no [data] records file")
            .with_hint("add `records = \"records.csv\"` under [data]")
    })?;
    let records = load_records(records_file, &read_data(base_dir, records_file)?)?;

    let entities = match config.data.entities.as_deref() {
        Some(file) => load_entities(file, &read_data(base_dir, file)?)?,
        None => empty(),
    };
    let documents = match config.data.documents.as_deref() {
        Some(file) => load_documents(file, &read_data(base_dir, file)?)?,
        None => empty(),
    };

    info!(
        "loaded {} records, {} entities, {} claim documents",
        records.rows.len(),
        entities.rows.len(),
        documents.rows.len()
    );
    Ok(Snapshot {
        records,
        entities,
        documents,
    })
}

fn build_engine(config_path: &Path) -> Result<Engine<MemoryStore>, CliError> {
    let config = read_config(config_path)?;
    let snapshot = load_snapshot(config_path, &config)?;
    let skipped = snapshot.records.skipped + snapshot.entities.skipped + snapshot.documents.skipped;
    if skipped > 0 {
        eprintln!("warning: {skipped} unparseable CSV rows skipped (run with -v for details)");
    }
    let store = MemoryStore::with_data(
        snapshot.records.rows,
        snapshot.entities.rows,
        snapshot.documents.rows,
    );
    Ok(Engine::new(store, config)?)
}

// ============================================================================
// Output
// ============================================================================

fn emit<T: Serialize>(value: &T, out: &OutputArgs) -> Result<(), CliError> {
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::new(EXIT_ERROR, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = out.output {
        std::fs::write(path, &json_str).map_err(|e| {
            CliError::new(EXIT_ERROR, format!("cannot write {}: {e}", path.display()))
        })?;
        eprintln!("wrote {}", path.display());
    }
    if out.json {
        println!("{json_str}");
    }
    Ok(())
}

fn count(map: &std::collections::BTreeMap<String, usize>, key: &str) -> usize {
    map.get(key).copied().unwrap_or(0)
}

fn print_recon_summary(out: &ReconOutcome) {
    let m = &out.match_summary;
    let s = &out.summary;
    eprintln!(
        "{} {}: {} exact, {} partial, {} unmatched pairs, {} seller-only, {} buyer-only",
        out.meta.entity_id, out.meta.period, m.exact, m.partial, m.unmatched_pairs, m.unpaired_a, m.unpaired_b,
    );
    eprintln!(
        "  {} findings ({} critical, {} high), amount at risk {:.2}, exposure {:.2}",
        s.total_findings,
        count(&s.by_severity, "CRITICAL"),
        count(&s.by_severity, "HIGH"),
        s.amount_at_risk,
        s.total_exposure,
    );
    if s.total_itc_claimed > 0.0 {
        eprintln!("  credit claimed {:.2}, verified {:.2}", s.total_itc_claimed, s.itc_verified);
    }
    if s.skipped_records > 0 {
        eprintln!("  {} incomplete records skipped", s.skipped_records);
    }
}

fn print_entity_risk(metrics: &EntityMetrics, community: Option<&CommunityRisk>) {
    eprintln!(
        "  network risk {:.1} ({}), pagerank {:.4}, betweenness {:.3}",
        metrics.risk_score, metrics.risk_label, metrics.pagerank, metrics.betweenness,
    );
    if let Some(c) = community {
        eprintln!(
            "  community {}: {} members, avg risk {:.1} ({})",
            c.community_id, c.size, c.avg_risk, c.label
        );
    }
}

fn print_step(name: &str, status: &StepStatus) {
    if !status.completed {
        eprintln!("  {name}: did not complete: {}", status.error.as_deref().unwrap_or("unknown error"));
    } else if status.truncated {
        eprintln!("  {name}: result cap reached, output truncated");
    } else if let Some(ref e) = status.error {
        eprintln!("  {name}: {e}");
    }
}

const TOP_ENTITIES: usize = 5;

fn print_network_summary(out: &NetworkOutcome) {
    let st = &out.stats;
    eprintln!(
        "network {}: {} entities, {} edges, density {:.4}, {} communities, {} circular-trade findings",
        out.meta.window,
        st.nodes,
        st.edges,
        st.density,
        st.communities,
        out.findings.len(),
    );
    print_step("cycle detection", &out.cycle_status);
    print_step("propagation", &out.propagation_status);

    let mut ranked: Vec<(&String, &EntityMetrics)> = out.entity_metrics.iter().collect();
    ranked.sort_by(|a, b| b.1.risk_score.total_cmp(&a.1.risk_score).then_with(|| a.0.cmp(b.0)));
    for (id, m) in ranked.into_iter().take(TOP_ENTITIES) {
        eprintln!("  {id}  risk {:.1} ({})", m.risk_score, m.risk_label);
    }
}

fn check_fail_on(findings: &[Finding], fail_on: Option<FailOn>) -> Result<(), CliError> {
    let Some(threshold) = fail_on.map(FailOn::severity) else {
        return Ok(());
    };
    let hits = findings.iter().filter(|f| f.severity >= threshold).count();
    if hits > 0 {
        return Err(CliError::new(
            EXIT_FINDINGS,
            format!("{hits} findings at or above {threshold}"),
        ));
    }
    Ok(())
}

// ============================================================================
// reconcile
// ============================================================================

#[derive(Serialize)]
struct BatchEntry<T> {
    entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn cmd_reconcile(args: ReconcileArgs) -> Result<(), CliError> {
    let period = Period::parse(&args.period)?;
    let engine = build_engine(&args.config)?;

    let entity_ids: Vec<String> = if args.all {
        engine
            .store()
            .entities()?
            .into_iter()
            .map(|e| e.entity_id)
            .collect()
    } else {
        args.entities.clone()
    };
    if entity_ids.is_empty() {
        return Err(CliError::new(EXIT_USAGE, "no entities to reconcile")
            .with_hint("the entity snapshot is empty; pass --entity explicitly"));
    }

    if args.full {
        reconcile_full(&engine, &entity_ids, &period, &args)
    } else if entity_ids.len() == 1 {
        let out = engine.run_reconciliation(&entity_ids[0], &period)?;
        emit(&out, &args.out)?;
        print_recon_summary(&out);
        check_fail_on(&out.findings, args.fail_on)
    } else {
        let results = engine.run_reconciliation_batch(&entity_ids, &period);
        let mut findings = Vec::new();
        let mut failed = 0usize;
        let entries: Vec<BatchEntry<ReconOutcome>> = results
            .into_iter()
            .map(|(entity_id, result)| match result {
                Ok(out) => {
                    print_recon_summary(&out);
                    findings.extend(out.findings.iter().cloned());
                    BatchEntry {
                        entity_id,
                        outcome: Some(out),
                        error: None,
                    }
                }
                Err(e) => {
                    eprintln!("{entity_id}: {e}");
                    failed += 1;
                    BatchEntry {
                        entity_id,
                        outcome: None,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();
        emit(&entries, &args.out)?;
        if failed > 0 {
            return Err(CliError::new(
                EXIT_ERROR,
                format!("{failed} of {} entities failed", entries.len()),
            ));
        }
        check_fail_on(&findings, args.fail_on)
    }
}

fn reconcile_full(
    engine: &Engine<MemoryStore>,
    entity_ids: &[String],
    period: &Period,
    args: &ReconcileArgs,
) -> Result<(), CliError> {
    if let [entity_id] = entity_ids {
        let out = engine.run_full(entity_id, period)?;
        emit(&out, &args.out)?;
        print_full_summary(&out);
        return check_fail_on(&out.reconciliation.findings, args.fail_on);
    }

    // Each run reads the risk written by the one before; entity order is
    // the order given.
    let mut outcomes: Vec<BatchEntry<FullOutcome>> = Vec::with_capacity(entity_ids.len());
    let mut findings = Vec::new();
    let mut failed = 0usize;
    for entity_id in entity_ids {
        let entry = match engine.run_full(entity_id, period) {
            Ok(out) => {
                print_full_summary(&out);
                findings.extend(out.reconciliation.findings.iter().cloned());
                BatchEntry {
                    entity_id: entity_id.clone(),
                    outcome: Some(out),
                    error: None,
                }
            }
            Err(e) => {
                eprintln!("{entity_id}: {e}");
                failed += 1;
                BatchEntry {
                    entity_id: entity_id.clone(),
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(entry);
    }
    emit(&outcomes, &args.out)?;
    if failed > 0 {
        return Err(CliError::new(
            EXIT_ERROR,
            format!("{failed} of {} entities failed", outcomes.len()),
        ));
    }
    check_fail_on(&findings, args.fail_on)
}

fn print_full_summary(out: &FullOutcome) {
    print_recon_summary(&out.reconciliation);
    if let Some(ref metrics) = out.entity_metrics {
        print_entity_risk(metrics, out.community.as_ref());
    }
    print_step("cycle detection", &out.cycle_status);
    print_step("propagation", &out.propagation_status);
}

// ============================================================================
// network
// ============================================================================

fn resolve_window(args: &NetworkArgs) -> Result<Window, CliError> {
    match (&args.period, args.from, args.to) {
        (Some(p), _, _) => Ok(Period::parse(p)?.window()),
        (None, Some(from), Some(to)) => {
            if from > to {
                return Err(CliError::new(
                    EXIT_USAGE,
                    format!("--from {from} is after --to {to}"),
                ));
            }
            Ok(Window::new(from, to))
        }
        _ => Err(CliError::new(EXIT_USAGE, "pass --period or both --from and --to")),
    }
}

pub fn cmd_network(args: NetworkArgs) -> Result<(), CliError> {
    let window = resolve_window(&args)?;
    let engine = build_engine(&args.config)?;
    let out = engine.run_network_analysis(&window)?;

    emit(&out, &args.out)?;
    print_network_summary(&out);

    if args.strict {
        let incomplete = !out.cycle_status.completed
            || out.cycle_status.truncated
            || out.propagation_status.error.is_some();
        if incomplete {
            return Err(CliError::new(EXIT_STEP_INCOMPLETE, "network analysis incomplete (--strict)"));
        }
    }
    check_fail_on(&out.findings, args.fail_on)
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = read_config(&config_path)?;
    let snapshot = load_snapshot(&config_path, &config)?;

    let name = if config.name.is_empty() {
        config_path.display().to_string()
    } else {
        config.name.clone()
    };
    eprintln!("{name}: config ok");
    eprintln!(
        "  records:   {} loaded, {} skipped",
        snapshot.records.rows.len(),
        snapshot.records.skipped
    );
    eprintln!(
        "  entities:  {} loaded, {} skipped",
        snapshot.entities.rows.len(),
        snapshot.entities.skipped
    );
    eprintln!(
        "  documents: {} loaded, {} skipped",
        snapshot.documents.rows.len(),
        snapshot.documents.skipped
    );

    let incomplete = snapshot
        .records
        .rows
        .iter()
        .filter(|r| r.validate().is_err())
        .count();
    if incomplete > 0 {
        eprintln!("  {incomplete} records are incomplete and will be skipped by the engine");
    }
    Ok(())
}
