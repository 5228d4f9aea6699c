use std::collections::HashMap;

use log::{debug, info};

use crate::config::EngineConfig;
use crate::gstin::normalize_invoice_number;
use crate::matcher::{match_greedy, PartyKey, RecordPair};
use crate::model::{
    EntityStatus, Evidence, FieldDiff, Finding, FindingKind, FindingStatus, Level, MatchClass,
    MatchSummary, Record, Severity,
};

/// Everything Level 1 produces for one (entity, period).
#[derive(Debug, Default)]
pub struct Level1Output {
    pub pairs: Vec<RecordPair>,
    pub unmatched_a: Vec<Record>,
    pub unmatched_b: Vec<Record>,
    pub summary: MatchSummary,
    pub findings: Vec<Finding>,
    /// Share of the entity's outward source-A records without an exact pair.
    pub mismatch_ratio: f64,
}

impl Level1Output {
    /// Source-A record paired with the given source-B record, if any.
    pub fn paired_source_a(&self, source_b_record_id: &str) -> Option<&Record> {
        self.pairs
            .iter()
            .find(|p| p.source_b.record_id == source_b_record_id)
            .map(|p| &p.source_a)
    }
}

/// Run the direct matcher and turn its output into findings.
///
/// `statuses` maps counterparty ids to their registration status; ids that
/// are absent count as active.
pub fn run_level1(
    entity_id: &str,
    source_a: &[Record],
    source_b: &[Record],
    statuses: &HashMap<String, EntityStatus>,
    config: &EngineConfig,
) -> Level1Output {
    info!(
        "L1 {}: matching {} source-A against {} source-B records",
        entity_id,
        source_a.len(),
        source_b.len()
    );

    let matched = match_greedy(source_a, source_b, &config.similarity, &config.tolerance);
    let dup_a = identifier_counts(source_a);
    let dup_b = identifier_counts(source_b);

    let mut summary = MatchSummary {
        source_a_records: source_a.len(),
        source_b_records: source_b.len(),
        unpaired_a: matched.unpaired_a.len(),
        unpaired_b: matched.unpaired_b.len(),
        ..Default::default()
    };
    let mut findings = Vec::new();
    let mut next_id = {
        let mut seq = 0usize;
        move || {
            seq += 1;
            format!("L1-{seq:04}")
        }
    };

    for pair in &matched.pairs {
        match pair.similarity.class {
            MatchClass::Exact => {
                summary.exact += 1;
                continue;
            }
            MatchClass::Partial => summary.partial += 1,
            MatchClass::Unmatched => summary.unmatched_pairs += 1,
        }
        let key = identifier_key(&pair.source_a);
        let duplicated = dup_a.get(&key).copied().unwrap_or(0) > 1
            || dup_b.get(&key).copied().unwrap_or(0) > 1;
        let finding = pair_finding(next_id(), pair, duplicated, config);
        debug!(
            "L1 pair {} / {} -> {} ({:.2})",
            pair.source_a.record_id, pair.source_b.record_id, finding.kind, pair.similarity.total
        );
        findings.push(finding);
    }

    for record in &matched.unpaired_a {
        findings.push(missing_finding(
            next_id(),
            entity_id,
            record,
            FindingKind::MissingInSourceB,
            statuses,
            config,
        ));
    }
    for record in &matched.unpaired_b {
        findings.push(missing_finding(
            next_id(),
            entity_id,
            record,
            FindingKind::MissingInSourceA,
            statuses,
            config,
        ));
    }

    let outward: Vec<&Record> = source_a.iter().filter(|r| r.issuer_id == entity_id).collect();
    let mismatch_ratio = if outward.is_empty() {
        0.0
    } else {
        let exact_outward = matched
            .pairs
            .iter()
            .filter(|p| p.similarity.class == MatchClass::Exact && p.source_a.issuer_id == entity_id)
            .count();
        (outward.len() - exact_outward) as f64 / outward.len() as f64
    };

    info!(
        "L1 {}: {} exact, {} partial, {} unmatched pairs, {} unpaired A, {} unpaired B",
        entity_id,
        summary.exact,
        summary.partial,
        summary.unmatched_pairs,
        summary.unpaired_a,
        summary.unpaired_b
    );

    Level1Output {
        pairs: matched.pairs,
        unmatched_a: matched.unpaired_a,
        unmatched_b: matched.unpaired_b,
        summary,
        findings,
        mismatch_ratio,
    }
}

type IdentifierKey = (PartyKey, String);

fn identifier_key(record: &Record) -> IdentifierKey {
    (PartyKey::of(record), normalize_invoice_number(&record.invoice_number))
}

fn identifier_counts(records: &[Record]) -> HashMap<IdentifierKey, usize> {
    let mut counts = HashMap::new();
    for r in records {
        *counts.entry(identifier_key(r)).or_insert(0) += 1;
    }
    counts
}

/// Kind for a pair that did not reach the exact threshold. First rule wins.
fn pair_kind(pair: &RecordPair, duplicated: bool) -> FindingKind {
    let s = &pair.similarity;
    let rates_differ = (pair.source_a.declared_rate - pair.source_b.declared_rate).abs() > 1e-9;
    let amount_agrees = s.amount >= 100.0;

    if duplicated {
        FindingKind::Duplicate
    } else if rates_differ || (s.tax < 100.0 && amount_agrees) {
        FindingKind::TaxRateMismatch
    } else if !amount_agrees {
        FindingKind::ValueMismatch
    } else if s.date < 100.0 {
        FindingKind::DateMismatch
    } else {
        FindingKind::ValueMismatch
    }
}

fn pair_amount_at_risk(a: &Record, b: &Record) -> f64 {
    let tax_gap = (a.total_tax() - b.total_tax()).abs();
    let rate = a.declared_rate.max(b.declared_rate);
    let base_gap = (a.taxable_amount - b.taxable_amount).abs() * rate / 100.0;
    tax_gap.max(base_gap)
}

fn field_diffs(pair: &RecordPair) -> Vec<FieldDiff> {
    let (a, b, s) = (&pair.source_a, &pair.source_b, &pair.similarity);
    let mut diffs = Vec::new();
    let mut push = |field: &str, va: String, vb: String| {
        diffs.push(FieldDiff {
            field: field.into(),
            source_a: va,
            source_b: vb,
        })
    };
    if s.identifier < 100.0 {
        push("invoice_number", a.invoice_number.clone(), b.invoice_number.clone());
    }
    if s.amount < 100.0 {
        push("taxable_amount", format!("{:.2}", a.taxable_amount), format!("{:.2}", b.taxable_amount));
    }
    if s.date < 100.0 {
        push("date", a.date.to_string(), b.date.to_string());
    }
    if s.tax < 100.0 {
        push("tax", format!("{:.2}", a.total_tax()), format!("{:.2}", b.total_tax()));
    }
    if (a.declared_rate - b.declared_rate).abs() > 1e-9 {
        push("declared_rate", a.declared_rate.to_string(), b.declared_rate.to_string());
    }
    diffs
}

fn pair_finding(id: String, pair: &RecordPair, duplicated: bool, config: &EngineConfig) -> Finding {
    let (a, b) = (&pair.source_a, &pair.source_b);
    let kind = pair_kind(pair, duplicated);
    let amount = pair_amount_at_risk(a, b);
    let description = match kind {
        FindingKind::Duplicate => format!(
            "invoice {} appears more than once for {} -> {}",
            a.invoice_number, a.issuer_id, a.receiver_id
        ),
        FindingKind::TaxRateMismatch => format!(
            "invoice {}: tax differs between sources ({:.2} vs {:.2}, rate {} vs {})",
            a.invoice_number,
            a.total_tax(),
            b.total_tax(),
            a.declared_rate,
            b.declared_rate
        ),
        FindingKind::DateMismatch => format!(
            "invoice {}: dated {} by seller, {} by buyer",
            a.invoice_number, a.date, b.date
        ),
        _ => format!(
            "invoice {}: taxable value {:.2} vs {:.2}",
            a.invoice_number, a.taxable_amount, b.taxable_amount
        ),
    };

    Finding {
        finding_id: id,
        level: Level::L1,
        kind,
        severity: config.severity.for_amount(amount),
        issuer_id: a.issuer_id.clone(),
        receiver_id: Some(a.receiver_id.clone()),
        invoice_number: Some(a.invoice_number.clone()),
        impact: config.exposure.impact(kind, amount),
        risk_category: config.resolution.risk_category(kind),
        root_cause: config.resolution.root_cause(
            kind,
            format!("{kind} between seller- and buyer-filed records"),
            vec![format!(
                "seller invoice {} ({}) -> match {:.1} -> buyer invoice {} ({})",
                a.invoice_number, a.record_id, pair.similarity.total, b.invoice_number, b.record_id
            )],
        ),
        resolution_actions: config.resolution.actions(kind),
        status: FindingStatus::Open,
        evidence: Evidence::Pair {
            source_a: Some(a.record_id.clone()),
            source_b: Some(b.record_id.clone()),
            match_score: pair.similarity.total,
            field_diffs: field_diffs(pair),
        },
        description,
        score: 0.0,
    }
}

fn missing_finding(
    id: String,
    entity_id: &str,
    record: &Record,
    kind: FindingKind,
    statuses: &HashMap<String, EntityStatus>,
    config: &EngineConfig,
) -> Finding {
    let counterparty = record.counterparty_of(entity_id);
    let status = statuses.get(counterparty).copied().unwrap_or_default();
    let severity = if status.is_active() {
        Severity::High
    } else {
        Severity::Critical
    };
    let amount = record.total_tax();
    let (source_a, source_b, missing_side) = match kind {
        FindingKind::MissingInSourceB => (Some(record.record_id.clone()), None, "buyer"),
        _ => (None, Some(record.record_id.clone()), "seller"),
    };
    let classification = match kind {
        FindingKind::MissingInSourceB => {
            "filed by the seller but not reflected on the buyer side; the credit cannot be claimed"
        }
        _ => "reflected on the buyer side without a seller filing; possibly fictitious",
    };

    Finding {
        finding_id: id,
        level: Level::L1,
        kind,
        severity,
        issuer_id: record.issuer_id.clone(),
        receiver_id: Some(record.receiver_id.clone()),
        invoice_number: Some(record.invoice_number.clone()),
        impact: config.exposure.impact(kind, amount),
        risk_category: config.resolution.risk_category(kind),
        root_cause: config.resolution.root_cause(
            kind,
            format!("invoice {classification}"),
            vec![format!("invoice {} ({}) -> {kind}", record.invoice_number, record.record_id)],
        ),
        resolution_actions: config.resolution.actions(kind),
        status: FindingStatus::Open,
        evidence: Evidence::Pair {
            source_a,
            source_b,
            match_score: 0.0,
            field_diffs: Vec::new(),
        },
        description: format!(
            "invoice {} ({} -> {}) has no {}-side counterpart; counterparty {} is {}",
            record.invoice_number, record.issuer_id, record.receiver_id, missing_side, counterparty, status
        ),
        score: 0.0,
    }
}
