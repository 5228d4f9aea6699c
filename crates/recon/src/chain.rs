//! Level 2: multi-hop documentary chain validation for credit claims.
//!
//! Each inbound claim is backed by five documents, in order:
//!
//! 1. book entry in the claimant's ledger
//! 2. the supplier's own record of the invoice (source A, via the L1 pairing)
//! 3. the claim record itself (source B)
//! 4. the supplier's periodic return showing the liability
//! 5. the claimant's credit filing
//!
//! The walk stops at the first missing or divergent hop. All hop values are
//! tax amounts and compare against the claim record's total tax.

use std::collections::HashMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::classify::Level1Output;
use crate::config::{ChainConfig, EngineConfig, ToleranceConfig};
use crate::model::{
    EntityStatus, Evidence, Finding, FindingKind, FindingStatus, HopStage, HopState, HopStatus,
    CreditTotals, Level, Record, Severity,
};

/// Supporting documents the store holds for one claim record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimDocuments {
    pub record_id: String,
    #[serde(default)]
    pub book_entry: Option<f64>,
    #[serde(default)]
    pub source_filing: Option<f64>,
    #[serde(default)]
    pub claim_filing: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainHop {
    pub stage: HopStage,
    pub present: bool,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimChain {
    pub claim_record_id: String,
    pub invoice_number: String,
    pub supplier_id: String,
    pub claimant_id: String,
    pub claim_value: f64,
    pub hops: Vec<ChainHop>,
}

/// Result of walking one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainWalk {
    pub hops: Vec<HopState>,
    /// 1-based index of the first failing hop.
    pub break_point: Option<usize>,
    pub completeness: f64,
    /// Kind of the failure at the break point.
    pub failure: Option<FindingKind>,
}

#[derive(Debug, Default)]
pub struct Level2Output {
    pub chains: Vec<ClaimChain>,
    pub findings: Vec<Finding>,
    pub complete: usize,
    pub broken: usize,
    pub credit: CreditTotals,
}

pub fn build_chain(
    claim: &Record,
    paired_source: Option<&Record>,
    documents: Option<&ClaimDocuments>,
) -> ClaimChain {
    let doc = |f: fn(&ClaimDocuments) -> Option<f64>| documents.and_then(f);
    let values = [
        doc(|d| d.book_entry),
        paired_source.map(Record::total_tax),
        Some(claim.total_tax()),
        doc(|d| d.source_filing),
        doc(|d| d.claim_filing),
    ];
    let hops = HopStage::ORDER
        .iter()
        .zip(values)
        .map(|(&stage, value)| ChainHop {
            stage,
            present: value.is_some(),
            value,
        })
        .collect();

    ClaimChain {
        claim_record_id: claim.record_id.clone(),
        invoice_number: claim.invoice_number.clone(),
        supplier_id: claim.issuer_id.clone(),
        claimant_id: claim.receiver_id.clone(),
        claim_value: claim.total_tax(),
        hops,
    }
}

fn missing_kind(stage: HopStage) -> FindingKind {
    match stage {
        HopStage::BookEntry => FindingKind::MissingBookEntry,
        HopStage::SourceRecord => FindingKind::MissingInSourceA,
        HopStage::CounterpartRecord => FindingKind::MissingInSourceB,
        HopStage::SourceFiling => FindingKind::SourceFilingMissing,
        HopStage::ClaimFiling => FindingKind::ClaimFilingMissing,
    }
}

/// Walk hops in order, stopping at the first failure.
pub fn walk_chain(chain: &ClaimChain, tolerance: &ToleranceConfig) -> ChainWalk {
    let mut hops = Vec::with_capacity(chain.hops.len());
    let mut break_point = None;
    let mut failure = None;
    let mut validated = 0usize;

    for (i, hop) in chain.hops.iter().enumerate() {
        if break_point.is_some() {
            hops.push(HopState {
                stage: hop.stage,
                status: HopStatus::NotChecked,
                value: hop.value,
            });
            continue;
        }

        let status = match hop.value.filter(|_| hop.present) {
            None => {
                failure = Some(missing_kind(hop.stage));
                HopStatus::Missing
            }
            Some(v) if !tolerance.amounts_match(v, chain.claim_value) => {
                failure = Some(if hop.stage == HopStage::ClaimFiling && v > chain.claim_value {
                    FindingKind::ItcOverclaim
                } else {
                    FindingKind::ValueMismatch
                });
                HopStatus::Mismatch
            }
            Some(_) => HopStatus::Valid,
        };

        if status == HopStatus::Valid {
            validated += 1;
        } else {
            break_point = Some(i + 1);
        }
        hops.push(HopState {
            stage: hop.stage,
            status,
            value: hop.value,
        });
    }

    let completeness = if chain.hops.is_empty() {
        0.0
    } else {
        validated as f64 / chain.hops.len() as f64 * 100.0
    };

    ChainWalk {
        hops,
        break_point,
        completeness,
        failure,
    }
}

pub fn completeness_severity(completeness: f64, config: &ChainConfig) -> Severity {
    if completeness < config.critical_below {
        Severity::Critical
    } else if completeness < config.high_below {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Validate every inbound claim of `entity_id`.
///
/// `claims` are the source-B records the entity received; `level1` supplies
/// the hop-2 pairing.
pub fn run_level2(
    entity_id: &str,
    claims: &[Record],
    level1: &Level1Output,
    documents: &[ClaimDocuments],
    statuses: &HashMap<String, EntityStatus>,
    config: &EngineConfig,
) -> Level2Output {
    let docs: HashMap<&str, &ClaimDocuments> =
        documents.iter().map(|d| (d.record_id.as_str(), d)).collect();

    let mut out = Level2Output::default();
    for claim in claims.iter().filter(|r| r.receiver_id == entity_id) {
        let chain = build_chain(
            claim,
            level1.paired_source_a(&claim.record_id),
            docs.get(claim.record_id.as_str()).copied(),
        );
        let walk = walk_chain(&chain, &config.tolerance);
        let supplier_status = statuses.get(&chain.supplier_id).copied().unwrap_or_default();

        let kind = if !supplier_status.is_active() {
            Some(FindingKind::PhantomInvoice)
        } else {
            walk.failure
        };

        let claimed = chain
            .hops
            .iter()
            .find(|h| h.stage == HopStage::ClaimFiling)
            .and_then(|h| h.value)
            .unwrap_or(0.0);
        out.credit.claimed += claimed;

        match kind {
            None => {
                out.complete += 1;
                out.credit.verified += claimed;
            }
            Some(kind) => {
                out.broken += 1;
                let id = format!("L2-{:04}", out.findings.len() + 1);
                let finding = chain_finding(id, &chain, &walk, kind, supplier_status, config);
                debug!(
                    "L2 {}: {} at hop {:?}, completeness {:.0}%",
                    chain.claim_record_id, kind, walk.break_point, walk.completeness
                );
                out.findings.push(finding);
            }
        }
        out.chains.push(chain);
    }

    info!(
        "L2 {}: {} chains, {} complete, {} broken",
        entity_id,
        out.chains.len(),
        out.complete,
        out.broken
    );
    out
}

fn chain_finding(
    id: String,
    chain: &ClaimChain,
    walk: &ChainWalk,
    kind: FindingKind,
    supplier_status: EntityStatus,
    config: &EngineConfig,
) -> Finding {
    let claimed = chain
        .hops
        .last()
        .and_then(|h| h.value)
        .unwrap_or(chain.claim_value);
    let amount = if kind == FindingKind::ItcOverclaim {
        claimed - chain.claim_value
    } else {
        chain.claim_value
    };

    let severity = if kind == FindingKind::PhantomInvoice {
        Severity::Critical
    } else {
        completeness_severity(walk.completeness, &config.chain).max(config.severity.for_amount(amount))
    };

    let description = match (kind, walk.break_point) {
        (FindingKind::PhantomInvoice, _) => format!(
            "credit claimed on invoice {} from supplier {} whose registration is {}",
            chain.invoice_number, chain.supplier_id, supplier_status
        ),
        (_, Some(bp)) => format!(
            "claim chain for invoice {} breaks at hop {} of {} ({:.0}% complete)",
            chain.invoice_number,
            bp,
            chain.hops.len(),
            walk.completeness
        ),
        (_, None) => format!("claim chain for invoice {} is inconsistent", chain.invoice_number),
    };
    let classification = match (kind, walk.break_point) {
        (FindingKind::PhantomInvoice, _) => format!("supplier registration is {supplier_status}"),
        (_, Some(bp)) => format!("{kind} at hop {bp}"),
        (_, None) => kind.to_string(),
    };
    let paths = walk
        .hops
        .iter()
        .enumerate()
        .map(|(i, h)| format!("hop {}: {} [{}]", i + 1, h.stage, h.status))
        .collect();

    Finding {
        finding_id: id,
        level: Level::L2,
        kind,
        severity,
        issuer_id: chain.supplier_id.clone(),
        receiver_id: Some(chain.claimant_id.clone()),
        invoice_number: Some(chain.invoice_number.clone()),
        impact: config.exposure.impact(kind, amount),
        risk_category: config.resolution.risk_category(kind),
        root_cause: config.resolution.root_cause(kind, classification, paths),
        resolution_actions: config.resolution.actions(kind),
        status: FindingStatus::Open,
        evidence: Evidence::Chain {
            claim_record_id: chain.claim_record_id.clone(),
            hops: walk.hops.clone(),
            break_point: walk.break_point,
            completeness: walk.completeness,
        },
        description,
        score: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceTag, TaxComponents};
    use chrono::NaiveDate;

    fn claim(id: &str, tax: f64) -> Record {
        Record {
            record_id: id.into(),
            invoice_number: format!("INV-{id}"),
            issuer_id: "SUPPLIER".into(),
            receiver_id: "BUYER".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            taxable_amount: tax / 0.18,
            tax: TaxComponents {
                cgst: tax / 2.0,
                sgst: tax / 2.0,
                igst: 0.0,
            },
            declared_rate: 18.0,
            source: SourceTag::BuyerFiled,
        }
    }

    fn docs(id: &str, book: Option<f64>, source: Option<f64>, claim: Option<f64>) -> ClaimDocuments {
        ClaimDocuments {
            record_id: id.into(),
            book_entry: book,
            source_filing: source,
            claim_filing: claim,
        }
    }

    fn full_chain(tax: f64) -> ClaimChain {
        let c = claim("c1", tax);
        let mut paired = c.clone();
        paired.source = SourceTag::SellerFiled;
        build_chain(&c, Some(&paired), Some(&docs("c1", Some(tax), Some(tax), Some(tax))))
    }

    #[test]
    fn complete_chain_is_fully_valid() {
        let walk = walk_chain(&full_chain(1_800.0), &ToleranceConfig::default());
        assert_eq!(walk.break_point, None);
        assert_eq!(walk.completeness, 100.0);
        assert!(walk.hops.iter().all(|h| h.status == HopStatus::Valid));
    }

    #[test]
    fn missing_hop_two_is_twenty_percent_critical() {
        let c = claim("c1", 1_800.0);
        let chain = build_chain(&c, None, Some(&docs("c1", Some(1_800.0), Some(1_800.0), Some(1_800.0))));
        let walk = walk_chain(&chain, &ToleranceConfig::default());
        assert_eq!(walk.break_point, Some(2));
        assert_eq!(walk.completeness, 20.0);
        assert_eq!(walk.failure, Some(FindingKind::MissingInSourceA));
        assert_eq!(walk.hops[2].status, HopStatus::NotChecked);
        assert_eq!(
            completeness_severity(walk.completeness, &ChainConfig::default()),
            Severity::Critical
        );
    }

    #[test]
    fn completeness_non_increasing_as_hops_fail() {
        let tol = ToleranceConfig::default();
        let mut chain = full_chain(1_800.0);
        let mut last = walk_chain(&chain, &tol).completeness;
        for i in (0..chain.hops.len()).rev() {
            chain.hops[i].present = false;
            chain.hops[i].value = None;
            let walk = walk_chain(&chain, &tol);
            assert!(walk.completeness <= last);
            assert_eq!(walk.break_point, Some(i + 1));
            last = walk.completeness;
        }
        assert_eq!(last, 0.0);
    }

    #[test]
    fn claim_filing_above_claim_is_overclaim() {
        let mut chain = full_chain(1_800.0);
        chain.hops[4].value = Some(2_500.0);
        let walk = walk_chain(&chain, &ToleranceConfig::default());
        assert_eq!(walk.break_point, Some(5));
        assert_eq!(walk.failure, Some(FindingKind::ItcOverclaim));
        assert_eq!(walk.completeness, 80.0);
    }

    #[test]
    fn divergent_source_filing_is_value_mismatch() {
        let mut chain = full_chain(1_800.0);
        chain.hops[3].value = Some(1_000.0);
        let walk = walk_chain(&chain, &ToleranceConfig::default());
        assert_eq!(walk.failure, Some(FindingKind::ValueMismatch));
        assert_eq!(walk.hops[3].status, HopStatus::Mismatch);
    }

    fn paired_level1(c: &Record) -> Level1Output {
        let mut paired = c.clone();
        paired.source = SourceTag::SellerFiled;
        let similarity =
            crate::similarity::score(&paired, c, &Default::default(), &Default::default());
        Level1Output {
            pairs: vec![crate::matcher::RecordPair {
                source_a: paired,
                source_b: c.clone(),
                similarity,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn inactive_supplier_is_phantom_even_when_complete() {
        let c = claim("c1", 1_800.0);
        let level1 = paired_level1(&c);
        let documents = vec![docs("c1", Some(1_800.0), Some(1_800.0), Some(1_800.0))];
        let mut statuses = HashMap::new();
        statuses.insert("SUPPLIER".to_string(), EntityStatus::Suspended);

        let out = run_level2("BUYER", &[c], &level1, &documents, &statuses, &EngineConfig::default());
        assert_eq!(out.findings.len(), 1);
        let f = &out.findings[0];
        assert_eq!(f.kind, FindingKind::PhantomInvoice);
        assert_eq!(f.severity, Severity::Critical);
        assert_eq!(f.finding_id, "L2-0001");
        let Evidence::Chain { break_point, completeness, .. } = &f.evidence else {
            panic!("expected chain evidence");
        };
        assert_eq!(*break_point, None);
        assert_eq!(*completeness, 100.0);
    }

    #[test]
    fn complete_chain_yields_no_finding() {
        let c = claim("c1", 1_800.0);
        let level1 = paired_level1(&c);
        let documents = vec![docs("c1", Some(1_800.0), Some(1_800.0), Some(1_800.0))];
        let out = run_level2("BUYER", &[c], &level1, &documents, &HashMap::new(), &EngineConfig::default());
        assert!(out.findings.is_empty());
        assert_eq!(out.complete, 1);
    }

    #[test]
    fn severity_takes_amount_tier_when_higher() {
        // hop 5 missing: 80% complete is MEDIUM, but 1.5L at risk is HIGH
        let c = claim("c1", 150_000.0);
        let level1 = paired_level1(&c);
        let documents = vec![docs("c1", Some(150_000.0), Some(150_000.0), None)];
        let out = run_level2("BUYER", &[c], &level1, &documents, &HashMap::new(), &EngineConfig::default());
        assert_eq!(out.findings[0].kind, FindingKind::ClaimFilingMissing);
        assert_eq!(out.findings[0].severity, Severity::High);
        assert_eq!(out.broken, 1);
    }

    #[test]
    fn claims_without_documents_break_at_first_hop() {
        let c = claim("c1", 1_800.0);
        let out = run_level2("BUYER", &[c], &Level1Output::default(), &[], &HashMap::new(), &EngineConfig::default());
        assert_eq!(out.findings[0].kind, FindingKind::MissingBookEntry);
        assert_eq!(out.findings[0].severity, Severity::Critical);
    }
}
