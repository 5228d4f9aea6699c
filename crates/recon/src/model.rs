use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ReconError;
use crate::period::Window;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Which side of the filing pair a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Source A: declared by the issuing entity (outward supplies).
    SellerFiled,
    /// Source B: reflected on the receiving entity's side (inward supplies).
    BuyerFiled,
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SellerFiled => write!(f, "seller_filed"),
            Self::BuyerFiled => write!(f, "buyer_filed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxComponents {
    pub cgst: f64,
    pub sgst: f64,
    pub igst: f64,
}

impl TaxComponents {
    pub fn total(&self) -> f64 {
        self.cgst + self.sgst + self.igst
    }

    pub fn as_array(&self) -> [f64; 3] {
        [self.cgst, self.sgst, self.igst]
    }
}

/// A single normalized invoice-like record. Owned by the store; the engine
/// only ever reads copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub record_id: String,
    pub invoice_number: String,
    pub issuer_id: String,
    pub receiver_id: String,
    pub date: NaiveDate,
    pub taxable_amount: f64,
    pub tax: TaxComponents,
    /// Declared rate in percent (e.g. 18.0).
    pub declared_rate: f64,
    pub source: SourceTag,
}

impl Record {
    pub fn total_tax(&self) -> f64 {
        self.tax.total()
    }

    /// The party on the other side of `entity_id`.
    pub fn counterparty_of(&self, entity_id: &str) -> &str {
        if self.issuer_id == entity_id {
            &self.receiver_id
        } else {
            &self.issuer_id
        }
    }

    /// Reject records missing a field the matchers rely on.
    pub fn validate(&self) -> Result<(), ReconError> {
        let missing = |field: &str| ReconError::DataIncomplete {
            record_id: self.record_id.clone(),
            field: field.into(),
        };

        if self.record_id.trim().is_empty() {
            return Err(missing("record_id"));
        }
        if self.invoice_number.trim().is_empty() {
            return Err(missing("invoice_number"));
        }
        if self.issuer_id.trim().is_empty() {
            return Err(missing("issuer_id"));
        }
        if self.receiver_id.trim().is_empty() {
            return Err(missing("receiver_id"));
        }
        if !self.taxable_amount.is_finite() || self.taxable_amount < 0.0 {
            return Err(missing("taxable_amount"));
        }
        if self.tax.as_array().iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(missing("tax"));
        }
        if !self.declared_rate.is_finite() {
            return Err(missing("declared_rate"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Active,
    Suspended,
    Cancelled,
}

impl EntityStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Suspended => write!(f, "suspended"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default = "default_compliance")]
    pub compliance_rating: f64,
    /// Share of the entity's outward records that failed L1 (0-1).
    #[serde(default)]
    pub mismatch_ratio: f64,
    /// Written by L4; `None` until the first network run.
    #[serde(default)]
    pub metrics: Option<EntityMetrics>,
}

fn default_compliance() -> f64 {
    50.0
}

impl Entity {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            status: EntityStatus::Active,
            compliance_rating: default_compliance(),
            mismatch_ratio: 0.0,
            metrics: None,
        }
    }
}

/// Network metrics and risk produced by one L4 run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetrics {
    pub risk_score: f64,
    pub risk_label: Severity,
    pub base_risk: f64,
    pub mismatch_ratio: f64,
    pub avg_neighbor_risk: f64,
    pub pagerank: f64,
    pub degree_centrality: f64,
    pub betweenness: f64,
    pub clustering: f64,
    pub community_id: usize,
    pub converged: bool,
}

/// Aggregate value flowing from one entity to another inside a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEdge {
    pub from: String,
    pub to: String,
    pub value: f64,
    pub record_count: usize,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    MissingInSourceA,
    MissingInSourceB,
    ValueMismatch,
    TaxRateMismatch,
    DateMismatch,
    Duplicate,
    MissingBookEntry,
    SourceFilingMissing,
    ClaimFilingMissing,
    ItcOverclaim,
    PhantomInvoice,
    CircularTrade,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingInSourceA => "MISSING_IN_SOURCE_A",
            Self::MissingInSourceB => "MISSING_IN_SOURCE_B",
            Self::ValueMismatch => "VALUE_MISMATCH",
            Self::TaxRateMismatch => "TAX_RATE_MISMATCH",
            Self::DateMismatch => "DATE_MISMATCH",
            Self::Duplicate => "DUPLICATE",
            Self::MissingBookEntry => "MISSING_BOOK_ENTRY",
            Self::SourceFilingMissing => "SOURCE_FILING_MISSING",
            Self::ClaimFilingMissing => "CLAIM_FILING_MISSING",
            Self::ItcOverclaim => "ITC_OVERCLAIM",
            Self::PhantomInvoice => "PHANTOM_INVOICE",
            Self::CircularTrade => "CIRCULAR_TRADE",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Level {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinancialImpact {
    pub amount_at_risk: f64,
    pub interest_liability: f64,
    pub penalty_exposure: f64,
}

impl FinancialImpact {
    pub fn total_exposure(&self) -> f64 {
        self.amount_at_risk + self.interest_liability + self.penalty_exposure
    }
}

/// What kind of consequence a finding can lead to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    ItcReversal,
    DemandNotice,
    AuditTrigger,
    Informational,
}

/// Review lifecycle. The engine only ever emits `Open`; downstream case
/// tooling moves findings through the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingStatus {
    #[default]
    Open,
    UnderReview,
    Resolved,
    Escalated,
    FalsePositive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootCause {
    pub classification: String,
    /// 0..=100
    pub confidence: f64,
    /// Human-readable document or graph paths backing the classification.
    pub evidence_paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionAction {
    /// 1-based position in the finding's action list.
    pub action_id: usize,
    pub description: String,
    pub priority: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regulatory_reference: Option<String>,
}

/// One field that differs between the two sides of an L1 pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub source_a: String,
    pub source_b: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HopStage {
    BookEntry,
    SourceRecord,
    CounterpartRecord,
    SourceFiling,
    ClaimFiling,
}

impl HopStage {
    pub const ORDER: [HopStage; 5] = [
        HopStage::BookEntry,
        HopStage::SourceRecord,
        HopStage::CounterpartRecord,
        HopStage::SourceFiling,
        HopStage::ClaimFiling,
    ];
}

impl std::fmt::Display for HopStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BookEntry => "book_entry",
            Self::SourceRecord => "source_record",
            Self::CounterpartRecord => "counterpart_record",
            Self::SourceFiling => "source_filing",
            Self::ClaimFiling => "claim_filing",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HopStatus {
    Valid,
    Missing,
    Mismatch,
    /// After the break point; never inspected.
    NotChecked,
}

impl std::fmt::Display for HopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Valid => "valid",
            Self::Missing => "missing",
            Self::Mismatch => "mismatch",
            Self::NotChecked => "not_checked",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopState {
    pub stage: HopStage,
    pub status: HopStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleEdge {
    pub from: String,
    pub to: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evidence {
    Pair {
        #[serde(skip_serializing_if = "Option::is_none")]
        source_a: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_b: Option<String>,
        match_score: f64,
        field_diffs: Vec<FieldDiff>,
    },
    Chain {
        claim_record_id: String,
        hops: Vec<HopState>,
        /// 1-based index of the first failing hop.
        #[serde(skip_serializing_if = "Option::is_none")]
        break_point: Option<usize>,
        completeness: f64,
    },
    Cycle {
        members: Vec<String>,
        edges: Vec<CycleEdge>,
        inflation_ratio: f64,
        low_compliance_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub finding_id: String,
    pub level: Level,
    pub kind: FindingKind,
    pub severity: Severity,
    pub issuer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,
    pub impact: FinancialImpact,
    pub risk_category: RiskCategory,
    pub root_cause: RootCause,
    pub resolution_actions: Vec<ResolutionAction>,
    pub status: FindingStatus,
    pub evidence: Evidence,
    pub description: String,
    /// Composite score, filled in by the scorer after all levels ran.
    pub score: f64,
}

impl Finding {
    /// Entities this finding is about (issuer, receiver, cycle members).
    pub fn involves(&self, entity_id: &str) -> bool {
        if self.issuer_id == entity_id || self.receiver_id.as_deref() == Some(entity_id) {
            return true;
        }
        match &self.evidence {
            Evidence::Cycle { members, .. } => members.iter().any(|m| m == entity_id),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Level 1 match classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchClass {
    Exact,
    Partial,
    Unmatched,
}

impl std::fmt::Display for MatchClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Partial => write!(f, "partial"),
            Self::Unmatched => write!(f, "unmatched"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchSummary {
    pub source_a_records: usize,
    pub source_b_records: usize,
    pub exact: usize,
    pub partial: usize,
    pub unmatched_pairs: usize,
    pub unpaired_a: usize,
    pub unpaired_b: usize,
}

impl MatchSummary {
    pub fn pairs(&self) -> usize {
        self.exact + self.partial + self.unmatched_pairs
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconSummary {
    pub total_findings: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub amount_at_risk: f64,
    pub total_exposure: f64,
    /// Credit the entity claimed on its inbound invoices this period.
    pub total_itc_claimed: f64,
    /// Part of `total_itc_claimed` whose document chain validated in full.
    pub itc_verified: f64,
    pub skipped_records: usize,
}

/// Claimed and chain-verified input credit for one entity and period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CreditTotals {
    pub claimed: f64,
    pub verified: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconMeta {
    pub entity_id: String,
    pub period: String,
    pub engine_version: String,
    pub run_at: String,
}

/// Result of `run_reconciliation` for one (entity, period).
#[derive(Debug, Clone, Serialize)]
pub struct ReconOutcome {
    pub meta: ReconMeta,
    pub match_summary: MatchSummary,
    pub summary: ReconSummary,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepStatus {
    pub completed: bool,
    /// A result cap was hit; output is a prefix of the full answer.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepStatus {
    pub fn ok() -> Self {
        Self {
            completed: true,
            truncated: false,
            error: None,
        }
    }

    pub fn failed(err: &ReconError) -> Self {
        Self {
            completed: false,
            truncated: false,
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityRisk {
    pub community_id: usize,
    pub size: usize,
    pub members: Vec<String>,
    pub avg_risk: f64,
    pub max_risk: f64,
    pub high_risk_members: usize,
    pub label: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub density: f64,
    pub avg_clustering: f64,
    pub communities: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkMeta {
    pub window: Window,
    pub engine_version: String,
    pub run_at: String,
}

/// Result of `run_network_analysis` for one window.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkOutcome {
    pub meta: NetworkMeta,
    pub entity_metrics: BTreeMap<String, EntityMetrics>,
    pub findings: Vec<Finding>,
    pub communities: Vec<CommunityRisk>,
    pub stats: GraphStats,
    pub cycle_status: StepStatus,
    pub propagation_status: StepStatus,
    pub converged: bool,
}

/// Result of `run_full`: every level for one entity, scored after the
/// network pass so vendor risk reflects this run.
#[derive(Debug, Clone, Serialize)]
pub struct FullOutcome {
    pub reconciliation: ReconOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_metrics: Option<EntityMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community: Option<CommunityRisk>,
    pub stats: GraphStats,
    pub cycle_status: StepStatus,
    pub propagation_status: StepStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            record_id: "r1".into(),
            invoice_number: "INV-001".into(),
            issuer_id: "A".into(),
            receiver_id: "B".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            taxable_amount: 1000.0,
            tax: TaxComponents {
                cgst: 90.0,
                sgst: 90.0,
                igst: 0.0,
            },
            declared_rate: 18.0,
            source: SourceTag::SellerFiled,
        }
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn validate_rejects_blank_issuer() {
        let mut r = record();
        assert!(r.validate().is_ok());
        r.issuer_id = " ".into();
        let err = r.validate().unwrap_err();
        assert_eq!(
            err,
            ReconError::DataIncomplete {
                record_id: "r1".into(),
                field: "issuer_id".into()
            }
        );
    }

    #[test]
    fn validate_rejects_nan_amount() {
        let mut r = record();
        r.taxable_amount = f64::NAN;
        assert!(r.validate().is_err());
    }

    #[test]
    fn counterparty_resolution() {
        let r = record();
        assert_eq!(r.counterparty_of("A"), "B");
        assert_eq!(r.counterparty_of("B"), "A");
        assert_eq!(r.total_tax(), 180.0);
    }

    #[test]
    fn kind_serializes_screaming() {
        let s = serde_json::to_string(&FindingKind::MissingInSourceB).unwrap();
        assert_eq!(s, "\"MISSING_IN_SOURCE_B\"");
        assert_eq!(FindingKind::MissingInSourceB.to_string(), "MISSING_IN_SOURCE_B");
    }
}
