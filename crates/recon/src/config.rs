use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::ReconError;
use crate::model::{
    FinancialImpact, FindingKind, ResolutionAction, RiskCategory, RootCause, Severity,
};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// All thresholds, weights and tables the engine uses. Every section has a
/// default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    pub data: DataConfig,
    pub tolerance: ToleranceConfig,
    pub similarity: SimilarityConfig,
    pub chain: ChainConfig,
    pub cycles: CycleConfig,
    pub propagation: PropagationConfig,
    pub scoring: ScoringConfig,
    pub severity: SeverityConfig,
    pub exposure: ExposureConfig,
    pub resolution: ResolutionConfig,
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

/// CSV snapshot locations, resolved relative to the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub records: Option<String>,
    pub entities: Option<String>,
    pub documents: Option<String>,
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    /// Absolute currency tolerance.
    pub amount_abs: f64,
    /// Relative tolerance as a fraction (0.001 = 0.1%).
    pub amount_pct: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount_abs: 1.0,
            amount_pct: 0.001,
        }
    }
}

impl ToleranceConfig {
    /// True when `a` and `b` agree within the absolute or relative tolerance.
    pub fn amounts_match(&self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        if diff <= self.amount_abs {
            return true;
        }
        (a != 0.0 && diff / a.abs() <= self.amount_pct)
            || (b != 0.0 && diff / b.abs() <= self.amount_pct)
    }
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DateStep {
    pub within_days: u32,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub identifier_weight: f64,
    pub amount_weight: f64,
    pub date_weight: f64,
    pub tax_weight: f64,
    /// Identifier similarity (0-100) below which a pair never matches.
    pub identifier_floor: f64,
    pub exact_threshold: f64,
    pub partial_threshold: f64,
    /// Ascending by `within_days`; beyond the last step scores 0.
    pub date_steps: Vec<DateStep>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            identifier_weight: 0.40,
            amount_weight: 0.30,
            date_weight: 0.20,
            tax_weight: 0.10,
            identifier_floor: 85.0,
            exact_threshold: 95.0,
            partial_threshold: 70.0,
            date_steps: vec![
                DateStep { within_days: 0, score: 100.0 },
                DateStep { within_days: 3, score: 80.0 },
                DateStep { within_days: 7, score: 60.0 },
                DateStep { within_days: 30, score: 30.0 },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Chain (L2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Completeness (percent) below which a broken chain is CRITICAL.
    pub critical_below: f64,
    /// Completeness below which a broken chain is HIGH; otherwise MEDIUM.
    pub high_below: f64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            critical_below: 40.0,
            high_below: 70.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Cycles (L3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub min_len: usize,
    pub max_len: usize,
    /// Cap on cycles returned by the depth-first pass.
    pub max_cycles: usize,
    /// Cap on matches per pattern (3-node, 4-node).
    pub pattern_limit: usize,
    /// Graphs with more edges than this are not enumerated.
    pub max_edges: usize,
    pub inflation_critical: f64,
    pub inflation_high: f64,
    pub low_compliance_threshold: f64,
    pub low_compliance_critical: usize,
    /// Rate applied to the mean edge value to estimate tax at risk.
    pub assumed_tax_rate: f64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            min_len: 3,
            max_len: 8,
            max_cycles: 200,
            pattern_limit: 100,
            max_edges: 50_000,
            inflation_critical: 2.0,
            inflation_high: 1.2,
            low_compliance_threshold: 40.0,
            low_compliance_critical: 2,
            assumed_tax_rate: 0.18,
        }
    }
}

// ---------------------------------------------------------------------------
// Propagation (L4)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    pub damping: f64,
    pub max_iterations: usize,
    /// Per-node convergence tolerance (total L1 error must drop below n x tol).
    pub tolerance: f64,
    /// Risk at or above which a community member counts as high risk.
    pub high_risk_threshold: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            max_iterations: 100,
            tolerance: 1e-6,
            high_risk_threshold: 60.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ImpactTier {
    pub min: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntityWeights {
    pub base_risk: f64,
    pub mismatch_ratio: f64,
    pub neighbor_risk: f64,
    pub pagerank: f64,
    pub betweenness: f64,
    pub degree: f64,
}

impl Default for EntityWeights {
    fn default() -> Self {
        Self {
            base_risk: 0.30,
            mismatch_ratio: 0.20,
            neighbor_risk: 0.15,
            pagerank: 0.15,
            betweenness: 0.10,
            degree: 0.10,
        }
    }
}

impl EntityWeights {
    fn as_array(&self) -> [f64; 6] {
        [
            self.base_risk,
            self.mismatch_ratio,
            self.neighbor_risk,
            self.pagerank,
            self.betweenness,
            self.degree,
        ]
    }
}

/// Lower bounds for the MEDIUM / HIGH / CRITICAL risk labels.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LabelCutoffs {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LabelCutoffs {
    fn default() -> Self {
        Self {
            medium: 30.0,
            high: 50.0,
            critical: 70.0,
        }
    }
}

impl LabelCutoffs {
    pub fn label(&self, score: f64) -> Severity {
        if score >= self.critical {
            Severity::Critical
        } else if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub impact_weight: f64,
    pub probability_weight: f64,
    pub vendor_weight: f64,
    /// Descending by `min`; the first tier the amount reaches wins.
    pub impact_tiers: Vec<ImpactTier>,
    pub default_impact: f64,
    /// Replaces the built-in table when given; kinds left out fall back to
    /// `default_probability`.
    pub type_probability: BTreeMap<FindingKind, f64>,
    pub default_probability: f64,
    pub entity_weights: EntityWeights,
    pub labels: LabelCutoffs,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let tiers = [
            (5_000_000.0, 100.0),
            (1_000_000.0, 85.0),
            (500_000.0, 70.0),
            (100_000.0, 55.0),
            (50_000.0, 40.0),
            (10_000.0, 25.0),
        ];
        let type_probability = BTreeMap::from([
            (FindingKind::PhantomInvoice, 95.0),
            (FindingKind::MissingInSourceB, 90.0),
            (FindingKind::MissingInSourceA, 85.0),
            (FindingKind::ItcOverclaim, 85.0),
            (FindingKind::CircularTrade, 80.0),
            (FindingKind::TaxRateMismatch, 80.0),
            (FindingKind::SourceFilingMissing, 75.0),
            (FindingKind::Duplicate, 75.0),
            (FindingKind::ValueMismatch, 70.0),
            (FindingKind::ClaimFilingMissing, 65.0),
            (FindingKind::MissingBookEntry, 50.0),
            (FindingKind::DateMismatch, 40.0),
        ]);
        Self {
            impact_weight: 0.40,
            probability_weight: 0.30,
            vendor_weight: 0.30,
            impact_tiers: tiers
                .iter()
                .map(|&(min, score)| ImpactTier { min, score })
                .collect(),
            default_impact: 10.0,
            type_probability,
            default_probability: 50.0,
            entity_weights: EntityWeights::default(),
            labels: LabelCutoffs::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Severity tiers + exposure
// ---------------------------------------------------------------------------

/// Amount-at-risk cutoffs for magnitude-derived severity.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            critical: 500_000.0,
            high: 100_000.0,
            medium: 10_000.0,
        }
    }
}

impl SeverityConfig {
    pub fn for_amount(&self, amount: f64) -> Severity {
        if amount >= self.critical {
            Severity::Critical
        } else if amount >= self.high {
            Severity::High
        } else if amount >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Annual interest rate in percent.
    pub interest_rate_pct: f64,
    pub interest_days: u32,
    pub penalty_rate: BTreeMap<FindingKind, f64>,
    pub default_penalty_rate: f64,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            interest_rate_pct: 18.0,
            interest_days: 30,
            penalty_rate: BTreeMap::from([
                (FindingKind::MissingInSourceA, 0.25),
                (FindingKind::MissingInSourceB, 0.25),
                (FindingKind::PhantomInvoice, 1.0),
                (FindingKind::CircularTrade, 1.0),
                (FindingKind::DateMismatch, 0.0),
            ]),
            default_penalty_rate: 0.10,
        }
    }
}

impl ExposureConfig {
    pub fn impact(&self, kind: FindingKind, amount_at_risk: f64) -> FinancialImpact {
        let amount = amount_at_risk.max(0.0);
        let interest =
            amount * (self.interest_rate_pct / 100.0) * (f64::from(self.interest_days) / 365.0);
        let penalty_rate = self
            .penalty_rate
            .get(&kind)
            .copied()
            .unwrap_or(self.default_penalty_rate);
        FinancialImpact {
            amount_at_risk: round2(amount),
            interest_liability: round2(interest),
            penalty_exposure: round2(amount * penalty_rate),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution playbooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionTemplate {
    pub description: String,
    pub priority: Severity,
    #[serde(default)]
    pub deadline_days: Option<u32>,
    #[serde(default)]
    pub regulatory_reference: Option<String>,
}

impl ActionTemplate {
    fn new(description: &str, priority: Severity, deadline_days: u32, reference: Option<&str>) -> Self {
        Self {
            description: description.to_string(),
            priority,
            deadline_days: Some(deadline_days),
            regulatory_reference: reference.map(String::from),
        }
    }
}

/// Risk category, root-cause confidence and follow-up actions for one
/// finding kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Playbook {
    pub risk_category: RiskCategory,
    /// Root-cause confidence, 0..=100. For circular trades this is the base
    /// that inflation and low-compliance members raise.
    pub confidence: f64,
    #[serde(default)]
    pub actions: Vec<ActionTemplate>,
}

/// `[resolution.playbooks.<KIND>]` replaces the built-in playbook for that
/// kind; kinds left out keep theirs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub playbooks: BTreeMap<FindingKind, Playbook>,
}

impl ResolutionConfig {
    pub fn playbook(&self, kind: FindingKind) -> Playbook {
        self.playbooks
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| builtin_playbook(kind))
    }

    pub fn risk_category(&self, kind: FindingKind) -> RiskCategory {
        self.playbook(kind).risk_category
    }

    pub fn root_cause(
        &self,
        kind: FindingKind,
        classification: String,
        evidence_paths: Vec<String>,
    ) -> RootCause {
        RootCause {
            classification,
            confidence: self.playbook(kind).confidence,
            evidence_paths,
        }
    }

    pub fn actions(&self, kind: FindingKind) -> Vec<ResolutionAction> {
        self.playbook(kind)
            .actions
            .into_iter()
            .enumerate()
            .map(|(i, a)| ResolutionAction {
                action_id: i + 1,
                description: a.description,
                priority: a.priority,
                deadline_days: a.deadline_days,
                regulatory_reference: a.regulatory_reference,
            })
            .collect()
    }
}

const SEC_16_2_AA: &str = "Section 16(2)(aa) CGST Act";

fn builtin_playbook(kind: FindingKind) -> Playbook {
    use FindingKind::*;
    use Severity::{Critical, High, Low, Medium};

    let amendment = ActionTemplate::new(
        "Check if an amendment was filed in a subsequent period",
        Medium,
        30,
        None,
    );
    let chain_check = ActionTemplate::new(
        "Verify claim chain completeness with the supplier",
        High,
        15,
        Some("Section 16(2) CGST Act"),
    );

    let (risk_category, confidence, actions) = match kind {
        MissingInSourceB => (
            RiskCategory::ItcReversal,
            85.0,
            vec![
                ActionTemplate::new("Contact the supplier to verify the outward filing", High, 10, Some(SEC_16_2_AA)),
                ActionTemplate::new(
                    "Check inward statements of subsequent periods for late reflection",
                    Medium,
                    30,
                    None,
                ),
            ],
        ),
        MissingInSourceA => (
            RiskCategory::AuditTrigger,
            85.0,
            vec![
                ActionTemplate::new(
                    "Verify the invoice is genuine and the supplier has filed it",
                    Critical,
                    7,
                    Some("Rule 36(4) CGST Rules"),
                ),
                ActionTemplate::new(
                    "If the invoice is not genuine, reverse the credit and pay through DRC-03",
                    Critical,
                    15,
                    Some("Section 74 CGST Act"),
                ),
            ],
        ),
        ValueMismatch | TaxRateMismatch => (
            RiskCategory::ItcReversal,
            75.0,
            vec![
                ActionTemplate::new("Verify invoice details with the supplier", High, 15, Some(SEC_16_2_AA)),
                amendment,
            ],
        ),
        DateMismatch => (
            RiskCategory::Informational,
            75.0,
            vec![
                ActionTemplate::new("Confirm the invoice date with the supplier", Low, 30, None),
                amendment,
            ],
        ),
        Duplicate => (
            RiskCategory::AuditTrigger,
            75.0,
            vec![ActionTemplate::new(
                "Confirm the invoice was reported once and withdraw the duplicate",
                High,
                15,
                None,
            )],
        ),
        MissingBookEntry => (
            RiskCategory::ItcReversal,
            80.0,
            vec![
                chain_check,
                ActionTemplate::new("Record the invoice in the purchase register", Medium, 15, None),
            ],
        ),
        SourceFilingMissing => (
            RiskCategory::ItcReversal,
            80.0,
            vec![
                chain_check,
                ActionTemplate::new(
                    "Confirm the supplier has filed the return and paid the tax",
                    Critical,
                    7,
                    Some("Section 16(2)(c) CGST Act"),
                ),
            ],
        ),
        ClaimFilingMissing => (
            RiskCategory::Informational,
            80.0,
            vec![ActionTemplate::new(
                "Confirm whether the credit was claimed in the summary return",
                Medium,
                30,
                None,
            )],
        ),
        ItcOverclaim => (
            RiskCategory::DemandNotice,
            80.0,
            vec![
                chain_check,
                ActionTemplate::new("Reverse the credit claimed above the invoice tax", Critical, 7, None),
            ],
        ),
        PhantomInvoice => (
            RiskCategory::AuditTrigger,
            90.0,
            vec![
                ActionTemplate::new(
                    "Stop claiming credit from the deregistered supplier",
                    Critical,
                    7,
                    Some("Section 16(2)(c) CGST Act"),
                ),
                ActionTemplate::new(
                    "If already claimed, reverse the credit and pay through DRC-03",
                    Critical,
                    15,
                    Some("Section 74 CGST Act"),
                ),
            ],
        ),
        CircularTrade => (
            RiskCategory::DemandNotice,
            50.0,
            vec![
                ActionTemplate::new(
                    "Investigate the circular chain of invoices",
                    Critical,
                    7,
                    Some("Section 67 CGST Act"),
                ),
                ActionTemplate::new(
                    "Check whether the members are related parties",
                    High,
                    15,
                    Some("Section 15(5) CGST Act"),
                ),
                ActionTemplate::new(
                    "Verify the goods or services actually moved",
                    High,
                    15,
                    Some("Section 16(2)(b) CGST Act"),
                ),
            ],
        ),
    };
    Playbook {
        risk_category,
        confidence,
        actions,
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        let invalid = |msg: String| Err(ReconError::ConfigValidation(msg));

        let s = &self.similarity;
        check_weights(
            "similarity",
            &[s.identifier_weight, s.amount_weight, s.date_weight, s.tax_weight],
        )?;
        if !(0.0..=100.0).contains(&s.identifier_floor) {
            return invalid(format!("identifier_floor must be in [0, 100], got {}", s.identifier_floor));
        }
        if s.partial_threshold <= 0.0 || s.partial_threshold >= s.exact_threshold || s.exact_threshold > 100.0 {
            return invalid(format!(
                "similarity thresholds must satisfy 0 < partial < exact <= 100, got partial={} exact={}",
                s.partial_threshold, s.exact_threshold
            ));
        }
        if s.date_steps.windows(2).any(|w| w[0].within_days >= w[1].within_days) {
            return invalid("date_steps must be strictly ascending by within_days".into());
        }

        if self.tolerance.amount_abs < 0.0 || self.tolerance.amount_pct < 0.0 {
            return invalid("tolerances must be non-negative".into());
        }

        if self.chain.critical_below > self.chain.high_below {
            return invalid(format!(
                "chain.critical_below ({}) must not exceed chain.high_below ({})",
                self.chain.critical_below, self.chain.high_below
            ));
        }

        let c = &self.cycles;
        if c.min_len < 2 || c.min_len > c.max_len {
            return invalid(format!(
                "cycle bounds must satisfy 2 <= min_len <= max_len, got {}..{}",
                c.min_len, c.max_len
            ));
        }
        if c.inflation_high > c.inflation_critical {
            return invalid("cycles.inflation_high must not exceed inflation_critical".into());
        }

        let p = &self.propagation;
        if !(p.damping > 0.0 && p.damping < 1.0) {
            return invalid(format!("damping must be in (0, 1), got {}", p.damping));
        }
        if p.max_iterations == 0 {
            return invalid("propagation.max_iterations must be at least 1".into());
        }

        let sc = &self.scoring;
        check_weights(
            "finding score",
            &[sc.impact_weight, sc.probability_weight, sc.vendor_weight],
        )?;
        check_weights("entity risk", &sc.entity_weights.as_array())?;
        if sc.impact_tiers.windows(2).any(|w| w[0].min <= w[1].min) {
            return invalid("impact_tiers must be strictly descending by min".into());
        }
        let l = &sc.labels;
        if !(l.medium <= l.high && l.high <= l.critical) {
            return invalid("label cutoffs must be ascending (medium <= high <= critical)".into());
        }

        for (kind, playbook) in &self.resolution.playbooks {
            if !(0.0..=100.0).contains(&playbook.confidence) {
                return invalid(format!(
                    "resolution.playbooks.{kind}.confidence must be in [0, 100], got {}",
                    playbook.confidence
                ));
            }
        }

        let sv = &self.severity;
        if !(sv.medium <= sv.high && sv.high <= sv.critical) {
            return invalid("severity tiers must be ascending (medium <= high <= critical)".into());
        }

        Ok(())
    }
}

/// Each weight in [0, 1] and the group summing to 1.0.
fn check_weights(group: &str, weights: &[f64]) -> Result<(), ReconError> {
    if let Some(w) = weights.iter().find(|w| !(0.0..=1.0).contains(*w)) {
        return Err(ReconError::ConfigValidation(format!(
            "{group} weights must each be in [0, 1], got {w}"
        )));
    }
    let sum: f64 = weights.iter().sum();
    if (sum - 1.0).abs() >= 1e-6 {
        return Err(ReconError::ConfigValidation(format!(
            "{group} weights must sum to 1.0, got {sum}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
