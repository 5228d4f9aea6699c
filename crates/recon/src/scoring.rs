//! Composite risk scoring for findings and entities.
//!
//! Every input is on a 0-100 scale and every weight is non-negative, so both
//! scores are monotonically non-decreasing in each input.

use ordered_float::OrderedFloat;

use crate::config::{EntityWeights, ScoringConfig};
use crate::model::{Finding, FindingKind};

/// Financial-impact component (0-100) for an amount at risk.
pub fn impact_score(amount: f64, config: &ScoringConfig) -> f64 {
    config
        .impact_tiers
        .iter()
        .find(|t| amount >= t.min)
        .map(|t| t.score)
        .unwrap_or(config.default_impact)
}

pub fn type_probability(kind: FindingKind, config: &ScoringConfig) -> f64 {
    config
        .type_probability
        .get(&kind)
        .copied()
        .unwrap_or(config.default_probability)
}

pub fn finding_score(finding: &Finding, vendor_risk: f64, config: &ScoringConfig) -> f64 {
    config.impact_weight * impact_score(finding.impact.amount_at_risk, config)
        + config.probability_weight * type_probability(finding.kind, config)
        + config.vendor_weight * vendor_risk.clamp(0.0, 100.0)
}

/// Fill in `score` on every finding. `vendor_risk` returns the issuer's
/// stored network risk, or 0 when there is none.
pub fn score_findings<F>(findings: &mut [Finding], vendor_risk: F, config: &ScoringConfig)
where
    F: Fn(&str) -> f64,
{
    for f in findings.iter_mut() {
        f.score = finding_score(f, vendor_risk(&f.issuer_id), config);
    }
}

/// Highest score first; ties keep severity then id order.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        OrderedFloat(b.score)
            .cmp(&OrderedFloat(a.score))
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.finding_id.cmp(&b.finding_id))
    });
}

/// Normalized (0-100) inputs to the entity risk blend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntityRiskInputs {
    pub base_risk: f64,
    pub mismatch_ratio: f64,
    pub neighbor_risk: f64,
    pub pagerank: f64,
    pub betweenness: f64,
    pub degree: f64,
}

pub fn entity_risk(inputs: &EntityRiskInputs, weights: &EntityWeights) -> f64 {
    let raw = weights.base_risk * inputs.base_risk
        + weights.mismatch_ratio * inputs.mismatch_ratio
        + weights.neighbor_risk * inputs.neighbor_risk
        + weights.pagerank * inputs.pagerank
        + weights.betweenness * inputs.betweenness
        + weights.degree * inputs.degree;
    raw.clamp(0.0, 100.0)
}

/// Scale `value` against `max` onto 0-100. Zero when `max` is not positive.
pub fn normalize_to_max(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        (value / max * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}
