use std::collections::BTreeMap;

use crate::config::round2;
use crate::model::{CreditTotals, Finding, ReconSummary};

/// Compute summary statistics over scored findings.
pub fn compute_summary(
    findings: &[Finding],
    credit: CreditTotals,
    skipped_records: usize,
) -> ReconSummary {
    let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
    let mut amount_at_risk = 0.0;
    let mut total_exposure = 0.0;

    for f in findings {
        *by_kind.entry(f.kind.to_string()).or_insert(0) += 1;
        *by_severity.entry(f.severity.to_string()).or_insert(0) += 1;
        amount_at_risk += f.impact.amount_at_risk;
        total_exposure += f.impact.total_exposure();
    }

    ReconSummary {
        total_findings: findings.len(),
        by_kind,
        by_severity,
        amount_at_risk: round2(amount_at_risk),
        total_exposure: round2(total_exposure),
        total_itc_claimed: round2(credit.claimed),
        itc_verified: round2(credit.verified),
        skipped_records,
    }
}
