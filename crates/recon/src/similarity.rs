//! Pairwise similarity between two records believed to describe the same
//! transaction from different sources.
//!
//! The total is a weighted sum of four component scores, each on 0-100:
//! identifier, amount, date and tax. Pure functions only.

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::{DateStep, SimilarityConfig, ToleranceConfig};
use crate::gstin::normalize_invoice_number;
use crate::model::{MatchClass, Record, TaxComponents};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityScore {
    pub total: f64,
    pub identifier: f64,
    pub amount: f64,
    pub date: f64,
    pub tax: f64,
    /// False when identifier similarity fell below the floor.
    pub identifier_match: bool,
    pub class: MatchClass,
}

/// Score two records. Symmetric in its arguments.
pub fn score(
    a: &Record,
    b: &Record,
    config: &SimilarityConfig,
    tolerance: &ToleranceConfig,
) -> SimilarityScore {
    let identifier = identifier_similarity(&a.invoice_number, &b.invoice_number);
    let amount = amount_similarity(a.taxable_amount, b.taxable_amount, tolerance);
    let date = date_similarity(a.date, b.date, &config.date_steps);
    let tax = tax_similarity(&a.tax, &b.tax, tolerance);

    let identifier_match = identifier >= config.identifier_floor;
    let total = if identifier_match {
        round4(
            config.identifier_weight * identifier
                + config.amount_weight * amount
                + config.date_weight * date
                + config.tax_weight * tax,
        )
    } else {
        0.0
    };

    SimilarityScore {
        total,
        identifier,
        amount,
        date,
        tax,
        identifier_match,
        class: classify(total, config),
    }
}

pub fn classify(total: f64, config: &SimilarityConfig) -> MatchClass {
    if total >= config.exact_threshold {
        MatchClass::Exact
    } else if total >= config.partial_threshold {
        MatchClass::Partial
    } else {
        MatchClass::Unmatched
    }
}

/// Edit-distance similarity of two invoice numbers after normalization.
pub fn identifier_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_invoice_number(a);
    let nb = normalize_invoice_number(b);
    if na == nb {
        return 100.0;
    }
    let max_len = na.chars().count().max(nb.chars().count());
    if max_len == 0 {
        return 100.0;
    }
    let distance = edit_distance::edit_distance(&na, &nb);
    (1.0 - distance as f64 / max_len as f64).max(0.0) * 100.0
}

pub fn amount_similarity(a: f64, b: f64, tolerance: &ToleranceConfig) -> f64 {
    if tolerance.amounts_match(a, b) {
        return 100.0;
    }
    let base = a.abs().max(b.abs());
    let relative_pct = (a - b).abs() / base * 100.0;
    (100.0 - relative_pct).max(0.0)
}

pub fn date_similarity(a: NaiveDate, b: NaiveDate, steps: &[DateStep]) -> f64 {
    let days = (a - b).num_days().unsigned_abs();
    steps
        .iter()
        .find(|s| days <= u64::from(s.within_days))
        .map(|s| s.score)
        .unwrap_or(0.0)
}

/// 100 minus the combined percentage delta across the tax components.
pub fn tax_similarity(a: &TaxComponents, b: &TaxComponents, tolerance: &ToleranceConfig) -> f64 {
    let (xa, xb) = (a.as_array(), b.as_array());
    if xa.iter().zip(xb.iter()).all(|(x, y)| tolerance.amounts_match(*x, *y)) {
        return 100.0;
    }
    let delta: f64 = xa.iter().zip(xb.iter()).map(|(x, y)| (x - y).abs()).sum();
    let base = a.total().max(b.total()).max(f64::EPSILON);
    (100.0 - delta / base * 100.0).max(0.0)
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceTag;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rec(inv: &str, amount: f64, date: &str, tax: f64) -> Record {
        Record {
            record_id: format!("r_{inv}"),
            invoice_number: inv.into(),
            issuer_id: "S".into(),
            receiver_id: "B".into(),
            date: d(date),
            taxable_amount: amount,
            tax: TaxComponents {
                cgst: tax / 2.0,
                sgst: tax / 2.0,
                igst: 0.0,
            },
            declared_rate: 18.0,
            source: SourceTag::SellerFiled,
        }
    }

    fn run(a: &Record, b: &Record) -> SimilarityScore {
        score(a, b, &SimilarityConfig::default(), &ToleranceConfig::default())
    }

    #[test]
    fn identical_records_score_100() {
        let a = rec("INV-001", 10_000.0, "2025-01-10", 1_800.0);
        let s = run(&a, &a);
        assert_eq!(s.total, 100.0);
        assert_eq!(s.class, MatchClass::Exact);
    }

    #[test]
    fn small_amount_delta_and_two_day_gap_is_exact() {
        let a = rec("INV-001", 1_000_000.0, "2025-01-10", 180_000.0);
        let b = rec("INV-001", 1_000_500.0, "2025-01-12", 180_090.0);
        let s = run(&a, &b);
        assert_eq!(s.identifier, 100.0);
        assert_eq!(s.amount, 100.0);
        assert_eq!(s.date, 80.0);
        assert!(s.tax > 99.9);
        assert!(s.total >= 95.0);
        assert_eq!(s.class, MatchClass::Exact);
    }

    #[test]
    fn identifier_below_floor_never_matches() {
        let a = rec("INV-001", 10_000.0, "2025-01-10", 1_800.0);
        let b = rec("INV-999", 10_000.0, "2025-01-10", 1_800.0);
        let s = run(&a, &b);
        assert!(!s.identifier_match);
        assert_eq!(s.total, 0.0);
        assert_eq!(s.class, MatchClass::Unmatched);
    }

    #[test]
    fn classification_boundaries() {
        let c = SimilarityConfig::default();
        assert_eq!(classify(95.0, &c), MatchClass::Exact);
        assert_eq!(classify(94.9999, &c), MatchClass::Partial);
        assert_eq!(classify(70.0, &c), MatchClass::Partial);
        assert_eq!(classify(69.9999, &c), MatchClass::Unmatched);
    }

    #[test]
    fn date_steps() {
        let steps = SimilarityConfig::default().date_steps;
        let base = d("2025-01-10");
        assert_eq!(date_similarity(base, d("2025-01-10"), &steps), 100.0);
        assert_eq!(date_similarity(base, d("2025-01-13"), &steps), 80.0);
        assert_eq!(date_similarity(base, d("2025-01-03"), &steps), 60.0);
        assert_eq!(date_similarity(base, d("2025-02-09"), &steps), 30.0);
        assert_eq!(date_similarity(base, d("2025-02-10"), &steps), 0.0);
    }

    #[test]
    fn amount_outside_tolerance_is_relative() {
        let t = ToleranceConfig::default();
        assert_eq!(amount_similarity(1_000.0, 900.0, &t), 90.0);
        assert_eq!(amount_similarity(900.0, 1_000.0, &t), 90.0);
        assert_eq!(amount_similarity(100.0, 0.0, &t), 0.0);
    }

    #[test]
    fn identifier_fuzzy() {
        // one substitution in 10 chars
        let s = identifier_similarity("ABC1234567", "ABC1234568");
        assert!((s - 90.0).abs() < 1e-9);
        // formatting noise is ignored
        assert_eq!(identifier_similarity("inv-0042", "INV/42"), 100.0);
    }

    #[test]
    fn symmetric() {
        let a = rec("INV-1001", 12_000.0, "2025-01-10", 2_160.0);
        let b = rec("INV-1002", 11_000.0, "2025-01-15", 1_900.0);
        assert_eq!(run(&a, &b), run(&b, &a));
    }
}
