use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::config::{SimilarityConfig, ToleranceConfig};
use crate::gstin::normalize_invoice_number;
use crate::model::Record;
use crate::similarity::{score, SimilarityScore};

/// Candidates never pair across different (issuer, receiver) pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartyKey {
    pub issuer_id: String,
    pub receiver_id: String,
}

impl PartyKey {
    pub fn of(record: &Record) -> Self {
        Self {
            issuer_id: record.issuer_id.clone(),
            receiver_id: record.receiver_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordPair {
    pub source_a: Record,
    pub source_b: Record,
    pub similarity: SimilarityScore,
}

#[derive(Debug, Default)]
pub struct PairMatchOutput {
    pub pairs: Vec<RecordPair>,
    pub unpaired_a: Vec<Record>,
    pub unpaired_b: Vec<Record>,
}

struct Candidate {
    ai: usize,
    bi: usize,
    similarity: SimilarityScore,
}

/// Greedy best-score assignment between source-A and source-B records.
///
/// Every candidate pair (same parties, identifier above the floor) is scored,
/// then taken in order of score desc, earliest date, identifier. Each record
/// is consumed at most once.
pub fn match_greedy(
    source_a: &[Record],
    source_b: &[Record],
    similarity: &SimilarityConfig,
    tolerance: &ToleranceConfig,
) -> PairMatchOutput {
    let mut b_by_party: BTreeMap<PartyKey, Vec<usize>> = BTreeMap::new();
    for (bi, rb) in source_b.iter().enumerate() {
        b_by_party.entry(PartyKey::of(rb)).or_default().push(bi);
    }

    let mut candidates = Vec::new();
    for (ai, ra) in source_a.iter().enumerate() {
        let Some(bis) = b_by_party.get(&PartyKey::of(ra)) else {
            continue;
        };
        for &bi in bis {
            let s = score(ra, &source_b[bi], similarity, tolerance);
            if s.identifier_match {
                candidates.push(Candidate { ai, bi, similarity: s });
            }
        }
    }

    let earliest = |c: &Candidate| source_a[c.ai].date.min(source_b[c.bi].date);
    let ident = |c: &Candidate| {
        (
            normalize_invoice_number(&source_a[c.ai].invoice_number),
            normalize_invoice_number(&source_b[c.bi].invoice_number),
        )
    };
    candidates.sort_by(|x, y| {
        OrderedFloat(y.similarity.total)
            .cmp(&OrderedFloat(x.similarity.total))
            .then_with(|| earliest(x).cmp(&earliest(y)))
            .then_with(|| ident(x).cmp(&ident(y)))
            .then_with(|| source_a[x.ai].record_id.cmp(&source_a[y.ai].record_id))
            .then_with(|| source_b[x.bi].record_id.cmp(&source_b[y.bi].record_id))
    });

    let mut a_used = vec![false; source_a.len()];
    let mut b_used = vec![false; source_b.len()];
    let mut pairs = Vec::new();

    for c in candidates {
        if a_used[c.ai] || b_used[c.bi] {
            continue;
        }
        a_used[c.ai] = true;
        b_used[c.bi] = true;
        pairs.push(RecordPair {
            source_a: source_a[c.ai].clone(),
            source_b: source_b[c.bi].clone(),
            similarity: c.similarity,
        });
    }

    let unpaired_a = source_a
        .iter()
        .enumerate()
        .filter(|(i, _)| !a_used[*i])
        .map(|(_, r)| r.clone())
        .collect();
    let unpaired_b = source_b
        .iter()
        .enumerate()
        .filter(|(i, _)| !b_used[*i])
        .map(|(_, r)| r.clone())
        .collect();

    PairMatchOutput {
        pairs,
        unpaired_a,
        unpaired_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SourceTag, TaxComponents};
    use chrono::NaiveDate;

    fn rec(id: &str, inv: &str, issuer: &str, amount: f64, date: &str, source: SourceTag) -> Record {
        Record {
            record_id: id.into(),
            invoice_number: inv.into(),
            issuer_id: issuer.into(),
            receiver_id: "BUYER".into(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            taxable_amount: amount,
            tax: TaxComponents {
                cgst: amount * 0.09,
                sgst: amount * 0.09,
                igst: 0.0,
            },
            declared_rate: 18.0,
            source,
        }
    }

    fn a(id: &str, inv: &str, amount: f64, date: &str) -> Record {
        rec(id, inv, "SELLER", amount, date, SourceTag::SellerFiled)
    }

    fn b(id: &str, inv: &str, amount: f64, date: &str) -> Record {
        rec(id, inv, "SELLER", amount, date, SourceTag::BuyerFiled)
    }

    fn run(left: &[Record], right: &[Record]) -> PairMatchOutput {
        match_greedy(left, right, &SimilarityConfig::default(), &ToleranceConfig::default())
    }

    #[test]
    fn exact_pairs() {
        let left = vec![a("a1", "INV-001", 1000.0, "2025-01-10"), a("a2", "INV-002", 500.0, "2025-01-11")];
        let right = vec![b("b1", "INV-002", 500.0, "2025-01-11"), b("b2", "INV-001", 1000.0, "2025-01-10")];
        let out = run(&left, &right);
        assert_eq!(out.pairs.len(), 2);
        assert!(out.unpaired_a.is_empty());
        assert!(out.unpaired_b.is_empty());
        for p in &out.pairs {
            assert_eq!(p.source_a.invoice_number, p.source_b.invoice_number);
        }
    }

    #[test]
    fn each_record_consumed_once() {
        // two buyer-side copies of the same invoice; only one pairs
        let left = vec![a("a1", "INV-001", 1000.0, "2025-01-10")];
        let right = vec![b("b1", "INV-001", 1000.0, "2025-01-10"), b("b2", "INV-001", 1000.0, "2025-01-12")];
        let out = run(&left, &right);
        assert_eq!(out.pairs.len(), 1);
        assert_eq!(out.pairs[0].source_b.record_id, "b1");
        assert_eq!(out.unpaired_b.len(), 1);
        assert_eq!(out.unpaired_b[0].record_id, "b2");
    }

    #[test]
    fn tie_broken_by_earliest_date() {
        // b1 and b2 score identically against a1 (both 2 days away)
        let left = vec![a("a1", "INV-001", 1000.0, "2025-01-10")];
        let right = vec![b("b2", "INV-001", 1000.0, "2025-01-12"), b("b1", "INV-001", 1000.0, "2025-01-08")];
        let out = run(&left, &right);
        assert_eq!(out.pairs[0].source_b.record_id, "b1");
    }

    #[test]
    fn no_cross_party_match() {
        let left = vec![a("a1", "INV-001", 1000.0, "2025-01-10")];
        let right = vec![rec("b1", "INV-001", "OTHER", 1000.0, "2025-01-10", SourceTag::BuyerFiled)];
        let out = run(&left, &right);
        assert!(out.pairs.is_empty());
        assert_eq!(out.unpaired_a.len(), 1);
        assert_eq!(out.unpaired_b.len(), 1);
    }

    #[test]
    fn greedy_prefers_best_score_globally() {
        // a1 could take b1 (partial) but b1 is a better fit for a2 (exact)
        let left = vec![a("a1", "INV-0010", 900.0, "2025-01-10"), a("a2", "INV-0011", 1000.0, "2025-01-10")];
        let right = vec![b("b1", "INV-0011", 1000.0, "2025-01-10")];
        let out = run(&left, &right);
        assert_eq!(out.pairs.len(), 1);
        assert_eq!(out.pairs[0].source_a.record_id, "a2");
        assert_eq!(out.unpaired_a[0].record_id, "a1");
    }
}
