use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::gstin::normalize_invoice_number;
use crate::model::{Record, TransactionEdge};
use crate::period::Window;

/// Collapse records into one edge per (issuer, receiver) within the window.
///
/// The same invoice reported by both sources counts once, at the larger of
/// the reported taxable values.
pub fn edges_from_records(records: &[Record], window: &Window) -> Vec<TransactionEdge> {
    let mut invoices: BTreeMap<(String, String, String), f64> = BTreeMap::new();
    for r in records.iter().filter(|r| window.contains(r.date)) {
        let key = (
            r.issuer_id.clone(),
            r.receiver_id.clone(),
            normalize_invoice_number(&r.invoice_number),
        );
        let entry = invoices.entry(key).or_insert(0.0);
        if r.taxable_amount > *entry {
            *entry = r.taxable_amount;
        }
    }

    let mut edges: BTreeMap<(String, String), (f64, usize)> = BTreeMap::new();
    for ((from, to, _), value) in invoices {
        let entry = edges.entry((from, to)).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }

    edges
        .into_iter()
        .map(|((from, to), (value, record_count))| TransactionEdge {
            from,
            to,
            value,
            record_count,
        })
        .collect()
}

/// Directed, weighted transaction graph with dense node indices.
///
/// Nodes are sorted by id, so index order equals id order. Parallel edges are
/// summed and self-loops are dropped.
#[derive(Debug, Clone, Default)]
pub struct TxGraph {
    nodes: Vec<String>,
    index: FxHashMap<String, usize>,
    out: Vec<Vec<(usize, f64)>>,
    inc: Vec<Vec<(usize, f64)>>,
    edge_count: usize,
}

impl TxGraph {
    pub fn from_edges(edges: &[TransactionEdge]) -> Self {
        let mut ids: Vec<&str> = edges
            .iter()
            .flat_map(|e| [e.from.as_str(), e.to.as_str()])
            .collect();
        ids.sort_unstable();
        ids.dedup();

        let nodes: Vec<String> = ids.into_iter().map(String::from).collect();
        let index: FxHashMap<String, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();

        let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for e in edges {
            let (u, v) = (index[&e.from], index[&e.to]);
            if u != v {
                *weights.entry((u, v)).or_insert(0.0) += e.value;
            }
        }

        let n = nodes.len();
        let mut out = vec![Vec::new(); n];
        let mut inc = vec![Vec::new(); n];
        for (&(u, v), &w) in &weights {
            out[u].push((v, w));
            inc[v].push((u, w));
        }

        Self {
            nodes,
            index,
            out,
            inc,
            edge_count: weights.len(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> &str {
        &self.nodes[i]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Outgoing (target, value) pairs, sorted by target.
    pub fn out_edges(&self, i: usize) -> &[(usize, f64)] {
        &self.out[i]
    }

    /// Incoming (source, value) pairs, sorted by source.
    pub fn in_edges(&self, i: usize) -> &[(usize, f64)] {
        &self.inc[i]
    }

    pub fn edge_value(&self, from: usize, to: usize) -> Option<f64> {
        self.out[from]
            .binary_search_by_key(&to, |&(t, _)| t)
            .ok()
            .map(|pos| self.out[from][pos].1)
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.edge_value(from, to).is_some()
    }

    /// Neighbors in the undirected projection, sorted and deduplicated.
    pub fn undirected_neighbors(&self, i: usize) -> Vec<usize> {
        let mut ns: Vec<usize> = self.out[i]
            .iter()
            .chain(self.inc[i].iter())
            .map(|&(j, _)| j)
            .collect();
        ns.sort_unstable();
        ns.dedup();
        ns
    }

    /// Directed density: edges / (n * (n - 1)).
    pub fn density(&self) -> f64 {
        let n = self.nodes.len();
        if n < 2 {
            return 0.0;
        }
        self.edge_count as f64 / (n * (n - 1)) as f64
    }
}
