//! Level 3: circular-trade detection.
//!
//! Two enumerations run over the same graph and are merged through a single
//! normalization key (rotation to the smallest node):
//!
//! - a bounded depth-first search for every simple cycle of length
//!   `min_len..=max_len`, capped at `max_cycles`;
//! - a fixed-shape pass for 3-node and 4-node loops, capped per shape.
//!
//! Rotations of one loop collapse. Reversed loops are different trades and
//! stay distinct.

use std::collections::{BTreeSet, HashMap};

use log::{debug, info, warn};
use ordered_float::OrderedFloat;

use crate::config::{CycleConfig, EngineConfig};
use crate::error::ReconError;
use crate::graph::TxGraph;
use crate::model::{
    CycleEdge, Entity, Evidence, Finding, FindingKind, FindingStatus, Level, Severity,
};

const CONFIDENCE_PER_INFLATION: f64 = 15.0;
const CONFIDENCE_PER_LOW_COMPLIANCE: f64 = 10.0;
const MAX_CYCLE_CONFIDENCE: f64 = 95.0;

/// Cycles as node-index sequences plus whether any cap was hit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleSearch {
    pub cycles: Vec<Vec<usize>>,
    pub truncated: bool,
}

#[derive(Debug, Default)]
pub struct Level3Output {
    pub cycles: Vec<Vec<String>>,
    pub findings: Vec<Finding>,
    pub truncated: bool,
}

/// Rotate so the smallest node comes first. Direction is preserved.
pub fn canonical(cycle: &[usize]) -> Vec<usize> {
    let Some(pos) = cycle
        .iter()
        .enumerate()
        .min_by_key(|&(_, n)| n)
        .map(|(i, _)| i)
    else {
        return Vec::new();
    };
    cycle[pos..].iter().chain(cycle[..pos].iter()).copied().collect()
}

struct Dfs<'a> {
    graph: &'a TxGraph,
    min_len: usize,
    max_len: usize,
    cap: usize,
    start: usize,
    path: Vec<usize>,
    on_path: Vec<bool>,
    found: Vec<Vec<usize>>,
    truncated: bool,
}

impl Dfs<'_> {
    /// Returns false once the cap is hit.
    fn extend(&mut self, node: usize) -> bool {
        let graph = self.graph;
        for &(next, _) in graph.out_edges(node) {
            if next == self.start {
                if self.path.len() >= self.min_len {
                    if self.found.len() == self.cap {
                        self.truncated = true;
                        return false;
                    }
                    self.found.push(self.path.clone());
                }
            } else if next > self.start && !self.on_path[next] && self.path.len() < self.max_len {
                self.path.push(next);
                self.on_path[next] = true;
                let keep_going = self.extend(next);
                self.on_path[next] = false;
                self.path.pop();
                if !keep_going {
                    return false;
                }
            }
        }
        true
    }
}

/// Every simple cycle with length in `min_len..=max_len`.
///
/// Each cycle is rooted at its smallest node and only visits larger nodes,
/// so a cycle is found exactly once and is already canonical.
pub fn dfs_cycles(graph: &TxGraph, min_len: usize, max_len: usize, cap: usize) -> CycleSearch {
    let n = graph.node_count();
    let mut dfs = Dfs {
        graph,
        min_len,
        max_len,
        cap,
        start: 0,
        path: Vec::with_capacity(max_len),
        on_path: vec![false; n],
        found: Vec::new(),
        truncated: false,
    };

    for start in 0..n {
        dfs.start = start;
        dfs.path.clear();
        dfs.path.push(start);
        dfs.on_path[start] = true;
        let keep_going = dfs.extend(start);
        dfs.on_path[start] = false;
        if !keep_going {
            break;
        }
    }

    CycleSearch {
        cycles: dfs.found,
        truncated: dfs.truncated,
    }
}

/// Closed loops a -> b -> c -> a with `a` the smallest node.
pub fn triangles(graph: &TxGraph, limit: usize) -> CycleSearch {
    let mut out = CycleSearch::default();
    for a in 0..graph.node_count() {
        for &(b, _) in graph.out_edges(a) {
            if b <= a {
                continue;
            }
            for &(c, _) in graph.out_edges(b) {
                if c <= a || c == b || !graph.has_edge(c, a) {
                    continue;
                }
                if out.cycles.len() == limit {
                    out.truncated = true;
                    return out;
                }
                out.cycles.push(vec![a, b, c]);
            }
        }
    }
    out
}

/// Closed loops a -> b -> c -> d -> a with `a` the smallest node.
pub fn squares(graph: &TxGraph, limit: usize) -> CycleSearch {
    let mut out = CycleSearch::default();
    for a in 0..graph.node_count() {
        for &(b, _) in graph.out_edges(a) {
            if b <= a {
                continue;
            }
            for &(c, _) in graph.out_edges(b) {
                if c <= a || c == b {
                    continue;
                }
                for &(d, _) in graph.out_edges(c) {
                    if d <= a || d == b || d == c || !graph.has_edge(d, a) {
                        continue;
                    }
                    if out.cycles.len() == limit {
                        out.truncated = true;
                        return out;
                    }
                    out.cycles.push(vec![a, b, c, d]);
                }
            }
        }
    }
    out
}

/// Run both enumerations and merge them through the canonical key.
pub fn detect_cycles(graph: &TxGraph, config: &CycleConfig) -> Result<CycleSearch, ReconError> {
    if graph.edge_count() > config.max_edges {
        return Err(ReconError::GraphTooLarge {
            edges: graph.edge_count(),
            cap: config.max_edges,
        });
    }

    let mut passes = vec![dfs_cycles(graph, config.min_len, config.max_len, config.max_cycles)];
    if (config.min_len..=config.max_len).contains(&3) {
        passes.push(triangles(graph, config.pattern_limit));
    }
    if (config.min_len..=config.max_len).contains(&4) {
        passes.push(squares(graph, config.pattern_limit));
    }

    let truncated = passes.iter().any(|p| p.truncated);
    let merged: BTreeSet<Vec<usize>> = passes
        .into_iter()
        .flat_map(|p| p.cycles)
        .map(|c| canonical(&c))
        .collect();

    Ok(CycleSearch {
        cycles: merged.into_iter().collect(),
        truncated,
    })
}

/// max / min over positive edge values; 1.0 when there are none.
pub fn inflation_ratio(values: &[f64]) -> f64 {
    let positive: Vec<OrderedFloat<f64>> = values
        .iter()
        .filter(|v| **v > 0.0)
        .map(|v| OrderedFloat(*v))
        .collect();
    match (positive.iter().min(), positive.iter().max()) {
        (Some(min), Some(max)) => max.0 / min.0,
        _ => 1.0,
    }
}

pub fn cycle_severity(inflation: f64, low_compliance: usize, config: &CycleConfig) -> Severity {
    if inflation > config.inflation_critical || low_compliance >= config.low_compliance_critical {
        Severity::Critical
    } else if inflation > config.inflation_high {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// Detect cycles and emit one `CircularTrade` finding per cycle.
///
/// Entities missing from `entities` use the default compliance rating.
pub fn run_level3(
    graph: &TxGraph,
    entities: &HashMap<String, Entity>,
    config: &EngineConfig,
) -> Result<Level3Output, ReconError> {
    let cfg = &config.cycles;
    info!(
        "L3: searching {} nodes / {} edges for cycles of length {}..={}",
        graph.node_count(),
        graph.edge_count(),
        cfg.min_len,
        cfg.max_len
    );

    let search = detect_cycles(graph, cfg)?;
    if search.truncated {
        warn!("L3: cycle cap reached; result is partial");
    }

    let mut out = Level3Output {
        truncated: search.truncated,
        ..Default::default()
    };

    for cycle in &search.cycles {
        let members: Vec<String> = cycle.iter().map(|&i| graph.node(i).to_string()).collect();
        let edges: Vec<CycleEdge> = cycle
            .iter()
            .zip(cycle.iter().cycle().skip(1))
            .map(|(&u, &v)| CycleEdge {
                from: graph.node(u).to_string(),
                to: graph.node(v).to_string(),
                value: graph.edge_value(u, v).unwrap_or(0.0),
            })
            .collect();

        let values: Vec<f64> = edges.iter().map(|e| e.value).collect();
        let inflation = inflation_ratio(&values);
        let low_compliance = members
            .iter()
            .filter(|m| {
                entities
                    .get(m.as_str())
                    .map(|e| e.compliance_rating)
                    .unwrap_or_else(|| Entity::new(m.as_str()).compliance_rating)
                    < cfg.low_compliance_threshold
            })
            .count();
        let mean_value = values.iter().sum::<f64>() / values.len().max(1) as f64;
        let amount = mean_value * cfg.assumed_tax_rate;
        let severity = cycle_severity(inflation, low_compliance, cfg);

        let mut path = members.join(" -> ");
        path.push_str(" -> ");
        path.push_str(&members[0]);
        debug!("L3 cycle {path}: inflation {inflation:.3}, {low_compliance} low-compliance");

        let kind = FindingKind::CircularTrade;
        let mut root_cause = config.resolution.root_cause(
            kind,
            format!("circular trade: {path}"),
            edges
                .iter()
                .map(|e| format!("{} -> {} ({:.2})", e.from, e.to, e.value))
                .collect(),
        );
        root_cause.confidence = (root_cause.confidence
            + inflation * CONFIDENCE_PER_INFLATION
            + low_compliance as f64 * CONFIDENCE_PER_LOW_COMPLIANCE)
            .min(MAX_CYCLE_CONFIDENCE);

        out.findings.push(Finding {
            finding_id: format!("L3-{:04}", out.findings.len() + 1),
            level: Level::L3,
            kind,
            severity,
            issuer_id: members[0].clone(),
            receiver_id: members.get(1).cloned(),
            invoice_number: None,
            impact: config.exposure.impact(kind, amount),
            risk_category: config.resolution.risk_category(kind),
            root_cause,
            resolution_actions: config.resolution.actions(kind),
            status: FindingStatus::Open,
            evidence: Evidence::Cycle {
                members: members.clone(),
                edges,
                inflation_ratio: inflation,
                low_compliance_count: low_compliance,
            },
            description: format!(
                "circular trade across {} entities: {path} (inflation {inflation:.2}x)",
                members.len()
            ),
            score: 0.0,
        });
        out.cycles.push(members);
    }

    info!("L3: {} cycles", out.cycles.len());
    Ok(out)
}
