//! Level 4: graph-wide risk propagation.
//!
//! Neighbor risk is a fixed-point read: it uses the risk each neighbor was
//! given by the previous run (a snapshot taken before this run starts), never
//! values computed in this pass. The caller writes the new metrics only after
//! the whole pass completes.

use std::collections::{BTreeMap, HashMap};

use log::{info, warn};

use crate::centrality::{betweenness, clustering, communities, degree_centrality, pagerank};
use crate::config::EngineConfig;
use crate::graph::TxGraph;
use crate::model::{CommunityRisk, Entity, EntityMetrics, EntityStatus, GraphStats};
use crate::scoring::{entity_risk, normalize_to_max, EntityRiskInputs};

#[derive(Debug, Default)]
pub struct Level4Output {
    pub metrics: BTreeMap<String, EntityMetrics>,
    pub communities: Vec<CommunityRisk>,
    pub stats: GraphStats,
    pub converged: bool,
    pub iterations: usize,
}

/// Registration-status floor, otherwise the inverse of compliance.
pub fn base_risk(entity: &Entity) -> f64 {
    match entity.status {
        EntityStatus::Cancelled => 90.0,
        EntityStatus::Suspended => 70.0,
        EntityStatus::Active => (100.0 - entity.compliance_rating).clamp(0.0, 100.0),
    }
}

pub fn run_level4(
    graph: &TxGraph,
    entities: &HashMap<String, Entity>,
    previous_risk: &HashMap<String, f64>,
    config: &EngineConfig,
) -> Level4Output {
    let p = &config.propagation;
    let n = graph.node_count();
    info!("L4: propagating risk over {} entities", n);

    let pr = pagerank(graph, p.damping, p.max_iterations, p.tolerance);
    if !pr.converged {
        warn!(
            "L4: pagerank did not converge after {} iterations; metrics are approximate",
            pr.iterations
        );
    }
    let degree = degree_centrality(graph);
    let between = betweenness(graph);
    let clust = clustering(graph);
    let comms = communities(graph);

    let max_pr = pr.scores.iter().copied().fold(0.0, f64::max);
    let weights = &config.scoring.entity_weights;
    let labels = &config.scoring.labels;

    let mut metrics = BTreeMap::new();
    let mut risks = vec![0.0; n];
    for i in 0..n {
        let id = graph.node(i);
        let fallback;
        let entity = match entities.get(id) {
            Some(e) => e,
            None => {
                fallback = Entity::new(id);
                &fallback
            }
        };

        let neighbors = graph.undirected_neighbors(i);
        let avg_neighbor_risk = if neighbors.is_empty() {
            0.0
        } else {
            neighbors
                .iter()
                .map(|&j| previous_risk.get(graph.node(j)).copied().unwrap_or(0.0))
                .sum::<f64>()
                / neighbors.len() as f64
        };

        let base = base_risk(entity);
        let inputs = EntityRiskInputs {
            base_risk: base,
            mismatch_ratio: (entity.mismatch_ratio * 100.0).clamp(0.0, 100.0),
            neighbor_risk: avg_neighbor_risk,
            pagerank: normalize_to_max(pr.scores[i], max_pr),
            betweenness: (between[i] * 100.0).clamp(0.0, 100.0),
            degree: (degree[i] * 100.0).clamp(0.0, 100.0),
        };
        let risk = entity_risk(&inputs, weights);
        risks[i] = risk;

        metrics.insert(
            id.to_string(),
            EntityMetrics {
                risk_score: risk,
                risk_label: labels.label(risk),
                base_risk: base,
                mismatch_ratio: entity.mismatch_ratio,
                avg_neighbor_risk,
                pagerank: pr.scores[i],
                degree_centrality: degree[i],
                betweenness: between[i],
                clustering: clust[i],
                community_id: comms.membership[i],
                converged: pr.converged,
            },
        );
    }

    let community_risks: Vec<CommunityRisk> = comms
        .groups
        .iter()
        .enumerate()
        .map(|(id, group)| {
            let member_risks: Vec<f64> = group.iter().map(|&m| risks[m]).collect();
            let avg_risk = member_risks.iter().sum::<f64>() / member_risks.len().max(1) as f64;
            let max_risk = member_risks.iter().copied().fold(0.0, f64::max);
            CommunityRisk {
                community_id: id,
                size: group.len(),
                members: group.iter().map(|&m| graph.node(m).to_string()).collect(),
                avg_risk,
                max_risk,
                high_risk_members: member_risks
                    .iter()
                    .filter(|r| **r >= p.high_risk_threshold)
                    .count(),
                label: labels.label(avg_risk),
            }
        })
        .collect();

    let stats = GraphStats {
        nodes: n,
        edges: graph.edge_count(),
        density: graph.density(),
        avg_clustering: if n == 0 {
            0.0
        } else {
            clust.iter().sum::<f64>() / n as f64
        },
        communities: community_risks.len(),
    };

    info!(
        "L4: {} entities scored, {} communities, converged={}",
        metrics.len(),
        community_risks.len(),
        pr.converged
    );

    Level4Output {
        metrics,
        communities: community_risks,
        stats,
        converged: pr.converged,
        iterations: pr.iterations,
    }
}
