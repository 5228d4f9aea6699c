//! Graph metrics used by risk propagation. Every function takes the graph
//! by reference and returns one value per node index.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rustc_hash::FxHashMap;

use crate::graph::TxGraph;

#[derive(Debug, Clone, PartialEq)]
pub struct PageRank {
    pub scores: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Weighted PageRank. Transition probability from `u` is proportional to
/// edge value; nodes without positive outflow spread their rank uniformly.
///
/// Converges when the L1 change between iterations drops below
/// `n * tolerance`.
pub fn pagerank(graph: &TxGraph, damping: f64, max_iterations: usize, tolerance: f64) -> PageRank {
    let n = graph.node_count();
    if n == 0 {
        return PageRank {
            scores: Vec::new(),
            iterations: 0,
            converged: true,
        };
    }

    let nf = n as f64;
    let strength: Vec<f64> = (0..n)
        .map(|u| graph.out_edges(u).iter().map(|&(_, w)| w.max(0.0)).sum())
        .collect();

    let mut rank = vec![1.0 / nf; n];
    for iteration in 1..=max_iterations {
        let dangling: f64 = (0..n).filter(|&u| strength[u] <= 0.0).map(|u| rank[u]).sum();
        let base = (1.0 - damping) / nf + damping * dangling / nf;

        let mut next = vec![base; n];
        for u in (0..n).filter(|&u| strength[u] > 0.0) {
            for &(v, w) in graph.out_edges(u) {
                next[v] += damping * rank[u] * w.max(0.0) / strength[u];
            }
        }

        let err: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
        rank = next;
        if err < nf * tolerance {
            return PageRank {
                scores: rank,
                iterations: iteration,
                converged: true,
            };
        }
    }

    PageRank {
        scores: rank,
        iterations: max_iterations,
        converged: false,
    }
}

/// Distinct in- plus out-neighbors over `2 * (n - 1)`.
pub fn degree_centrality(graph: &TxGraph) -> Vec<f64> {
    let n = graph.node_count();
    if n < 2 {
        return vec![0.0; n];
    }
    let denom = (2 * (n - 1)) as f64;
    (0..n)
        .map(|i| (graph.out_edges(i).len() + graph.in_edges(i).len()) as f64 / denom)
        .collect()
}

/// Directed, unweighted betweenness (Brandes), normalized by `(n-1)(n-2)`.
pub fn betweenness(graph: &TxGraph) -> Vec<f64> {
    let n = graph.node_count();
    let mut centrality = vec![0.0; n];
    if n < 3 {
        return centrality;
    }

    for s in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];
        sigma[s] = 1.0;
        dist[s] = 0;

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &(w, _) in graph.out_edges(v) {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
    centrality.iter_mut().for_each(|c| *c *= scale);
    centrality
}

/// Local clustering coefficient on the undirected projection.
pub fn clustering(graph: &TxGraph) -> Vec<f64> {
    let n = graph.node_count();
    let neighbors: Vec<BTreeSet<usize>> = (0..n)
        .map(|i| graph.undirected_neighbors(i).into_iter().collect())
        .collect();

    (0..n)
        .map(|i| {
            let ns: Vec<usize> = neighbors[i].iter().copied().collect();
            let k = ns.len();
            if k < 2 {
                return 0.0;
            }
            let mut links = 0usize;
            for (a, &u) in ns.iter().enumerate() {
                for &v in &ns[a + 1..] {
                    if neighbors[u].contains(&v) {
                        links += 1;
                    }
                }
            }
            (2 * links) as f64 / (k * (k - 1)) as f64
        })
        .collect()
}

/// Community assignment from greedy modularity agglomeration.
#[derive(Debug, Clone, PartialEq)]
pub struct Communities {
    /// Community id per node index.
    pub membership: Vec<usize>,
    /// Members per community id, each sorted.
    pub groups: Vec<Vec<usize>>,
}

/// Greedy modularity agglomeration on the undirected, weighted projection.
///
/// Starts from singletons and repeatedly merges the adjacent pair with the
/// largest positive modularity gain (ties go to the pair with the smallest
/// representatives). Ids are assigned by size desc, then smallest member.
/// Non-positive edge values count as weight 1.
pub fn communities(graph: &TxGraph) -> Communities {
    let n = graph.node_count();

    // Undirected weights keyed by (min, max).
    let mut weights: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for u in 0..n {
        for &(v, w) in graph.out_edges(u) {
            let w = if w > 0.0 { w } else { 1.0 };
            *weights.entry((u.min(v), u.max(v))).or_insert(0.0) += w;
        }
    }
    let total: f64 = weights.values().sum();

    // Each community is labelled by its smallest member.
    let mut members: BTreeMap<usize, Vec<usize>> = (0..n).map(|i| (i, vec![i])).collect();
    let mut degree: FxHashMap<usize, f64> = (0..n).map(|i| (i, 0.0)).collect();
    let mut between: BTreeMap<usize, BTreeMap<usize, f64>> = BTreeMap::new();
    for (&(u, v), &w) in &weights {
        *degree.entry(u).or_insert(0.0) += w;
        *degree.entry(v).or_insert(0.0) += w;
        *between.entry(u).or_default().entry(v).or_insert(0.0) += w;
        *between.entry(v).or_default().entry(u).or_insert(0.0) += w;
    }

    if total > 0.0 {
        loop {
            let mut best: Option<(f64, usize, usize)> = None;
            for (&i, adj) in &between {
                for (&j, &l_ij) in adj.range(i + 1..) {
                    let d_i = degree.get(&i).copied().unwrap_or(0.0);
                    let d_j = degree.get(&j).copied().unwrap_or(0.0);
                    let gain = l_ij / total - d_i * d_j / (2.0 * total * total);
                    if gain > 1e-12 && best.map_or(true, |(g, _, _)| gain > g + 1e-12) {
                        best = Some((gain, i, j));
                    }
                }
            }
            let Some((_, keep, absorb)) = best else {
                break;
            };

            // merge `absorb` into `keep` (keep < absorb)
            if let Some(moved) = members.remove(&absorb) {
                members.entry(keep).or_default().extend(moved);
            }
            let d_absorb = degree.remove(&absorb).unwrap_or(0.0);
            *degree.entry(keep).or_insert(0.0) += d_absorb;

            let absorbed_adj = between.remove(&absorb).unwrap_or_default();
            for (other, w) in absorbed_adj {
                if let Some(adj) = between.get_mut(&other) {
                    adj.remove(&absorb);
                }
                if other == keep {
                    continue;
                }
                *between.entry(keep).or_default().entry(other).or_insert(0.0) += w;
                *between.entry(other).or_default().entry(keep).or_insert(0.0) += w;
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = members
        .into_values()
        .map(|mut m| {
            m.sort_unstable();
            m
        })
        .collect();
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

    let mut membership = vec![0; n];
    for (id, group) in groups.iter().enumerate() {
        for &m in group {
            membership[m] = id;
        }
    }
    Communities { membership, groups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::edge;

    fn graph(edges: &[(&str, &str, f64)]) -> TxGraph {
        let edges: Vec<_> = edges.iter().map(|&(f, t, v)| edge(f, t, v)).collect();
        TxGraph::from_edges(&edges)
    }

    #[test]
    fn pagerank_sums_to_one() {
        let g = graph(&[
            ("A", "B", 10.0),
            ("B", "C", 5.0),
            ("C", "A", 1.0),
            ("C", "D", 3.0),
        ]);
        let pr = pagerank(&g, 0.85, 100, 1e-6);
        assert!(pr.converged);
        let sum: f64 = pr.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
    }

    #[test]
    fn pagerank_reports_non_convergence() {
        let g = graph(&[("A", "B", 1.0), ("B", "C", 1.0), ("C", "A", 2.0), ("A", "C", 1.0)]);
        let pr = pagerank(&g, 0.85, 1, 1e-12);
        assert!(!pr.converged);
        assert_eq!(pr.iterations, 1);
        let sum: f64 = pr.scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degree_in_unit_range() {
        let g = graph(&[("A", "B", 1.0), ("B", "A", 1.0), ("A", "C", 1.0), ("C", "A", 1.0)]);
        let d = degree_centrality(&g);
        assert_eq!(d[0], 1.0);
        assert_eq!(d[1], 0.5);
        assert!(d.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn betweenness_of_chain_middle() {
        // A -> B -> C: B lies on the only A..C path
        let g = graph(&[("A", "B", 1.0), ("B", "C", 1.0)]);
        let b = betweenness(&g);
        assert_eq!(b[0], 0.0);
        assert!((b[1] - 0.5).abs() < 1e-12);
        assert_eq!(b[2], 0.0);
    }

    #[test]
    fn clustering_of_triangle_and_star() {
        let tri = graph(&[("A", "B", 1.0), ("B", "C", 1.0), ("C", "A", 1.0)]);
        assert_eq!(clustering(&tri), vec![1.0, 1.0, 1.0]);

        let star = graph(&[("H", "A", 1.0), ("H", "B", 1.0), ("H", "C", 1.0)]);
        let c = clustering(&star);
        assert!(c.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn two_cliques_split_into_two_communities() {
        let g = graph(&[
            ("A", "B", 1.0),
            ("B", "C", 1.0),
            ("C", "A", 1.0),
            ("D", "E", 1.0),
            ("E", "F", 1.0),
            ("F", "D", 1.0),
            ("C", "D", 1.0),
        ]);
        let c = communities(&g);
        assert_eq!(c.groups, vec![vec![0, 1, 2], vec![3, 4, 5]]);
        assert_eq!(c.membership, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn isolated_pairs_stay_apart() {
        let g = graph(&[("A", "B", 1.0), ("C", "D", 1.0), ("E", "F", 1.0), ("F", "E", 1.0)]);
        let c = communities(&g);
        assert_eq!(c.groups.len(), 3);
        // equal sizes: ordered by smallest member
        assert_eq!(c.groups[0], vec![0, 1]);
        assert_eq!(c.groups[2], vec![4, 5]);
    }
}
