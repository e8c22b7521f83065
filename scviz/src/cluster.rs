//! Clusterer: community detection on the neighbour graph by seeded
//! Louvain modularity optimization: greedy local moves followed by
//! graph aggregation, repeated until the partition stops improving.
//!
//! The gain of moving node `u` into community `c` is
//! `Δ = w_uc - γ · k_u · Σ_c / 2m`, with `γ` the resolution
//! parameter; higher resolution yields more, smaller clusters.
//! Deterministic for a fixed graph, resolution, and seed. Labels are
//! opaque set members, renumbered by first appearance for stable
//! output.

use crate::common::*;
use crate::error::PipelineError;
use crate::neighbors::NeighborGraph;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

const MAX_LEVELS: usize = 20;
const MAX_PASSES: usize = 100;

#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Cluster label per cell, renumbered by first appearance
    pub labels: Vec<usize>,
    pub n_clusters: usize,
}

impl ClusterResult {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_clusters];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }

    /// Cluster size distribution as ASCII, largest first
    pub fn histogram_ascii(&self, max_width: usize) -> String {
        let mut ranked: Vec<(usize, usize)> = self
            .cluster_sizes()
            .into_iter()
            .enumerate()
            .filter(|&(_, s)| s > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let max_size = ranked.first().map(|&(_, s)| s).unwrap_or(1);
        let mut lines = vec![format!(
            "{} cells in {} clusters:",
            self.labels.len(),
            ranked.len()
        )];
        for (cluster_id, size) in ranked {
            let pct = 100.0 * size as f64 / self.labels.len() as f64;
            let bar_len = ((size as f64 / max_size as f64) * max_width as f64) as usize;
            lines.push(format!(
                "  cluster {:3}  {:>6} cells ({:>5.1}%)  {}",
                cluster_id,
                size,
                pct,
                "#".repeat(bar_len.max(1))
            ));
        }
        lines.join("\n")
    }
}

/// Working graph at one aggregation level
struct LevelGraph {
    adj: Vec<Vec<(usize, f64)>>,
    self_loops: Vec<f64>,
}

impl LevelGraph {
    fn n_nodes(&self) -> usize {
        self.adj.len()
    }

    fn degree(&self, u: usize) -> f64 {
        self.adj[u].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[u]
    }

    fn total_degree(&self) -> f64 {
        (0..self.n_nodes()).map(|u| self.degree(u)).sum()
    }
}

/// Run Louvain on the neighbour graph.
pub fn louvain_clustering(
    graph: &NeighborGraph,
    resolution: f64,
    seed: u64,
) -> anyhow::Result<ClusterResult> {
    let n = graph.n_nodes;
    if n == 0 {
        return Err(PipelineError::Validation("cannot cluster an empty graph".into()).into());
    }
    if resolution <= 0.0 {
        return Err(PipelineError::Validation(format!(
            "resolution must be positive, got {}",
            resolution
        ))
        .into());
    }

    let mut level = LevelGraph {
        adj: (0..n)
            .map(|u| {
                graph
                    .neighbors(u)
                    .iter()
                    .map(|&(v, w)| (v, w as f64))
                    .collect()
            })
            .collect(),
        self_loops: vec![0.0; n],
    };

    if graph.num_edges() == 0 {
        // nothing connects: every cell is its own community
        return Ok(relabel((0..n).collect()));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut membership: Vec<usize> = (0..n).collect();

    for level_no in 0..MAX_LEVELS {
        let (mut local, moved) = one_level(&level, resolution, &mut rng)?;
        let n_communities = renumber_in_place(&mut local);

        // compose this level's assignment into the cell-level labels
        for m in membership.iter_mut() {
            *m = local[*m];
        }

        info!(
            "louvain level {}: {} -> {} communities{}",
            level_no + 1,
            level.n_nodes(),
            n_communities,
            if moved { "" } else { " (converged)" }
        );

        if !moved || n_communities == level.n_nodes() {
            break;
        }
        level = aggregate(&level, &local, n_communities);
    }

    Ok(relabel(membership))
}

/// Greedy local moves until no node improves modularity.
/// Returns per-node community ids and whether anything moved.
fn one_level(
    graph: &LevelGraph,
    resolution: f64,
    rng: &mut StdRng,
) -> anyhow::Result<(Vec<usize>, bool)> {
    let n = graph.n_nodes();
    let m2 = graph.total_degree();
    if m2 <= 0.0 {
        return Err(PipelineError::Numeric("graph has zero total edge weight".into()).into());
    }

    let degrees: Vec<f64> = (0..n).map(|u| graph.degree(u)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut comm_tot: Vec<f64> = degrees.clone();

    let mut order: Vec<usize> = (0..n).collect();
    let mut any_moved = false;

    // scratch accumulator indexed by community id, reset via `touched`
    let mut neigh_weight = vec![0.0_f64; n];
    let mut touched: Vec<usize> = Vec::new();

    for _pass in 0..MAX_PASSES {
        order.shuffle(rng);
        let mut n_moved = 0;

        for &u in &order {
            let cur = community[u];
            let k_u = degrees[u];

            touched.clear();
            for &(v, w) in &graph.adj[u] {
                if v == u {
                    continue;
                }
                let c = community[v];
                if neigh_weight[c] == 0.0 {
                    touched.push(c);
                }
                neigh_weight[c] += w;
            }

            comm_tot[cur] -= k_u;

            let w_cur = if touched.contains(&cur) {
                neigh_weight[cur]
            } else {
                0.0
            };
            let mut best_comm = cur;
            let mut best_gain = w_cur - resolution * k_u * comm_tot[cur] / m2;

            for &c in &touched {
                if c == cur {
                    continue;
                }
                let gain = neigh_weight[c] - resolution * k_u * comm_tot[c] / m2;
                if gain > best_gain + 1e-12 {
                    best_gain = gain;
                    best_comm = c;
                }
            }

            comm_tot[best_comm] += k_u;
            if best_comm != cur {
                community[u] = best_comm;
                n_moved += 1;
                any_moved = true;
            }

            for &c in &touched {
                neigh_weight[c] = 0.0;
            }
        }

        if n_moved == 0 {
            break;
        }
    }

    Ok((community, any_moved))
}

/// Renumber community ids to 0..k in first-appearance order, in place.
/// Returns k.
fn renumber_in_place(labels: &mut [usize]) -> usize {
    let max_label = labels.iter().copied().max().unwrap_or(0);
    let mut new_id = vec![usize::MAX; max_label + 1];
    let mut next = 0;
    for label in labels.iter_mut() {
        if new_id[*label] == usize::MAX {
            new_id[*label] = next;
            next += 1;
        }
        *label = new_id[*label];
    }
    next
}

/// Collapse communities into single nodes, summing edge weights.
/// Intra-community weight becomes a self-loop.
fn aggregate(graph: &LevelGraph, labels: &[usize], n_communities: usize) -> LevelGraph {
    let mut self_loops = vec![0.0_f64; n_communities];
    let mut edge_weight: Vec<fnv::FnvHashMap<usize, f64>> =
        vec![fnv::FnvHashMap::default(); n_communities];

    for u in 0..graph.n_nodes() {
        let cu = labels[u];
        self_loops[cu] += graph.self_loops[u];
        for &(v, w) in &graph.adj[u] {
            if v < u {
                continue; // each undirected edge once
            }
            let cv = labels[v];
            if cu == cv {
                self_loops[cu] += w;
            } else {
                *edge_weight[cu.min(cv)].entry(cu.max(cv)).or_insert(0.0) += w;
            }
        }
    }

    let mut adj: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_communities];
    for (cu, weights) in edge_weight.into_iter().enumerate() {
        let mut sorted: Vec<(usize, f64)> = weights.into_iter().collect();
        sorted.sort_by_key(|&(cv, _)| cv);
        for (cv, w) in sorted {
            adj[cu].push((cv, w));
            adj[cv].push((cu, w));
        }
    }

    LevelGraph { adj, self_loops }
}

fn relabel(mut labels: Vec<usize>) -> ClusterResult {
    let n_clusters = renumber_in_place(&mut labels);
    ClusterResult { labels, n_clusters }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// two complete graphs of `size` nodes each, unit weights, no
    /// cross edges
    fn two_cliques(size: usize) -> NeighborGraph {
        let n = 2 * size;
        let mut edges = Vec::new();
        let mut weights = Vec::new();
        for block in 0..2 {
            let base = block * size;
            for i in 0..size {
                for j in (i + 1)..size {
                    edges.push((base + i, base + j));
                    weights.push(1.0);
                }
            }
        }
        NeighborGraph::from_edges(n, edges, weights)
    }

    #[test]
    fn test_two_cliques_two_clusters() -> anyhow::Result<()> {
        let graph = two_cliques(6);
        let result = louvain_clustering(&graph, 0.5, 42)?;

        assert_eq!(result.n_clusters, 2);
        assert_eq!(result.labels.len(), 12);
        // each clique is uniform and the two differ
        assert!(result.labels[..6].iter().all(|&l| l == result.labels[0]));
        assert!(result.labels[6..].iter().all(|&l| l == result.labels[6]));
        assert_ne!(result.labels[0], result.labels[6]);
        Ok(())
    }

    #[test]
    fn test_deterministic_for_seed() -> anyhow::Result<()> {
        let graph = two_cliques(5);
        let a = louvain_clustering(&graph, 0.5, 9)?;
        let b = louvain_clustering(&graph, 0.5, 9)?;
        assert_eq!(a.labels, b.labels);
        Ok(())
    }

    #[test]
    fn test_resolution_monotone_on_cliques() -> anyhow::Result<()> {
        let graph = two_cliques(6);
        let low = louvain_clustering(&graph, 0.1, 0)?;
        let high = louvain_clustering(&graph, 50.0, 0)?;
        assert!(
            low.n_clusters <= high.n_clusters,
            "resolution 0.1 gave {} clusters, 50.0 gave {}",
            low.n_clusters,
            high.n_clusters
        );
        Ok(())
    }

    #[test]
    fn test_labels_first_appearance_order() -> anyhow::Result<()> {
        let graph = two_cliques(4);
        let result = louvain_clustering(&graph, 0.5, 3)?;
        // first cell always carries label 0
        assert_eq!(result.labels[0], 0);
        assert_eq!(result.cluster_sizes().iter().sum::<usize>(), 8);
        Ok(())
    }

    #[test]
    fn test_no_edges_yields_singletons() -> anyhow::Result<()> {
        let graph = NeighborGraph::from_edges(4, vec![], vec![]);
        let result = louvain_clustering(&graph, 0.5, 0)?;
        assert_eq!(result.n_clusters, 4);
        Ok(())
    }

    #[test]
    fn test_histogram_mentions_counts() {
        let result = ClusterResult {
            labels: vec![0, 0, 0, 1, 1, 2],
            n_clusters: 3,
        };
        let hist = result.histogram_ascii(20);
        assert!(hist.contains("6 cells"));
        assert!(hist.contains("3 clusters"));
    }
}
