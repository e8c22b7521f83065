//! Graph builder: exact k-nearest-neighbour graph over the leading
//! principal components, with fuzzy-union similarity weights.

use crate::common::*;
use crate::error::PipelineError;
use matrix_lite::knn_graph::{KnnGraph, KnnGraphArgs};

/// Symmetric weighted neighbour graph over the surviving cell set.
/// Weights lie in (0, 1]; there are no self-loops.
pub struct NeighborGraph {
    /// Canonical `(i, j)` with `i < j`, sorted
    pub edges: Vec<(usize, usize)>,
    /// Fuzzy-union similarity per edge, parallel to `edges`
    pub weights: Vec<f32>,
    pub n_nodes: usize,
    /// Adjacency lists `(neighbor, weight)` per node
    adjacency: Vec<Vec<(usize, f32)>>,
}

impl NeighborGraph {
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn neighbors(&self, node: usize) -> &[(usize, f32)] {
        &self.adjacency[node]
    }

    /// Sum of edge weights incident to `node`
    pub fn weighted_degree(&self, node: usize) -> f64 {
        self.adjacency[node].iter().map(|&(_, w)| w as f64).sum()
    }

    /// Total edge weight (each undirected edge counted once)
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().map(|&w| w as f64).sum()
    }

    /// Connected components by depth-first search
    pub fn count_components(&self) -> usize {
        let mut visited = vec![false; self.n_nodes];
        let mut n_components = 0;
        for start in 0..self.n_nodes {
            if visited[start] {
                continue;
            }
            n_components += 1;
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node] {
                    continue;
                }
                visited[node] = true;
                for &(next, _) in &self.adjacency[node] {
                    if !visited[next] {
                        stack.push(next);
                    }
                }
            }
        }
        n_components
    }

    /// Assemble from an explicit edge list (used by clustering tests
    /// and graph aggregation)
    pub fn from_edges(n_nodes: usize, edges: Vec<(usize, usize)>, weights: Vec<f32>) -> Self {
        let mut adjacency = vec![Vec::new(); n_nodes];
        for (&(i, j), &w) in edges.iter().zip(weights.iter()) {
            adjacency[i].push((j, w));
            adjacency[j].push((i, w));
        }
        Self {
            edges,
            weights,
            n_nodes,
            adjacency,
        }
    }
}

/// Build the neighbour graph from reduced-space coordinates.
///
/// Distances are Euclidean over the first `n_pcs` components; the
/// directed neighbour sets are merged by union and weighted with the
/// adaptive fuzzy kernel.
pub fn build_neighbor_graph(
    coords: &Mat,
    n_neighbors: usize,
    n_pcs: usize,
) -> anyhow::Result<NeighborGraph> {
    let n_cells = coords.nrows();
    if n_cells < 2 {
        return Err(PipelineError::Validation(format!(
            "need at least 2 cells to build a neighbour graph, got {}",
            n_cells
        ))
        .into());
    }

    let n_pcs = n_pcs.clamp(1, coords.ncols());
    let subspace = coords.columns(0, n_pcs).into_owned();

    let graph = KnnGraph::from_rows(
        &subspace,
        KnnGraphArgs {
            knn: n_neighbors,
            block_size: 1000,
        },
    )?;

    let weights = graph.fuzzy_kernel_weights();
    debug_assert_eq!(weights.len(), graph.edges.len());

    let result = NeighborGraph::from_edges(n_cells, graph.edges, weights);

    info!(
        "neighbour graph: {} nodes, {} edges, {} connected component(s)",
        result.n_nodes,
        result.num_edges(),
        result.count_components()
    );

    Ok(result)
}
