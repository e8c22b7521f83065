use crate::common_io::create_jobs;

use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

pub struct KnnGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes), distance-valued
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances, parallel to `edges`
    pub distances: Vec<f32>,
    /// Number of nodes
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 10,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl KnnGraph {
    /// Build a KNN graph from row vectors (observations x features) by
    /// exact search: every pairwise Euclidean distance is evaluated, so
    /// the same input always yields the same graph. Directed neighbour
    /// sets are merged by union, keeping the distance of each pair.
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_rows(data: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = data.nrows();
        if nn < 2 {
            anyhow::bail!("need at least 2 points, got {}", nn);
        }

        // can't ask for more neighbours than there are other points
        let knn = args.knn.clamp(1, nn - 1);
        let block_size = if args.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            args.block_size
        };

        let jobs = create_jobs(nn, block_size);
        let njobs = jobs.len() as u64;

        /////////////////////////////////////////////////////////////////
        // step 1: searching nearest neighbours                        //
        /////////////////////////////////////////////////////////////////

        let triplets: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter()
            .progress_count(njobs)
            .for_each(|(lb, ub)| {
                for i in lb..ub {
                    for (j, d_ij) in nearest_rows(data, i, knn) {
                        triplets.insert((i, j), d_ij);
                    }
                }
            });

        info!("{} triplets by exact kNN search", triplets.len());

        ///////////////////////////////////////////////
        // step 2: symmetrize directed edges (union) //
        ///////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f32)> = triplets
            .par_iter()
            .filter_map(|entry| {
                let &(i, j) = entry.key();
                if i < j {
                    Some(((i, j), *entry.value()))
                } else if !triplets.contains_key(&(j, i)) {
                    // only (i→j) exists with i > j; emit as canonical (j, i)
                    Some(((j, i), *entry.value()))
                } else {
                    None
                }
            })
            .collect();

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!("{} edges after union matching", edges.len());

        ///////////////////////////////////////////////
        // step 3: construct sparse network backbone //
        ///////////////////////////////////////////////

        let mut coo = CooMatrix::new(nn, nn);
        for &((i, j), v) in edges.iter() {
            coo.push(i, j, v);
            coo.push(j, i, v);
        }

        let adjacency = CscMatrix::from(&coo);
        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        Ok(KnnGraph {
            adjacency,
            edges: edge_pairs,
            distances,
            n_nodes: nn,
        })
    }

    /// Get neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.row_indices()[start..end]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Adaptive-bandwidth kernel weights with local connectivity.
    ///
    /// Per-point sigma calibration ensures every node has the same
    /// effective number of neighbours, preventing isolated singletons
    /// in sparse regions. The rho subtraction and fuzzy-union
    /// symmetrization follow UMAP (McInnes et al. 2018).
    ///
    /// Algorithm:
    /// 1. rho_i = distance to nearest neighbour (local connectivity)
    /// 2. sigma_i via binary search: sum_j exp(-(d_ij - rho_i)/sigma_i) = log2(k)
    /// 3. Directed weight: w(i→j) = exp(-(d_ij - rho_i) / sigma_i)
    /// 4. Symmetrize: w_sym = w(i→j) + w(j→i) - w(i→j) * w(j→i)
    ///
    /// Returns weights parallel to `self.edges`, all in (0, 1].
    pub fn fuzzy_kernel_weights(&self) -> Vec<f32> {
        if self.distances.is_empty() {
            return Vec::new();
        }

        // Steps 1-2: rho and sigma per node, from its adjacency column
        let calib: Vec<(f32, f32)> = (0..self.n_nodes)
            .into_par_iter()
            .map(|i| {
                let dists = self.neighbor_distances(i);
                if dists.is_empty() {
                    return (0.0, 1.0);
                }
                let rho = dists.iter().cloned().fold(f32::INFINITY, f32::min);
                let target = (dists.len() as f32).log2();
                (rho, smooth_knn_sigma(dists, rho, target))
            })
            .collect();

        // Steps 3-4: directed weights and fuzzy union per edge
        self.edges
            .par_iter()
            .map(|&(i, j)| {
                let d = self.edge_distance(i, j);
                let w_ij = directed_membership(d, calib[i].0, calib[i].1);
                let w_ji = directed_membership(d, calib[j].0, calib[j].1);
                // P(at least one directed edge) = P(A) + P(B) - P(A)P(B)
                w_ij + w_ji - w_ij * w_ji
            })
            .collect()
    }

    /// Distances stored in node `i`'s adjacency column
    fn neighbor_distances(&self, i: usize) -> &[f32] {
        let offsets = self.adjacency.col_offsets();
        &self.adjacency.values()[offsets[i]..offsets[i + 1]]
    }

    /// Look up the stored distance between `i` and `j` (symmetric)
    fn edge_distance(&self, i: usize, j: usize) -> f32 {
        let offsets = self.adjacency.col_offsets();
        let row_indices = self.adjacency.row_indices();
        for idx in offsets[i]..offsets[i + 1] {
            if row_indices[idx] == j {
                return self.adjacency.values()[idx];
            }
        }
        f32::INFINITY
    }
}

/// Exact k-nearest rows of `data` for row `i` (self excluded).
/// Ties break on the smaller row index so results are reproducible.
fn nearest_rows(data: &DMatrix<f32>, i: usize, knn: usize) -> Vec<(usize, f32)> {
    let xi = data.row(i);
    let mut dists: Vec<(f32, usize)> = (0..data.nrows())
        .filter(|&j| j != i)
        .map(|j| {
            let mut d2 = 0.0_f32;
            for (a, b) in xi.iter().zip(data.row(j).iter()) {
                let diff = a - b;
                d2 += diff * diff;
            }
            (d2.sqrt(), j)
        })
        .collect();

    dists.sort_unstable_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
    });

    dists.truncate(knn);
    dists.into_iter().map(|(d, j)| (j, d)).collect()
}

/// Binary search for per-point sigma (UMAP's smooth_knn_dist):
/// finds sigma with `sum_j exp(-max(0, d_j - rho) / sigma) = target`
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = 1e-3 * mean_dist;

    let mut lo = 0.0_f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0_f32;

    for _ in 0..MAX_ITER {
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }

    mid.max(min_sigma)
}

/// A single directed UMAP membership weight
fn directed_membership(d: f32, rho: f32, sigma: f32) -> f32 {
    if d.is_infinite() || sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}
