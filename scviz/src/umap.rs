//! Embedder: 2-D layout of the neighbour graph by stochastic gradient
//! descent on a cross-entropy objective with negative sampling
//! (the UMAP family of force-directed layouts, McInnes et al. 2018).
//!
//! Connected nodes attract, sampled non-neighbours repel. The loop is
//! single-threaded on purpose: parallel asynchronous updates would
//! make the result depend on thread scheduling, and the layout is a
//! pure function of the graph and the seed.

use crate::common::*;
use crate::error::PipelineError;
use crate::neighbors::NeighborGraph;
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Differentiable-kernel coefficients for min_dist = 0.1, spread = 1.0
const KERNEL_A: f32 = 1.577;
const KERNEL_B: f32 = 0.895;

const INITIAL_ALPHA: f32 = 1.0;
const NEGATIVE_SAMPLE_RATE: f32 = 5.0;
const GRAD_CLIP: f32 = 4.0;
const INIT_SCALE: f32 = 10.0;

/// Lay the graph out in two dimensions.
///
/// * `graph` - weighted neighbour graph
/// * `init` - per-node coordinates (n x >= 2); the first two columns,
///   rescaled to `[-10, 10]`, seed the layout
/// * `n_epochs` - optimization epochs
/// * `seed` - RNG seed for edge scheduling jitter and negative samples
pub fn umap_layout(
    graph: &NeighborGraph,
    init: &Mat,
    n_epochs: usize,
    seed: u64,
) -> anyhow::Result<Mat> {
    let nn = graph.n_nodes;
    if init.nrows() != nn {
        return Err(PipelineError::Validation(format!(
            "init has {} rows for {} graph nodes",
            init.nrows(),
            nn
        ))
        .into());
    }
    if graph.num_edges() == 0 {
        return Err(
            PipelineError::Validation("neighbour graph has no edges to lay out".into()).into(),
        );
    }
    if n_epochs == 0 {
        return Err(PipelineError::Validation("n_epochs must be >= 1".into()).into());
    }

    let mut embedding = rescaled_init(init, nn);
    let mut rng = StdRng::seed_from_u64(seed);

    // edges with higher membership weight are sampled more often
    let w_max = graph
        .weights
        .iter()
        .cloned()
        .fold(f32::MIN, f32::max)
        .max(f32::MIN_POSITIVE);
    let epochs_per_sample: Vec<f32> = graph.weights.iter().map(|&w| w_max / w.max(1e-12)).collect();
    let epochs_per_negative: Vec<f32> = epochs_per_sample
        .iter()
        .map(|&e| e / NEGATIVE_SAMPLE_RATE)
        .collect();

    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let pb = ProgressBar::new(n_epochs as u64);
    for epoch in 0..n_epochs {
        let alpha = INITIAL_ALPHA * (1.0 - epoch as f32 / n_epochs as f32);
        let epoch_f = epoch as f32 + 1.0;

        for (e, &(i, j)) in graph.edges.iter().enumerate() {
            if next_sample[e] > epoch_f {
                continue;
            }
            next_sample[e] += epochs_per_sample[e];

            attract(&mut embedding, i, j, alpha);

            let n_neg =
                ((epoch_f - (next_negative[e] - epochs_per_negative[e])) / epochs_per_negative[e])
                    .floor()
                    .max(0.0) as usize;
            for _ in 0..n_neg {
                let k = rng.random_range(0..nn);
                if k != i {
                    repel(&mut embedding, i, k, alpha);
                }
                let l = rng.random_range(0..nn);
                if l != j {
                    repel(&mut embedding, j, l, alpha);
                }
            }
            next_negative[e] += n_neg as f32 * epochs_per_negative[e];
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Numeric("layout diverged to non-finite coordinates".into()).into());
    }

    info!("UMAP layout: {} nodes, {} epochs", nn, n_epochs);
    Ok(embedding)
}

/// First two init columns rescaled so the largest magnitude is 10
fn rescaled_init(init: &Mat, nn: usize) -> Mat {
    let mut embedding = Mat::zeros(nn, 2);
    let dims = init.ncols().min(2);
    for d in 0..dims {
        let col = init.column(d);
        let max_abs = col.iter().map(|v| v.abs()).fold(0.0_f32, f32::max);
        let scale = if max_abs > 0.0 {
            INIT_SCALE / max_abs
        } else {
            0.0
        };
        for i in 0..nn {
            embedding[(i, d)] = col[i] * scale;
        }
    }
    embedding
}

fn attract(embedding: &mut Mat, i: usize, j: usize, alpha: f32) {
    let dx = embedding[(i, 0)] - embedding[(j, 0)];
    let dy = embedding[(i, 1)] - embedding[(j, 1)];
    let d2 = dx * dx + dy * dy;
    if d2 <= 0.0 {
        return;
    }

    let coeff = (-2.0 * KERNEL_A * KERNEL_B * d2.powf(KERNEL_B - 1.0))
        / (1.0 + KERNEL_A * d2.powf(KERNEL_B));
    let gx = (coeff * dx).clamp(-GRAD_CLIP, GRAD_CLIP) * alpha;
    let gy = (coeff * dy).clamp(-GRAD_CLIP, GRAD_CLIP) * alpha;

    embedding[(i, 0)] += gx;
    embedding[(i, 1)] += gy;
    embedding[(j, 0)] -= gx;
    embedding[(j, 1)] -= gy;
}

fn repel(embedding: &mut Mat, i: usize, k: usize, alpha: f32) {
    let dx = embedding[(i, 0)] - embedding[(k, 0)];
    let dy = embedding[(i, 1)] - embedding[(k, 1)];
    let d2 = dx * dx + dy * dy;

    let coeff = (2.0 * KERNEL_B) / ((0.001 + d2) * (1.0 + KERNEL_A * d2.powf(KERNEL_B)));
    let gx = (coeff * dx).clamp(-GRAD_CLIP, GRAD_CLIP) * alpha;
    let gy = (coeff * dy).clamp(-GRAD_CLIP, GRAD_CLIP) * alpha;

    embedding[(i, 0)] += gx;
    embedding[(i, 1)] += gy;
}
