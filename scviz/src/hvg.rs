//! Feature selector: rank genes by normalized dispersion.
//!
//! Per gene, mean and variance of normalized expression are computed
//! over all cells (zeros included). Genes are then binned by mean
//! expression into equal-occupancy bins and each gene's dispersion
//! (variance/mean) is z-scored within its bin, removing the
//! mean-variance trend. The top genes by that normalized dispersion
//! form the working feature set for scaling and reduction; dispersion
//! statistics are retained for every gene.

use crate::common::*;
use crate::error::PipelineError;

#[derive(Clone, Copy, Debug)]
pub struct GeneStats {
    pub mean: f32,
    pub variance: f32,
    pub dispersion: f32,
    pub dispersion_norm: f32,
}

/// Mean, variance (ddof=1), and binned normalized dispersion per gene
pub fn gene_dispersion_stats(normalized: &CsrMat, n_bins: usize) -> Vec<GeneStats> {
    let n_cells = normalized.nrows();
    let n_genes = normalized.ncols();

    let mut sum = vec![0.0_f64; n_genes];
    let mut sumsq = vec![0.0_f64; n_genes];
    for (&col, &v) in normalized.col_indices().iter().zip(normalized.values()) {
        sum[col] += v as f64;
        sumsq[col] += (v as f64) * (v as f64);
    }

    let denom = (n_cells.max(2) - 1) as f64;
    let mut stats: Vec<GeneStats> = (0..n_genes)
        .map(|g| {
            let mean = sum[g] / n_cells as f64;
            let variance = ((sumsq[g] - n_cells as f64 * mean * mean) / denom).max(0.0);
            let dispersion = if mean > 0.0 { variance / mean } else { 0.0 };
            GeneStats {
                mean: mean as f32,
                variance: variance as f32,
                dispersion: dispersion as f32,
                dispersion_norm: 0.0,
            }
        })
        .collect();

    // equal-occupancy bins over mean expression
    let n_bins = n_bins.clamp(1, n_genes.max(1));
    let mut order: Vec<usize> = (0..n_genes).collect();
    order.sort_by(|&a, &b| {
        stats[a]
            .mean
            .partial_cmp(&stats[b].mean)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let bin_size = n_genes.div_ceil(n_bins);
    for chunk in order.chunks(bin_size) {
        let n = chunk.len() as f64;
        let bin_mean: f64 = chunk.iter().map(|&g| stats[g].dispersion as f64).sum::<f64>() / n;
        let bin_var: f64 = chunk
            .iter()
            .map(|&g| {
                let d = stats[g].dispersion as f64 - bin_mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0).max(1.0);
        let bin_sd = bin_var.sqrt();

        for &g in chunk {
            // singleton bins and flat bins carry no trend information
            stats[g].dispersion_norm = if chunk.len() > 1 && bin_sd > 0.0 {
                ((stats[g].dispersion as f64 - bin_mean) / bin_sd) as f32
            } else {
                0.0
            };
        }
    }

    stats
}

/// Indices of the `n_top` genes by normalized dispersion (descending),
/// returned sorted ascending for stable column slicing.
pub fn select_top_genes(stats: &[GeneStats], n_top: usize) -> anyhow::Result<Vec<usize>> {
    if stats.is_empty() {
        return Err(PipelineError::Validation("no genes to select from".into()).into());
    }

    let mut ranked: Vec<usize> = (0..stats.len()).collect();
    ranked.sort_by(|&a, &b| {
        stats[b]
            .dispersion_norm
            .partial_cmp(&stats[a].dispersion_norm)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let n_select = n_top.min(ranked.len());
    let mut selected: Vec<usize> = ranked[..n_select].to_vec();
    selected.sort_unstable();

    info!(
        "selected {} / {} highly variable genes",
        n_select,
        stats.len()
    );

    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn csr_from_rows(rows: &[&[f32]]) -> CsrMat {
        let mut coo = CooMat::new(rows.len(), rows[0].len());
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    coo.push(i, j, v);
                }
            }
        }
        CsrMat::from(&coo)
    }

    #[test]
    fn test_mean_and_variance_include_zeros() {
        // gene 0 over 4 cells: [2, 0, 0, 0] -> mean 0.5, var 1.0 (ddof=1)
        let x = csr_from_rows(&[&[2.0, 1.0], &[0.0, 1.0], &[0.0, 1.0], &[0.0, 1.0]]);
        let stats = gene_dispersion_stats(&x, 1);

        assert_relative_eq!(stats[0].mean, 0.5, epsilon = 1e-6);
        assert_relative_eq!(stats[0].variance, 1.0, epsilon = 1e-6);
        // constant gene: zero variance, zero dispersion
        assert_relative_eq!(stats[1].variance, 0.0, epsilon = 1e-6);
        assert_relative_eq!(stats[1].dispersion, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_variable_gene_ranks_first() -> anyhow::Result<()> {
        // gene 2 swings wildly at the same mean scale as its bin peers
        let x = csr_from_rows(&[
            &[1.0, 1.0, 8.0, 1.0],
            &[1.0, 2.0, 0.0, 1.0],
            &[2.0, 1.0, 0.0, 2.0],
            &[1.0, 1.0, 8.0, 1.0],
        ]);
        let stats = gene_dispersion_stats(&x, 1);
        let top = select_top_genes(&stats, 1)?;
        assert_eq!(top, vec![2]);
        Ok(())
    }

    #[test]
    fn test_selected_indices_sorted_and_bounded() -> anyhow::Result<()> {
        let x = csr_from_rows(&[
            &[1.0, 5.0, 0.0, 2.0, 9.0],
            &[3.0, 0.0, 1.0, 2.0, 0.0],
            &[0.0, 2.0, 4.0, 2.0, 1.0],
        ]);
        let stats = gene_dispersion_stats(&x, 2);
        let top = select_top_genes(&stats, 3)?;

        assert_eq!(top.len(), 3);
        assert!(top.windows(2).all(|w| w[0] < w[1]));
        assert!(top.iter().all(|&g| g < 5));
        Ok(())
    }

    #[test]
    fn test_n_top_larger_than_gene_count() -> anyhow::Result<()> {
        let x = csr_from_rows(&[&[1.0, 2.0], &[3.0, 1.0]]);
        let stats = gene_dispersion_stats(&x, 20);
        let top = select_top_genes(&stats, 100)?;
        assert_eq!(top, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_all_genes_keep_stats() {
        let x = csr_from_rows(&[&[1.0, 0.0, 2.0], &[0.0, 3.0, 2.0]]);
        let stats = gene_dispersion_stats(&x, 2);
        assert_eq!(stats.len(), 3);
        assert!(stats.iter().all(|s| s.dispersion_norm.is_finite()));
    }
}
