//! Single configuration structure for the whole pipeline.
//!
//! Every threshold, component count, seed, and file path lives here;
//! the CLI in `main.rs` maps its arguments onto this struct and tests
//! construct it directly.

use clap::ValueEnum;

/// Sort direction for the exported expression subset.
///
/// `Largest` (the default) exports the most variable genes.
/// `Smallest` inverts the ranking, for byte-compatibility with
/// artifacts produced by tools that sort the other way.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DispersionOrder {
    Largest,
    Smallest,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Metadata table (tab-delimited, `.gz` accepted)
    pub metadata_file: Box<str>,
    /// Count matrix (tab-delimited genes x cells, `.gz` accepted)
    pub counts_file: Box<str>,
    /// Output directory for the JSON artifacts
    pub out_dir: Box<str>,

    /// Drop genes detected in fewer than this many cells
    pub min_cells: usize,
    /// Drop cells with fewer than this many detected genes
    pub min_genes: usize,

    /// Per-cell count total after rescaling
    pub target_sum: f32,
    /// Number of highly variable genes kept for reduction
    pub n_top_genes: usize,
    /// Equal-occupancy mean-expression bins for dispersion trend removal
    pub n_bins: usize,
    /// Clip standardized values to `[-max_value, max_value]`
    pub max_value: f32,

    /// Number of principal components
    pub n_comps: usize,
    /// Neighbours per cell in the kNN graph
    pub n_neighbors: usize,
    /// Number of leading components used for neighbour search
    pub n_pcs: usize,

    /// Layout optimization epochs
    pub umap_epochs: usize,
    /// Louvain resolution (higher = more, smaller clusters)
    pub resolution: f64,
    /// Seed threaded through reduction, layout, and clustering
    pub seed: u64,

    /// Size of the exported expression subset (before marker union)
    pub n_export_genes: usize,
    /// Which end of the normalized-dispersion ranking to export
    pub export_dispersion_order: DispersionOrder,
    /// Marker genes pinned into the expression subset when present
    pub marker_genes: Vec<Box<str>>,
}

/// Markers the downstream viewer highlights by default (common PBMC set)
pub const DEFAULT_MARKER_GENES: [&str; 13] = [
    "CD79A", "MS4A1", "CD3D", "CD8A", "CD4", "IL7R", "CCR7", "NKG7", "GNLY", "FCGR3A", "MS4A7",
    "LYZ", "CD14",
];

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            metadata_file: "".into(),
            counts_file: "".into(),
            out_dir: ".".into(),
            min_cells: 10,
            min_genes: 200,
            target_sum: 1e4,
            n_top_genes: 2000,
            n_bins: 20,
            max_value: 10.0,
            n_comps: 50,
            n_neighbors: 10,
            n_pcs: 30,
            umap_epochs: 200,
            resolution: 0.5,
            seed: 42,
            n_export_genes: 500,
            export_dispersion_order: DispersionOrder::Largest,
            marker_genes: DEFAULT_MARKER_GENES.iter().map(|&g| g.into()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.min_cells, 10);
        assert_eq!(config.min_genes, 200);
        assert_eq!(config.target_sum, 1e4);
        assert_eq!(config.n_top_genes, 2000);
        assert_eq!(config.max_value, 10.0);
        assert_eq!(config.n_comps, 50);
        assert_eq!(config.n_neighbors, 10);
        assert_eq!(config.n_pcs, 30);
        assert_eq!(config.resolution, 0.5);
        assert_eq!(config.n_export_genes, 500);
        assert_eq!(config.export_dispersion_order, DispersionOrder::Largest);
        assert_eq!(config.marker_genes.len(), 13);
    }
}
