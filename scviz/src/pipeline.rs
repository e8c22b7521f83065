//! Pipeline driver: runs the stages strictly in sequence, each one
//! consuming the complete output of the previous one. Any stage error
//! aborts the run; the stage name is attached as context.

use crate::cluster::louvain_clustering;
use crate::common::*;
use crate::config::PipelineConfig;
use crate::export::{export_artifacts, MetadataOut};
use crate::hvg::{gene_dispersion_stats, select_top_genes};
use crate::input::load_dataset;
use crate::neighbors::build_neighbor_graph;
use crate::normalize::normalize_log1p;
use crate::pca::principal_components;
use crate::qc::{filter_counts, QcSummary};
use crate::scale::{dense_submatrix, scale_and_clip};
use crate::umap::umap_layout;
use anyhow::Context;

pub struct PipelineSummary {
    pub qc: QcSummary,
    pub metadata: MetadataOut,
}

/// Run the whole pipeline and write the artifacts.
pub fn run(config: &PipelineConfig) -> anyhow::Result<PipelineSummary> {
    info!(
        "pipeline start: {} + {} -> {}",
        config.metadata_file, config.counts_file, config.out_dir
    );

    let data = load_dataset(&config.metadata_file, &config.counts_file).context("loader")?;

    let (data, qc) =
        filter_counts(data, config.min_cells, config.min_genes).context("qc filter")?;

    let normalized =
        normalize_log1p(&data.counts, &data.cells, config.target_sum).context("normalizer")?;

    let stats = gene_dispersion_stats(&normalized, config.n_bins);
    let selected = select_top_genes(&stats, config.n_top_genes).context("feature selector")?;

    let mut scaled = dense_submatrix(&normalized, &selected);
    scale_and_clip(&mut scaled, config.max_value);

    let coords = principal_components(&scaled, config.n_comps, config.seed).context("reducer")?;

    let graph =
        build_neighbor_graph(&coords, config.n_neighbors, config.n_pcs).context("graph builder")?;

    let embedding =
        umap_layout(&graph, &coords, config.umap_epochs, config.seed).context("embedder")?;

    let clusters = louvain_clustering(&graph, config.resolution, config.seed).context("clusterer")?;
    info!("{}", clusters.histogram_ascii(40));

    let metadata = export_artifacts(config, &data, &normalized, &stats, &embedding, &clusters)
        .context("exporter")?;

    info!(
        "pipeline done: {} cells, {} genes, {} clusters",
        metadata.n_cells, metadata.n_genes, metadata.n_clusters
    );

    Ok(PipelineSummary { qc, metadata })
}
