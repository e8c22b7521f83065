//! Exporter: serialize the five JSON artifacts consumed by the viewer.
//!
//! `cells.json`, `genes.json`, `expression.json`, and `metadata.json`
//! are standalone documents; `combined_data.json` bundles the same
//! four values into one object and is reconstructible from them. All
//! writes go through a temporary file with an atomic rename.
//!
//! The expression subset is an export policy, independent of the
//! working feature set used for reduction: the `n_export_genes` genes
//! at the chosen end of the normalized-dispersion ranking, followed by
//! the pinned marker genes that exist in the data, deduplicated in
//! that order.

use crate::cluster::ClusterResult;
use crate::common::*;
use crate::config::{DispersionOrder, PipelineConfig};
use crate::error::PipelineError;
use crate::hvg::GeneStats;
use crate::input::Dataset;
use matrix_lite::common_io::{mkdir, write_json_atomic, write_json_pretty_atomic};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Serialize, Clone, Debug)]
pub struct CellOut {
    pub id: String,
    pub umap1: f32,
    pub umap2: f32,
    pub cluster: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub celline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indication: Option<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct MetadataOut {
    pub n_cells: usize,
    pub n_genes: usize,
    pub n_clusters: usize,
    pub genes_exported: usize,
    pub cell_metadata_fields: Vec<String>,
}

/// Union of the four standalone artifacts
#[derive(Serialize)]
struct CombinedOut<'a> {
    cells: &'a [CellOut],
    genes: &'a [String],
    #[serde(rename = "expressionData")]
    expression_data: &'a BTreeMap<String, Vec<f32>>,
    metadata: &'a MetadataOut,
}

/// Write all five artifacts under `config.out_dir`.
///
/// Reads every upstream product by reference and mutates none of them.
pub fn export_artifacts(
    config: &PipelineConfig,
    data: &Dataset,
    normalized: &CsrMat,
    stats: &[GeneStats],
    embedding: &Mat,
    clusters: &ClusterResult,
) -> anyhow::Result<MetadataOut> {
    let n_cells = data.n_cells();
    if embedding.nrows() != n_cells || clusters.labels.len() != n_cells {
        return Err(PipelineError::Validation(format!(
            "exporter saw {} cells but {} embedding rows and {} cluster labels",
            n_cells,
            embedding.nrows(),
            clusters.labels.len()
        ))
        .into());
    }
    if stats.len() != data.n_genes() {
        return Err(PipelineError::Validation(format!(
            "exporter saw {} genes but {} dispersion records",
            data.n_genes(),
            stats.len()
        ))
        .into());
    }

    let cells = cell_records(data, embedding, clusters);
    let genes = sorted_gene_ids(data);
    let subset = expression_subset(data, stats, config);
    let expression = expression_columns(data, normalized, &subset);

    let metadata = MetadataOut {
        n_cells,
        n_genes: data.n_genes(),
        n_clusters: clusters.n_clusters,
        genes_exported: expression.len(),
        cell_metadata_fields: data.meta_columns.iter().map(|c| c.to_string()).collect(),
    };

    mkdir(&config.out_dir).map_err(PipelineError::tag_io)?;
    let out = |name: &str| -> String {
        Path::new(config.out_dir.as_ref())
            .join(name)
            .to_string_lossy()
            .into_owned()
    };

    write_json_atomic(&cells, &out("cells.json")).map_err(PipelineError::tag_io)?;
    write_json_atomic(&genes, &out("genes.json")).map_err(PipelineError::tag_io)?;
    write_json_atomic(&expression, &out("expression.json")).map_err(PipelineError::tag_io)?;
    write_json_pretty_atomic(&metadata, &out("metadata.json")).map_err(PipelineError::tag_io)?;

    let combined = CombinedOut {
        cells: &cells,
        genes: &genes,
        expression_data: &expression,
        metadata: &metadata,
    };
    write_json_atomic(&combined, &out("combined_data.json")).map_err(PipelineError::tag_io)?;

    info!(
        "exported {} cells, {} genes ({} in expression subset) to {}",
        metadata.n_cells, metadata.n_genes, metadata.genes_exported, config.out_dir
    );

    Ok(metadata)
}

fn cell_records(data: &Dataset, embedding: &Mat, clusters: &ClusterResult) -> Vec<CellOut> {
    let field = |name: &str| data.meta_column_index(name);
    let celline_col = field("CellLine");
    let pool_col = field("Pool");
    let indication_col = field("Indication");
    let pick = |cell: &crate::input::CellRecord, col: Option<usize>| {
        col.and_then(|j| cell.fields.get(j)).map(|v| v.to_string())
    };

    data.cells
        .iter()
        .enumerate()
        .map(|(i, cell)| CellOut {
            id: cell.id.to_string(),
            umap1: embedding[(i, 0)],
            umap2: embedding[(i, 1)],
            cluster: clusters.labels[i].to_string(),
            celline: pick(cell, celline_col),
            pool: pick(cell, pool_col),
            indication: pick(cell, indication_col),
        })
        .collect()
}

/// All surviving gene ids, lexicographically sorted, deduplicated
fn sorted_gene_ids(data: &Dataset) -> Vec<String> {
    let mut ids: Vec<String> = data.genes.iter().map(|g| g.id.to_string()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Column indices of the exported expression subset, in composition
/// order: dispersion ranking first, then pinned markers.
fn expression_subset(data: &Dataset, stats: &[GeneStats], config: &PipelineConfig) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..stats.len()).collect();
    ranked.sort_by(|&a, &b| {
        let ord = stats[a]
            .dispersion_norm
            .partial_cmp(&stats[b].dispersion_norm)
            .unwrap_or(std::cmp::Ordering::Equal);
        match config.export_dispersion_order {
            DispersionOrder::Largest => ord.reverse().then(a.cmp(&b)),
            DispersionOrder::Smallest => ord.then(a.cmp(&b)),
        }
    });
    ranked.truncate(config.n_export_genes.min(stats.len()));

    let mut included = vec![false; stats.len()];
    for &g in &ranked {
        included[g] = true;
    }
    for marker in &config.marker_genes {
        if let Some(g) = data.genes.iter().position(|r| r.id == *marker) {
            if !included[g] {
                included[g] = true;
                ranked.push(g);
            }
        }
    }
    ranked
}

/// Gene id -> per-cell normalized expression, dense, in cell order
fn expression_columns(
    data: &Dataset,
    normalized: &CsrMat,
    subset: &[usize],
) -> BTreeMap<String, Vec<f32>> {
    let n_cells = normalized.nrows();
    let mut pos = vec![usize::MAX; data.n_genes()];
    for (k, &g) in subset.iter().enumerate() {
        pos[g] = k;
    }

    let mut columns: Vec<Vec<f32>> = vec![vec![0.0; n_cells]; subset.len()];
    for (row, lane) in normalized.row_iter().enumerate() {
        for (&col, &v) in lane.col_indices().iter().zip(lane.values()) {
            let k = pos[col];
            if k != usize::MAX {
                columns[k][row] = v;
            }
        }
    }

    subset
        .iter()
        .zip(columns)
        .map(|(&g, values)| (data.genes[g].id.to_string(), values))
        .collect()
}
