//! QC filter: drop low-information genes, then low-information cells.
//!
//! Gene removal changes per-cell detected-gene counts, so the gene cut
//! always completes before cell thresholds are evaluated.

use crate::common::*;
use crate::error::PipelineError;
use crate::input::Dataset;

#[derive(Debug)]
pub struct QcSummary {
    pub genes_dropped: usize,
    pub cells_dropped: usize,
}

/// Apply both cuts and rebuild the matrix. Consumes the input dataset
/// and produces a new one; surviving cell/gene order is preserved.
///
/// * drop genes detected in fewer than `min_cells` cells
/// * drop cells with fewer than `min_genes` genes detected on the
///   already gene-filtered matrix
pub fn filter_counts(
    data: Dataset,
    min_cells: usize,
    min_genes: usize,
) -> anyhow::Result<(Dataset, QcSummary)> {
    let n_cells = data.n_cells();
    let n_genes = data.n_genes();

    // cut (a): genes by cells-detected
    let cells_per_gene = nnz_per_column(&data.counts, n_genes);
    let keep_gene: Vec<bool> = cells_per_gene
        .iter()
        .map(|&n| n as usize >= min_cells)
        .collect();
    let gene_map = index_map(&keep_gene);
    let n_kept_genes = gene_map.iter().filter(|x| x.is_some()).count();

    if n_kept_genes == 0 {
        return Err(PipelineError::Validation(format!(
            "no gene is detected in >= {} cells",
            min_cells
        ))
        .into());
    }

    // cut (b): cells by genes-detected, counted on the gene-filtered matrix
    let mut genes_per_cell = vec![0_u32; n_cells];
    for (row, lane) in data.counts.row_iter().enumerate() {
        for (&col, &v) in lane.col_indices().iter().zip(lane.values()) {
            if v != 0.0 && keep_gene[col] {
                genes_per_cell[row] += 1;
            }
        }
    }

    let keep_cell: Vec<bool> = genes_per_cell
        .iter()
        .map(|&n| n as usize >= min_genes)
        .collect();
    let cell_map = index_map(&keep_cell);
    let n_kept_cells = cell_map.iter().filter(|x| x.is_some()).count();

    if n_kept_cells == 0 {
        return Err(PipelineError::Validation(format!(
            "no cell has >= {} detected genes after gene filtering",
            min_genes
        ))
        .into());
    }

    // rebuild the matrix with remapped indices
    let mut coo = CooMat::new(n_kept_cells, n_kept_genes);
    for (row, lane) in data.counts.row_iter().enumerate() {
        let Some(new_row) = cell_map[row] else {
            continue;
        };
        for (&col, &v) in lane.col_indices().iter().zip(lane.values()) {
            if let Some(new_col) = gene_map[col] {
                if v != 0.0 {
                    coo.push(new_row, new_col, v);
                }
            }
        }
    }

    let cells = data
        .cells
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep_cell[*i])
        .map(|(i, mut c)| {
            c.n_genes_detected = genes_per_cell[i];
            c
        })
        .collect::<Vec<_>>();

    let genes = data
        .genes
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep_gene[*i])
        .map(|(i, mut g)| {
            g.n_cells_detected = cells_per_gene[i];
            g
        })
        .collect::<Vec<_>>();

    let summary = QcSummary {
        genes_dropped: n_genes - n_kept_genes,
        cells_dropped: n_cells - n_kept_cells,
    };

    info!(
        "QC: dropped {} / {} genes, {} / {} cells",
        summary.genes_dropped, n_genes, summary.cells_dropped, n_cells
    );

    Ok((
        Dataset {
            counts: CsrMat::from(&coo),
            cells,
            genes,
            meta_columns: data.meta_columns,
        },
        summary,
    ))
}

/// Nonzero entries per column of a CSR matrix
fn nnz_per_column(counts: &CsrMat, n_cols: usize) -> Vec<u32> {
    let mut nnz = vec![0_u32; n_cols];
    for (&col, &v) in counts.col_indices().iter().zip(counts.values()) {
        if v != 0.0 {
            nnz[col] += 1;
        }
    }
    nnz
}

/// old index -> new index for kept entries, None for dropped ones
fn index_map(keep: &[bool]) -> Vec<Option<usize>> {
    let mut next = 0;
    keep.iter()
        .map(|&k| {
            if k {
                let i = next;
                next += 1;
                Some(i)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{CellRecord, GeneRecord};

    fn toy_dataset(rows: &[&[f32]]) -> Dataset {
        let n_cells = rows.len();
        let n_genes = rows[0].len();
        let mut coo = CooMat::new(n_cells, n_genes);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    coo.push(i, j, v);
                }
            }
        }
        Dataset {
            counts: CsrMat::from(&coo),
            cells: (0..n_cells)
                .map(|i| CellRecord {
                    id: format!("c{}", i).into(),
                    fields: vec![],
                    n_genes_detected: 0,
                })
                .collect(),
            genes: (0..n_genes)
                .map(|j| GeneRecord {
                    id: format!("G{}", j).into(),
                    n_cells_detected: 0,
                })
                .collect(),
            meta_columns: vec![],
        }
    }

    #[test]
    fn test_zero_only_gene_dropped() -> anyhow::Result<()> {
        // 3 cells x 4 genes; gene 2 is all-zero, everything else survives
        let data = toy_dataset(&[
            &[0.0, 5.0, 0.0, 10.0],
            &[2.0, 0.0, 0.0, 8.0],
            &[100.0, 0.0, 0.0, 0.0],
        ]);

        let (filtered, summary) = filter_counts(data, 1, 1)?;
        assert_eq!(filtered.n_cells(), 3);
        assert_eq!(filtered.n_genes(), 3);
        assert_eq!(summary.genes_dropped, 1);
        assert_eq!(summary.cells_dropped, 0);
        assert_eq!(
            filtered.genes.iter().map(|g| g.id.as_ref()).collect::<Vec<_>>(),
            vec!["G0", "G1", "G3"]
        );
        Ok(())
    }

    #[test]
    fn test_zero_thresholds_are_identity() -> anyhow::Result<()> {
        let rows: &[&[f32]] = &[
            &[0.0, 5.0, 0.0, 10.0],
            &[2.0, 0.0, 0.0, 8.0],
            &[100.0, 0.0, 0.0, 0.0],
        ];
        let data = toy_dataset(rows);
        let before = nalgebra_sparse::convert::serial::convert_csr_dense(&data.counts);

        let (filtered, summary) = filter_counts(data, 0, 0)?;
        let after = nalgebra_sparse::convert::serial::convert_csr_dense(&filtered.counts);

        assert_eq!(before, after);
        assert_eq!(summary.genes_dropped, 0);
        assert_eq!(summary.cells_dropped, 0);
        Ok(())
    }

    #[test]
    fn test_cell_cut_counts_on_gene_filtered_matrix() -> anyhow::Result<()> {
        // gene 0 only detected in cell 0; with min_cells=2 it is dropped
        // first, leaving cell 0 with a single detected gene
        let data = toy_dataset(&[
            &[7.0, 1.0, 0.0],
            &[0.0, 2.0, 3.0],
            &[0.0, 4.0, 5.0],
        ]);

        let (filtered, _) = filter_counts(data, 2, 2)?;
        assert_eq!(filtered.n_genes(), 2);
        assert_eq!(filtered.n_cells(), 2);
        assert!(filtered.cells.iter().all(|c| c.id.as_ref() != "c0"));
        Ok(())
    }

    #[test]
    fn test_qc_metrics_recomputable() -> anyhow::Result<()> {
        let data = toy_dataset(&[
            &[0.0, 5.0, 0.0, 10.0],
            &[2.0, 0.0, 0.0, 8.0],
            &[100.0, 0.0, 0.0, 0.0],
        ]);

        let (filtered, _) = filter_counts(data, 1, 1)?;

        // recompute detected counts independently from the filtered matrix
        let dense = nalgebra_sparse::convert::serial::convert_csr_dense(&filtered.counts);
        for (i, cell) in filtered.cells.iter().enumerate() {
            let nnz = dense.row(i).iter().filter(|&&v| v != 0.0).count();
            assert_eq!(nnz as u32, cell.n_genes_detected);
            assert!(nnz >= 1);
        }
        for (j, gene) in filtered.genes.iter().enumerate() {
            let nnz = dense.column(j).iter().filter(|&&v| v != 0.0).count();
            assert_eq!(nnz as u32, gene.n_cells_detected);
            assert!(nnz >= 1);
        }
        Ok(())
    }

    #[test]
    fn test_empty_result_is_validation_error() {
        let data = toy_dataset(&[&[1.0, 0.0], &[0.0, 1.0]]);
        let err = filter_counts(data, 10, 10).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Validation(_))
        ));
    }
}
