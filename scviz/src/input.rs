//! Loader: parse the metadata table and the count matrix, then align
//! them into one consistent cells-by-genes dataset.
//!
//! Metadata format: tab-delimited, header row with a `NAME` cell-id
//! column, followed by one spurious units row that is discarded.
//! Count matrix format: tab-delimited, row 0 holds cell ids (first
//! field is an empty id label), rows 1-2 hold extra header metadata,
//! and each remaining row is `gene_id<TAB>count...` oriented
//! genes-by-cells on disk.

use crate::common::*;
use crate::error::PipelineError;
use fnv::FnvHashMap;
use matrix_lite::common_io::read_delim_lines;
use rayon::prelude::*;

/// Column renames applied to the metadata header
const META_RENAMES: [(&str, &str); 4] = [
    ("NAME", "CellID"),
    ("Cell_line", "CellLine"),
    ("Pool_ID", "Pool"),
    ("Cancer_type", "Indication"),
];

/// Rows of extra header metadata in the count matrix before the
/// numeric block (cell-id row included)
const COUNTS_SKIP_ROWS: usize = 3;

#[derive(Debug)]
pub struct CellRecord {
    pub id: Box<str>,
    /// Metadata values parallel to `Dataset::meta_columns`
    pub fields: Vec<Box<str>>,
    /// Detected (nonzero) genes, filled by the QC filter
    pub n_genes_detected: u32,
}

#[derive(Debug)]
pub struct GeneRecord {
    pub id: Box<str>,
    /// Cells with a nonzero count, filled by the QC filter
    pub n_cells_detected: u32,
}

/// Aligned matrix plus per-cell and per-gene records.
/// Row order of `counts` always matches `cells`; column order matches
/// `genes`.
#[derive(Debug)]
pub struct Dataset {
    /// cells x genes raw UMI counts
    pub counts: CsrMat,
    pub cells: Vec<CellRecord>,
    pub genes: Vec<GeneRecord>,
    /// Metadata column names (renamed), cell id excluded
    pub meta_columns: Vec<Box<str>>,
}

impl Dataset {
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Position of a metadata column, if present
    pub fn meta_column_index(&self, name: &str) -> Option<usize> {
        self.meta_columns.iter().position(|c| c.as_ref() == name)
    }
}

/// Parse both inputs and intersect them on cell id. Cell order follows
/// the count matrix; metadata rows without a matrix column and matrix
/// columns without metadata are dropped silently.
pub fn load_dataset(metadata_file: &str, counts_file: &str) -> anyhow::Result<Dataset> {
    let meta = parse_metadata(metadata_file)?;
    let raw = parse_counts(counts_file)?;

    info!(
        "parsed {} metadata rows, {} x {} count matrix (genes x cells on disk)",
        meta.rows.len(),
        raw.genes.len(),
        raw.cell_ids.len()
    );

    align(meta, raw)
}

struct MetaTable {
    columns: Vec<Box<str>>,
    /// cell id -> metadata values (parallel to `columns`)
    rows: FnvHashMap<Box<str>, Vec<Box<str>>>,
}

fn parse_metadata(metadata_file: &str) -> anyhow::Result<MetaTable> {
    let lines = read_delim_lines(metadata_file, '\t').map_err(PipelineError::tag_io)?;
    if lines.len() < 2 {
        return Err(PipelineError::Schema(format!(
            "metadata file {} has no data rows",
            metadata_file
        ))
        .into());
    }

    let header: Vec<Box<str>> = lines[0].iter().map(|w| rename_column(w)).collect();
    let id_col = header
        .iter()
        .position(|c| c.as_ref() == "CellID")
        .ok_or_else(|| {
            PipelineError::Schema(format!(
                "metadata file {} has no NAME/CellID column",
                metadata_file
            ))
        })?;

    let columns: Vec<Box<str>> = header
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != id_col)
        .map(|(_, c)| c.clone())
        .collect();

    // row 0 after the header carries type/units annotations, not a cell
    let mut rows: FnvHashMap<Box<str>, Vec<Box<str>>> = FnvHashMap::default();
    for (line_no, words) in lines.iter().enumerate().skip(2) {
        if words.len() != header.len() {
            return Err(PipelineError::Schema(format!(
                "metadata row {} has {} fields, header has {}",
                line_no + 1,
                words.len(),
                header.len()
            ))
            .into());
        }
        let id = words[id_col].clone();
        let fields: Vec<Box<str>> = words
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != id_col)
            .map(|(_, w)| w.clone())
            .collect();
        rows.entry(id).or_insert(fields);
    }

    Ok(MetaTable { columns, rows })
}

fn rename_column(name: &str) -> Box<str> {
    for &(from, to) in META_RENAMES.iter() {
        if name == from {
            return to.into();
        }
    }
    name.into()
}

struct RawCounts {
    cell_ids: Vec<Box<str>>,
    genes: Vec<Box<str>>,
    /// per-gene dense count rows, parallel to `genes`
    rows: Vec<Vec<f32>>,
}

fn parse_counts(counts_file: &str) -> anyhow::Result<RawCounts> {
    let lines = read_delim_lines(counts_file, '\t').map_err(PipelineError::tag_io)?;
    if lines.len() <= COUNTS_SKIP_ROWS {
        return Err(PipelineError::Schema(format!(
            "count matrix {} has no gene rows",
            counts_file
        ))
        .into());
    }

    // row 0: one cell id per column, first field is the id label
    let cell_ids: Vec<Box<str>> = lines[0][1..].to_vec();
    if cell_ids.is_empty() {
        return Err(PipelineError::Schema(format!(
            "count matrix {} header row has no cell ids",
            counts_file
        ))
        .into());
    }

    let n_cells = cell_ids.len();

    let parsed: Vec<std::result::Result<(Box<str>, Vec<f32>), String>> = lines
        [COUNTS_SKIP_ROWS..]
        .par_iter()
        .enumerate()
        .map(|(i, words)| {
            if words.len() != n_cells + 1 {
                return Err(format!(
                    "gene row {} has {} values, expected {}",
                    i + COUNTS_SKIP_ROWS + 1,
                    words.len().saturating_sub(1),
                    n_cells
                ));
            }
            let gene = words[0].clone();
            let mut values = Vec::with_capacity(n_cells);
            for w in &words[1..] {
                let v: f32 = w
                    .parse()
                    .map_err(|_| format!("gene {}: non-numeric count '{}'", gene, w))?;
                if v < 0.0 {
                    return Err(format!("gene {}: negative count {}", gene, v));
                }
                values.push(v);
            }
            Ok((gene, values))
        })
        .collect();

    let mut genes = Vec::with_capacity(parsed.len());
    let mut rows = Vec::with_capacity(parsed.len());
    for item in parsed {
        let (gene, values) = item.map_err(PipelineError::Schema)?;
        genes.push(gene);
        rows.push(values);
    }

    Ok(RawCounts {
        cell_ids,
        genes,
        rows,
    })
}

/// Intersect on cell id, keeping the count-matrix cell order, and
/// transpose into a cells-by-genes sparse matrix.
fn align(meta: MetaTable, raw: RawCounts) -> anyhow::Result<Dataset> {
    // unique ids are a loader output invariant
    {
        let mut seen: FnvHashMap<&str, usize> = FnvHashMap::default();
        for id in raw.cell_ids.iter() {
            let n = seen.entry(id.as_ref()).or_insert(0);
            *n += 1;
            if *n > 1 {
                return Err(PipelineError::Schema(format!(
                    "duplicate cell id '{}' in count matrix",
                    id
                ))
                .into());
            }
        }

        let mut seen: FnvHashMap<&str, usize> = FnvHashMap::default();
        for id in raw.genes.iter() {
            let n = seen.entry(id.as_ref()).or_insert(0);
            *n += 1;
            if *n > 1 {
                return Err(PipelineError::Schema(format!(
                    "duplicate gene id '{}' in count matrix",
                    id
                ))
                .into());
            }
        }
    }

    // cells present in both inputs, in matrix order
    let kept: Vec<(usize, &Box<str>)> = raw
        .cell_ids
        .iter()
        .enumerate()
        .filter(|(_, id)| meta.rows.contains_key(id.as_ref()))
        .collect();

    let n_dropped_matrix = raw.cell_ids.len() - kept.len();
    let n_dropped_meta = meta.rows.len() - kept.len();
    if n_dropped_matrix > 0 || n_dropped_meta > 0 {
        info!(
            "alignment: dropped {} matrix-only and {} metadata-only cells",
            n_dropped_matrix, n_dropped_meta
        );
    }

    if kept.is_empty() {
        return Err(PipelineError::Schema(
            "no shared cell ids between metadata and count matrix".into(),
        )
        .into());
    }

    let n_cells = kept.len();
    let n_genes = raw.genes.len();

    let mut coo = CooMat::new(n_cells, n_genes);
    for (g, row) in raw.rows.iter().enumerate() {
        for (new_c, &(old_c, _)) in kept.iter().enumerate() {
            let v = row[old_c];
            if v != 0.0 {
                coo.push(new_c, g, v);
            }
        }
    }

    let cells: Vec<CellRecord> = kept
        .iter()
        .map(|&(_, id)| CellRecord {
            id: id.clone(),
            fields: meta.rows[id.as_ref()].clone(),
            n_genes_detected: 0,
        })
        .collect();

    let genes: Vec<GeneRecord> = raw
        .genes
        .into_iter()
        .map(|id| GeneRecord {
            id,
            n_cells_detected: 0,
        })
        .collect();

    Ok(Dataset {
        counts: CsrMat::from(&coo),
        cells,
        genes,
        meta_columns: meta.columns,
    })
}
