//! Normalizer: rescale each cell to a fixed total count, then apply
//! `log(1 + x)` element-wise. Shape and sparsity pattern are
//! preserved; a new matrix is produced rather than mutating the input.

use crate::common::*;
use crate::error::PipelineError;
use crate::input::CellRecord;

/// Per-cell total-count normalization to `target_sum`, then log1p.
///
/// A cell whose total count is zero cannot be rescaled; that is a
/// fatal validation error rather than a silent NaN.
pub fn normalize_log1p(
    counts: &CsrMat,
    cells: &[CellRecord],
    target_sum: f32,
) -> anyhow::Result<CsrMat> {
    if target_sum <= 0.0 {
        return Err(PipelineError::Validation(format!(
            "target_sum must be positive, got {}",
            target_sum
        ))
        .into());
    }

    let mut values = Vec::with_capacity(counts.nnz());
    for (row, lane) in counts.row_iter().enumerate() {
        let total: f32 = lane.values().iter().sum();
        if total <= 0.0 {
            let id = cells
                .get(row)
                .map(|c| c.id.as_ref())
                .unwrap_or("<unknown>");
            return Err(PipelineError::Validation(format!(
                "cell '{}' has zero total count and cannot be normalized",
                id
            ))
            .into());
        }
        let scale = target_sum / total;
        values.extend(lane.values().iter().map(|&v| (v * scale).ln_1p()));
    }

    let pattern = counts.pattern().clone();
    let normalized = CsrMat::try_from_pattern_and_values(pattern, values)
        .map_err(|e| PipelineError::Numeric(format!("rebuilding normalized matrix: {}", e)))?;

    info!(
        "normalized {} cells to target_sum {} (log1p applied)",
        counts.nrows(),
        target_sum
    );

    Ok(normalized)
}
