//! Scaler: densify the working feature set and standardize each gene,
//! clipping extreme values. Output feeds only the reducer.

use crate::common::*;
use matrix_lite::dmatrix_util::MatOps;

/// Dense cells-by-selected-genes view of a sparse matrix.
/// `selected` holds sorted column indices into `normalized`.
pub fn dense_submatrix(normalized: &CsrMat, selected: &[usize]) -> Mat {
    let n_cells = normalized.nrows();
    let col_of = {
        let mut map = vec![usize::MAX; normalized.ncols()];
        for (new_j, &old_j) in selected.iter().enumerate() {
            map[old_j] = new_j;
        }
        map
    };

    let mut dense = Mat::zeros(n_cells, selected.len());
    for (row, lane) in normalized.row_iter().enumerate() {
        for (&col, &v) in lane.col_indices().iter().zip(lane.values()) {
            let new_j = col_of[col];
            if new_j != usize::MAX {
                dense[(row, new_j)] = v;
            }
        }
    }
    dense
}

/// Per-gene z-score (zero-variance genes map to 0) followed by
/// clipping to `[-max_value, max_value]`.
pub fn scale_and_clip(mat: &mut Mat, max_value: f32) {
    mat.scale_columns_inplace();
    mat.clip_inplace(max_value);
    info!(
        "scaled {} x {} feature matrix, clipped at ±{}",
        mat.nrows(),
        mat.ncols(),
        max_value
    );
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
    fn test_dense_submatrix_selects_columns() {
        let x = csr_from_rows(&[&[1.0, 2.0, 3.0, 4.0], &[5.0, 0.0, 7.0, 8.0]]);
        let dense = dense_submatrix(&x, &[1, 3]);

        assert_eq!(dense.nrows(), 2);
        assert_eq!(dense.ncols(), 2);
        assert_eq!(dense[(0, 0)], 2.0);
        assert_eq!(dense[(1, 0)], 0.0);
        assert_eq!(dense[(0, 1)], 4.0);
        assert_eq!(dense[(1, 1)], 8.0);
    }

    #[test]
    fn test_scale_and_clip_bounds() {
        let x = csr_from_rows(&[
            &[0.0, 1.0],
            &[0.0, 1.0],
            &[0.0, 1.0],
            &[1000.0, 1.0],
        ]);
        let mut dense = dense_submatrix(&x, &[0, 1]);
        scale_and_clip(&mut dense, 1.0);

        for &v in dense.iter() {
            assert!(v.abs() <= 1.0, "value {} escaped the clip", v);
        }
        // constant gene maps to all zero
        assert!(dense.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_scaled_columns_centred() {
        let x = csr_from_rows(&[&[1.0, 4.0], &[2.0, 5.0], &[3.0, 6.0]]);
        let mut dense = dense_submatrix(&x, &[0, 1]);
        scale_and_clip(&mut dense, 10.0);

        for col in dense.column_iter() {
            assert_relative_eq!(col.sum(), 0.0, epsilon = 1e-5);
        }
    }
}
