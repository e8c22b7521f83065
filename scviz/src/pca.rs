//! Reducer: principal components of the scaled feature matrix via
//! seeded randomized SVD. Deterministic for a fixed input, component
//! count, and seed.

use crate::common::*;
use crate::error::PipelineError;
use matrix_lite::dmatrix_rsvd::RSVD;
use matrix_lite::dmatrix_util::MatOps;

/// Project cells onto the leading principal components.
///
/// The input is centred per gene (the scaler already z-scores, but
/// clipping shifts column means), decomposed as `X ≈ U diag(S) Vᵀ`,
/// and cell coordinates are `U * diag(S)`. The effective component
/// count is capped by the matrix dimensions.
pub fn principal_components(scaled: &Mat, n_comps: usize, seed: u64) -> anyhow::Result<Mat> {
    let n_cells = scaled.nrows();
    let n_features = scaled.ncols();
    if n_cells == 0 || n_features == 0 {
        return Err(PipelineError::Validation(format!(
            "cannot reduce an empty matrix [{} x {}]",
            n_cells, n_features
        ))
        .into());
    }

    let rank = n_comps.min(n_cells).min(n_features).max(1);

    let mut centred = scaled.clone();
    centred.centre_columns_inplace();

    let (uu, ss, _) = centred
        .rsvd(rank, seed)
        .map_err(|e| PipelineError::Numeric(format!("randomized SVD failed: {}", e)))?;

    if ss.iter().any(|s| !s.is_finite()) {
        return Err(PipelineError::Numeric("non-finite singular values".into()).into());
    }

    let coords = uu * Mat::from_diagonal(&ss);

    info!(
        "PCA: {} cells onto {} components (top singular value {:.3})",
        n_cells,
        coords.ncols(),
        ss[0]
    );

    Ok(coords)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// two blobs along one axis, noise on another
    fn toy_matrix() -> Mat {
        let mut xx = Mat::zeros(10, 4);
        for i in 0..5 {
            xx[(i, 0)] = 10.0 + 0.01 * i as f32;
            xx[(i, 1)] = 0.1 * i as f32;
        }
        for i in 5..10 {
            xx[(i, 0)] = -10.0 - 0.01 * i as f32;
            xx[(i, 1)] = -0.1 * i as f32;
        }
        xx
    }

    #[test]
    fn test_shapes_and_determinism() -> anyhow::Result<()> {
        let xx = toy_matrix();
        let a = principal_components(&xx, 3, 42)?;
        let b = principal_components(&xx, 3, 42)?;

        assert_eq!(a.nrows(), 10);
        assert_eq!(a.ncols(), 3);
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_first_component_separates_blobs() -> anyhow::Result<()> {
        let xx = toy_matrix();
        let coords = principal_components(&xx, 2, 0)?;

        // PC1 of the two groups must have opposite signs
        let sign0 = coords[(0, 0)].signum();
        for i in 0..5 {
            assert_eq!(coords[(i, 0)].signum(), sign0);
        }
        for i in 5..10 {
            assert_eq!(coords[(i, 0)].signum(), -sign0);
        }
        Ok(())
    }

    #[test]
    fn test_component_count_capped_by_dims() -> anyhow::Result<()> {
        let xx = toy_matrix();
        let coords = principal_components(&xx, 50, 1)?;
        assert_eq!(coords.ncols(), 4);
        Ok(())
    }

    #[test]
    fn test_empty_matrix_fails() {
        let xx = Mat::zeros(0, 3);
        assert!(principal_components(&xx, 2, 0).is_err());
    }
}
