use crate::dmatrix_util::rnorm;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;

type Mat = DMatrix<f32>;
type Vec = DVector<f32>;

pub trait RSVD {
    /// Truncated SVD `X ≈ U diag(S) Vᵀ` with a fixed random seed.
    /// Returns `(U, S, V)` with at most `rank` components.
    fn rsvd(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)> {
        let default_iter = 5;
        let mut rsvd = RandomizedSVD::new(rank, default_iter, seed);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Range finding by Gaussian sketching with power iteration,
/// Alg 4.4 of Halko et al. (2009). The Gaussian test matrix is drawn
/// from a seeded generator so repeated runs are identical.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: Vec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize, seed: u64) -> Self {
        Self {
            max_rank,
            iter,
            seed,
            u_vectors: Mat::zeros(0, 0),
            singular_values: Vec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &Vec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        if nr == 0 || nc == 0 {
            anyhow::bail!("empty matrix [{} x {}]", nr, nc);
        }

        let mut rank = nr.min(nc);
        let mut oversample = 0;

        if self.max_rank > 0 && rank > self.max_rank {
            rank = self.max_rank;
            oversample = 5;
        }

        debug_assert!(rank > 0, "Must be at least rank = 1");

        let qq = self.rand_subspace_iteration(xx, (rank + oversample).min(nr.min(nc)));
        let rank = rank.min(qq.ncols());
        let qq = qq.columns(0, rank).into_owned();

        let bb = qq.transpose() * xx;
        let (sketch_nr, sketch_nc) = (bb.nrows(), bb.ncols());
        let svd = bb.svd(true, true);

        if let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) {
            self.u_vectors = &qq * svd_u.columns(0, rank).into_owned();
            self.v_vectors = svd_vt.transpose().columns(0, rank).into_owned();
            self.singular_values = svd.singular_values.rows(0, rank).into_owned();
            Ok(())
        } else {
            anyhow::bail!("SVD failed on [{} x {}] sketch", sketch_nr, sketch_nc);
        }
    }

    // Find an orthonormal matrix whose range approximates the range of xx
    fn rand_subspace_iteration(&self, xx: &Mat, rank_and_oversample: usize) -> Mat {
        let nc = xx.ncols();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let omega = rnorm(nc, rank_and_oversample, &mut rng);
        let mut qq = (xx * omega).qr().q();

        for _ in 0..self.iter {
            let zz = (xx.transpose() * &qq).qr().q();
            qq = (xx * zz).qr().q();
        }

        let kk = rank_and_oversample.min(qq.ncols());
        qq.columns(0, kk).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rsvd_identity_spectrum() -> anyhow::Result<()> {
        let mut xx = Mat::zeros(8, 8);
        xx.fill_with_identity();

        let (uu, ss, vv) = xx.rsvd(3, 42)?;

        assert_eq!(uu.nrows(), 8);
        assert_eq!(uu.ncols(), 3);
        assert_eq!(vv.ncols(), 3);
        for k in 0..3 {
            assert_relative_eq!(ss[k], 1.0, epsilon = 1e-4);
        }

        // U and V columns are orthonormal
        let utu = uu.transpose() * &uu;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(utu[(i, j)], expected, epsilon = 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_rsvd_rank_one_recovery() -> anyhow::Result<()> {
        // X = u vᵀ with ||u|| = 2, ||v|| = 3 → single singular value 6
        let u = DVector::from_vec(vec![2.0_f32, 0.0, 0.0, 0.0]);
        let v = DVector::from_vec(vec![0.0_f32, 3.0, 0.0]);
        let xx = &u * v.transpose();

        let (_, ss, _) = xx.rsvd(2, 0)?;
        assert_relative_eq!(ss[0], 6.0, epsilon = 1e-3);
        assert!(ss[1].abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_rsvd_seeded_reproducible() -> anyhow::Result<()> {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(3);
        let data: std::vec::Vec<f32> = (0..20 * 10).map(|_| rng.random::<f32>()).collect();
        let xx = Mat::from_vec(20, 10, data);

        let (u1, s1, v1) = xx.rsvd(4, 11)?;
        let (u2, s2, v2) = xx.rsvd(4, 11)?;
        assert_eq!(u1, u2);
        assert_eq!(s1, s2);
        assert_eq!(v1, v2);
        Ok(())
    }

    #[test]
    fn test_rsvd_empty_fails() {
        let xx = Mat::zeros(0, 5);
        assert!(xx.rsvd(2, 0).is_err());
    }
}
