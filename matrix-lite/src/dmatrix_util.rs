use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

/// Sample d x n matrix from N(0,1) with an explicit generator
pub fn rnorm(dd: usize, nn: usize, rng: &mut StdRng) -> DMatrix<f32> {
    let rvec = (0..(dd * nn)).map(|_| rng.sample(StandardNormal)).collect();
    DMatrix::<f32>::from_vec(dd, nn, rvec)
}

/// Column-wise centring, standardization, and clipping
pub trait MatOps {
    type Mat;

    /// Subtract the column mean from each column
    fn centre_columns_inplace(&mut self);

    /// Z-score each column; a zero-variance column becomes all zero
    fn scale_columns_inplace(&mut self);

    /// Clamp every entry to `[-max_value, max_value]`
    fn clip_inplace(&mut self, max_value: f32);
}

impl MatOps for DMatrix<f32> {
    type Mat = DMatrix<f32>;

    fn centre_columns_inplace(&mut self) {
        let nrows = self.nrows();
        if nrows == 0 {
            return;
        }
        for mut col in self.column_iter_mut() {
            let mean = col.sum() / nrows as f32;
            col.add_scalar_mut(-mean);
        }
    }

    fn scale_columns_inplace(&mut self) {
        let nrows = self.nrows();
        if nrows < 2 {
            self.fill(0.0);
            return;
        }
        for mut col in self.column_iter_mut() {
            let mean = col.sum() / nrows as f32;
            col.add_scalar_mut(-mean);
            let var = col.iter().map(|&x| x * x).sum::<f32>() / (nrows as f32 - 1.0);
            if var > 0.0 {
                col /= var.sqrt();
            } else {
                col.fill(0.0);
            }
        }
    }

    fn clip_inplace(&mut self, max_value: f32) {
        for x in self.iter_mut() {
            *x = x.clamp(-max_value, max_value);
        }
    }
}
