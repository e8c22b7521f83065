pub use log::info;

pub type Mat = nalgebra::DMatrix<f32>;
pub type CsrMat = nalgebra_sparse::CsrMatrix<f32>;
pub type CooMat = nalgebra_sparse::CooMatrix<f32>;
