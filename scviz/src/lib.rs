pub mod cluster;
pub mod common;
pub mod config;
pub mod error;
pub mod export;
pub mod hvg;
pub mod input;
pub mod neighbors;
pub mod normalize;
pub mod pca;
pub mod pipeline;
pub mod qc;
pub mod scale;
pub mod umap;
