pub mod common_io;
pub mod dmatrix_rsvd;
pub mod dmatrix_util;
pub mod knn_graph;
