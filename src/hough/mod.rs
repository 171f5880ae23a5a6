/// Defines a hough forest.
/// For literature see
/// * https://pages.iai.uni-bonn.de/gall_juergen/download/jgall_houghforest_cvpr09.pdf

pub mod predictor;
pub mod houghforest;
pub mod forest;
pub mod prediction;
