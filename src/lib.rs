extern crate rand;
#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate rayon;

extern crate image;
extern crate imageproc;

#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;

#[cfg(test)]
extern crate tempfile;

pub mod errors;
pub mod types;
pub mod meancov_estimation;
pub mod hog;
pub mod features;
pub mod dataset;
pub mod hough;

pub use dataset::PatchSet;
pub use features::FeatureStack;
pub use hog::HogExtractor;
pub use hough::forest::{Ensemble, ScaleFilter, TrainParameters};
pub use hough::houghforest::ClassRegressionTree;
pub use hough::predictor::{TrainingMode, TreePredictor};
