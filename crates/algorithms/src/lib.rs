//! # imgcalc Algorithms
//!
//! Computations built on the imgcalc engine.
//!
//! ## Available Algorithm Categories
//!
//! - **classification**: ISODATA clustering, centre sets, labelling with saved centres
//! - **imagecalc**: value counts, unique values, image comparison, zonal means,
//!   border-edge detection

pub mod classification;
pub mod imagecalc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::classification::{
        BORDER_LABEL, CentreId, CentreSet, CentreStore, ClustererState, InitStrategy,
        IsodataClassifier, IsodataOutcome, IsodataParams, StepOrder, isodata, label_with_centres,
    };
    pub use crate::imagecalc::{
        bands_equal, border_edges, count_pixels_of_value, images_equal, unique_values,
        zonal_mean_image, zonal_means,
    };
    pub use imgcalc_engine::prelude::*;
}
