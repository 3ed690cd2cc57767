//! Image calculations expressed as engine passes
//!
//! - **Value counts**: pixels equal to given values, optionally within a region
//! - **Unique values**: distinct integer values of a band
//! - **Comparison**: whole-image and single-band equality
//! - **Zonal means**: per-zone band means from an integer zone raster
//! - **Border edges**: valid pixels next to border cells

mod compare;
mod count;
mod edges;
mod unique;
mod zonal;

pub use compare::{BandComparison, bands_equal, images_equal};
pub use count::{ValueCounter, count_pixels_of_value};
pub use edges::{BorderEdges, border_edges};
pub use unique::{UniqueValues, unique_values};
pub use zonal::{ZonalMeans, ZoneMean, zonal_mean_image, zonal_means};
