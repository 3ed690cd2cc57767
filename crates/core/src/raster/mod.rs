//! Raster data structures and the raster collaborator interfaces

mod dataset;
mod extent;
mod geotransform;
mod multiband;

pub use dataset::{MemorySink, OutputSpec, RasterSink, RasterSource, check_aligned};
pub use extent::Extent;
pub use geotransform::GeoTransform;
pub use multiband::MultiBandRaster;

/// Whether a band vector marks a border (no-data) pixel.
///
/// By convention a pixel whose first band is exactly zero lies outside the
/// valid data; it is excluded from every accumulation and receives the
/// caller's sentinel output. An empty vector is treated as border.
#[inline]
pub fn is_border(bands: &[f64]) -> bool {
    bands.first().is_none_or(|&v| v == 0.0)
}

/// Whether a band vector is left out of statistical passes.
///
/// Border pixels are excluded, and so is any pixel with a non-finite band,
/// since float rasters commonly store no-data as NaN.
#[inline]
pub fn is_excluded(bands: &[f64]) -> bool {
    is_border(bands) || bands.iter().any(|v| !v.is_finite())
}
