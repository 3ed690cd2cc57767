//! # imgcalc Core
//!
//! Core types, errors and raster access for the imgcalc workspace.
//!
//! This crate provides:
//! - `MultiBandRaster`: in-memory stack of co-registered bands
//! - `GeoTransform` / `Extent`: georeferencing of pixel grids
//! - `RasterSource` / `RasterSink`: the narrow block-wise interfaces every
//!   computation reads and writes through
//! - Minimal GeoTIFF I/O behind those interfaces

pub mod error;
pub mod io;
pub mod raster;

pub use error::{Error, ErrorKind, Result};
pub use raster::{
    Extent, GeoTransform, MemorySink, MultiBandRaster, OutputSpec, RasterSink, RasterSource,
    is_border, is_excluded,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::raster::{
        Extent, GeoTransform, MemorySink, MultiBandRaster, OutputSpec, RasterSink, RasterSource,
        is_border, is_excluded,
    };
}
