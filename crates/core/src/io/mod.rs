//! GeoTIFF access behind the raster collaborator interfaces

mod native;

pub use native::{GeoTiffSink, read_geotiff, read_geotiff_from_buffer, write_geotiff};
