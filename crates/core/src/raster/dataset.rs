//! Narrow interfaces to the raster collaborator
//!
//! Computations never open files themselves. They see input through
//! [`RasterSource`] (grid metadata plus row-block reads) and emit output
//! through [`RasterSink`] (row-block writes). The in-memory implementations
//! live here; GeoTIFF-backed ones live in [`crate::io`].

use ndarray::{Array3, ArrayView3, s};

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, MultiBandRaster};

/// Read access to a multi-band dataset, one block of full-width rows at a time.
pub trait RasterSource: Send + Sync {
    /// Dimensions as (rows, cols)
    fn shape(&self) -> (usize, usize);

    fn band_count(&self) -> usize;

    fn transform(&self) -> GeoTransform;

    /// Projection as WKT, if known
    fn projection(&self) -> Option<&str>;

    /// Read `rows` rows starting at `row_offset`, shaped `(bands, rows, cols)`
    fn read_block(&self, row_offset: usize, rows: usize) -> Result<Array3<f64>>;
}

/// Description of the raster a sink is about to receive
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub transform: GeoTransform,
    pub projection: Option<String>,
}

/// Write access to an output dataset.
///
/// Blocks arrive in ascending row order. A sink whose `finish` was never
/// called holds no valid raster.
pub trait RasterSink {
    fn begin(&mut self, spec: &OutputSpec) -> Result<()>;

    /// Write a `(bands, rows, cols)` block whose first row is `row_offset`
    fn write_block(&mut self, row_offset: usize, block: ArrayView3<'_, f64>) -> Result<()>;

    fn finish(&mut self) -> Result<()>;
}

/// Sink that assembles the output into a [`MultiBandRaster`]
#[derive(Debug, Default)]
pub struct MemorySink {
    spec: Option<OutputSpec>,
    data: Option<Array3<f64>>,
    rows_written: usize,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows received so far
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Take the assembled raster. Fails unless the pass completed.
    pub fn into_raster(self) -> Result<MultiBandRaster> {
        match (self.finished, self.spec, self.data) {
            (true, Some(spec), Some(data)) => {
                let mut raster = MultiBandRaster::from_array(data).with_transform(spec.transform);
                raster.set_projection(spec.projection);
                Ok(raster)
            }
            _ => Err(Error::Configuration(
                "output raster is incomplete: the pass writing it did not finish".into(),
            )),
        }
    }
}

impl RasterSink for MemorySink {
    fn begin(&mut self, spec: &OutputSpec) -> Result<()> {
        self.data = Some(Array3::zeros((spec.bands, spec.rows, spec.cols)));
        self.spec = Some(spec.clone());
        self.rows_written = 0;
        self.finished = false;
        Ok(())
    }

    fn write_block(&mut self, row_offset: usize, block: ArrayView3<'_, f64>) -> Result<()> {
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| Error::Raster("write_block called before begin".into()))?;
        let (bands, rows, cols) = block.dim();
        let (out_bands, out_rows, out_cols) = data.dim();
        if bands != out_bands || cols != out_cols || row_offset + rows > out_rows {
            return Err(Error::Raster(format!(
                "block {bands}x{rows}x{cols} at row {row_offset} does not fit output {out_bands}x{out_rows}x{out_cols}"
            )));
        }
        data.slice_mut(s![.., row_offset..row_offset + rows, ..])
            .assign(&block);
        self.rows_written += rows;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.data.is_none() {
            return Err(Error::Raster("finish called before begin".into()));
        }
        self.finished = true;
        Ok(())
    }
}

/// Check that every source shares the first source's pixel grid.
///
/// `offset` is added to the reported input index so callers validating
/// several source lists can report positions in a combined numbering.
pub fn check_aligned(sources: &[&dyn RasterSource], offset: usize) -> Result<()> {
    let Some(first) = sources.first() else {
        return Ok(());
    };
    let shape = first.shape();
    let transform = first.transform();
    for (i, src) in sources.iter().enumerate().skip(1) {
        if src.shape() != shape {
            return Err(Error::GridMismatch {
                index: i + offset,
                reason: format!("dimensions {:?} differ from {:?}", src.shape(), shape),
            });
        }
        if !src.transform().approx_eq(&transform) {
            return Err(Error::GridMismatch {
                index: i + offset,
                reason: format!(
                    "geotransform {:?} differs from {:?}",
                    src.transform().to_gdal(),
                    transform.to_gdal()
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rows: usize, cols: usize, bands: usize) -> OutputSpec {
        OutputSpec {
            rows,
            cols,
            bands,
            transform: GeoTransform::default(),
            projection: Some("LOCAL_CS[\"test\"]".into()),
        }
    }

    #[test]
    fn test_memory_sink_assembles_blocks() {
        let mut sink = MemorySink::new();
        sink.begin(&spec(3, 2, 1)).unwrap();
        sink.write_block(0, Array3::from_elem((1, 2, 2), 1.0).view()).unwrap();
        sink.write_block(2, Array3::from_elem((1, 1, 2), 2.0).view()).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.rows_written(), 3);

        let raster = sink.into_raster().unwrap();
        assert_eq!(raster.get(0, 1, 1).unwrap(), 1.0);
        assert_eq!(raster.get(0, 2, 0).unwrap(), 2.0);
        assert_eq!(raster.projection(), Some("LOCAL_CS[\"test\"]"));
    }

    #[test]
    fn test_unfinished_sink_has_no_raster() {
        let mut sink = MemorySink::new();
        sink.begin(&spec(2, 2, 1)).unwrap();
        sink.write_block(0, Array3::zeros((1, 1, 2)).view()).unwrap();
        assert!(sink.into_raster().unwrap_err().is_configuration());
    }

    #[test]
    fn test_rejects_misfit_block() {
        let mut sink = MemorySink::new();
        sink.begin(&spec(2, 2, 1)).unwrap();
        assert!(sink.write_block(1, Array3::zeros((1, 2, 2)).view()).is_err());
        assert!(sink.write_block(0, Array3::zeros((2, 1, 2)).view()).is_err());
    }

    #[test]
    fn test_check_aligned() {
        let a = MultiBandRaster::new(1, 4, 4);
        let b = MultiBandRaster::new(3, 4, 4);
        let c = MultiBandRaster::new(1, 4, 5);
        let d = MultiBandRaster::new(1, 4, 4).with_transform(GeoTransform::new(10.0, 0.0, 1.0, -1.0));

        assert!(check_aligned(&[&a, &b], 0).is_ok());
        match check_aligned(&[&a, &b, &c], 0) {
            Err(Error::GridMismatch { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected grid mismatch, got {other:?}"),
        }
        assert!(check_aligned(&[&a, &d], 0).unwrap_err().is_configuration());
    }
}
