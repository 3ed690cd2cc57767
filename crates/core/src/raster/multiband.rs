//! In-memory multi-band raster

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, s};

use crate::error::{Error, Result};
use crate::raster::{GeoTransform, RasterSource};

/// A georeferenced stack of co-registered `f64` bands held in memory.
///
/// Data is stored band-sequential as `(band, row, col)`. This is the
/// in-memory implementation of [`RasterSource`]; it is also what
/// [`MemorySink`](crate::raster::MemorySink) produces.
///
/// # Example
///
/// ```
/// use imgcalc_core::raster::{MultiBandRaster, RasterSource};
///
/// let raster = MultiBandRaster::from_vec(2, 2, 3, (0..12).map(|v| v as f64).collect()).unwrap();
/// assert_eq!(raster.band_count(), 2);
/// assert_eq!(raster.get(1, 0, 0).unwrap(), 6.0);
/// ```
#[derive(Debug, Clone)]
pub struct MultiBandRaster {
    data: Array3<f64>,
    transform: GeoTransform,
    projection: Option<String>,
}

impl MultiBandRaster {
    /// Zero-filled raster
    pub fn new(bands: usize, rows: usize, cols: usize) -> Self {
        Self::from_array(Array3::zeros((bands, rows, cols)))
    }

    /// Build from band-sequential data (`bands * rows * cols` values)
    pub fn from_vec(bands: usize, rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        let array = Array3::from_shape_vec((bands, rows, cols), data).map_err(|_| {
            Error::Configuration(format!(
                "buffer does not match {bands} bands of {rows}x{cols}"
            ))
        })?;
        Ok(Self::from_array(array))
    }

    /// Stack single-band arrays; all must share a shape
    pub fn from_bands(bands: Vec<Array2<f64>>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(Error::Configuration("at least one band is required".into()));
        };
        let (rows, cols) = first.dim();
        let mut data = Array3::zeros((bands.len(), rows, cols));
        for (i, band) in bands.iter().enumerate() {
            if band.dim() != (rows, cols) {
                return Err(Error::SizeMismatch {
                    er: rows,
                    ec: cols,
                    ar: band.nrows(),
                    ac: band.ncols(),
                });
            }
            data.index_axis_mut(Axis(0), i).assign(band);
        }
        Ok(Self::from_array(data))
    }

    pub fn from_array(data: Array3<f64>) -> Self {
        Self {
            data,
            transform: GeoTransform::default(),
            projection: None,
        }
    }

    pub fn with_transform(mut self, transform: GeoTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_projection(mut self, projection: impl Into<String>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn set_transform(&mut self, transform: GeoTransform) {
        self.transform = transform;
    }

    pub fn set_projection(&mut self, projection: Option<String>) {
        self.projection = projection;
    }

    pub fn rows(&self) -> usize {
        self.data.dim().1
    }

    pub fn cols(&self) -> usize {
        self.data.dim().2
    }

    pub fn get(&self, band: usize, row: usize, col: usize) -> Result<f64> {
        self.data
            .get((band, row, col))
            .copied()
            .ok_or_else(|| {
                Error::Raster(format!(
                    "cell ({band}, {row}, {col}) outside raster of shape {:?}",
                    self.data.dim()
                ))
            })
    }

    pub fn set(&mut self, band: usize, row: usize, col: usize, value: f64) -> Result<()> {
        let dim = self.data.dim();
        let cell = self.data.get_mut((band, row, col)).ok_or_else(|| {
            Error::Raster(format!("cell ({band}, {row}, {col}) outside raster of shape {dim:?}"))
        })?;
        *cell = value;
        Ok(())
    }

    pub fn band(&self, band: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), band)
    }

    pub fn view(&self) -> ArrayView3<'_, f64> {
        self.data.view()
    }

    pub fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    pub fn into_array(self) -> Array3<f64> {
        self.data
    }
}

impl RasterSource for MultiBandRaster {
    fn shape(&self) -> (usize, usize) {
        (self.rows(), self.cols())
    }

    fn band_count(&self) -> usize {
        self.data.dim().0
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn projection(&self) -> Option<&str> {
        self.projection.as_deref()
    }

    fn read_block(&self, row_offset: usize, rows: usize) -> Result<Array3<f64>> {
        let end = row_offset + rows;
        if end > self.rows() {
            return Err(Error::Raster(format!(
                "block rows {row_offset}..{end} outside raster with {} rows",
                self.rows()
            )));
        }
        Ok(self.data.slice(s![.., row_offset..end, ..]).to_owned())
    }
}
