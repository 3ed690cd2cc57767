//! Native GeoTIFF reading/writing on top of the `tiff` crate
//!
//! Only the pieces the raster collaborator needs: chunky (pixel-interleaved)
//! images of any integer or float sample type, and the
//! ModelPixelScale/ModelTiepoint tags for north-up georeferencing.
//! Projections are not decoded from GeoKeys.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array3, ArrayView3};
use num_traits::NumCast;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::{self, ColorType};
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{Error, Result};
use crate::raster::{
    GeoTransform, MemorySink, MultiBandRaster, OutputSpec, RasterSink, RasterSource,
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;

/// Read a GeoTIFF file into a [`MultiBandRaster`], one band per sample
pub fn read_geotiff<P: AsRef<Path>>(path: P) -> Result<MultiBandRaster> {
    let file = File::open(path.as_ref())?;
    decode_geotiff(file)
}

/// Read a GeoTIFF held in memory
pub fn read_geotiff_from_buffer(data: &[u8]) -> Result<MultiBandRaster> {
    decode_geotiff(Cursor::new(data))
}

fn cast_all<T: NumCast + Copy>(buf: &[T]) -> Vec<f64> {
    buf.iter()
        .map(|&v| num_traits::cast::<T, f64>(v).unwrap_or(f64::NAN))
        .collect()
}

fn decode_geotiff<R: Read + Seek>(reader: R) -> Result<MultiBandRaster> {
    let mut decoder = Decoder::new(reader).map_err(|e| Error::tiff("TIFF decode error", e))?;
    let (width, height) = decoder
        .dimensions()
        .map_err(|e| Error::tiff("cannot read dimensions", e))?;
    let (rows, cols) = (height as usize, width as usize);

    let samples = match decoder
        .read_image()
        .map_err(|e| Error::tiff("cannot read image data", e))?
    {
        DecodingResult::U8(buf) => cast_all(&buf),
        DecodingResult::U16(buf) => cast_all(&buf),
        DecodingResult::U32(buf) => cast_all(&buf),
        DecodingResult::U64(buf) => cast_all(&buf),
        DecodingResult::I8(buf) => cast_all(&buf),
        DecodingResult::I16(buf) => cast_all(&buf),
        DecodingResult::I32(buf) => cast_all(&buf),
        DecodingResult::I64(buf) => cast_all(&buf),
        DecodingResult::F32(buf) => cast_all(&buf),
        DecodingResult::F64(buf) => cast_all(&buf),
        #[allow(unreachable_patterns)]
        _ => return Err(Error::Raster("unsupported TIFF sample format".into())),
    };

    let pixels = rows * cols;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(Error::Raster(format!(
            "{} samples do not tile a {rows}x{cols} image",
            samples.len()
        )));
    }
    let bands = samples.len() / pixels;

    // Chunky layout: sample `b` of pixel `p` lives at `p * bands + b`
    let data = Array3::from_shape_fn((bands, rows, cols), |(b, r, c)| {
        samples[(r * cols + c) * bands + b]
    });
    let mut raster = MultiBandRaster::from_array(data);
    if let Some(transform) = read_geotransform(&mut decoder) {
        raster.set_transform(transform);
    }
    debug!(rows, cols, bands, "decoded GeoTIFF");
    Ok(raster)
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<GeoTransform> {
    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE)).ok()?;
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT)).ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // tiepoint [I, J, K, X, Y, Z] ties raster (I, J) to model (X, Y)
    Some(GeoTransform::new(
        tiepoint[3] - tiepoint[0] * scale[0],
        tiepoint[4] + tiepoint[1] * scale[1],
        scale[0],
        -scale[1],
    ))
}

/// Write a raster as a 32-bit float GeoTIFF (1, 3 or 4 bands)
pub fn write_geotiff<P: AsRef<Path>>(raster: &MultiBandRaster, path: P) -> Result<()> {
    let file = BufWriter::new(File::create(path.as_ref())?);
    encode_geotiff(raster.view(), &raster.transform(), file)
}

fn encode_geotiff<W: Write + Seek>(
    data: ArrayView3<'_, f64>,
    transform: &GeoTransform,
    writer: W,
) -> Result<()> {
    match data.dim().0 {
        1 => encode_as::<colortype::Gray32Float, W>(data, transform, writer),
        3 => encode_as::<colortype::RGB32Float, W>(data, transform, writer),
        4 => encode_as::<colortype::RGBA32Float, W>(data, transform, writer),
        n => Err(unsupported_band_count(n)),
    }
}

fn unsupported_band_count(bands: usize) -> Error {
    Error::Configuration(format!(
        "GeoTIFF output supports 1, 3 or 4 bands, not {bands}"
    ))
}

fn encode_as<C, W>(data: ArrayView3<'_, f64>, transform: &GeoTransform, writer: W) -> Result<()>
where
    C: ColorType<Inner = f32>,
    W: Write + Seek,
{
    let (bands, rows, cols) = data.dim();
    let mut interleaved = Vec::with_capacity(bands * rows * cols);
    for r in 0..rows {
        for c in 0..cols {
            for b in 0..bands {
                interleaved.push(data[[b, r, c]] as f32);
            }
        }
    }

    let mut encoder = TiffEncoder::new(writer).map_err(|e| Error::tiff("TIFF encoder error", e))?;
    let mut image = encoder
        .new_image::<C>(cols as u32, rows as u32)
        .map_err(|e| Error::tiff("cannot create TIFF image", e))?;

    let scale = [transform.pixel_width, transform.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &scale[..])
        .map_err(|e| Error::tiff("cannot write scale tag", e))?;
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x, transform.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(MODEL_TIEPOINT), &tiepoint[..])
        .map_err(|e| Error::tiff("cannot write tiepoint tag", e))?;
    // Version 1.1.0 with two keys: projected model, pixel-is-area
    let geokeys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 1, 1025, 0, 1, 1];
    image
        .encoder()
        .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &geokeys[..])
        .map_err(|e| Error::tiff("cannot write geokey tag", e))?;

    image
        .write_data(&interleaved)
        .map_err(|e| Error::tiff("cannot write image data", e))
}

/// [`RasterSink`] that writes a GeoTIFF file when the pass finishes.
///
/// The TIFF encoder needs the whole image, so blocks are collected in
/// memory and encoded in `finish`. Nothing is created on disk for a pass
/// that fails.
pub struct GeoTiffSink {
    path: PathBuf,
    buffer: MemorySink,
}

impl GeoTiffSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buffer: MemorySink::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RasterSink for GeoTiffSink {
    fn begin(&mut self, spec: &OutputSpec) -> Result<()> {
        if !matches!(spec.bands, 1 | 3 | 4) {
            return Err(unsupported_band_count(spec.bands));
        }
        self.buffer.begin(spec)
    }

    fn write_block(&mut self, row_offset: usize, block: ArrayView3<'_, f64>) -> Result<()> {
        self.buffer.write_block(row_offset, block)
    }

    fn finish(&mut self) -> Result<()> {
        self.buffer.finish()?;
        let raster = std::mem::take(&mut self.buffer).into_raster()?;
        write_geotiff(&raster, &self.path)?;
        debug!(path = %self.path.display(), "wrote GeoTIFF");
        Ok(())
    }
}
