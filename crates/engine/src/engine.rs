//! Block-wise driver that streams co-registered rasters through a [`PixelFunction`]

use imgcalc_core::raster::check_aligned;
use imgcalc_core::{Error, Extent, GeoTransform, OutputSpec, RasterSink, RasterSource, Result};
use ndarray::{Array3, ArrayView3, Axis, concatenate, s};
use tracing::{debug, trace};

use crate::block::{Block, BlockIterator};
use crate::function::{CalcInput, CalcMode, CalcOutcome, PixelFunction, PixelPos, Window};
use crate::strategy::ProcessingMode;

/// Engine settings shared by every pass
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Rows per block; bounds the memory of one worker
    pub block_rows: usize,
    pub processing: ProcessingMode,
    /// Region extent modes are restricted to
    pub region: Option<Extent>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_rows: 256,
            processing: ProcessingMode::Parallel,
            region: None,
        }
    }
}

impl EngineConfig {
    pub fn sequential() -> Self {
        Self {
            processing: ProcessingMode::Sequential,
            ..Self::default()
        }
    }

    pub fn with_block_rows(mut self, block_rows: usize) -> Self {
        self.block_rows = block_rows;
        self
    }

    pub fn with_region(mut self, region: Extent) -> Self {
        self.region = Some(region);
        self
    }
}

/// Counters for one completed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub mode: CalcMode,
    pub blocks: usize,
    /// Pixels visited
    pub pixels: usize,
    /// Invocations of the function (pixels outside the region are not invoked)
    pub calls: usize,
    /// Pixels for which a window predicate held
    pub condition_hits: usize,
}

struct BlockResult<F> {
    block: Block,
    local: F,
    output: Option<Array3<f64>>,
    pixels: usize,
    calls: usize,
    hits: usize,
}

/// Streams one or more pixel-aligned rasters through pixel functions.
///
/// Float sources are stacked in the order given to form the band vector;
/// integer sources (mixed modes only) form a separate vector of `i64`.
/// Every pass partitions the rows into blocks, hands waves of blocks to the
/// worker pool, and at each wave barrier merges worker accumulators and
/// writes outputs in block order.
pub struct CalcEngine<'a> {
    sources: Vec<&'a dyn RasterSource>,
    int_sources: Vec<&'a dyn RasterSource>,
    config: EngineConfig,
}

impl<'a> CalcEngine<'a> {
    pub fn new(sources: Vec<&'a dyn RasterSource>) -> Self {
        Self {
            sources,
            int_sources: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_integer_sources(mut self, sources: Vec<&'a dyn RasterSource>) -> Self {
        self.int_sources = sources;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dimensions as (rows, cols) of the stacked grid
    pub fn shape(&self) -> (usize, usize) {
        self.sources.first().map_or((0, 0), |s| s.shape())
    }

    /// Length of the float band vector
    pub fn band_count(&self) -> usize {
        self.sources.iter().map(|s| s.band_count()).sum()
    }

    pub fn int_band_count(&self) -> usize {
        self.int_sources.iter().map(|s| s.band_count()).sum()
    }

    pub fn transform(&self) -> GeoTransform {
        self.sources.first().map_or_else(GeoTransform::default, |s| s.transform())
    }

    pub fn projection(&self) -> Option<String> {
        self.sources.first().and_then(|s| s.projection()).map(str::to_owned)
    }

    /// Check that all inputs share one pixel grid
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Configuration("no input rasters".into()));
        }
        let all: Vec<&dyn RasterSource> = self
            .sources
            .iter()
            .chain(self.int_sources.iter())
            .copied()
            .collect();
        check_aligned(&all, 0)
    }

    /// Accumulation-only pass over single pixels or mixed vectors
    pub fn run<F: PixelFunction>(&self, func: &mut F, mode: CalcMode) -> Result<PassReport> {
        if mode.is_window() {
            return Err(Error::Configuration(format!(
                "{mode} is a window mode; use run_window"
            )));
        }
        self.execute(func, mode, 1, None)
    }

    /// Pass writing `func.num_out_bands()` bands to `sink`
    pub fn run_to<F: PixelFunction>(
        &self,
        func: &mut F,
        mode: CalcMode,
        sink: &mut dyn RasterSink,
    ) -> Result<PassReport> {
        if mode.is_window() {
            return Err(Error::Configuration(format!(
                "{mode} is a window mode; use run_window_to"
            )));
        }
        self.execute(func, mode, 1, Some(sink))
    }

    /// Window pass without output
    pub fn run_window<F: PixelFunction>(
        &self,
        func: &mut F,
        mode: CalcMode,
        win_size: usize,
    ) -> Result<PassReport> {
        if !mode.is_window() {
            return Err(Error::Configuration(format!("{mode} is not a window mode")));
        }
        self.execute(func, mode, win_size, None)
    }

    /// Window pass writing to `sink`
    pub fn run_window_to<F: PixelFunction>(
        &self,
        func: &mut F,
        mode: CalcMode,
        win_size: usize,
        sink: &mut dyn RasterSink,
    ) -> Result<PassReport> {
        if !mode.is_window() {
            return Err(Error::Configuration(format!("{mode} is not a window mode")));
        }
        self.execute(func, mode, win_size, Some(sink))
    }

    fn check_pass<F: PixelFunction>(
        &self,
        func: &F,
        mode: CalcMode,
        win_size: usize,
        has_sink: bool,
    ) -> Result<()> {
        self.validate()?;

        if let Some(expected) = func.num_in_bands() {
            let actual = self.band_count();
            if expected != actual {
                return Err(Error::Configuration(format!(
                    "{} expects {expected} bands but the input stack has {actual}",
                    func.name()
                )));
            }
        }

        func.check_mode(mode)?;

        if mode.is_window() && (win_size == 0 || win_size % 2 == 0) {
            return Err(Error::InvalidParameter {
                name: "win_size",
                value: win_size.to_string(),
                reason: "window size must be odd and at least 1".into(),
            });
        }
        if mode.produces_output() && !has_sink {
            return Err(Error::Configuration(format!(
                "{mode} writes output but no sink was given"
            )));
        }
        if has_sink && !mode.produces_output() && mode != CalcMode::WindowCondition {
            return Err(Error::Configuration(format!("{mode} does not write output")));
        }
        if has_sink && func.num_out_bands() == 0 {
            return Err(Error::Configuration(format!(
                "{} declares no output bands",
                func.name()
            )));
        }
        if mode.is_mixed() && self.int_sources.is_empty() {
            return Err(Error::Configuration(format!(
                "{mode} requires integer input rasters"
            )));
        }
        if mode.is_extent() && self.config.region.is_none() {
            return Err(Error::Configuration(format!(
                "{mode} requires a region in the engine configuration"
            )));
        }
        Ok(())
    }

    fn execute<F: PixelFunction>(
        &self,
        func: &mut F,
        mode: CalcMode,
        win_size: usize,
        mut sink: Option<&mut dyn RasterSink>,
    ) -> Result<PassReport> {
        self.check_pass(func, mode, win_size, sink.is_some())?;

        let (rows, cols) = self.shape();
        let halo = if mode.is_window() { win_size / 2 } else { 0 };
        let blocks: Vec<Block> = BlockIterator::new(rows, self.config.block_rows, halo).collect();
        let executor = self.config.processing.executor()?;
        let workers = self.config.processing.workers();

        if let Some(sink) = sink.as_deref_mut() {
            sink.begin(&OutputSpec {
                rows,
                cols,
                bands: func.num_out_bands(),
                transform: self.transform(),
                projection: self.projection(),
            })?;
        }

        let mut report = PassReport {
            mode,
            blocks: blocks.len(),
            pixels: 0,
            calls: 0,
            condition_hits: 0,
        };
        let write = sink.is_some();

        for wave in blocks.chunks(workers) {
            let template: &F = func;
            let results = executor.map(wave, |block| {
                self.process_block(template, mode, win_size, block, write)
            });
            // Barrier: fold workers in block order, then emit their rows
            for result in results {
                let result = result?;
                func.merge(result.local);
                if let (Some(sink), Some(output)) = (sink.as_deref_mut(), result.output) {
                    sink.write_block(result.block.row_offset, output.view())?;
                }
                report.pixels += result.pixels;
                report.calls += result.calls;
                report.condition_hits += result.hits;
            }
            trace!(function = func.name(), blocks = wave.len(), "wave merged");
        }

        if let Some(sink) = sink {
            sink.finish()?;
        }

        debug!(
            function = func.name(),
            mode = %mode,
            blocks = report.blocks,
            calls = report.calls,
            "pass complete"
        );
        Ok(report)
    }

    fn read_stack(
        sources: &[&dyn RasterSource],
        read_start: usize,
        read_rows: usize,
        cols: usize,
    ) -> Result<Array3<f64>> {
        let mut parts = Vec::with_capacity(sources.len());
        for src in sources {
            let part = src.read_block(read_start, read_rows)?;
            let expected = (src.band_count(), read_rows, cols);
            if part.dim() != expected {
                return Err(Error::Raster(format!(
                    "block read returned {:?}, expected {expected:?}",
                    part.dim()
                )));
            }
            parts.push(part);
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        let views: Vec<ArrayView3<'_, f64>> = parts.iter().map(|p| p.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| Error::Raster(e.to_string()))
    }

    fn process_block<F: PixelFunction>(
        &self,
        template: &F,
        mode: CalcMode,
        win_size: usize,
        block: &Block,
        write: bool,
    ) -> Result<BlockResult<F>> {
        let (_, cols) = self.shape();
        let data = Self::read_stack(&self.sources, block.read_start, block.read_rows, cols)?;
        let ints = if mode.is_mixed() {
            Some(Self::read_stack(&self.int_sources, block.read_start, block.read_rows, cols)?)
        } else {
            None
        };

        let n_bands = data.dim().0;
        let n_out = template.num_out_bands();
        let transform = self.transform();
        let region = self.config.region;

        // Window passes read from a zero-padded copy so edge windows see border cells
        let radius = if mode.is_window() { win_size / 2 } else { 0 };
        let padded = if mode.is_window() {
            let mut padded = Array3::zeros((n_bands, block.rows + 2 * radius, cols + 2 * radius));
            let top = radius - block.halo_above();
            padded
                .slice_mut(s![.., top..top + block.read_rows, radius..radius + cols])
                .assign(&data);
            Some(padded)
        } else {
            None
        };

        let mut local = template.fork();
        let mut output = write.then(|| Array3::zeros((n_out, block.rows, cols)));
        let mut out_buf = vec![0.0; n_out];
        let mut bands = vec![0.0; n_bands];
        let mut int_bands = vec![0i64; ints.as_ref().map_or(0, |a| a.dim().0)];
        let (mut calls, mut hits) = (0usize, 0usize);
        let halo = block.halo_above();

        for r in 0..block.rows {
            let row = block.to_source_row(r);
            for col in 0..cols {
                let pos = PixelPos { row, col };
                let extent = if mode.is_extent() {
                    let extent = transform.pixel_extent(col, row);
                    if !region.is_some_and(|reg| reg.intersects(&extent)) {
                        continue;
                    }
                    Some(extent)
                } else {
                    None
                };

                if !mode.is_window() {
                    for (b, v) in bands.iter_mut().enumerate() {
                        *v = data[[b, r + halo, col]];
                    }
                }
                if let Some(ints) = &ints {
                    for (b, v) in int_bands.iter_mut().enumerate() {
                        *v = ints[[b, r + halo, col]] as i64;
                    }
                }

                let input = match (mode, &padded) {
                    (_, Some(padded)) => CalcInput::Window {
                        pos,
                        window: Window::new(padded.slice(s![.., r..r + win_size, col..col + win_size])),
                        extent,
                    },
                    (CalcMode::Mixed | CalcMode::MixedOutput, None) => CalcInput::Mixed {
                        pos,
                        ints: &int_bands,
                        floats: &bands,
                    },
                    (_, None) => match extent {
                        Some(extent) => CalcInput::PixelExtent {
                            pos,
                            bands: &bands,
                            extent,
                        },
                        None => CalcInput::Pixel { pos, bands: &bands },
                    },
                };

                out_buf.fill(0.0);
                let outcome = local.calc(mode, input, &mut out_buf)?;
                calls += 1;
                if outcome == CalcOutcome::Condition(true) {
                    hits += 1;
                }
                if let Some(output) = output.as_mut() {
                    for (b, &v) in out_buf.iter().enumerate() {
                        output[[b, r, col]] = v;
                    }
                }
            }
        }

        Ok(BlockResult {
            block: block.clone(),
            local,
            output,
            pixels: block.rows * cols,
            calls,
            hits,
        })
    }
}
