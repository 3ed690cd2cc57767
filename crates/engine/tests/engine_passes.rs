//! Engine passes over small synthetic rasters, one test per mode family.

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use imgcalc_core::{ErrorKind, Extent, GeoTransform, MemorySink, MultiBandRaster, is_border};
use imgcalc_engine::prelude::*;

/// 1 band, `rows x cols`, value = row * cols + col (so pixel (0, 0) is border)
fn ramp(rows: usize, cols: usize) -> MultiBandRaster {
    let data = (0..rows * cols).map(|v| v as f64).collect();
    MultiBandRaster::from_vec(1, rows, cols, data)
        .unwrap()
        .with_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0))
}

#[derive(Default)]
struct SumCalc {
    sum: f64,
    count: usize,
}

impl PixelFunction for SumCalc {
    fn name(&self) -> &'static str {
        "SumCalc"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Pixel, CalcMode::PixelExtent])
    }
    fn num_out_bands(&self) -> usize {
        0
    }
    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        let bands = match input {
            CalcInput::Pixel { bands, .. } | CalcInput::PixelExtent { bands, .. } => bands,
            _ => return Err(not_implemented(self, mode)),
        };
        if !is_border(bands) {
            self.sum += bands[0];
            self.count += 1;
        }
        Ok(CalcOutcome::Done)
    }
    fn fork(&self) -> Self {
        Self::default()
    }
    fn merge(&mut self, other: Self) {
        self.sum += other.sum;
        self.count += other.count;
    }
}

struct ScaleCalc {
    factor: f64,
    bands: usize,
}

impl PixelFunction for ScaleCalc {
    fn name(&self) -> &'static str {
        "ScaleCalc"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::PixelOutput])
    }
    fn num_out_bands(&self) -> usize {
        self.bands
    }
    fn num_in_bands(&self) -> Option<usize> {
        Some(self.bands)
    }
    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, out: &mut [f64]) -> Result<CalcOutcome> {
        let CalcInput::Pixel { bands, .. } = input else {
            return Err(not_implemented(self, mode));
        };
        for (o, v) in out.iter_mut().zip(bands) {
            *o = v * self.factor;
        }
        Ok(CalcOutcome::Done)
    }
    fn fork(&self) -> Self {
        Self { factor: self.factor, bands: self.bands }
    }
    fn merge(&mut self, _: Self) {}
}

/// Declares an output mode but fails when actually invoked
struct BrokenCalc;

impl PixelFunction for BrokenCalc {
    fn name(&self) -> &'static str {
        "BrokenCalc"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::PixelOutput])
    }
    fn num_out_bands(&self) -> usize {
        1
    }
    fn calc(&mut self, mode: CalcMode, _: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        Err(not_implemented(self, mode))
    }
    fn fork(&self) -> Self {
        BrokenCalc
    }
    fn merge(&mut self, _: Self) {}
}

/// 3x3-style focal sum of band 0; predicate: any neighbour is border
struct FocalCalc;

impl PixelFunction for FocalCalc {
    fn name(&self) -> &'static str {
        "FocalCalc"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::WindowOutput, CalcMode::WindowCondition, CalcMode::WindowExtent])
    }
    fn num_out_bands(&self) -> usize {
        1
    }
    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, out: &mut [f64]) -> Result<CalcOutcome> {
        let CalcInput::Window { window, extent, .. } = input else {
            return Err(not_implemented(self, mode));
        };
        match mode {
            CalcMode::WindowOutput => {
                out[0] = window.view().index_axis(ndarray::Axis(0), 0).sum();
                Ok(CalcOutcome::Done)
            }
            CalcMode::WindowCondition => {
                let r = window.radius() as isize;
                let hit = (-r..=r)
                    .flat_map(|dr| (-r..=r).map(move |dc| (dr, dc)))
                    .any(|(dr, dc)| window.value(0, dr, dc) == Some(0.0));
                out[0] = if hit { 1.0 } else { 0.0 };
                Ok(CalcOutcome::Condition(hit))
            }
            CalcMode::WindowExtent => {
                assert!(extent.is_some());
                Ok(CalcOutcome::Done)
            }
            _ => Err(not_implemented(self, mode)),
        }
    }
    fn fork(&self) -> Self {
        FocalCalc
    }
    fn merge(&mut self, _: Self) {}
}

/// Per-category sum of the first float band
#[derive(Default)]
struct CategorySums {
    sums: BTreeMap<i64, f64>,
}

impl PixelFunction for CategorySums {
    fn name(&self) -> &'static str {
        "CategorySums"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Mixed])
    }
    fn num_out_bands(&self) -> usize {
        0
    }
    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        let CalcInput::Mixed { ints, floats, .. } = input else {
            return Err(not_implemented(self, mode));
        };
        *self.sums.entry(ints[0]).or_default() += floats[0];
        Ok(CalcOutcome::Done)
    }
    fn fork(&self) -> Self {
        Self::default()
    }
    fn merge(&mut self, other: Self) {
        for (k, v) in other.sums {
            *self.sums.entry(k).or_default() += v;
        }
    }
}

#[test]
fn accumulation_is_independent_of_blocking_and_workers() {
    let raster = ramp(10, 7);
    // 0 is the only border value, so the valid sum is the sum of 1..70
    let expected: f64 = (1..70).map(|v| v as f64).sum();

    for config in [
        EngineConfig::sequential().with_block_rows(1),
        EngineConfig::default().with_block_rows(3),
        EngineConfig {
            processing: ProcessingMode::ParallelWith(4),
            ..EngineConfig::default().with_block_rows(2)
        },
    ] {
        let engine = CalcEngine::new(vec![&raster]).with_config(config.clone());
        let mut calc = SumCalc::default();
        let report = engine.run(&mut calc, CalcMode::Pixel).unwrap();
        assert_relative_eq!(calc.sum, expected);
        assert_eq!(calc.count, 69);
        assert_eq!(report.pixels, 70);
        assert_eq!(report.calls, 70);
        assert_eq!(report.blocks, 10usize.div_ceil(config.block_rows));
    }
}

#[test]
fn output_pass_writes_every_pixel_and_stacks_sources() {
    let a = ramp(5, 4);
    let b = MultiBandRaster::from_vec(1, 5, 4, vec![1.0; 20])
        .unwrap()
        .with_transform(a.transform());
    let engine = CalcEngine::new(vec![&a, &b])
        .with_config(EngineConfig::default().with_block_rows(2));
    assert_eq!(engine.band_count(), 2);

    let mut calc = ScaleCalc { factor: 2.0, bands: 2 };
    let mut sink = MemorySink::new();
    engine.run_to(&mut calc, CalcMode::PixelOutput, &mut sink).unwrap();
    let out = sink.into_raster().unwrap();

    assert_eq!(out.band_count(), 2);
    assert_eq!(out.get(0, 4, 3).unwrap(), 38.0);
    assert_eq!(out.get(1, 4, 3).unwrap(), 2.0);
    assert!(out.transform().approx_eq(&a.transform()));
}

#[test]
fn undeclared_mode_fails_before_any_write() {
    let raster = ramp(4, 4);
    let engine = CalcEngine::new(vec![&raster]);
    let mut calc = SumCalc::default();
    let mut sink = MemorySink::new();

    let err = engine.run_to(&mut calc, CalcMode::PixelOutput, &mut sink).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert_eq!(sink.rows_written(), 0);
    assert!(sink.into_raster().is_err());
}

#[test]
fn failing_function_aborts_pass_without_valid_output() {
    let raster = ramp(6, 3);
    let engine = CalcEngine::new(vec![&raster])
        .with_config(EngineConfig::sequential().with_block_rows(2));
    let mut sink = MemorySink::new();

    let err = engine.run_to(&mut BrokenCalc, CalcMode::PixelOutput, &mut sink).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert_eq!(sink.rows_written(), 0);
    assert!(!sink.is_finished());
}

#[test]
fn misaligned_inputs_are_rejected() {
    let a = ramp(4, 4);
    let b = ramp(4, 5);
    let shifted = ramp(4, 4).with_transform(GeoTransform::new(3.0, 4.0, 1.0, -1.0));

    let mut calc = SumCalc::default();
    let err = CalcEngine::new(vec![&a, &b]).run(&mut calc, CalcMode::Pixel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = CalcEngine::new(vec![&a])
        .with_integer_sources(vec![&shifted])
        .run(&mut calc, CalcMode::Pixel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(calc.count, 0);
}

#[test]
fn band_count_mismatch_is_a_configuration_error() {
    let raster = ramp(3, 3);
    let mut calc = ScaleCalc { factor: 1.0, bands: 4 };
    let mut sink = MemorySink::new();
    let err = CalcEngine::new(vec![&raster])
        .run_to(&mut calc, CalcMode::PixelOutput, &mut sink)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn output_mode_without_sink_is_rejected() {
    let raster = ramp(3, 3);
    let mut calc = ScaleCalc { factor: 1.0, bands: 1 };
    let err = CalcEngine::new(vec![&raster])
        .run(&mut calc, CalcMode::PixelOutput)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn window_output_pads_edges_with_border_cells() {
    let ones = MultiBandRaster::from_vec(1, 5, 5, vec![1.0; 25]).unwrap();
    let engine = CalcEngine::new(vec![&ones])
        .with_config(EngineConfig::default().with_block_rows(2));
    let mut sink = MemorySink::new();
    engine
        .run_window_to(&mut FocalCalc, CalcMode::WindowOutput, 3, &mut sink)
        .unwrap();
    let out = sink.into_raster().unwrap();

    assert_eq!(out.get(0, 2, 2).unwrap(), 9.0);
    assert_eq!(out.get(0, 0, 0).unwrap(), 4.0);
    assert_eq!(out.get(0, 0, 2).unwrap(), 6.0);
    assert_eq!(out.get(0, 4, 4).unwrap(), 4.0);
    // Block boundary between rows 1 and 2 still sees the neighbouring rows
    assert_eq!(out.get(0, 1, 1).unwrap(), 9.0);
}

#[test]
fn window_condition_counts_hits() {
    let ones = MultiBandRaster::from_vec(1, 5, 5, vec![1.0; 25]).unwrap();
    let engine = CalcEngine::new(vec![&ones])
        .with_config(EngineConfig::default().with_block_rows(3));

    // Every pixel on the outer ring touches the zero padding
    let report = engine.run_window(&mut FocalCalc, CalcMode::WindowCondition, 3).unwrap();
    assert_eq!(report.condition_hits, 16);

    // A 5x5 window reaches the padding from every pixel of a 5x5 raster
    let report = engine.run_window(&mut FocalCalc, CalcMode::WindowCondition, 5).unwrap();
    assert_eq!(report.condition_hits, 25);

    let err = engine.run_window(&mut FocalCalc, CalcMode::WindowCondition, 4).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn extent_modes_are_restricted_to_the_region() {
    let raster = ramp(6, 6);
    // Grid spans x 0..6, y 0..6; this region covers pixels (row 1..3, col 2..4)
    let region = Extent::new(2.0, 3.0, 4.0, 5.0);
    let engine = CalcEngine::new(vec![&raster])
        .with_config(EngineConfig::default().with_block_rows(4).with_region(region));

    let mut calc = SumCalc::default();
    let report = engine.run(&mut calc, CalcMode::PixelExtent).unwrap();
    assert_eq!(report.calls, 4);
    assert_eq!(report.pixels, 36);
    assert_relative_eq!(calc.sum, (8 + 9 + 14 + 15) as f64);

    let report = engine.run_window(&mut FocalCalc, CalcMode::WindowExtent, 3).unwrap();
    assert_eq!(report.calls, 4);

    let err = CalcEngine::new(vec![&raster])
        .run(&mut SumCalc::default(), CalcMode::PixelExtent)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn mixed_mode_pairs_integer_and_float_vectors() {
    let values = ramp(4, 4);
    let zones_data = (0..16).map(|i| if i % 4 < 2 { 1.0 } else { 2.0 }).collect();
    let zones = MultiBandRaster::from_vec(1, 4, 4, zones_data)
        .unwrap()
        .with_transform(values.transform());

    let engine = CalcEngine::new(vec![&values])
        .with_integer_sources(vec![&zones])
        .with_config(EngineConfig::default().with_block_rows(1));
    let mut calc = CategorySums::default();
    engine.run(&mut calc, CalcMode::Mixed).unwrap();

    // zone 1: columns 0-1, zone 2: columns 2-3
    let zone1: f64 = [0, 1, 4, 5, 8, 9, 12, 13].iter().map(|&v| v as f64).sum();
    let zone2: f64 = [2, 3, 6, 7, 10, 11, 14, 15].iter().map(|&v| v as f64).sum();
    assert_relative_eq!(calc.sums[&1], zone1);
    assert_relative_eq!(calc.sums[&2], zone2);

    let err = CalcEngine::new(vec![&values]).run(&mut calc, CalcMode::Mixed).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}
