//! Detection of valid pixels adjacent to the border

use imgcalc_core::{RasterSink, RasterSource, Result, is_border};
use imgcalc_engine::{
    CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, EngineConfig, PixelFunction,
    not_implemented,
};

/// Window predicate: the centre pixel is valid and some cell of its window
/// is a border cell (including cells beyond the raster edge).
pub struct BorderEdges;

impl PixelFunction for BorderEdges {
    fn name(&self) -> &'static str {
        "BorderEdges"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::WindowCondition, CalcMode::WindowOutput])
    }

    fn num_out_bands(&self) -> usize {
        1
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, out: &mut [f64]) -> Result<CalcOutcome> {
        let CalcInput::Window { window, .. } = input else {
            return Err(not_implemented(self, mode));
        };
        let centre = window.centre_bands();
        let edge = !is_border(&centre)
            && window
                .view()
                .index_axis(ndarray::Axis(0), 0)
                .iter()
                .any(|&v| v == 0.0);
        if let Some(o) = out.first_mut() {
            *o = if edge { 1.0 } else { 0.0 };
        }
        match mode {
            CalcMode::WindowCondition => Ok(CalcOutcome::Condition(edge)),
            CalcMode::WindowOutput => Ok(CalcOutcome::Done),
            _ => Err(not_implemented(self, mode)),
        }
    }

    fn fork(&self) -> Self {
        BorderEdges
    }

    fn merge(&mut self, _other: Self) {}
}

/// Count valid pixels within `win_size / 2` cells of a border cell,
/// optionally writing a 1/0 mask to `sink`
pub fn border_edges(
    sources: Vec<&dyn RasterSource>,
    win_size: usize,
    config: EngineConfig,
    sink: Option<&mut dyn RasterSink>,
) -> Result<usize> {
    let engine = CalcEngine::new(sources).with_config(config);
    let report = match sink {
        Some(sink) => engine.run_window_to(&mut BorderEdges, CalcMode::WindowCondition, win_size, sink)?,
        None => engine.run_window(&mut BorderEdges, CalcMode::WindowCondition, win_size)?,
    };
    Ok(report.condition_hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgcalc_core::{MemorySink, MultiBandRaster};

    #[test]
    fn test_border_edges() {
        // 5x5 of ones with a zero hole in the middle
        let mut r = MultiBandRaster::from_vec(1, 5, 5, vec![1.0; 25]).unwrap();
        r.set(0, 2, 2, 0.0).unwrap();

        let mut sink = MemorySink::new();
        let hits = border_edges(vec![&r], 3, EngineConfig::default().with_block_rows(2), Some(&mut sink)).unwrap();
        let mask = sink.into_raster().unwrap();

        // Outer ring (16) touches the padding; the 8 cells around the hole touch it
        assert_eq!(hits, 24);
        assert_eq!(mask.get(0, 2, 2).unwrap(), 0.0);
        assert_eq!(mask.get(0, 1, 1).unwrap(), 1.0);
        assert_eq!(mask.get(0, 0, 0).unwrap(), 1.0);

        assert_eq!(border_edges(vec![&r], 3, EngineConfig::sequential(), None).unwrap(), 24);
        assert!(border_edges(vec![&r], 2, EngineConfig::default(), None).is_err());
    }
}
