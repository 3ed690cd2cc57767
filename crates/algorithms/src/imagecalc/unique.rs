//! Unique integer values of a band

use std::collections::BTreeSet;

use imgcalc_core::{Error, RasterSource, Result};
use imgcalc_engine::{
    CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, EngineConfig, PixelFunction,
    not_implemented,
};

/// Collects the distinct values of one band, rounded to integers.
/// Non-finite values are ignored.
pub struct UniqueValues {
    band: usize,
    values: BTreeSet<i64>,
}

impl UniqueValues {
    pub fn new(band: usize) -> Self {
        Self { band, values: BTreeSet::new() }
    }

    pub fn values(&self) -> impl Iterator<Item = i64> + '_ {
        self.values.iter().copied()
    }
}

impl PixelFunction for UniqueValues {
    fn name(&self) -> &'static str {
        "UniqueValues"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Pixel])
    }

    fn num_out_bands(&self) -> usize {
        0
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        let (CalcMode::Pixel, CalcInput::Pixel { bands, .. }) = (mode, input) else {
            return Err(not_implemented(self, mode));
        };
        if let Some(&v) = bands.get(self.band)
            && v.is_finite()
        {
            self.values.insert(v.round() as i64);
        }
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::new(self.band)
    }

    fn merge(&mut self, mut other: Self) {
        self.values.append(&mut other.values);
    }
}

/// Sorted distinct integer values of `band` in the stacked sources
pub fn unique_values(
    sources: Vec<&dyn RasterSource>,
    band: usize,
    config: EngineConfig,
) -> Result<Vec<i64>> {
    let engine = CalcEngine::new(sources).with_config(config);
    if band >= engine.band_count() {
        return Err(Error::InvalidParameter {
            name: "band",
            value: band.to_string(),
            reason: format!("input has {} bands", engine.band_count()),
        });
    }
    let mut unique = UniqueValues::new(band);
    engine.run(&mut unique, CalcMode::Pixel)?;
    Ok(unique.values().collect())
}
