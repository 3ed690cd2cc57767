//! Count pixels equal to given values

use imgcalc_core::{Error, RasterSource, Result};
use imgcalc_engine::{
    CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, EngineConfig, PixelFunction,
    not_implemented,
};

/// Counts occurrences of each requested value.
///
/// With a band selected only that band is inspected; otherwise every band
/// of every pixel is. Values are compared exactly and border pixels are
/// counted like any other.
pub struct ValueCounter {
    values: Vec<f64>,
    band: Option<usize>,
    counts: Vec<u64>,
}

impl ValueCounter {
    pub fn new(values: Vec<f64>, band: Option<usize>) -> Self {
        let counts = vec![0; values.len()];
        Self { values, band, counts }
    }

    /// Counts in the order the values were given
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    fn tally(&mut self, v: f64) {
        for (count, target) in self.counts.iter_mut().zip(&self.values) {
            if v == *target {
                *count += 1;
            }
        }
    }
}

impl PixelFunction for ValueCounter {
    fn name(&self) -> &'static str {
        "ValueCounter"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Pixel, CalcMode::PixelExtent])
    }

    fn num_out_bands(&self) -> usize {
        0
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        let bands = match (mode, input) {
            (CalcMode::Pixel, CalcInput::Pixel { bands, .. })
            | (CalcMode::PixelExtent, CalcInput::PixelExtent { bands, .. }) => bands,
            _ => return Err(not_implemented(self, mode)),
        };
        match self.band {
            Some(b) => {
                if let Some(&v) = bands.get(b) {
                    self.tally(v);
                }
            }
            None => {
                for &v in bands {
                    self.tally(v);
                }
            }
        }
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::new(self.values.clone(), self.band)
    }

    fn merge(&mut self, other: Self) {
        for (a, b) in self.counts.iter_mut().zip(other.counts) {
            *a += b;
        }
    }
}

/// Count the pixels of the stacked sources equal to each of `values`.
///
/// When `config.region` is set only pixels intersecting it are counted.
///
/// # Returns
/// One count per requested value
pub fn count_pixels_of_value(
    sources: Vec<&dyn RasterSource>,
    values: &[f64],
    band: Option<usize>,
    config: EngineConfig,
) -> Result<Vec<u64>> {
    let mode = if config.region.is_some() { CalcMode::PixelExtent } else { CalcMode::Pixel };
    let engine = CalcEngine::new(sources).with_config(config);
    if let Some(b) = band
        && b >= engine.band_count()
    {
        return Err(Error::InvalidParameter {
            name: "band",
            value: b.to_string(),
            reason: format!("input has {} bands", engine.band_count()),
        });
    }

    let mut counter = ValueCounter::new(values.to_vec(), band);
    engine.run(&mut counter, mode)?;
    Ok(counter.counts)
}
