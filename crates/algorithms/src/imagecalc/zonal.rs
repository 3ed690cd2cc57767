//! Zonal statistics
//!
//! Per-category mean of each float band, where categories come from an
//! integer zone raster. Zone 0 is treated as no-data.

use std::collections::BTreeMap;
use std::sync::Arc;

use imgcalc_core::{RasterSink, RasterSource, Result};
use imgcalc_engine::{
    CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, EngineConfig, PixelFunction,
    not_implemented,
};

/// Statistics of one zone
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneMean {
    pub count: u64,
    /// Mean of each float band
    pub mean: Vec<f64>,
}

/// Mixed-mode zonal mean.
///
/// [`CalcMode::Mixed`] accumulates per-zone sums; [`CalcMode::MixedOutput`]
/// writes the zone means fixed by [`ZonalMeans::with_means`], so mapping
/// means back onto the image takes a second pass.
pub struct ZonalMeans {
    bands: usize,
    sums: BTreeMap<i64, (u64, Vec<f64>)>,
    means: Arc<BTreeMap<i64, Vec<f64>>>,
}

impl ZonalMeans {
    pub fn new(bands: usize) -> Self {
        Self {
            bands,
            sums: BTreeMap::new(),
            means: Arc::new(BTreeMap::new()),
        }
    }

    /// A function writing the given zone means
    pub fn with_means(bands: usize, means: &BTreeMap<i64, ZoneMean>) -> Self {
        let means = means.iter().map(|(&z, m)| (z, m.mean.clone())).collect();
        Self {
            bands,
            sums: BTreeMap::new(),
            means: Arc::new(means),
        }
    }

    pub fn zones(&self) -> BTreeMap<i64, ZoneMean> {
        self.sums
            .iter()
            .map(|(&zone, (count, sum))| {
                let n = *count as f64;
                let mean = sum.iter().map(|s| s / n).collect();
                (zone, ZoneMean { count: *count, mean })
            })
            .collect()
    }
}

impl PixelFunction for ZonalMeans {
    fn name(&self) -> &'static str {
        "ZonalMeans"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Mixed, CalcMode::MixedOutput])
    }

    fn num_out_bands(&self) -> usize {
        self.bands
    }

    fn num_in_bands(&self) -> Option<usize> {
        Some(self.bands)
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, out: &mut [f64]) -> Result<CalcOutcome> {
        let CalcInput::Mixed { ints, floats, .. } = input else {
            return Err(not_implemented(self, mode));
        };
        let zone = ints.first().copied().unwrap_or(0);
        if zone == 0 {
            return Ok(CalcOutcome::Done);
        }
        match mode {
            CalcMode::Mixed => {
                if floats.iter().any(|v| !v.is_finite()) {
                    return Ok(CalcOutcome::Done);
                }
                let (count, sum) = self
                    .sums
                    .entry(zone)
                    .or_insert_with(|| (0, vec![0.0; floats.len()]));
                *count += 1;
                for (s, v) in sum.iter_mut().zip(floats) {
                    *s += v;
                }
            }
            CalcMode::MixedOutput => {
                if let Some(mean) = self.means.get(&zone) {
                    out.copy_from_slice(&mean[..out.len()]);
                }
            }
            _ => return Err(not_implemented(self, mode)),
        }
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self {
            bands: self.bands,
            sums: BTreeMap::new(),
            means: Arc::clone(&self.means),
        }
    }

    fn merge(&mut self, other: Self) {
        for (zone, (count, sum)) in other.sums {
            let entry = self.sums.entry(zone).or_insert_with(|| (0, vec![0.0; sum.len()]));
            entry.0 += count;
            for (a, b) in entry.1.iter_mut().zip(&sum) {
                *a += b;
            }
        }
    }
}

/// Mean of each band of `values` within every non-zero zone of `zones`
pub fn zonal_means(
    values: Vec<&dyn RasterSource>,
    zones: &dyn RasterSource,
    config: EngineConfig,
) -> Result<BTreeMap<i64, ZoneMean>> {
    let engine = CalcEngine::new(values)
        .with_integer_sources(vec![zones])
        .with_config(config);
    let mut calc = ZonalMeans::new(engine.band_count());
    engine.run(&mut calc, CalcMode::Mixed)?;
    Ok(calc.zones())
}

/// Write an image where each pixel holds its zone's mean (0 outside zones)
///
/// # Returns
/// The zone means that were written
pub fn zonal_mean_image(
    values: Vec<&dyn RasterSource>,
    zones: &dyn RasterSource,
    config: EngineConfig,
    sink: &mut dyn RasterSink,
) -> Result<BTreeMap<i64, ZoneMean>> {
    let engine = CalcEngine::new(values)
        .with_integer_sources(vec![zones])
        .with_config(config);
    let bands = engine.band_count();
    let mut calc = ZonalMeans::new(bands);
    engine.run(&mut calc, CalcMode::Mixed)?;
    let means = calc.zones();

    let mut writer = ZonalMeans::with_means(bands, &means);
    engine.run_to(&mut writer, CalcMode::MixedOutput, sink)?;
    Ok(means)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use imgcalc_core::{MemorySink, MultiBandRaster};

    fn inputs() -> (MultiBandRaster, MultiBandRaster) {
        let values = MultiBandRaster::from_vec(1, 2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let zones = MultiBandRaster::from_vec(1, 2, 3, vec![1.0, 1.0, 2.0, 1.0, 0.0, 2.0]).unwrap();
        (values, zones)
    }

    #[test]
    fn test_zonal_means() {
        let (values, zones) = inputs();
        let result = zonal_means(vec![&values], &zones, EngineConfig::default().with_block_rows(1)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[&1].count, 3);
        assert_relative_eq!(result[&1].mean[0], 7.0 / 3.0);
        assert_relative_eq!(result[&2].mean[0], 4.5);
    }

    #[test]
    fn test_zonal_mean_image() {
        let (values, zones) = inputs();
        let mut sink = MemorySink::new();
        zonal_mean_image(vec![&values], &zones, EngineConfig::default(), &mut sink).unwrap();
        let out = sink.into_raster().unwrap();
        assert_relative_eq!(out.get(0, 0, 2).unwrap(), 4.5);
        assert_eq!(out.get(0, 1, 1).unwrap(), 0.0);
    }
}
