//! Pixel-wise comparison of two images

use imgcalc_core::{Error, RasterSource, Result};
use imgcalc_engine::{
    CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, EngineConfig, PixelFunction,
    not_implemented,
};
use tracing::debug;

/// Compares pairs of positions in the stacked band vector.
///
/// A pixel matches when every pair holds equal values; two NaNs are equal.
pub struct BandComparison {
    pairs: Vec<(usize, usize)>,
    matched: u64,
    total: u64,
}

impl BandComparison {
    pub fn new(pairs: Vec<(usize, usize)>) -> Self {
        Self { pairs, matched: 0, total: 0 }
    }

    /// Share of pixels that matched; 1 for an empty image
    pub fn proportion(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }

    pub fn all_equal(&self) -> bool {
        self.matched == self.total
    }
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

impl PixelFunction for BandComparison {
    fn name(&self) -> &'static str {
        "BandComparison"
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
        let equal = self
            .pairs
            .iter()
            .all(|&(a, b)| same(bands[a], bands[b]));
        self.total += 1;
        if equal {
            self.matched += 1;
        }
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::new(self.pairs.clone())
    }

    fn merge(&mut self, other: Self) {
        self.matched += other.matched;
        self.total += other.total;
    }
}

fn compare(
    first: &dyn RasterSource,
    second: &dyn RasterSource,
    pairs: Vec<(usize, usize)>,
    config: EngineConfig,
) -> Result<(bool, f64)> {
    let engine = CalcEngine::new(vec![first, second]).with_config(config);
    let mut cmp = BandComparison::new(pairs);
    engine.run(&mut cmp, CalcMode::Pixel)?;
    debug!(matched = cmp.matched, total = cmp.total, "images compared");
    Ok((cmp.all_equal(), cmp.proportion()))
}

/// Whether two images hold the same values in every band.
///
/// # Returns
/// `(equal, proportion of matching pixels)`
pub fn images_equal(
    first: &dyn RasterSource,
    second: &dyn RasterSource,
    config: EngineConfig,
) -> Result<(bool, f64)> {
    let n = first.band_count();
    if second.band_count() != n {
        return Err(Error::Configuration(format!(
            "images have {n} and {} bands",
            second.band_count()
        )));
    }
    compare(first, second, (0..n).map(|b| (b, n + b)).collect(), config)
}

/// Whether `band_a` of `first` equals `band_b` of `second`.
///
/// # Returns
/// `(equal, proportion of matching pixels)`
pub fn bands_equal(
    first: &dyn RasterSource,
    band_a: usize,
    second: &dyn RasterSource,
    band_b: usize,
    config: EngineConfig,
) -> Result<(bool, f64)> {
    for (name, band, source) in [("band_a", band_a, first), ("band_b", band_b, second)] {
        if band >= source.band_count() {
            return Err(Error::InvalidParameter {
                name,
                value: band.to_string(),
                reason: format!("image has {} bands", source.band_count()),
            });
        }
    }
    let offset = first.band_count();
    compare(first, second, vec![(band_a, offset + band_b)], config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use imgcalc_core::MultiBandRaster;

    #[test]
    fn test_images_equal() {
        let a = MultiBandRaster::from_vec(2, 2, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
        let b = a.clone();
        assert_eq!(images_equal(&a, &b, EngineConfig::default()).unwrap(), (true, 1.0));

        let mut c = a.clone();
        c.set(1, 0, 1, 0.0).unwrap();
        let (eq, prop) = images_equal(&a, &c, EngineConfig::default()).unwrap();
        assert!(!eq);
        assert_relative_eq!(prop, 0.75);
    }

    #[test]
    fn test_bands_equal() {
        let a = MultiBandRaster::from_vec(2, 1, 3, vec![1.0, 2.0, 3.0, 9.0, 9.0, 9.0]).unwrap();
        let b = MultiBandRaster::from_vec(1, 1, 3, vec![1.0, 2.0, f64::NAN]).unwrap();
        let (eq, prop) = bands_equal(&a, 0, &b, 0, EngineConfig::sequential()).unwrap();
        assert!(!eq);
        assert_relative_eq!(prop, 2.0 / 3.0);

        assert!(bands_equal(&a, 2, &b, 0, EngineConfig::default()).is_err());
        assert!(images_equal(&a, &b, EngineConfig::default()).unwrap_err().is_configuration());
    }
}
