//! Engine passes used by the ISODATA controller
//!
//! Each pass holds an [`Arc`] snapshot of the centre means taken before the
//! pass starts; workers only ever write their own accumulators.

use std::sync::Arc;

use imgcalc_core::{Result, is_excluded};
use imgcalc_engine::{CalcInput, CalcMode, CalcOutcome, Capabilities, PixelFunction, not_implemented};

use super::centres::CentreSnapshot;

/// Nearest-centre assignment with per-centre accumulation.
///
/// For every valid pixel, adds its band vector, a count and its distance
/// to the accumulator of the nearest centre.
pub struct AssignmentCalc {
    centres: Arc<CentreSnapshot>,
    dims: usize,
    sums: Vec<Vec<f64>>,
    counts: Vec<u64>,
    dist_sums: Vec<f64>,
    total_dist: f64,
    total_count: u64,
}

impl AssignmentCalc {
    pub fn new(centres: Arc<CentreSnapshot>, dims: usize) -> Self {
        let k = centres.len();
        Self {
            centres,
            dims,
            sums: vec![vec![0.0; dims]; k],
            counts: vec![0; k],
            dist_sums: vec![0.0; k],
            total_dist: 0.0,
            total_count: 0,
        }
    }

    /// Summed band vector of the members of snapshot entry `index`
    pub fn sum(&self, index: usize) -> &[f64] {
        &self.sums[index]
    }

    pub fn count(&self, index: usize) -> u64 {
        self.counts[index]
    }

    pub fn distance_sum(&self, index: usize) -> f64 {
        self.dist_sums[index]
    }

    /// Mean distance of every valid pixel to its nearest centre
    pub fn average_distance(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.total_dist / self.total_count as f64
        }
    }

    pub fn valid_pixels(&self) -> u64 {
        self.total_count
    }
}

impl PixelFunction for AssignmentCalc {
    fn name(&self) -> &'static str {
        "AssignmentCalc"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Pixel])
    }

    fn num_out_bands(&self) -> usize {
        0
    }

    fn num_in_bands(&self) -> Option<usize> {
        Some(self.dims)
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        let (CalcMode::Pixel, CalcInput::Pixel { bands, .. }) = (mode, input) else {
            return Err(not_implemented(self, mode));
        };
        if is_excluded(bands) {
            return Ok(CalcOutcome::Done);
        }
        if let Some((i, d)) = self.centres.nearest(bands) {
            for (s, v) in self.sums[i].iter_mut().zip(bands) {
                *s += v;
            }
            self.counts[i] += 1;
            self.dist_sums[i] += d;
            self.total_dist += d;
            self.total_count += 1;
        }
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::new(Arc::clone(&self.centres), self.dims)
    }

    fn merge(&mut self, other: Self) {
        for (mine, theirs) in self.sums.iter_mut().zip(&other.sums) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += b;
            }
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        for (a, b) in self.dist_sums.iter_mut().zip(&other.dist_sums) {
            *a += b;
        }
        self.total_dist += other.total_dist;
        self.total_count += other.total_count;
    }
}

/// Per-band squared deviation of each pixel from its nearest centre
pub struct StdDevCalc {
    centres: Arc<CentreSnapshot>,
    dims: usize,
    sq_devs: Vec<Vec<f64>>,
    counts: Vec<u64>,
}

impl StdDevCalc {
    pub fn new(centres: Arc<CentreSnapshot>, dims: usize) -> Self {
        let k = centres.len();
        Self {
            centres,
            dims,
            sq_devs: vec![vec![0.0; dims]; k],
            counts: vec![0; k],
        }
    }

    /// Population standard deviation per band of snapshot entry `index`
    pub fn std_dev(&self, index: usize) -> Vec<f64> {
        let n = self.counts[index];
        if n == 0 {
            return vec![0.0; self.dims];
        }
        self.sq_devs[index].iter().map(|s| (s / n as f64).sqrt()).collect()
    }
}

impl PixelFunction for StdDevCalc {
    fn name(&self) -> &'static str {
        "StdDevCalc"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::Pixel])
    }

    fn num_out_bands(&self) -> usize {
        0
    }

    fn num_in_bands(&self) -> Option<usize> {
        Some(self.dims)
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, _: &mut [f64]) -> Result<CalcOutcome> {
        let (CalcMode::Pixel, CalcInput::Pixel { bands, .. }) = (mode, input) else {
            return Err(not_implemented(self, mode));
        };
        if is_excluded(bands) {
            return Ok(CalcOutcome::Done);
        }
        if let Some((i, _)) = self.centres.nearest(bands) {
            let mean = self.centres.mean(i);
            for ((acc, v), m) in self.sq_devs[i].iter_mut().zip(bands).zip(mean) {
                *acc += (v - m) * (v - m);
            }
            self.counts[i] += 1;
        }
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::new(Arc::clone(&self.centres), self.dims)
    }

    fn merge(&mut self, other: Self) {
        for (mine, theirs) in self.sq_devs.iter_mut().zip(&other.sq_devs) {
            for (a, b) in mine.iter_mut().zip(theirs) {
                *a += b;
            }
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
    }
}

/// Label of border pixels and of pixels with a non-finite band
pub const BORDER_LABEL: f64 = 0.0;

/// Writes the label (centre id + 1) of the nearest centre for each pixel
pub struct ApplyCentresCalc {
    centres: Arc<CentreSnapshot>,
    dims: usize,
    ignore_zeros: bool,
}

impl ApplyCentresCalc {
    /// Border pixels receive [`BORDER_LABEL`]
    pub fn new(centres: Arc<CentreSnapshot>, dims: usize) -> Self {
        Self { centres, dims, ignore_zeros: true }
    }

    /// When `ignore_zeros` is false border pixels are labelled too; pixels
    /// with a non-finite band still get [`BORDER_LABEL`]
    pub fn with_ignore_zeros(mut self, ignore_zeros: bool) -> Self {
        self.ignore_zeros = ignore_zeros;
        self
    }
}

impl PixelFunction for ApplyCentresCalc {
    fn name(&self) -> &'static str {
        "ApplyCentresCalc"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[CalcMode::PixelOutput])
    }

    fn num_out_bands(&self) -> usize {
        1
    }

    fn num_in_bands(&self) -> Option<usize> {
        Some(self.dims)
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, out: &mut [f64]) -> Result<CalcOutcome> {
        let (CalcMode::PixelOutput, CalcInput::Pixel { bands, .. }) = (mode, input) else {
            return Err(not_implemented(self, mode));
        };
        let unlabelled = if self.ignore_zeros {
            is_excluded(bands)
        } else {
            bands.iter().any(|v| !v.is_finite())
        };
        out[0] = if unlabelled {
            BORDER_LABEL
        } else {
            self.centres
                .nearest(bands)
                .map_or(BORDER_LABEL, |(i, _)| self.centres.id(i).label())
        };
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self {
            centres: Arc::clone(&self.centres),
            dims: self.dims,
            ignore_zeros: self.ignore_zeros,
        }
    }

    fn merge(&mut self, _other: Self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::CentreStore;
    use approx::assert_relative_eq;
    use imgcalc_engine::PixelPos;

    fn feed<F: PixelFunction>(func: &mut F, mode: CalcMode, pixels: &[f64], out: &mut [f64]) {
        for (col, v) in pixels.iter().enumerate() {
            let bands = [*v];
            let input = CalcInput::Pixel { pos: PixelPos { row: 0, col }, bands: &bands };
            func.calc(mode, input, out).unwrap();
        }
    }

    fn two_centres() -> Arc<CentreSnapshot> {
        let mut store = CentreStore::with_dims(1);
        store.insert(vec![10.0]).unwrap();
        store.insert(vec![20.0]).unwrap();
        store.snapshot()
    }

    #[test]
    fn test_assignment_accumulates_and_skips_border() {
        let mut calc = AssignmentCalc::new(two_centres(), 1);
        let mut other = calc.fork();
        feed(&mut calc, CalcMode::Pixel, &[9.0, 0.0, 21.0], &mut []);
        feed(&mut other, CalcMode::Pixel, &[15.0, 12.0], &mut []);
        calc.merge(other);

        // 15 is equidistant and goes to the lower id
        assert_eq!(calc.count(0), 3);
        assert_eq!(calc.count(1), 1);
        assert_relative_eq!(calc.sum(0)[0], 36.0);
        assert_relative_eq!(calc.distance_sum(0), 1.0 + 5.0 + 2.0);
        assert_eq!(calc.valid_pixels(), 4);
        assert_relative_eq!(calc.average_distance(), 9.0 / 4.0);
    }

    #[test]
    fn test_non_finite_pixels_skipped() {
        let mut assign = AssignmentCalc::new(two_centres(), 1);
        feed(&mut assign, CalcMode::Pixel, &[11.0, f64::NAN, f64::INFINITY], &mut []);
        assert_eq!(assign.valid_pixels(), 1);
        assert_relative_eq!(assign.sum(0)[0], 11.0);

        let mut spread = StdDevCalc::new(two_centres(), 1);
        feed(&mut spread, CalcMode::Pixel, &[8.0, 12.0, f64::NAN], &mut []);
        assert_relative_eq!(spread.std_dev(0)[0], 2.0);

        let mut out = [-1.0];
        let nan = [f64::NAN];
        let pixel = CalcInput::Pixel { pos: PixelPos { row: 0, col: 0 }, bands: &nan };
        let mut all = ApplyCentresCalc::new(two_centres(), 1).with_ignore_zeros(false);
        all.calc(CalcMode::PixelOutput, pixel, &mut out).unwrap();
        assert_eq!(out[0], BORDER_LABEL);
    }

    #[test]
    fn test_std_dev_pass() {
        let mut calc = StdDevCalc::new(two_centres(), 1);
        feed(&mut calc, CalcMode::Pixel, &[8.0, 12.0, 0.0, 20.0], &mut []);
        assert_relative_eq!(calc.std_dev(0)[0], 2.0);
        assert_relative_eq!(calc.std_dev(1)[0], 0.0);
    }

    #[test]
    fn test_apply_labels() {
        let mut calc = ApplyCentresCalc::new(two_centres(), 1);
        let mut out = [0.0];
        let bands = [19.0];
        calc.calc(
            CalcMode::PixelOutput,
            CalcInput::Pixel { pos: PixelPos { row: 0, col: 0 }, bands: &bands },
            &mut out,
        )
        .unwrap();
        assert_eq!(out[0], 2.0);

        let zero = [0.0];
        let pixel = CalcInput::Pixel { pos: PixelPos { row: 0, col: 0 }, bands: &zero };
        calc.calc(CalcMode::PixelOutput, pixel, &mut out).unwrap();
        assert_eq!(out[0], BORDER_LABEL);

        let mut all = ApplyCentresCalc::new(two_centres(), 1).with_ignore_zeros(false);
        all.calc(CalcMode::PixelOutput, pixel, &mut out).unwrap();
        assert_eq!(out[0], 1.0);

        let err = calc.calc(CalcMode::Pixel, pixel, &mut out).unwrap_err();
        assert_eq!(err.kind(), imgcalc_core::ErrorKind::NotImplemented);
    }
}
