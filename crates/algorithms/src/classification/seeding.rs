//! Out-of-core centre seeding
//!
//! Seeds are drawn without holding the pixels in memory. A [`SeedWeights`]
//! pass totals the selection weight of each row; the controller draws a
//! threshold on the cumulative weight, finds the row where it is crossed,
//! and a [`SeedLocator`] pass walks that row in column order to pick the
//! pixel. Rows are never split across workers, so the walk repeats the
//! summation order of the totals exactly.

use std::collections::BTreeMap;
use std::sync::Arc;

use imgcalc_core::{Error, Result, is_excluded};
use imgcalc_engine::{
    CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, PixelFunction, not_implemented,
};
use rand::Rng;
use rand::seq::index::sample;
use tracing::debug;

use super::centres::distance;

/// How initial centres are drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitStrategy {
    /// Uniformly sampled distinct valid pixels
    Random,
    /// k-means++: each further centre drawn with probability proportional
    /// to the squared distance to the nearest centre chosen so far
    #[default]
    KMeansPlusPlus,
}

/// Selection weight of a valid pixel; border and non-finite pixels weigh 0
#[derive(Debug, Clone)]
pub enum SeedWeighting {
    Uniform,
    /// Squared distance to the nearest of the given means
    DistanceSquared(Arc<Vec<Vec<f64>>>),
}

impl SeedWeighting {
    pub fn weight(&self, bands: &[f64]) -> f64 {
        if is_excluded(bands) {
            return 0.0;
        }
        match self {
            SeedWeighting::Uniform => 1.0,
            SeedWeighting::DistanceSquared(chosen) => chosen
                .iter()
                .map(|m| distance(bands, m).powi(2))
                .fold(f64::INFINITY, f64::min),
        }
    }
}

/// Accumulates the total selection weight of every row
pub struct SeedWeights {
    weighting: SeedWeighting,
    dims: usize,
    row_totals: Vec<f64>,
}

impl SeedWeights {
    pub fn new(weighting: SeedWeighting, dims: usize, rows: usize) -> Self {
        Self {
            weighting,
            dims,
            row_totals: vec![0.0; rows],
        }
    }

    pub fn row_totals(&self) -> &[f64] {
        &self.row_totals
    }

    pub fn total(&self) -> f64 {
        self.row_totals.iter().sum()
    }
}

impl PixelFunction for SeedWeights {
    fn name(&self) -> &'static str {
        "SeedWeights"
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
        let (CalcMode::Pixel, CalcInput::Pixel { pos, bands }) = (mode, input) else {
            return Err(not_implemented(self, mode));
        };
        self.row_totals[pos.row] += self.weighting.weight(bands);
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::new(self.weighting.clone(), self.dims, self.row_totals.len())
    }

    fn merge(&mut self, other: Self) {
        for (a, b) in self.row_totals.iter_mut().zip(&other.row_totals) {
            *a += b;
        }
    }
}

/// Row and in-row residual where a cumulative weight threshold is crossed.
///
/// Falls back to the end of the last weighted row when rounding pushes the
/// threshold past the total.
pub fn locate(row_totals: &[f64], threshold: f64) -> Option<(usize, f64)> {
    let mut before = 0.0;
    let mut last = None;
    for (row, &total) in row_totals.iter().enumerate() {
        if total <= 0.0 {
            continue;
        }
        if threshold < before + total {
            return Some((row, threshold - before));
        }
        last = Some((row, total));
        before += total;
    }
    last
}

/// Finds the pixels at which per-row weight thresholds are crossed
pub struct SeedLocator {
    weighting: SeedWeighting,
    dims: usize,
    /// row -> (slot, residual weight within the row)
    targets: Arc<BTreeMap<usize, Vec<(usize, f64)>>>,
    slots: usize,
    row: Option<usize>,
    cumulative: f64,
    found: Vec<Option<Vec<f64>>>,
    last_weighted: Vec<Option<Vec<f64>>>,
}

impl SeedLocator {
    pub fn new(weighting: SeedWeighting, dims: usize, targets: &[(usize, f64)]) -> Self {
        let mut by_row: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
        for (slot, &(row, residual)) in targets.iter().enumerate() {
            by_row.entry(row).or_default().push((slot, residual));
        }
        Self::with_targets(weighting, dims, Arc::new(by_row), targets.len())
    }

    fn with_targets(
        weighting: SeedWeighting,
        dims: usize,
        targets: Arc<BTreeMap<usize, Vec<(usize, f64)>>>,
        slots: usize,
    ) -> Self {
        Self {
            weighting,
            dims,
            targets,
            slots,
            row: None,
            cumulative: 0.0,
            found: vec![None; slots],
            last_weighted: vec![None; slots],
        }
    }

    /// Band vectors of the located pixels, in target order
    pub fn into_seeds(self) -> Result<Vec<Vec<f64>>> {
        self.found
            .into_iter()
            .zip(self.last_weighted)
            .enumerate()
            .map(|(slot, (found, last))| {
                found.or(last).ok_or_else(|| {
                    Error::Configuration(format!("no valid pixel found for seed {slot}"))
                })
            })
            .collect()
    }
}

impl PixelFunction for SeedLocator {
    fn name(&self) -> &'static str {
        "SeedLocator"
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
        let (CalcMode::Pixel, CalcInput::Pixel { pos, bands }) = (mode, input) else {
            return Err(not_implemented(self, mode));
        };
        let Some(targets) = self.targets.get(&pos.row) else {
            return Ok(CalcOutcome::Done);
        };
        if self.row != Some(pos.row) {
            self.row = Some(pos.row);
            self.cumulative = 0.0;
        }

        let w = self.weighting.weight(bands);
        if w <= 0.0 {
            return Ok(CalcOutcome::Done);
        }
        let upper = self.cumulative + w;
        for &(slot, residual) in targets {
            if self.found[slot].is_none() && residual < upper {
                self.found[slot] = Some(bands.to_vec());
            }
            self.last_weighted[slot] = Some(bands.to_vec());
        }
        self.cumulative = upper;
        Ok(CalcOutcome::Done)
    }

    fn fork(&self) -> Self {
        Self::with_targets(
            self.weighting.clone(),
            self.dims,
            Arc::clone(&self.targets),
            self.slots,
        )
    }

    fn merge(&mut self, other: Self) {
        // Each target row is walked by exactly one worker
        for (mine, theirs) in self.found.iter_mut().zip(other.found) {
            if mine.is_none() {
                *mine = theirs;
            }
        }
        for (mine, theirs) in self.last_weighted.iter_mut().zip(other.last_weighted) {
            if theirs.is_some() {
                *mine = theirs;
            }
        }
    }
}

fn row_totals(engine: &CalcEngine<'_>, weighting: SeedWeighting) -> Result<Vec<f64>> {
    let (rows, _) = engine.shape();
    let mut weights = SeedWeights::new(weighting, engine.band_count(), rows);
    engine.run(&mut weights, CalcMode::Pixel)?;
    Ok(weights.row_totals)
}

fn locate_all(
    engine: &CalcEngine<'_>,
    weighting: SeedWeighting,
    totals: &[f64],
    thresholds: &[f64],
) -> Result<Vec<Vec<f64>>> {
    let targets = thresholds
        .iter()
        .map(|&t| {
            locate(totals, t)
                .ok_or_else(|| Error::Configuration("no valid pixels to seed from".into()))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut locator = SeedLocator::new(weighting, engine.band_count(), &targets);
    engine.run(&mut locator, CalcMode::Pixel)?;
    locator.into_seeds()
}

fn valid_count(totals: &[f64], num_clusters: usize) -> Result<usize> {
    if num_clusters == 0 {
        return Err(Error::InvalidParameter {
            name: "num_clusters",
            value: "0".into(),
            reason: "at least one cluster is required".into(),
        });
    }
    let valid = totals.iter().sum::<f64>().round() as usize;
    if num_clusters > valid {
        return Err(Error::Configuration(format!(
            "{num_clusters} clusters requested but only {valid} valid pixels"
        )));
    }
    Ok(valid)
}

/// Draw `num_clusters` initial centre means from the valid pixels
pub fn seed_centres<R: Rng>(
    engine: &CalcEngine<'_>,
    num_clusters: usize,
    strategy: InitStrategy,
    rng: &mut R,
) -> Result<Vec<Vec<f64>>> {
    let counts = row_totals(engine, SeedWeighting::Uniform)?;
    let valid = valid_count(&counts, num_clusters)?;

    match strategy {
        InitStrategy::Random => {
            let thresholds: Vec<f64> = sample(rng, valid, num_clusters)
                .into_iter()
                .map(|ordinal| ordinal as f64 + 0.5)
                .collect();
            locate_all(engine, SeedWeighting::Uniform, &counts, &thresholds)
        }
        InitStrategy::KMeansPlusPlus => {
            let first = rng.gen_range(0..valid) as f64 + 0.5;
            let mut chosen = locate_all(engine, SeedWeighting::Uniform, &counts, &[first])?;

            while chosen.len() < num_clusters {
                let weighting = SeedWeighting::DistanceSquared(Arc::new(chosen.clone()));
                let totals = row_totals(engine, weighting.clone())?;
                let total: f64 = totals.iter().sum();

                let mut next = if total > 0.0 {
                    let t = rng.gen_range(0.0..total);
                    locate_all(engine, weighting, &totals, &[t])?
                } else {
                    // Every valid pixel coincides with a chosen centre
                    debug!(chosen = chosen.len(), "zero seed weight, drawing uniformly");
                    let t = rng.gen_range(0..valid) as f64 + 0.5;
                    locate_all(engine, SeedWeighting::Uniform, &counts, &[t])?
                };
                chosen.append(&mut next);
            }
            Ok(chosen)
        }
    }
}
