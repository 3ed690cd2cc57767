//! ISODATA clustering algorithm
//!
//! Iterative Self-Organizing Data Analysis Technique. Extends K-means
//! with automatic split and merge of clusters based on statistical criteria.
//!
//! The controller never touches pixel data. Every traversal of the input
//! (seeding, assignment, variance, labelling) is an engine pass over a
//! [`PixelFunction`](imgcalc_engine::PixelFunction); the centre store is
//! only mutated between passes.

use imgcalc_core::{Error, RasterSink, RasterSource, Result};
use imgcalc_engine::{CalcEngine, CalcMode, EngineConfig, PassReport};
use rand::Rng;
use tracing::{debug, info, warn};

use super::centres::{CentreId, CentreStore, distance};
use super::passes::{ApplyCentresCalc, AssignmentCalc, StdDevCalc};
use super::seeding::{InitStrategy, seed_centres};

/// Order of the merge and split steps within one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepOrder {
    /// Merge close centres, then split wide ones using the merged statistics
    #[default]
    MergeThenSplit,
    SplitThenMerge,
}

/// Parameters for ISODATA
#[derive(Debug, Clone)]
pub struct IsodataParams {
    /// Converged once the summed centre movement falls below this
    pub terminal_threshold: f64,
    /// Maximum iterations
    pub max_iterations: usize,
    /// Centres with fewer assigned pixels are dropped
    pub min_num_vals: u64,
    /// Centres closer than this are merged
    pub min_distance_between_centres: f64,
    /// Standard deviation (in the widest band) above which a centre may split
    pub stddev_thres: f64,
    /// A centre only splits when its average distance exceeds this
    /// multiple of the global average distance
    pub prop_over_avg_dist: f64,
    /// Split offset as a fraction of the widest band's standard deviation
    pub split_fraction: f64,
    /// Ceiling on the number of centres; `None` for no ceiling
    pub max_clusters: Option<usize>,
    pub order: StepOrder,
    /// Also require an iteration without drops, merges or splits before
    /// declaring convergence. When false, movement alone decides.
    pub settle_after_restructure: bool,
}

impl Default for IsodataParams {
    fn default() -> Self {
        Self {
            terminal_threshold: 0.01,
            max_iterations: 50,
            min_num_vals: 10,
            min_distance_between_centres: 5.0,
            stddev_thres: 10.0,
            prop_over_avg_dist: 1.0,
            split_fraction: 0.5,
            max_clusters: None,
            order: StepOrder::MergeThenSplit,
            settle_after_restructure: true,
        }
    }
}

impl IsodataParams {
    pub fn validate(&self) -> Result<()> {
        let non_negative = [
            ("terminal_threshold", self.terminal_threshold),
            ("min_distance_between_centres", self.min_distance_between_centres),
            ("stddev_thres", self.stddev_thres),
            ("prop_over_avg_dist", self.prop_over_avg_dist),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(Error::InvalidParameter {
                    name,
                    value: value.to_string(),
                    reason: "must be a finite, non-negative number".into(),
                });
            }
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                value: "0".into(),
                reason: "at least one iteration is required".into(),
            });
        }
        if !(self.split_fraction > 0.0 && self.split_fraction.is_finite()) {
            return Err(Error::InvalidParameter {
                name: "split_fraction",
                value: self.split_fraction.to_string(),
                reason: "must be positive".into(),
            });
        }
        if self.max_clusters == Some(0) {
            return Err(Error::InvalidParameter {
                name: "max_clusters",
                value: "0".into(),
                reason: "ceiling must allow at least one cluster".into(),
            });
        }
        Ok(())
    }
}

/// Lifecycle of an [`IsodataClassifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClustererState {
    Uninitialized,
    CentroidsInitialized,
    Iterating,
    Converged,
    MaxIterationsReached,
    LabelsGenerated,
}

impl ClustererState {
    /// Either state in which labels may be generated
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ClustererState::Converged
                | ClustererState::MaxIterationsReached
                | ClustererState::LabelsGenerated
        )
    }
}

/// Barrier-separated phases of the algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seed,
    Assign,
    Recompute,
    StdDev,
    Merge,
    Split,
    Movement,
    Label,
}

/// What one iteration did
#[derive(Debug, Clone, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// Phases in execution order
    pub phases: Vec<Phase>,
    pub dropped: usize,
    pub merged: usize,
    pub split: usize,
    /// Summed distance moved by the centres that existed before the iteration
    pub movement: f64,
    pub average_distance: f64,
    pub centres: usize,
    pub state: ClustererState,
}

impl IterationReport {
    /// Whether the number of centres changed
    pub fn restructured(&self) -> bool {
        self.dropped + self.merged + self.split > 0
    }
}

/// Result of [`IsodataClassifier::iterate`]
#[derive(Debug, Clone)]
pub struct IsodataOutcome {
    pub state: ClustererState,
    pub iterations: usize,
    pub centres: usize,
    pub reports: Vec<IterationReport>,
}

impl IsodataOutcome {
    pub fn converged(&self) -> bool {
        self.state == ClustererState::Converged
    }
}

/// ISODATA controller over one or more pixel-aligned rasters.
///
/// Float sources are stacked into one band vector per pixel. Pixels whose
/// first band is zero are border pixels: they never contribute to a centre
/// and are labelled [`BORDER_LABEL`](super::BORDER_LABEL).
pub struct IsodataClassifier<'a> {
    engine: CalcEngine<'a>,
    store: CentreStore,
    state: ClustererState,
    iteration: usize,
}

impl<'a> IsodataClassifier<'a> {
    pub fn new(sources: Vec<&'a dyn RasterSource>, config: EngineConfig) -> Result<Self> {
        let engine = CalcEngine::new(sources).with_config(config);
        engine.validate()?;
        let dims = engine.band_count();
        Ok(Self {
            engine,
            store: CentreStore::with_dims(dims),
            state: ClustererState::Uninitialized,
            iteration: 0,
        })
    }

    pub fn state(&self) -> ClustererState {
        self.state
    }

    pub fn centres(&self) -> &CentreStore {
        &self.store
    }

    /// Iterations run since the last call to [`iterate`](Self::iterate)
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Replace the centres with externally supplied means
    pub fn set_centres(&mut self, means: Vec<Vec<f64>>) -> Result<()> {
        if means.is_empty() {
            return Err(Error::Configuration("no centres given".into()));
        }
        let mut store = CentreStore::with_dims(self.engine.band_count());
        for mean in means {
            store.insert(mean)?;
        }
        self.store = store;
        self.state = ClustererState::CentroidsInitialized;
        self.iteration = 0;
        Ok(())
    }

    /// Seed `num_clusters` centres from the valid pixels.
    ///
    /// May be called in any state; it discards previous centres.
    pub fn initialize<R: Rng>(
        &mut self,
        num_clusters: usize,
        strategy: InitStrategy,
        rng: &mut R,
    ) -> Result<()> {
        let seeds = seed_centres(&self.engine, num_clusters, strategy, rng)?;
        self.set_centres(seeds)?;
        debug!(phase = ?Phase::Seed, centres = num_clusters, ?strategy, "centres seeded");
        Ok(())
    }

    /// Run iterations until convergence or `max_iterations`.
    ///
    /// The store is compacted afterwards, so the final centre ids are
    /// `0..centres` and the labels `1..=centres`.
    pub fn iterate(&mut self, params: &IsodataParams) -> Result<IsodataOutcome> {
        params.validate()?;
        self.require_centres()?;
        self.iteration = 0;

        let mut reports = Vec::new();
        loop {
            let report = self.step(params)?;
            let done = report.state.is_terminal();
            reports.push(report);
            if done {
                break;
            }
        }
        self.store.compact();

        let outcome = IsodataOutcome {
            state: self.state,
            iterations: self.iteration,
            centres: self.store.len(),
            reports,
        };
        if outcome.converged() {
            info!(iterations = outcome.iterations, centres = outcome.centres, "ISODATA converged");
        } else {
            warn!(
                iterations = outcome.iterations,
                centres = outcome.centres,
                "ISODATA stopped at the iteration limit"
            );
        }
        Ok(outcome)
    }

    /// Run a single iteration.
    ///
    /// Allowed in any state with centres, including after convergence.
    /// The iteration converges when the summed movement of the centres
    /// that survived it is below `terminal_threshold`; with
    /// `settle_after_restructure` set it must also have dropped, merged and
    /// split nothing, so a restructured store always gets one more pass.
    pub fn step(&mut self, params: &IsodataParams) -> Result<IterationReport> {
        params.validate()?;
        self.require_centres()?;
        self.state = ClustererState::Iterating;
        self.iteration += 1;
        let dims = self.store.dims();
        let mut phases = Vec::with_capacity(7);

        // Means used for this iteration's assignment
        let previous = self.store.snapshot();

        let mut assign = AssignmentCalc::new(previous.clone(), dims);
        self.engine.run(&mut assign, CalcMode::Pixel)?;
        phases.push(Phase::Assign);

        let mut dropped = 0;
        for index in 0..previous.len() {
            let id = previous.id(index);
            let count = assign.count(index);
            if count < params.min_num_vals || count == 0 {
                self.store.retire(id);
                dropped += 1;
                continue;
            }
            if let Some(centre) = self.store.get_mut(id) {
                centre.set_members(assign.sum(index).to_vec(), count);
                centre.avg_distance = assign.distance_sum(index) / count as f64;
            }
        }
        phases.push(Phase::Recompute);
        if self.store.is_empty() {
            return Err(Error::Convergence(format!(
                "all {} centres dropped in iteration {}",
                previous.len(),
                self.iteration
            )));
        }
        let average_distance = assign.average_distance();

        let updated = self.store.snapshot();
        let mut spread = StdDevCalc::new(updated.clone(), dims);
        self.engine.run(&mut spread, CalcMode::Pixel)?;
        for index in 0..updated.len() {
            if let Some(centre) = self.store.get_mut(updated.id(index)) {
                centre.std_dev = spread.std_dev(index);
            }
        }
        phases.push(Phase::StdDev);

        let (merged, split) = match params.order {
            StepOrder::MergeThenSplit => {
                let merged = self.merge_close(params)?;
                phases.push(Phase::Merge);
                let split = self.split_wide(params, average_distance)?;
                phases.push(Phase::Split);
                (merged, split)
            }
            StepOrder::SplitThenMerge => {
                let split = self.split_wide(params, average_distance)?;
                phases.push(Phase::Split);
                let merged = self.merge_close(params)?;
                phases.push(Phase::Merge);
                (merged, split)
            }
        };

        let movement: f64 = self
            .store
            .iter()
            .filter_map(|c| previous.mean_of(c.id).map(|before| distance(&c.mean, before)))
            .sum();
        phases.push(Phase::Movement);

        let restructured = dropped + merged + split > 0;
        let settled = !(params.settle_after_restructure && restructured);
        self.state = if settled && movement < params.terminal_threshold {
            ClustererState::Converged
        } else if self.iteration >= params.max_iterations {
            ClustererState::MaxIterationsReached
        } else {
            ClustererState::Iterating
        };

        let report = IterationReport {
            iteration: self.iteration,
            phases,
            dropped,
            merged,
            split,
            movement,
            average_distance,
            centres: self.store.len(),
            state: self.state,
        };
        debug!(
            iteration = report.iteration,
            centres = report.centres,
            dropped,
            merged,
            split,
            movement,
            state = ?report.state,
            "iteration complete"
        );
        Ok(report)
    }

    /// Merge the closest pair of centres until no pair is closer than the threshold
    fn merge_close(&mut self, params: &IsodataParams) -> Result<usize> {
        let mut merged = 0;
        while let Some((a, b, d)) = self.store.closest_pair()
            && d < params.min_distance_between_centres
        {
            self.store.merge(a, b)?;
            merged += 1;
        }
        Ok(merged)
    }

    fn split_wide(&mut self, params: &IsodataParams, average_distance: f64) -> Result<usize> {
        let ceiling = params.max_clusters.unwrap_or(usize::MAX);
        let min_members = 2 * params.min_num_vals.max(1);
        let candidates: Vec<(CentreId, usize, f64)> = self
            .store
            .iter()
            .filter(|c| c.count >= min_members)
            .filter(|c| c.avg_distance > params.prop_over_avg_dist * average_distance)
            .filter_map(|c| {
                c.widest_band()
                    .filter(|&(_, std)| std > params.stddev_thres)
                    .map(|(band, std)| (c.id, band, std))
            })
            .collect();

        let mut split = 0;
        for (id, band, std) in candidates {
            if self.store.len() >= ceiling {
                debug!(ceiling, "cluster ceiling reached, skipping splits");
                break;
            }
            self.store.split(id, band, params.split_fraction * std)?;
            split += 1;
        }
        Ok(split)
    }

    fn require_centres(&self) -> Result<()> {
        if self.state == ClustererState::Uninitialized || self.store.is_empty() {
            return Err(Error::Configuration(
                "clusterer has no centres; call initialize first".into(),
            ));
        }
        Ok(())
    }

    /// Final labelling pass: each pixel gets its nearest centre's id + 1,
    /// border and non-finite pixels get [`BORDER_LABEL`](super::BORDER_LABEL)
    pub fn generate_labels(&mut self, sink: &mut dyn RasterSink) -> Result<PassReport> {
        if !self.state.is_terminal() {
            return Err(Error::Configuration(format!(
                "labels can only be generated after iterating (state is {:?})",
                self.state
            )));
        }
        let mut apply = ApplyCentresCalc::new(self.store.snapshot(), self.store.dims());
        let report = self.engine.run_to(&mut apply, CalcMode::PixelOutput, sink)?;
        self.state = ClustererState::LabelsGenerated;
        debug!(phase = ?Phase::Label, centres = self.store.len(), "labels written");
        Ok(report)
    }
}

/// ISODATA unsupervised classification.
///
/// Seeds `num_clusters` centres, iterates to a terminal state and writes the
/// label image to `sink`.
///
/// # Returns
/// The final centres and how the iteration ended
pub fn isodata<R: Rng>(
    sources: Vec<&dyn RasterSource>,
    num_clusters: usize,
    init: InitStrategy,
    params: &IsodataParams,
    config: EngineConfig,
    rng: &mut R,
    sink: &mut dyn RasterSink,
) -> Result<(CentreStore, IsodataOutcome)> {
    params.validate()?;
    let mut classifier = IsodataClassifier::new(sources, config)?;
    classifier.initialize(num_clusters, init, rng)?;
    let outcome = classifier.iterate(params)?;
    classifier.generate_labels(sink)?;
    Ok((classifier.store, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgcalc_core::{MemorySink, MultiBandRaster};

    fn params() -> IsodataParams {
        IsodataParams {
            min_num_vals: 1,
            min_distance_between_centres: 1.0,
            stddev_thres: 100.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate() {
        assert!(IsodataParams::default().validate().is_ok());
        let bad = IsodataParams { terminal_threshold: -1.0, ..Default::default() };
        assert!(matches!(bad.validate(), Err(Error::InvalidParameter { name: "terminal_threshold", .. })));
        let bad = IsodataParams { max_iterations: 0, ..Default::default() };
        assert!(bad.validate().is_err());
        let bad = IsodataParams { stddev_thres: f64::NAN, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_state_guards() {
        let raster = MultiBandRaster::from_vec(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut c = IsodataClassifier::new(vec![&raster], EngineConfig::sequential()).unwrap();
        assert_eq!(c.state(), ClustererState::Uninitialized);
        assert!(c.step(&params()).unwrap_err().is_configuration());

        let mut sink = MemorySink::new();
        c.set_centres(vec![vec![2.0]]).unwrap();
        assert!(c.generate_labels(&mut sink).unwrap_err().is_configuration());
        assert_eq!(sink.rows_written(), 0);
    }

    #[test]
    fn test_phase_order() {
        let raster = MultiBandRaster::from_vec(1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut c = IsodataClassifier::new(vec![&raster], EngineConfig::sequential()).unwrap();
        c.set_centres(vec![vec![1.0], vec![4.0]]).unwrap();

        let report = c.step(&params()).unwrap();
        assert_eq!(
            report.phases,
            vec![Phase::Assign, Phase::Recompute, Phase::StdDev, Phase::Merge, Phase::Split, Phase::Movement]
        );

        let reversed = IsodataParams { order: StepOrder::SplitThenMerge, ..params() };
        let report = c.step(&reversed).unwrap();
        assert_eq!(report.phases[3..5], [Phase::Split, Phase::Merge]);
    }

    #[test]
    fn test_convergence_after_drop() {
        // The second seed gets no pixels and is dropped; the first does not move
        let raster = MultiBandRaster::from_vec(1, 2, 2, vec![5.0; 4]).unwrap();
        let restructuring = params();

        let mut c = IsodataClassifier::new(vec![&raster], EngineConfig::sequential()).unwrap();
        c.set_centres(vec![vec![5.0], vec![5.5]]).unwrap();
        let report = c.step(&restructuring).unwrap();
        assert_eq!((report.dropped, report.merged), (1, 0));
        assert_eq!(report.movement, 0.0);
        assert_eq!(report.state, ClustererState::Iterating);
        assert_eq!(c.step(&restructuring).unwrap().state, ClustererState::Converged);

        let movement_only = IsodataParams { settle_after_restructure: false, ..restructuring };
        let mut c = IsodataClassifier::new(vec![&raster], EngineConfig::sequential()).unwrap();
        c.set_centres(vec![vec![5.0], vec![5.5]]).unwrap();
        let report = c.step(&movement_only).unwrap();
        assert!(report.restructured());
        assert_eq!(report.state, ClustererState::Converged);
    }

    #[test]
    fn test_split_wide_centre() {
        // One centre over two well separated groups
        let data = vec![10.0, 10.0, 10.0, 10.0, 50.0, 50.0, 50.0, 50.0];
        let raster = MultiBandRaster::from_vec(1, 2, 4, data).unwrap();
        let mut c = IsodataClassifier::new(vec![&raster], EngineConfig::sequential()).unwrap();
        c.set_centres(vec![vec![30.0]]).unwrap();

        let split_params = IsodataParams {
            min_num_vals: 1,
            stddev_thres: 5.0,
            prop_over_avg_dist: 0.5,
            min_distance_between_centres: 0.0,
            max_clusters: Some(2),
            ..Default::default()
        };
        let report = c.step(&split_params).unwrap();
        assert_eq!(report.split, 1);
        assert_eq!(c.centres().len(), 2);
        assert_eq!(report.state, ClustererState::Iterating);

        // The ceiling stops further splits; the halves then settle on the groups
        let outcome = c.iterate(&split_params).unwrap();
        assert!(outcome.converged());
        let mut means: Vec<f64> = c.centres().iter().map(|c| c.mean[0]).collect();
        means.sort_by(f64::total_cmp);
        assert_eq!(means, vec![10.0, 50.0]);
    }
}
