//! Unsupervised classification of multi-band rasters
//!
//! - **ISODATA**: iterative clustering with split and merge, every pixel
//!   traversal expressed as an engine pass
//! - **Centre store**: arena of cluster centres with stable ids
//! - **Label with centres**: apply a saved centre set to another image

mod centres;
mod isodata;
mod label;
mod passes;
mod seeding;

pub use centres::{
    CentreId, CentreSet, CentreSnapshot, CentreStore, ClusterCentre, SavedCentre, distance,
};
pub use isodata::{
    ClustererState, IsodataClassifier, IsodataOutcome, IsodataParams, IterationReport, Phase,
    StepOrder, isodata,
};
pub use label::label_with_centres;
pub use passes::{ApplyCentresCalc, AssignmentCalc, BORDER_LABEL, StdDevCalc};
pub use seeding::{InitStrategy, SeedLocator, SeedWeighting, SeedWeights, locate, seed_centres};
