//! # imgcalc Engine
//!
//! Out-of-core iteration over pixel-aligned rasters.
//!
//! This crate provides:
//! - [`PixelFunction`]: the per-pixel/per-window computation contract, with
//!   declared [`Capabilities`] and a single mode-keyed entry point
//! - [`CalcEngine`]: row-block streaming of one or more datasets through a
//!   function, with per-worker accumulators merged at wave barriers
//! - [`ProcessingMode`]: sequential, rayon global pool or dedicated pool

pub mod block;
pub mod engine;
pub mod function;
pub mod strategy;

pub use block::{Block, BlockIterator};
pub use engine::{CalcEngine, EngineConfig, PassReport};
pub use function::{
    CalcInput, CalcMode, CalcOutcome, Capabilities, PixelFunction, PixelPos, Window,
    not_implemented,
};
pub use strategy::{Executor, ProcessingMode};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CalcEngine, CalcInput, CalcMode, CalcOutcome, Capabilities, EngineConfig, PassReport,
        PixelFunction, PixelPos, ProcessingMode, Window, not_implemented,
    };
    pub use imgcalc_core::prelude::*;
}
