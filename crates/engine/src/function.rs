//! The per-pixel computation contract
//!
//! A [`PixelFunction`] declares which [`CalcMode`]s it understands through a
//! [`Capabilities`] set and receives every invocation through the single
//! [`PixelFunction::calc`] entry point. The engine refuses to start a pass in
//! a mode the function did not declare, so an unsupported mode surfaces as
//! [`Error::NotImplemented`] before any data is read.

use std::fmt;

use imgcalc_core::{Error, Extent, Result};
use ndarray::ArrayView3;

/// Input/output combination a computation can be driven in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalcMode {
    /// Single pixel, float bands, accumulation only
    Pixel,
    /// Single pixel, float bands, writes an output vector
    PixelOutput,
    /// Integer and float band vectors, accumulation only
    Mixed,
    /// Integer and float band vectors, writes an output vector
    MixedOutput,
    /// Single pixel with its georeferenced extent; restricted to the engine region
    PixelExtent,
    PixelExtentOutput,
    /// Square window centred on each pixel
    Window,
    WindowOutput,
    /// Window plus the extent of its centre cell; restricted to the engine region
    WindowExtent,
    WindowExtentOutput,
    /// Window returning a boolean predicate (output optional)
    WindowCondition,
}

impl CalcMode {
    pub const ALL: [CalcMode; 11] = [
        CalcMode::Pixel,
        CalcMode::PixelOutput,
        CalcMode::Mixed,
        CalcMode::MixedOutput,
        CalcMode::PixelExtent,
        CalcMode::PixelExtentOutput,
        CalcMode::Window,
        CalcMode::WindowOutput,
        CalcMode::WindowExtent,
        CalcMode::WindowExtentOutput,
        CalcMode::WindowCondition,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    /// Modes that always write an output raster
    pub fn produces_output(self) -> bool {
        matches!(
            self,
            CalcMode::PixelOutput
                | CalcMode::MixedOutput
                | CalcMode::PixelExtentOutput
                | CalcMode::WindowOutput
                | CalcMode::WindowExtentOutput
        )
    }

    pub fn is_window(self) -> bool {
        matches!(
            self,
            CalcMode::Window
                | CalcMode::WindowOutput
                | CalcMode::WindowExtent
                | CalcMode::WindowExtentOutput
                | CalcMode::WindowCondition
        )
    }

    pub fn is_extent(self) -> bool {
        matches!(
            self,
            CalcMode::PixelExtent
                | CalcMode::PixelExtentOutput
                | CalcMode::WindowExtent
                | CalcMode::WindowExtentOutput
        )
    }

    pub fn is_mixed(self) -> bool {
        matches!(self, CalcMode::Mixed | CalcMode::MixedOutput)
    }
}

impl fmt::Display for CalcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The set of modes a function supports
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u16);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);

    pub fn of(modes: &[CalcMode]) -> Self {
        modes.iter().fold(Self::NONE, |caps, &m| caps.with(m))
    }

    pub const fn with(self, mode: CalcMode) -> Self {
        Capabilities(self.0 | mode.bit())
    }

    pub fn supports(self, mode: CalcMode) -> bool {
        self.0 & mode.bit() != 0
    }

    pub fn modes(self) -> impl Iterator<Item = CalcMode> {
        CalcMode::ALL.into_iter().filter(move |&m| self.supports(m))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.modes()).finish()
    }
}

/// Raster position of the pixel being computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelPos {
    pub row: usize,
    pub col: usize,
}

/// A `(bands, size, size)` neighbourhood centred on one pixel.
///
/// Cells beyond the raster edge read as `0.0`, i.e. as border pixels.
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    data: ArrayView3<'a, f64>,
}

impl<'a> Window<'a> {
    pub fn new(data: ArrayView3<'a, f64>) -> Self {
        Self { data }
    }

    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    /// Side length (always odd)
    pub fn size(&self) -> usize {
        self.data.dim().1
    }

    pub fn radius(&self) -> usize {
        self.size() / 2
    }

    /// Value at offset `(dr, dc)` from the centre; `None` outside the window
    pub fn value(&self, band: usize, dr: isize, dc: isize) -> Option<f64> {
        let r = self.radius() as isize;
        if dr.abs() > r || dc.abs() > r {
            return None;
        }
        self.data
            .get((band, (r + dr) as usize, (r + dc) as usize))
            .copied()
    }

    pub fn centre(&self, band: usize) -> f64 {
        let r = self.radius();
        self.data[[band, r, r]]
    }

    pub fn centre_bands(&self) -> Vec<f64> {
        (0..self.bands()).map(|b| self.centre(b)).collect()
    }

    pub fn view(&self) -> ArrayView3<'a, f64> {
        self.data
    }
}

/// What a single invocation sees
#[derive(Debug, Clone, Copy)]
pub enum CalcInput<'a> {
    Pixel {
        pos: PixelPos,
        bands: &'a [f64],
    },
    Mixed {
        pos: PixelPos,
        ints: &'a [i64],
        floats: &'a [f64],
    },
    PixelExtent {
        pos: PixelPos,
        bands: &'a [f64],
        extent: Extent,
    },
    Window {
        pos: PixelPos,
        window: Window<'a>,
        extent: Option<Extent>,
    },
}

impl CalcInput<'_> {
    pub fn pos(&self) -> PixelPos {
        match self {
            CalcInput::Pixel { pos, .. }
            | CalcInput::Mixed { pos, .. }
            | CalcInput::PixelExtent { pos, .. }
            | CalcInput::Window { pos, .. } => *pos,
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalcOutcome {
    Done,
    /// Value of a window predicate
    Condition(bool),
}

/// A unit of per-pixel or per-window computation driven by the engine.
///
/// Implementations may carry accumulators. The engine gives every worker
/// its own [`fork`](PixelFunction::fork) (same configuration, zeroed
/// accumulators) and folds the workers back into the original with
/// [`merge`](PixelFunction::merge) at the end of each wave of blocks.
/// `merge` must be commutative over the accumulated quantities.
///
/// Output buffers handed to `calc` are zero-filled and sized by
/// [`num_out_bands`](PixelFunction::num_out_bands).
pub trait PixelFunction: Send + Sync + Sized {
    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn num_out_bands(&self) -> usize;

    /// Number of stacked float bands the function was configured for, if fixed
    fn num_in_bands(&self) -> Option<usize> {
        None
    }

    fn calc(&mut self, mode: CalcMode, input: CalcInput<'_>, output: &mut [f64])
    -> Result<CalcOutcome>;

    /// Worker-local copy with empty accumulators
    fn fork(&self) -> Self;

    /// Fold a worker's accumulators into `self`
    fn merge(&mut self, other: Self);

    fn check_mode(&self, mode: CalcMode) -> Result<()> {
        if self.capabilities().supports(mode) {
            Ok(())
        } else {
            Err(not_implemented(self, mode))
        }
    }
}

/// Error for a mode arm a function does not handle
pub fn not_implemented<F: PixelFunction>(func: &F, mode: CalcMode) -> Error {
    Error::NotImplemented {
        function: func.name(),
        mode: mode.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::of(&[CalcMode::Pixel, CalcMode::WindowCondition]);
        assert!(caps.supports(CalcMode::Pixel));
        assert!(caps.supports(CalcMode::WindowCondition));
        assert!(!caps.supports(CalcMode::PixelOutput));
        assert_eq!(
            caps.modes().collect::<Vec<_>>(),
            vec![CalcMode::Pixel, CalcMode::WindowCondition]
        );
        assert_eq!(Capabilities::NONE.modes().count(), 0);
    }

    #[test]
    fn test_mode_classes() {
        assert!(CalcMode::WindowExtentOutput.is_window());
        assert!(CalcMode::WindowExtentOutput.is_extent());
        assert!(CalcMode::WindowExtentOutput.produces_output());
        assert!(!CalcMode::WindowCondition.produces_output());
        assert!(CalcMode::MixedOutput.is_mixed());
        assert!(!CalcMode::Pixel.produces_output());
        assert_eq!(CalcMode::ALL.iter().filter(|m| m.produces_output()).count(), 5);
    }

    #[test]
    fn test_window_access() {
        let data = Array3::from_shape_fn((2, 3, 3), |(b, r, c)| (b * 100 + r * 10 + c) as f64);
        let w = Window::new(data.view());
        assert_eq!(w.size(), 3);
        assert_eq!(w.radius(), 1);
        assert_eq!(w.centre(0), 11.0);
        assert_eq!(w.centre_bands(), vec![11.0, 111.0]);
        assert_eq!(w.value(1, -1, 1), Some(102.0));
        assert_eq!(w.value(0, 2, 0), None);
    }
}
