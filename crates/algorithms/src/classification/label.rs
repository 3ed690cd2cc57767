//! Label an image against a saved set of cluster centres

use imgcalc_core::{Error, RasterSink, RasterSource, Result};
use imgcalc_engine::{CalcEngine, CalcMode, EngineConfig, PassReport};
use tracing::info;

use super::centres::{CentreSet, CentreStore};
use super::passes::ApplyCentresCalc;

/// Assign every pixel the label (centre index + 1) of its nearest centre.
///
/// Centres are renumbered in the order they appear in `centres`. With
/// `ignore_zeros`, border pixels receive label 0 instead of a centre.
///
/// # Returns
/// Counters of the labelling pass
pub fn label_with_centres(
    sources: Vec<&dyn RasterSource>,
    centres: &CentreSet,
    ignore_zeros: bool,
    config: EngineConfig,
    sink: &mut dyn RasterSink,
) -> Result<PassReport> {
    let store = CentreStore::from_centre_set(centres)?;
    if store.is_empty() {
        return Err(Error::Configuration("centre set is empty".into()));
    }
    let engine = CalcEngine::new(sources).with_config(config);

    let mut apply =
        ApplyCentresCalc::new(store.snapshot(), store.dims()).with_ignore_zeros(ignore_zeros);
    let report = engine.run_to(&mut apply, CalcMode::PixelOutput, sink)?;
    info!(centres = store.len(), pixels = report.pixels, "pixels labelled from saved centres");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::SavedCentre;
    use imgcalc_core::{ErrorKind, MemorySink, MultiBandRaster};

    fn centres(means: &[f64]) -> CentreSet {
        CentreSet {
            dims: 1,
            centres: means
                .iter()
                .enumerate()
                .map(|(i, &m)| SavedCentre { id: i as u32, mean: vec![m], count: 0, std_dev: vec![] })
                .collect(),
        }
    }

    #[test]
    fn test_label_with_centres() {
        let raster = MultiBandRaster::from_vec(1, 1, 4, vec![0.0, 4.0, 11.0, 30.0]).unwrap();

        let mut sink = MemorySink::new();
        label_with_centres(vec![&raster], &centres(&[5.0, 25.0]), true, EngineConfig::sequential(), &mut sink)
            .unwrap();
        let out = sink.into_raster().unwrap();
        assert_eq!(out.band(0).iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0, 1.0, 2.0]);

        let mut sink = MemorySink::new();
        label_with_centres(vec![&raster], &centres(&[5.0, 25.0]), false, EngineConfig::sequential(), &mut sink)
            .unwrap();
        assert_eq!(sink.into_raster().unwrap().get(0, 0, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_band_mismatch() {
        let raster = MultiBandRaster::new(2, 2, 2);
        let mut sink = MemorySink::new();
        let err = label_with_centres(vec![&raster], &centres(&[1.0]), true, EngineConfig::default(), &mut sink)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(sink.rows_written(), 0);
    }
}
