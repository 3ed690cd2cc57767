//! Cluster centre arena
//!
//! Centres live in stable slots addressed by [`CentreId`]. Merging retires a
//! slot (tombstone) and splitting allocates a new one, so ids captured by a
//! pass snapshot stay valid until the controller compacts the store.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use imgcalc_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Stable slot index of a centre
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CentreId(pub u32);

impl CentreId {
    /// Label written for pixels assigned to this centre (0 is reserved)
    pub fn label(self) -> f64 {
        f64::from(self.0) + 1.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for CentreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cluster centre and the statistics of its members.
///
/// When `count > 0`, `mean == sum / count` band by band.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterCentre {
    pub id: CentreId,
    pub mean: Vec<f64>,
    pub sum: Vec<f64>,
    pub count: u64,
    /// Per-band standard deviation of the members around `mean`
    pub std_dev: Vec<f64>,
    /// Mean distance of the members to the centre
    pub avg_distance: f64,
}

impl ClusterCentre {
    fn seeded(id: CentreId, mean: Vec<f64>) -> Self {
        let dims = mean.len();
        Self {
            id,
            mean,
            sum: vec![0.0; dims],
            count: 0,
            std_dev: vec![0.0; dims],
            avg_distance: 0.0,
        }
    }

    /// Band with the largest standard deviation, as `(band, std_dev)`
    pub fn widest_band(&self) -> Option<(usize, f64)> {
        self.std_dev
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (b, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((b, s)),
            })
    }

    /// Set the member statistics, keeping `mean == sum / count`
    pub fn set_members(&mut self, sum: Vec<f64>, count: u64) {
        if count > 0 {
            let n = count as f64;
            self.mean = sum.iter().map(|s| s / n).collect();
        }
        self.sum = sum;
        self.count = count;
    }
}

/// Euclidean distance between two band vectors
pub fn distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Read-only copy of the live centre means, shared by the workers of a pass
#[derive(Debug, Clone, PartialEq)]
pub struct CentreSnapshot {
    ids: Vec<CentreId>,
    means: Vec<Vec<f64>>,
}

impl CentreSnapshot {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, index: usize) -> CentreId {
        self.ids[index]
    }

    pub fn mean(&self, index: usize) -> &[f64] {
        &self.means[index]
    }

    /// Mean recorded for `id`, if it was live when the snapshot was taken
    pub fn mean_of(&self, id: CentreId) -> Option<&[f64]> {
        self.ids
            .binary_search(&id)
            .ok()
            .map(|i| self.means[i].as_slice())
    }

    /// Index and distance of the nearest centre; ties go to the lowest id
    pub fn nearest(&self, bands: &[f64]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, mean) in self.means.iter().enumerate() {
            let d = distance(bands, mean);
            // Strict comparison keeps the first (lowest id) of equal distances
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best
    }
}

/// Arena of cluster centres with tombstoned slots
#[derive(Debug, Clone, Default)]
pub struct CentreStore {
    dims: usize,
    slots: Vec<Option<ClusterCentre>>,
    live: usize,
}

impl CentreStore {
    pub fn with_dims(dims: usize) -> Self {
        Self { dims, slots: Vec::new(), live: 0 }
    }

    /// Number of bands of every centre
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of live centres
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocate a new slot seeded at `mean`
    pub fn insert(&mut self, mean: Vec<f64>) -> Result<CentreId> {
        if mean.len() != self.dims {
            return Err(Error::Configuration(format!(
                "centre has {} bands, store expects {}",
                mean.len(),
                self.dims
            )));
        }
        let id = CentreId(self.slots.len() as u32);
        self.slots.push(Some(ClusterCentre::seeded(id, mean)));
        self.live += 1;
        Ok(id)
    }

    /// Tombstone a slot, returning the centre it held
    pub fn retire(&mut self, id: CentreId) -> Option<ClusterCentre> {
        let taken = self.slots.get_mut(id.index()).and_then(Option::take);
        if taken.is_some() {
            self.live -= 1;
        }
        taken
    }

    pub fn get(&self, id: CentreId) -> Option<&ClusterCentre> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: CentreId) -> Option<&mut ClusterCentre> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Live centres in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &ClusterCentre> {
        self.slots.iter().flatten()
    }

    pub fn ids(&self) -> Vec<CentreId> {
        self.iter().map(|c| c.id).collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.live = 0;
    }

    pub fn snapshot(&self) -> Arc<CentreSnapshot> {
        let (ids, means) = self.iter().map(|c| (c.id, c.mean.clone())).unzip();
        Arc::new(CentreSnapshot { ids, means })
    }

    /// Nearest live centre to `bands`; ties go to the lowest id
    pub fn nearest(&self, bands: &[f64]) -> Option<(CentreId, f64)> {
        let mut best: Option<(CentreId, f64)> = None;
        for c in self.iter() {
            let d = distance(bands, &c.mean);
            if best.is_none_or(|(_, bd)| d < bd) {
                best = Some((c.id, d));
            }
        }
        best
    }

    /// Closest pair of live centres, as `(lower id, higher id, distance)`
    pub fn closest_pair(&self) -> Option<(CentreId, CentreId, f64)> {
        let live: Vec<&ClusterCentre> = self.iter().collect();
        let mut best: Option<(CentreId, CentreId, f64)> = None;
        for (i, a) in live.iter().enumerate() {
            for b in &live[i + 1..] {
                let d = distance(&a.mean, &b.mean);
                if best.is_none_or(|(_, _, bd)| d < bd) {
                    best = Some((a.id, b.id, d));
                }
            }
        }
        best
    }

    fn live(&self, id: CentreId) -> Result<&ClusterCentre> {
        self.get(id)
            .ok_or_else(|| Error::Configuration(format!("centre {id} is not live")))
    }

    /// Merge two centres into the slot with the lower id.
    ///
    /// The survivor's mean is the count-weighted mean of both, its count
    /// their sum, its variance the pooled variance about the new mean and
    /// its average distance the count-weighted average.
    ///
    /// # Returns
    /// Id of the surviving centre
    pub fn merge(&mut self, a: CentreId, b: CentreId) -> Result<CentreId> {
        if a == b {
            return Err(Error::Configuration(format!("cannot merge centre {a} with itself")));
        }
        self.live(a)?;
        self.live(b)?;
        let (keep, drop) = if a < b { (a, b) } else { (b, a) };
        let Some(other) = self.retire(drop) else {
            return Err(Error::Configuration(format!("centre {drop} is not live")));
        };
        let Some(centre) = self.get_mut(keep) else {
            return Err(Error::Configuration(format!("centre {keep} is not live")));
        };

        let (ca, cb) = (centre.count as f64, other.count as f64);
        let total = ca + cb;
        let (wa, wb) = if total > 0.0 { (ca / total, cb / total) } else { (0.5, 0.5) };

        let mean: Vec<f64> = centre
            .mean
            .iter()
            .zip(&other.mean)
            .map(|(ma, mb)| ma * wa + mb * wb)
            .collect();
        let std_dev = (0..mean.len())
            .map(|band| {
                let da = centre.mean[band] - mean[band];
                let db = other.mean[band] - mean[band];
                let va = centre.std_dev[band].powi(2) + da * da;
                let vb = other.std_dev[band].powi(2) + db * db;
                (va * wa + vb * wb).sqrt()
            })
            .collect();

        centre.sum = centre.sum.iter().zip(&other.sum).map(|(x, y)| x + y).collect();
        centre.count += other.count;
        centre.mean = mean;
        centre.std_dev = std_dev;
        centre.avg_distance = centre.avg_distance * wa + other.avg_distance * wb;
        Ok(keep)
    }

    /// Split a centre along `band`.
    ///
    /// The original slot moves by `-delta`, a new slot is allocated at
    /// `+delta`, and the members are shared between the two.
    ///
    /// # Returns
    /// Id of the new centre
    pub fn split(&mut self, id: CentreId, band: usize, delta: f64) -> Result<CentreId> {
        if band >= self.dims {
            return Err(Error::InvalidParameter {
                name: "band",
                value: band.to_string(),
                reason: format!("store has {} bands", self.dims),
            });
        }
        let mut twin = self.live(id)?.clone();
        let new_id = CentreId(self.slots.len() as u32);

        let half = twin.count / 2;
        let Some(centre) = self.get_mut(id) else {
            return Err(Error::Configuration(format!("centre {id} is not live")));
        };
        centre.mean[band] -= delta;
        centre.count -= half;
        let n = centre.count as f64;
        centre.sum = centre.mean.iter().map(|m| m * n).collect();

        twin.id = new_id;
        twin.mean[band] += delta;
        twin.count = half;
        let n = half as f64;
        twin.sum = twin.mean.iter().map(|m| m * n).collect();
        self.slots.push(Some(twin));
        self.live += 1;
        Ok(new_id)
    }

    /// Drop tombstones and renumber the live centres `0..len` in id order
    pub fn compact(&mut self) {
        let live: Vec<ClusterCentre> = self.slots.drain(..).flatten().collect();
        self.slots = live
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                c.id = CentreId(i as u32);
                Some(c)
            })
            .collect();
    }

    pub fn to_centre_set(&self) -> CentreSet {
        CentreSet {
            dims: self.dims,
            centres: self
                .iter()
                .map(|c| SavedCentre {
                    id: c.id.0,
                    mean: c.mean.clone(),
                    count: c.count,
                    std_dev: c.std_dev.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a compact store from a saved set; ids are reassigned in order
    pub fn from_centre_set(set: &CentreSet) -> Result<Self> {
        let mut store = Self::with_dims(set.dims);
        for saved in &set.centres {
            let id = store.insert(saved.mean.clone())?;
            if let Some(c) = store.get_mut(id) {
                let n = saved.count as f64;
                c.count = saved.count;
                c.sum = saved.mean.iter().map(|m| m * n).collect();
                if saved.std_dev.len() == set.dims {
                    c.std_dev = saved.std_dev.clone();
                }
            }
        }
        Ok(store)
    }
}

/// One centre in a [`CentreSet`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCentre {
    pub id: u32,
    pub mean: Vec<f64>,
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub std_dev: Vec<f64>,
}

/// Serialisable set of cluster centres, used to save a clustering and
/// reapply it to other images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentreSet {
    pub dims: usize,
    pub centres: Vec<SavedCentre>,
}

impl CentreSet {
    pub fn from_json(text: &str) -> Result<Self> {
        let set: CentreSet = serde_json::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid centre set: {e}")))?;
        if let Some(bad) = set.centres.iter().find(|c| c.mean.len() != set.dims) {
            return Err(Error::Configuration(format!(
                "centre {} has {} bands, set declares {}",
                bad.id,
                bad.mean.len(),
                set.dims
            )));
        }
        Ok(set)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("cannot encode centre set: {e}")))
    }

    pub fn read_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
