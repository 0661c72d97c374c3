use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::index::NeighborIndex;

const ORDER: u64 = 0x6f72_6465;
const POSITIVE: u64 = 0x706f_7369;
const NEGATIVE: u64 = 0x6e65_6761;

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Derives an independent random stream from a seed and a path of stream keys.
pub(crate) fn stream(seed: u64, keys: &[u64]) -> Pcg64 {
    let state = keys
        .iter()
        .fold(splitmix64(seed), |acc, key| splitmix64(acc ^ *key));
    Pcg64::seed_from_u64(state)
}

/// How the positive of a triplet is drawn from the anchor's neighbour list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositiveSelection {
    /// Walk a seeded permutation of the neighbour list, one entry per epoch. Over every `m`
    /// consecutive epochs starting at a multiple of `m` (the list length) each neighbour is used
    /// exactly once.
    Permuted,
    /// Independent draw per epoch with weight `1 / (rank + 1)`.
    RankWeighted,
}

impl Default for PositiveSelection {
    fn default() -> Self {
        PositiveSelection::Permuted
    }
}

/// How the negative of a triplet is drawn from outside the anchor's neighbour list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegativeSelection {
    /// Uniform over all non-neighbours.
    Uniform,
    /// Draw `candidates` uniform negatives and keep the one closest to the anchor.
    Hard {
        /// Number of candidates per triplet.
        candidates: usize,
    },
}

impl Default for NegativeSelection {
    fn default() -> Self {
        NegativeSelection::Uniform
    }
}

/// Identifiers of an anchor, one of its neighbours and a point outside its neighbourhood.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Triplet {
    /// Reference point.
    pub anchor: usize,
    /// Drawn from the anchor's neighbour list.
    pub positive: usize,
    /// Drawn from outside the anchor's neighbour list.
    pub negative: usize,
}

/// Counters for one sampling call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleStats {
    /// Number of triplets produced.
    pub triplets: usize,
    /// Negatives taken without the neighbour check after the retry cap ran out.
    pub unchecked_negatives: usize,
}

/// Produces triplets from a [`NeighborIndex`].
///
/// Every draw comes from a stream keyed by `(seed, epoch, anchor)`, so output depends neither on
/// thread scheduling nor on how anchors are grouped into batches.
#[derive(Clone, Debug)]
pub struct TripletSampler<'a> {
    data: &'a Dataset,
    index: &'a NeighborIndex,
    seed: u64,
    positive: PositiveSelection,
    negative: NegativeSelection,
    retries: usize,
}

impl<'a> TripletSampler<'a> {
    /// Creates a sampler. Fails with [`Error::InsufficientData`] if the index has empty
    /// neighbour lists (fewer than two points).
    pub fn new(data: &'a Dataset, index: &'a NeighborIndex, seed: u64) -> Result<Self> {
        if index.k() == 0 || index.len() != data.len() {
            return Err(Error::InsufficientData {
                points: data.len(),
                k: index.k(),
            });
        }

        Ok(Self {
            data,
            index,
            seed,
            positive: PositiveSelection::default(),
            negative: NegativeSelection::default(),
            retries: 10,
        })
    }

    /// Sets the positive strategy.
    pub fn positive(mut self, positive: PositiveSelection) -> Self {
        self.positive = positive;
        self
    }

    /// Sets the negative strategy.
    pub fn negative(mut self, negative: NegativeSelection) -> Self {
        self.negative = negative;
        self
    }

    /// Sets how many rejected negatives are redrawn before an unchecked draw is accepted.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Seeded permutation of all anchors for `epoch`.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.index.len()).collect();
        order.shuffle(&mut stream(self.seed, &[ORDER, epoch as u64]));
        order
    }

    /// Draws one triplet per anchor.
    pub fn sample(&self, epoch: usize, anchors: &[usize]) -> Vec<Triplet> {
        self.sample_with_stats(epoch, anchors).0
    }

    /// Draws one triplet per anchor and reports how many negatives skipped the neighbour check.
    pub fn sample_with_stats(&self, epoch: usize, anchors: &[usize]) -> (Vec<Triplet>, SampleStats) {
        let drawn: Vec<(Triplet, bool)> = anchors
            .par_iter()
            .map(|&anchor| {
                let positive = self.draw_positive(epoch, anchor);
                let (negative, checked) = self.draw_negative(epoch, anchor);
                (
                    Triplet {
                        anchor,
                        positive,
                        negative,
                    },
                    checked,
                )
            })
            .collect();

        let mut stats = SampleStats {
            triplets: drawn.len(),
            ..Default::default()
        };
        let triplets = drawn
            .into_iter()
            .map(|(triplet, checked)| {
                if !checked {
                    stats.unchecked_negatives += 1;
                }
                triplet
            })
            .collect();

        (triplets, stats)
    }

    fn draw_positive(&self, epoch: usize, anchor: usize) -> usize {
        let neighbours = self.index.neighbours(anchor);
        let m = neighbours.len();

        match self.positive {
            PositiveSelection::Permuted => {
                let cycle = (epoch / m) as u64;
                let mut order: Vec<usize> = (0..m).collect();
                order.shuffle(&mut stream(self.seed, &[POSITIVE, cycle, anchor as u64]));
                neighbours[order[epoch % m]]
            }
            PositiveSelection::RankWeighted => {
                let mut rng = stream(self.seed, &[POSITIVE, epoch as u64, anchor as u64]);
                match WeightedIndex::new((0..m).map(|rank| 1. / (rank + 1) as f64)) {
                    Ok(dist) => neighbours[dist.sample(&mut rng)],
                    Err(_) => neighbours[rng.gen_range(0..m)],
                }
            }
        }
    }

    fn draw_negative(&self, epoch: usize, anchor: usize) -> (usize, bool) {
        let mut rng = stream(self.seed, &[NEGATIVE, epoch as u64, anchor as u64]);

        match self.negative {
            NegativeSelection::Uniform => self.uniform_negative(anchor, &mut rng),
            NegativeSelection::Hard { candidates } => {
                let metric = self.index.metric();
                let point = self.data.point(anchor);
                let mut best: Option<(usize, bool, f64)> = None;

                for _ in 0..candidates.max(1) {
                    let (candidate, checked) = self.uniform_negative(anchor, &mut rng);
                    let dist = metric.distance(point, self.data.point(candidate));
                    let closer = match best {
                        Some((_, _, best_dist)) => dist < best_dist,
                        None => true,
                    };
                    if closer {
                        best = Some((candidate, checked, dist));
                    }
                }

                match best {
                    Some((candidate, checked, _)) => (candidate, checked),
                    None => self.uniform_negative(anchor, &mut rng),
                }
            }
        }
    }

    /// Rejection sampling over non-neighbours; falls back to any point other than the anchor.
    fn uniform_negative(&self, anchor: usize, rng: &mut Pcg64) -> (usize, bool) {
        let n = self.index.len();

        for _ in 0..self.retries {
            let candidate = rng.gen_range(0..n);
            if candidate != anchor && !self.index.contains(anchor, candidate) {
                return (candidate, true);
            }
        }

        let candidate = rng.gen_range(0..n - 1);
        if candidate >= anchor {
            (candidate + 1, false)
        } else {
            (candidate, false)
        }
    }
}
