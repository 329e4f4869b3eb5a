//! Sample splitters used when refitting models for scree and repeated cross-validation sweeps.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Train/test sample indices for one cross-validation round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits `n_samples` rows into cross-validation folds.
///
/// Implementors must be cheap to clone: every trial of a sweep receives its own copy.
pub trait CrossValidator: Clone + Send + Sync {
    /// Number of folds produced by `split`.
    fn n_splits(&self) -> usize;

    /// Produces the folds for a data set with `n_samples` rows.
    fn split(&self, n_samples: usize) -> Vec<Fold>;

    /// Returns a splitter for the given repeat of a repeated cross-validation.
    ///
    /// Deterministic splitters return themselves; shuffling splitters draw a new
    /// permutation per stream.
    fn reshuffled(&self, _stream: u64) -> Self {
        self.clone()
    }
}

/// K-fold splitter. The first `n_samples % n_splits` folds receive one extra sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for KFold {
    fn default() -> Self {
        KFold {
            n_splits: 7,
            shuffle: true,
            seed: 2025,
        }
    }
}

impl KFold {
    pub fn new(n_splits: usize, shuffle: bool, seed: u64) -> Self {
        Self {
            n_splits,
            shuffle,
            seed,
        }
    }
}

impl CrossValidator for KFold {
    fn n_splits(&self) -> usize {
        self.n_splits
    }

    fn split(&self, n_samples: usize) -> Vec<Fold> {
        let n_splits = self.n_splits.clamp(1, n_samples.max(1));
        let mut order: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
            order.shuffle(&mut rng);
        }

        let base = n_samples / n_splits;
        let extra = n_samples % n_splits;
        let mut folds = Vec::with_capacity(n_splits);
        let mut start = 0;
        for fold_idx in 0..n_splits {
            let size = base + usize::from(fold_idx < extra);
            let end = start + size;
            let test = order[start..end].to_vec();
            let train = order[..start]
                .iter()
                .chain(order[end..].iter())
                .copied()
                .collect();
            folds.push(Fold { train, test });
            start = end;
        }
        folds
    }

    fn reshuffled(&self, stream: u64) -> Self {
        if !self.shuffle {
            return self.clone();
        }
        // Weyl-sequence offset per stream.
        let seed = self
            .seed
            .wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        Self {
            seed,
            ..self.clone()
        }
    }
}
