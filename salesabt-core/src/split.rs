//! Row splitting: snapshot holdout, random train/test, stratified k-fold.
//!
//! All splits are expressed as row-index lists into the parent dataset, so the
//! same rows can be gathered from the frame, the target and the snapshot vector.

use chrono::NaiveDate;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::Dataset;
use crate::rng::SeedHierarchy;

#[derive(Debug, Error, PartialEq)]
pub enum SplitError {
    #[error("cannot split an empty dataset")]
    Empty,

    #[error("all rows share the snapshot {0}; no rows remain before it for training")]
    SingleSnapshot(NaiveDate),

    #[error("test fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),

    #[error("{n} rows cannot be split with test fraction {fraction}")]
    TooFewRows { n: usize, fraction: f64 },

    #[error("k-fold needs at least 2 folds, got {0}")]
    TooFewFolds(usize),

    #[error("cannot make {folds} folds from {n} rows")]
    TooFewSamplesForFolds { n: usize, folds: usize },
}

// ─── Snapshot split ──────────────────────────────────────────────────

/// Training universe (snapshot < max) and out-of-time holdout (snapshot == max).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSplit {
    pub max_snapshot: NaiveDate,
    pub training: Vec<usize>,
    pub holdout: Vec<usize>,
}

/// Split the dataset rows along its snapshot column.
pub fn split_by_snapshot(dataset: &Dataset) -> Result<SnapshotSplit, SplitError> {
    split_snapshots(dataset.snapshots())
}

/// Index-level snapshot split.
pub fn split_snapshots(snapshots: &[NaiveDate]) -> Result<SnapshotSplit, SplitError> {
    let max_snapshot = *snapshots.iter().max().ok_or(SplitError::Empty)?;
    let (holdout, training): (Vec<usize>, Vec<usize>) =
        (0..snapshots.len()).partition(|&i| snapshots[i] == max_snapshot);
    if training.is_empty() {
        return Err(SplitError::SingleSnapshot(max_snapshot));
    }
    Ok(SnapshotSplit {
        max_snapshot,
        training,
        holdout,
    })
}

// ─── Train/test split ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Plain shuffled holdout, not stratified.
///
/// `ceil(n * test_fraction)` rows go to the test side. The shuffle is seeded
/// from `seed`, so the same input always yields the same split.
pub fn train_test_split(
    indices: &[usize],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit, SplitError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(test_fraction));
    }
    let n = indices.len();
    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(SplitError::TooFewRows {
            n,
            fraction: test_fraction,
        });
    }

    let mut shuffled = indices.to_vec();
    let mut rng = SeedHierarchy::new(seed).rng_for("train_test_split", 0);
    shuffled.shuffle(&mut rng);

    let train = shuffled.split_off(n_test);
    Ok(TrainTestSplit {
        train,
        test: shuffled,
    })
}

// ─── Stratified k-fold ───────────────────────────────────────────────

/// One cross-validation fold, as positions into the searched sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Non-shuffled stratified k-fold over binary labels.
///
/// Each class is dealt to the folds in contiguous blocks, with block sizes
/// chosen so every fold gets as even a class mix as possible.
pub fn stratified_folds(y: &[f64], k: usize) -> Result<Vec<Fold>, SplitError> {
    if k < 2 {
        return Err(SplitError::TooFewFolds(k));
    }
    let n = y.len();
    if n < k {
        return Err(SplitError::TooFewSamplesForFolds { n, folds: k });
    }

    let class_of = |v: f64| usize::from(v > 0.5);

    // Sorted labels dealt round-robin give per-fold, per-class allocations.
    let mut sorted: Vec<usize> = y.iter().map(|&v| class_of(v)).collect();
    sorted.sort_unstable();
    let mut allocation = vec![[0usize; 2]; k];
    for (pos, &class) in sorted.iter().enumerate() {
        allocation[pos % k][class] += 1;
    }

    let mut fold_of = vec![0usize; n];
    for class in 0..2 {
        let members = (0..n).filter(|&i| class_of(y[i]) == class);
        let mut fold = 0;
        let mut used = 0;
        for i in members {
            while used >= allocation[fold][class] {
                fold += 1;
                used = 0;
            }
            fold_of[i] = fold;
            used += 1;
        }
    }

    Ok((0..k)
        .map(|f| {
            let (test, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| fold_of[i] == f);
            Fold { train, test }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn snapshot_split_partitions_rows() {
        let snaps = vec![d(2018, 1), d(2018, 2), d(2018, 1), d(2018, 3), d(2018, 3)];
        let split = split_snapshots(&snaps).unwrap();
        assert_eq!(split.max_snapshot, d(2018, 3));
        assert_eq!(split.training, vec![0, 1, 2]);
        assert_eq!(split.holdout, vec![3, 4]);
    }

    #[test]
    fn single_snapshot_cannot_train() {
        let snaps = vec![d(2018, 1), d(2018, 1)];
        assert_eq!(
            split_snapshots(&snaps),
            Err(SplitError::SingleSnapshot(d(2018, 1)))
        );
    }

    #[test]
    fn empty_snapshot_split() {
        assert_eq!(split_snapshots(&[]), Err(SplitError::Empty));
    }

    #[test]
    fn train_test_sizes() {
        let idx: Vec<usize> = (0..80).collect();
        let split = train_test_split(&idx, 0.25, 1992).unwrap();
        assert_eq!(split.test.len(), 20);
        assert_eq!(split.train.len(), 60);
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, idx);
    }

    #[test]
    fn train_test_rounds_test_up() {
        let idx: Vec<usize> = (0..10).collect();
        let split = train_test_split(&idx, 0.25, 1992).unwrap();
        assert_eq!(split.test.len(), 3);
    }

    #[test]
    fn train_test_is_seeded() {
        let idx: Vec<usize> = (0..50).collect();
        let a = train_test_split(&idx, 0.25, 1992).unwrap();
        let b = train_test_split(&idx, 0.25, 1992).unwrap();
        let c = train_test_split(&idx, 0.25, 7).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn train_test_rejects_bad_inputs() {
        assert_eq!(
            train_test_split(&[0, 1], 1.0, 1),
            Err(SplitError::InvalidFraction(1.0))
        );
        assert!(matches!(
            train_test_split(&[0], 0.25, 1),
            Err(SplitError::TooFewRows { .. })
        ));
    }

    #[test]
    fn stratified_folds_balance_classes() {
        let y: Vec<f64> = (0..30).map(|i| if i % 5 == 0 { 1.0 } else { 0.0 }).collect();
        let folds = stratified_folds(&y, 3).unwrap();
        assert_eq!(folds.len(), 3);
        for fold in &folds {
            assert_eq!(fold.test.len(), 10);
            assert_eq!(fold.train.len(), 20);
            let positives = fold.test.iter().filter(|&&i| y[i] == 1.0).count();
            assert_eq!(positives, 2);
        }
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..30).collect::<Vec<_>>());
    }

    #[test]
    fn stratified_folds_uneven_sizes() {
        let y = vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        let folds = stratified_folds(&y, 3).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 7);
        assert!(sizes.iter().all(|&s| s >= 2));
    }

    #[test]
    fn stratified_folds_rejects_bad_k() {
        assert_eq!(stratified_folds(&[0.0, 1.0], 1), Err(SplitError::TooFewFolds(1)));
        assert_eq!(
            stratified_folds(&[0.0, 1.0], 3),
            Err(SplitError::TooFewSamplesForFolds { n: 2, folds: 3 })
        );
    }
}
