//! Seeded train/test partitioning

use crate::error::PipelineError;
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Train/test partition of a feature matrix and its labels
#[derive(Debug, Clone)]
pub struct DataSplit {
    pub train_features: Array2<f64>,
    pub train_labels: Array1<f64>,
    pub test_features: Array2<f64>,
    pub test_labels: Array1<f64>,
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
}

/// Shuffle row indices with a seeded RNG and hold out `ceil(test_ratio * n)` rows.
pub fn train_test_split(
    features: &Array2<f64>,
    labels: &Array1<f64>,
    test_ratio: f64,
    seed: u64,
) -> Result<DataSplit, PipelineError> {
    let n = features.nrows();
    if labels.len() != n {
        return Err(PipelineError::ShapeMismatch {
            expected: n,
            actual: labels.len(),
        });
    }

    let n_test = (test_ratio * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(PipelineError::InsufficientData(format!(
            "{n} windows cannot be split with test ratio {test_ratio}"
        )));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_indices = indices[..n_test].to_vec();
    let train_indices = indices[n_test..].to_vec();

    Ok(DataSplit {
        train_features: features.select(Axis(0), &train_indices),
        train_labels: labels.select(Axis(0), &train_indices),
        test_features: features.select(Axis(0), &test_indices),
        test_labels: labels.select(Axis(0), &test_indices),
        train_indices,
        test_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| (i * 3 + j) as f64);
        let y = Array1::from_shape_fn(n, |i| i as f64);
        (x, y)
    }

    #[test]
    fn test_split_sizes() {
        let (x, y) = data(50);
        let split = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(split.test_labels.len(), 10);
        assert_eq!(split.train_labels.len(), 40);

        let (x, y) = data(11);
        let split = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(split.test_labels.len(), 3);
        assert_eq!(split.train_labels.len(), 8);
    }

    #[test]
    fn test_split_is_reproducible() {
        let (x, y) = data(40);
        let a = train_test_split(&x, &y, 0.2, 42).unwrap();
        let b = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(a.train_indices, b.train_indices);
        assert_eq!(a.test_indices, b.test_indices);
        assert_eq!(a.train_features, b.train_features);

        let c = train_test_split(&x, &y, 0.2, 7).unwrap();
        assert_ne!(a.test_indices, c.test_indices);
    }

    #[test]
    fn test_split_is_a_partition_and_rows_stay_paired() {
        let (x, y) = data(30);
        let split = train_test_split(&x, &y, 0.2, 1).unwrap();

        let mut all: Vec<usize> = split
            .train_indices
            .iter()
            .chain(&split.test_indices)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..30).collect::<Vec<_>>());

        for (row, label) in split.train_features.rows().into_iter().zip(&split.train_labels) {
            assert_eq!(row[0], label * 3.0);
        }
    }

    #[test]
    fn test_split_needs_both_sides() {
        let (x, y) = data(1);
        assert!(matches!(
            train_test_split(&x, &y, 0.2, 42),
            Err(PipelineError::InsufficientData(_))
        ));
    }
}
