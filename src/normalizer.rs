//! Feature standardization
//!
//! Fits per-column mean and population standard deviation over the full
//! feature matrix and maps every value to `(x - mean) / scale`. The fitted
//! statistics travel with the exported model so inference applies the
//! identical transform.

use crate::error::PipelineError;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Fitted column-wise standardizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Column means
    pub mean: Vec<f64>,
    /// Column standard deviations (1.0 for constant columns)
    pub scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on a non-empty `rows x features` matrix
    pub fn fit(features: &Array2<f64>) -> Result<Self, PipelineError> {
        if features.nrows() == 0 {
            return Err(PipelineError::InsufficientData(
                "cannot fit scaler on zero rows".to_string(),
            ));
        }

        let mean = features
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::InsufficientData("empty feature matrix".to_string()))?;
        let std = features.std_axis(Axis(0), 0.0);
        let scale = std.mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        Ok(Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Standardize every row of `features`
    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>, PipelineError> {
        if features.ncols() != self.n_features() {
            return Err(PipelineError::ShapeMismatch {
                expected: self.n_features(),
                actual: features.ncols(),
            });
        }
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        Ok((features - &mean) / &scale)
    }

    /// Standardize a single feature row
    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, PipelineError> {
        if row.len() != self.n_features() {
            return Err(PipelineError::ShapeMismatch {
                expected: self.n_features(),
                actual: row.len(),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect())
    }

    pub fn fit_transform(features: &Array2<f64>) -> Result<(Self, Array2<f64>), PipelineError> {
        let scaler = Self::fit(features)?;
        let scaled = scaler.transform(features)?;
        Ok((scaler, scaled))
    }
}
