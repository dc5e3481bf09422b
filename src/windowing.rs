//! Sequence-to-one supervised framing.

use ndarray::{s, Array1, Array2, Axis};

use crate::error::DataError;

/// `(window, next value)` training pairs.
///
/// Row `i` of `inputs` holds `series[i..i + lookback]` and `targets[i]` is
/// `series[i + lookback]`.
#[derive(Debug, Clone)]
pub struct SupervisedSet {
    pub inputs: Array2<f64>,
    pub targets: Array1<f64>,
}

impl SupervisedSet {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn lookback(&self) -> usize {
        self.inputs.ncols()
    }

    /// Holds out the trailing `fraction` of pairs for validation, taken
    /// before any shuffling.
    pub fn split_validation(&self, fraction: f64) -> (SupervisedSet, SupervisedSet) {
        let n = self.len();
        let val_len = ((n as f64) * fraction.clamp(0.0, 1.0)) as usize;
        let split = n - val_len;

        let train = SupervisedSet {
            inputs: self.inputs.slice(s![..split, ..]).to_owned(),
            targets: self.targets.slice(s![..split]).to_owned(),
        };
        let validation = SupervisedSet {
            inputs: self.inputs.slice(s![split.., ..]).to_owned(),
            targets: self.targets.slice(s![split..]).to_owned(),
        };
        (train, validation)
    }

    /// Gathers the rows at `indices` into a new set.
    pub fn select(&self, indices: &[usize]) -> SupervisedSet {
        SupervisedSet {
            inputs: self.inputs.select(Axis(0), indices),
            targets: self.targets.select(Axis(0), indices),
        }
    }
}

/// Builds sliding windows of length `lookback` with stride one.
///
/// Requires `series.len() > lookback`.
pub fn make_supervised(series: &[f64], lookback: usize) -> Result<SupervisedSet, DataError> {
    if lookback == 0 {
        return Err(DataError::InvalidLookback);
    }
    if series.len() <= lookback {
        return Err(DataError::InsufficientHistory {
            needed: lookback,
            available: series.len(),
        });
    }

    let n = series.len() - lookback;
    let inputs = Array2::from_shape_fn((n, lookback), |(i, j)| series[i + j]);
    let targets = Array1::from_iter(series[lookback..].iter().copied());

    Ok(SupervisedSet { inputs, targets })
}
