//! Moving average smoothing for classification scores.

use std::collections::BTreeMap;

use crate::error::{EimrunError, Result};

struct LabelState {
    index: usize,
    sum: f64,
    values: Vec<f64>,
}

/// A moving average filter over per-label classification scores.
///
/// Keeps the last `size` scores per label and returns their mean on every
/// update, smoothing out jitter between consecutive classifications.
pub struct Maf {
    state: BTreeMap<String, LabelState>,
}

impl Maf {
    /// Creates a filter with a history of `size` values per label,
    /// initialized to zeroes.
    pub fn new(size: usize, labels: &[impl AsRef<str>]) -> Result<Self> {
        if size == 0 {
            return Err(EimrunError::InvalidInput {
                message: "size must be > 0".to_string(),
            });
        }
        if labels.is_empty() {
            return Err(EimrunError::InvalidInput {
                message: "must specify at least one label".to_string(),
            });
        }
        let state = labels
            .iter()
            .map(|label| {
                (
                    label.as_ref().to_string(),
                    LabelState {
                        index: 0,
                        sum: 0.0,
                        values: vec![0.0; size],
                    },
                )
            })
            .collect();
        Ok(Maf { state })
    }

    /// Adds one classification result and returns the smoothed values.
    ///
    /// Fails on an empty classification and on labels the filter was not
    /// created with.
    pub fn update(&mut self, classification: &BTreeMap<String, f64>) -> Result<BTreeMap<String, f64>> {
        if classification.is_empty() {
            return Err(EimrunError::InvalidInput {
                message: "classification must not be empty".to_string(),
            });
        }
        let mut smoothed = BTreeMap::new();
        for (label, &value) in classification {
            let state = self
                .state
                .get_mut(label)
                .ok_or_else(|| EimrunError::InvalidInput {
                    message: format!("unknown label {label:?}"),
                })?;
            state.sum -= state.values[state.index];
            state.sum += value;
            state.values[state.index] = value;
            smoothed.insert(label.clone(), state.sum / state.values.len() as f64);
            state.index = (state.index + 1) % state.values.len();
        }
        Ok(smoothed)
    }
}
