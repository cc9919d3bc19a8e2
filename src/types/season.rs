use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{HmmError, Result};

/// Chronological feature vectors, one row per game
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSequence {
    observations: Array2<f64>,
    labels: Vec<String>,
}

impl ObservationSequence {
    pub fn new(observations: Array2<f64>, labels: Vec<String>) -> Result<Self> {
        if observations.nrows() != labels.len() {
            return Err(HmmError::InvalidParameters(format!(
                "{} observations but {} labels",
                observations.nrows(),
                labels.len()
            )));
        }
        if let Some(((t, _), _)) = observations.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(HmmError::InvalidParameters(format!(
                "observation {} contains a non-finite value",
                t
            )));
        }
        Ok(Self {
            observations,
            labels,
        })
    }

    /// Build from plain rows, labelling games by position
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Array2::zeros((rows.len(), n_features));
        for (t, row) in rows.iter().enumerate() {
            if row.len() != n_features {
                return Err(HmmError::DimensionMismatch {
                    expected: n_features,
                    actual: row.len(),
                });
            }
            for (j, &v) in row.iter().enumerate() {
                data[[t, j]] = v;
            }
        }
        let labels = (1..=rows.len()).map(|i| format!("game {}", i)).collect();
        Self::new(data, labels)
    }

    pub fn len(&self) -> usize {
        self.observations.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_features(&self) -> usize {
        self.observations.ncols()
    }

    pub fn observations(&self) -> &Array2<f64> {
        &self.observations
    }

    pub fn row(&self, t: usize) -> ArrayView1<'_, f64> {
        self.observations.row(t)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Decoded state index per game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatePath(Vec<usize>);

impl StatePath {
    pub fn new(states: Vec<usize>) -> Self {
        Self(states)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn states(&self) -> &[usize] {
        &self.0
    }

    pub fn get(&self, t: usize) -> Option<usize> {
        self.0.get(t).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

/// Per-game probability of each hidden state (T x K)
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorTable {
    probs: Array2<f64>,
}

impl PosteriorTable {
    pub fn new(probs: Array2<f64>) -> Self {
        Self { probs }
    }

    pub fn len(&self) -> usize {
        self.probs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_states(&self) -> usize {
        self.probs.ncols()
    }

    pub fn row(&self, t: usize) -> ArrayView1<'_, f64> {
        self.probs.row(t)
    }

    pub fn probability(&self, t: usize, state: usize) -> f64 {
        self.probs[[t, state]]
    }
}
