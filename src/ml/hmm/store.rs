use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::emission::GaussianEmission;
use super::params::ModelParameters;
use super::validate_state_count;
use crate::error::{HmmError, Result};
use crate::types::ObservationSequence;

/// How the first set of parameters is chosen before EM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// k-means++ seeded centroids as emission means
    #[default]
    #[serde(rename = "kmeans")]
    KMeans,
    /// Randomly chosen observations as emission means
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitOptions {
    /// Added to every covariance diagonal
    pub min_covar: f64,
    pub kmeans_iterations: usize,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            min_covar: 1e-3,
            kmeans_iterations: 25,
        }
    }
}

/// Owner of the current model parameters.
///
/// Holds either a complete, validated model or nothing. Updates are whole
/// swaps of an `Arc`, so readers holding the previous model keep a
/// consistent copy.
#[derive(Debug, Default)]
pub struct ParameterStore {
    current: Option<Arc<ModelParameters>>,
    generation: u64,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<ModelParameters>> {
        self.current.clone()
    }

    /// Number of times the stored model has been set
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Build starting parameters for `k` states from `observations`.
    /// The state count is checked before the observations are looked at.
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        k: usize,
        strategy: InitStrategy,
        observations: &ObservationSequence,
        options: &InitOptions,
        rng: &mut R,
    ) -> Result<Arc<ModelParameters>> {
        let k = validate_state_count(k)?;
        if observations.is_empty() {
            return Err(HmmError::EmptySequence);
        }

        let params = match strategy {
            InitStrategy::KMeans => kmeans_init(k, observations, options, rng)?,
            InitStrategy::Random => random_init(k, observations, options, rng)?,
        };
        debug!(
            "Initialized {} states over {} features ({:?})",
            k,
            observations.n_features(),
            strategy
        );

        Ok(self.replace(params))
    }

    pub fn replace(&mut self, params: ModelParameters) -> Arc<ModelParameters> {
        let params = Arc::new(params);
        self.current = Some(Arc::clone(&params));
        self.generation += 1;
        params
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

/// Covariance of the whole sequence plus `min_covar` on the diagonal
pub(crate) fn global_covariance(observations: &ObservationSequence, min_covar: f64) -> Array2<f64> {
    let data = observations.observations();
    let n = data.nrows().max(1) as f64;
    let d = data.ncols();

    let mut mean = Array1::<f64>::zeros(d);
    for row in data.rows() {
        mean += &row;
    }
    mean /= n;

    let mut cov = Array2::<f64>::zeros((d, d));
    for row in data.rows() {
        let diff = &row - &mean;
        for i in 0..d {
            for j in 0..d {
                cov[[i, j]] += diff[i] * diff[j];
            }
        }
    }
    cov /= n;
    for i in 0..d {
        cov[[i, i]] += min_covar;
    }
    cov
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest_center(obs: ArrayView1<f64>, centers: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (k, center) in centers.rows().into_iter().enumerate() {
        let dist = squared_distance(obs, center);
        if dist < best.1 {
            best = (k, dist);
        }
    }
    best
}

/// k-means++ seeding followed by Lloyd iterations
fn kmeans_centers<R: Rng + ?Sized>(
    k: usize,
    observations: &ObservationSequence,
    iterations: usize,
    rng: &mut R,
) -> Array2<f64> {
    let data = observations.observations();
    let n = data.nrows();
    let mut centers = Array2::zeros((k, data.ncols()));

    centers.row_mut(0).assign(&data.row(rng.gen_range(0..n)));
    for c in 1..k {
        let weights: Vec<f64> = data
            .rows()
            .into_iter()
            .map(|row| {
                (0..c)
                    .map(|j| squared_distance(row, centers.row(j)))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let pick = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            weights
                .iter()
                .position(|w| {
                    cumulative += w;
                    cumulative > target
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centers.row_mut(c).assign(&data.row(pick));
    }

    let mut labels = vec![usize::MAX; n];
    for _ in 0..iterations {
        let mut changed = false;
        for (t, row) in data.rows().into_iter().enumerate() {
            let (label, _) = nearest_center(row, &centers);
            if labels[t] != label {
                labels[t] = label;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = Array2::<f64>::zeros(centers.raw_dim());
        let mut counts = vec![0usize; k];
        for (t, &label) in labels.iter().enumerate() {
            let mut acc = sums.row_mut(label);
            acc += &data.row(t);
            counts[label] += 1;
        }
        for c in 0..k {
            // Empty clusters keep their previous center
            if counts[c] > 0 {
                let mean = &sums.row(c) / counts[c] as f64;
                centers.row_mut(c).assign(&mean);
            }
        }
    }

    centers
}

fn kmeans_init<R: Rng + ?Sized>(
    k: usize,
    observations: &ObservationSequence,
    options: &InitOptions,
    rng: &mut R,
) -> Result<ModelParameters> {
    let centers = kmeans_centers(k, observations, options.kmeans_iterations, rng);
    let cov = global_covariance(observations, options.min_covar);

    let start_prob = Array1::from_elem(k, 1.0 / k as f64);

    // Slight preference for staying in the same state
    let mut transition = Array2::from_elem((k, k), 0.5 / (k - 1) as f64);
    for i in 0..k {
        transition[[i, i]] = 0.5;
    }

    let emissions = centers
        .rows()
        .into_iter()
        .map(|mean| GaussianEmission::new(mean.to_owned(), cov.clone()))
        .collect::<Result<Vec<_>>>()?;

    ModelParameters::new(start_prob, transition, emissions)
}

fn random_init<R: Rng + ?Sized>(
    k: usize,
    observations: &ObservationSequence,
    options: &InitOptions,
    rng: &mut R,
) -> Result<ModelParameters> {
    let n = observations.len();
    let mut picks = rand::seq::index::sample(rng, n, k.min(n)).into_vec();
    while picks.len() < k {
        picks.push(rng.gen_range(0..n));
    }

    let mut start_prob = Array1::from_shape_fn(k, |_| rng.gen::<f64>() + 0.1);
    let total = start_prob.sum();
    start_prob /= total;

    let mut transition = Array2::from_shape_fn((k, k), |(i, j)| {
        if i == j {
            0.8 + rng.gen::<f64>() * 0.15
        } else {
            rng.gen::<f64>() * 0.1
        }
    });
    for mut row in transition.rows_mut() {
        let sum = row.sum();
        row /= sum;
    }

    let cov = global_covariance(observations, options.min_covar);
    let emissions = picks
        .into_iter()
        .map(|t| GaussianEmission::new(observations.row(t).to_owned(), cov.clone()))
        .collect::<Result<Vec<_>>>()?;

    ModelParameters::new(start_prob, transition, emissions)
}
