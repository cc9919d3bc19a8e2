use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;

use super::emission::GaussianEmission;
use super::validate_state_count;
use crate::error::{HmmError, Result};
use crate::types::{ObservationSequence, StatePath};

/// Tolerance for probability vectors summing to one
pub const PROB_TOLERANCE: f64 = 1e-6;

/// Gaussian HMM parameters: initial distribution, transition matrix and one
/// emission per state.
///
/// Values are validated on construction and never mutated afterwards; a
/// re-fit produces a new `ModelParameters`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParameters {
    start_prob: Array1<f64>,
    transition: Array2<f64>,
    emissions: Vec<GaussianEmission>,
}

impl ModelParameters {
    pub fn new(
        start_prob: Array1<f64>,
        transition: Array2<f64>,
        emissions: Vec<GaussianEmission>,
    ) -> Result<Self> {
        let k = validate_state_count(start_prob.len())?;

        if transition.shape() != [k, k] {
            return Err(HmmError::InvalidParameters(format!(
                "transition matrix shape {:?}, expected [{}, {}]",
                transition.shape(),
                k,
                k
            )));
        }
        if emissions.len() != k {
            return Err(HmmError::InvalidParameters(format!(
                "{} emissions for {} states",
                emissions.len(),
                k
            )));
        }
        let d = emissions[0].dim();
        if let Some(bad) = emissions.iter().find(|e| e.dim() != d) {
            return Err(HmmError::DimensionMismatch {
                expected: d,
                actual: bad.dim(),
            });
        }

        check_distribution("initial distribution", start_prob.view())?;
        for (i, row) in transition.rows().into_iter().enumerate() {
            check_distribution(&format!("transition row {}", i), row)?;
        }

        Ok(Self {
            start_prob,
            transition,
            emissions,
        })
    }

    pub fn n_states(&self) -> usize {
        self.start_prob.len()
    }

    pub fn n_features(&self) -> usize {
        self.emissions[0].dim()
    }

    pub fn start_prob(&self) -> &Array1<f64> {
        &self.start_prob
    }

    pub fn transition(&self) -> &Array2<f64> {
        &self.transition
    }

    pub fn emissions(&self) -> &[GaussianEmission] {
        &self.emissions
    }

    pub fn emission(&self, state: usize) -> &GaussianEmission {
        &self.emissions[state]
    }

    /// Mean vectors stacked as a K x D matrix
    pub fn means(&self) -> Array2<f64> {
        let mut means = Array2::zeros((self.n_states(), self.n_features()));
        for (k, e) in self.emissions.iter().enumerate() {
            means.row_mut(k).assign(e.mean());
        }
        means
    }

    /// log b_k(o_t) for every step and state (T x K)
    pub fn log_emission_matrix(&self, observations: &ObservationSequence) -> Result<Array2<f64>> {
        if observations.n_features() != self.n_features() {
            return Err(HmmError::DimensionMismatch {
                expected: self.n_features(),
                actual: observations.n_features(),
            });
        }
        let t_len = observations.len();
        let mut log_b = Array2::zeros((t_len, self.n_states()));
        for t in 0..t_len {
            let obs = observations.row(t);
            for (k, e) in self.emissions.iter().enumerate() {
                log_b[[t, k]] = e.log_density(obs);
            }
        }
        Ok(log_b)
    }

    /// Free parameters of a full-covariance Gaussian HMM
    pub fn n_free_parameters(&self) -> usize {
        let k = self.n_states();
        let d = self.n_features();
        (k - 1) + k * (k - 1) + k * d + k * d * (d + 1) / 2
    }

    /// Draw a hidden path and matching observations of length `n_steps`
    pub fn sample<R: Rng + ?Sized>(
        &self,
        n_steps: usize,
        rng: &mut R,
    ) -> Result<(StatePath, ObservationSequence)> {
        let mut states = Vec::with_capacity(n_steps);
        let mut data = Array2::zeros((n_steps, self.n_features()));

        for t in 0..n_steps {
            let state = match states.last() {
                None => draw_categorical(self.start_prob.view(), rng),
                Some(&prev) => draw_categorical(self.transition.row(prev), rng),
            };
            data.row_mut(t).assign(&self.emissions[state].sample(rng));
            states.push(state);
        }

        let labels = (1..=n_steps).map(|i| format!("sample {}", i)).collect();
        Ok((StatePath::new(states), ObservationSequence::new(data, labels)?))
    }
}

fn check_distribution(name: &str, values: ArrayView1<f64>) -> Result<()> {
    if values.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(HmmError::InvalidParameters(format!(
            "{} has negative or non-finite entries",
            name
        )));
    }
    let sum: f64 = values.sum();
    if (sum - 1.0).abs() > PROB_TOLERANCE {
        return Err(HmmError::InvalidParameters(format!(
            "{} sums to {:.8}, expected 1",
            name, sum
        )));
    }
    Ok(())
}

pub(crate) fn draw_categorical<R: Rng + ?Sized>(probs: ArrayView1<f64>, rng: &mut R) -> usize {
    let u: f64 = rng.gen();
    let mut cumulative = 0.0;
    for (k, &p) in probs.iter().enumerate() {
        cumulative += p;
        if u < cumulative {
            return k;
        }
    }
    // Rounding can leave u just above the final cumulative sum
    probs
        .iter()
        .rposition(|&p| p > 0.0)
        .unwrap_or(probs.len() - 1)
}
