//! Viterbi decoding and forward-backward smoothing in log space.

use ndarray::{Array1, Array2};

use super::params::ModelParameters;
use crate::error::{HmmError, Result};
use crate::types::{ObservationSequence, PosteriorTable, StatePath};

/// Most probable path and its joint log-probability
#[derive(Debug, Clone, PartialEq)]
pub struct Decoding {
    pub path: StatePath,
    pub log_probability: f64,
}

/// Per-step state posteriors and the sequence log-likelihood
#[derive(Debug, Clone, PartialEq)]
pub struct Smoothing {
    pub posteriors: PosteriorTable,
    pub log_likelihood: f64,
}

/// An HMM evaluated against one observation sequence, everything in log space.
///
/// Emission densities are computed once up front, so the recursions below
/// only deal with the T x K matrix of log b_k(o_t).
#[derive(Debug, Clone)]
pub struct LogSpace {
    log_start: Array1<f64>,
    log_transition: Array2<f64>,
    log_emissions: Array2<f64>,
}

impl LogSpace {
    pub fn new(params: &ModelParameters, observations: &ObservationSequence) -> Result<Self> {
        if observations.is_empty() {
            return Err(HmmError::EmptySequence);
        }
        let log_emissions = params.log_emission_matrix(observations)?;
        Ok(Self::from_parts(
            params.start_prob().mapv(f64::ln),
            params.transition().mapv(f64::ln),
            log_emissions,
        ))
    }

    /// Assemble from precomputed log-probabilities (T x K emissions)
    pub fn from_parts(
        log_start: Array1<f64>,
        log_transition: Array2<f64>,
        log_emissions: Array2<f64>,
    ) -> Self {
        Self {
            log_start,
            log_transition,
            log_emissions,
        }
    }

    pub fn n_steps(&self) -> usize {
        self.log_emissions.nrows()
    }

    pub fn n_states(&self) -> usize {
        self.log_start.len()
    }

    pub fn log_emissions(&self) -> &Array2<f64> {
        &self.log_emissions
    }

    /// Viterbi decoding. Ties go to the lowest-indexed state, both for
    /// predecessors and for the final state.
    pub fn viterbi(&self) -> Result<(Vec<usize>, f64)> {
        let n_obs = self.n_steps();
        let n_states = self.n_states();
        if n_obs == 0 {
            return Err(HmmError::EmptySequence);
        }

        let mut log_delta = Array2::from_elem((n_obs, n_states), f64::NEG_INFINITY);
        let mut psi = Array2::<usize>::zeros((n_obs, n_states));

        for state in 0..n_states {
            log_delta[[0, state]] = self.log_start[state] + self.log_emissions[[0, state]];
        }

        for t in 1..n_obs {
            for j in 0..n_states {
                let mut max_val = f64::NEG_INFINITY;
                let mut max_state = 0;

                for i in 0..n_states {
                    let val = log_delta[[t - 1, i]] + self.log_transition[[i, j]];
                    if val > max_val {
                        max_val = val;
                        max_state = i;
                    }
                }

                log_delta[[t, j]] = max_val + self.log_emissions[[t, j]];
                psi[[t, j]] = max_state;
            }
        }

        let mut states = vec![0; n_obs];
        let mut max_val = f64::NEG_INFINITY;
        for state in 0..n_states {
            if log_delta[[n_obs - 1, state]] > max_val {
                max_val = log_delta[[n_obs - 1, state]];
                states[n_obs - 1] = state;
            }
        }
        if max_val == f64::NEG_INFINITY {
            return Err(HmmError::DegenerateEmission {
                step: first_impossible_step(&log_delta),
            });
        }

        for t in (0..n_obs - 1).rev() {
            states[t] = psi[[t + 1, states[t + 1]]];
        }

        Ok((states, max_val))
    }

    /// Forward pass: log α and the total log-likelihood
    pub fn forward(&self) -> (Array2<f64>, f64) {
        let n_obs = self.n_steps();
        let n_states = self.n_states();
        let mut log_alpha = Array2::from_elem((n_obs, n_states), f64::NEG_INFINITY);
        if n_obs == 0 {
            return (log_alpha, f64::NEG_INFINITY);
        }

        for state in 0..n_states {
            log_alpha[[0, state]] = self.log_start[state] + self.log_emissions[[0, state]];
        }

        let mut terms = vec![0.0; n_states];
        for t in 1..n_obs {
            for j in 0..n_states {
                for i in 0..n_states {
                    terms[i] = log_alpha[[t - 1, i]] + self.log_transition[[i, j]];
                }
                log_alpha[[t, j]] = log_sum_exp(&terms) + self.log_emissions[[t, j]];
            }
        }

        let log_prob = log_sum_exp(&log_alpha.row(n_obs - 1).to_vec());
        (log_alpha, log_prob)
    }

    /// Backward pass: log β
    pub fn backward(&self) -> Array2<f64> {
        let n_obs = self.n_steps();
        let n_states = self.n_states();
        let mut log_beta = Array2::from_elem((n_obs, n_states), f64::NEG_INFINITY);
        if n_obs == 0 {
            return log_beta;
        }

        for state in 0..n_states {
            log_beta[[n_obs - 1, state]] = 0.0;
        }

        let mut terms = vec![0.0; n_states];
        for t in (0..n_obs - 1).rev() {
            for i in 0..n_states {
                for j in 0..n_states {
                    terms[j] = self.log_transition[[i, j]]
                        + self.log_emissions[[t + 1, j]]
                        + log_beta[[t + 1, j]];
                }
                log_beta[[t, i]] = log_sum_exp(&terms);
            }
        }

        log_beta
    }

    /// Smoothed posteriors P(state_t | all observations), renormalized at
    /// every step, plus the log-likelihood
    pub fn posteriors(&self) -> Result<(Array2<f64>, f64)> {
        let n_obs = self.n_steps();
        if n_obs == 0 {
            return Err(HmmError::EmptySequence);
        }

        if n_obs == 1 {
            let joint: Vec<f64> = (0..self.n_states())
                .map(|s| self.log_start[s] + self.log_emissions[[0, s]])
                .collect();
            let log_prob = log_sum_exp(&joint);
            if log_prob == f64::NEG_INFINITY {
                return Err(HmmError::DegenerateEmission { step: 0 });
            }
            let mut gamma = Array2::zeros((1, self.n_states()));
            for (s, v) in joint.iter().enumerate() {
                gamma[[0, s]] = (v - log_prob).exp();
            }
            return Ok((gamma, log_prob));
        }

        let (log_alpha, log_prob) = self.forward();
        if log_prob == f64::NEG_INFINITY {
            return Err(HmmError::DegenerateEmission {
                step: first_impossible_step(&log_alpha),
            });
        }
        let log_beta = self.backward();
        Ok((gamma_from(&log_alpha, &log_beta), log_prob))
    }

    /// Expected transition counts Σ_t ξ_t(i, j), each ξ_t normalized on its own
    pub fn expected_transitions(
        &self,
        log_alpha: &Array2<f64>,
        log_beta: &Array2<f64>,
    ) -> Array2<f64> {
        let n_obs = self.n_steps();
        let n_states = self.n_states();
        let mut xi_sum = Array2::zeros((n_states, n_states));
        let mut log_xi = vec![0.0; n_states * n_states];

        for t in 0..n_obs.saturating_sub(1) {
            for i in 0..n_states {
                for j in 0..n_states {
                    log_xi[i * n_states + j] = log_alpha[[t, i]]
                        + self.log_transition[[i, j]]
                        + self.log_emissions[[t + 1, j]]
                        + log_beta[[t + 1, j]];
                }
            }
            let log_denom = log_sum_exp(&log_xi);
            if log_denom == f64::NEG_INFINITY {
                continue;
            }
            for i in 0..n_states {
                for j in 0..n_states {
                    xi_sum[[i, j]] += (log_xi[i * n_states + j] - log_denom).exp();
                }
            }
        }

        xi_sum
    }
}

pub(crate) fn gamma_from(log_alpha: &Array2<f64>, log_beta: &Array2<f64>) -> Array2<f64> {
    let (n_obs, n_states) = log_alpha.dim();
    let mut gamma = Array2::zeros((n_obs, n_states));
    let mut joint = vec![0.0; n_states];
    for t in 0..n_obs {
        for s in 0..n_states {
            joint[s] = log_alpha[[t, s]] + log_beta[[t, s]];
        }
        let log_denom = log_sum_exp(&joint);
        let mut total = 0.0;
        for s in 0..n_states {
            gamma[[t, s]] = (joint[s] - log_denom).exp();
            total += gamma[[t, s]];
        }
        if total > 0.0 {
            for s in 0..n_states {
                gamma[[t, s]] /= total;
            }
        }
    }
    gamma
}

/// First step at which every state is impossible
pub(crate) fn first_impossible_step(log_table: &Array2<f64>) -> usize {
    (0..log_table.nrows())
        .find(|&t| log_table.row(t).iter().all(|v| *v == f64::NEG_INFINITY))
        .unwrap_or_else(|| log_table.nrows().saturating_sub(1))
}

/// Log-sum-exp trick for numerical stability
pub(crate) fn log_sum_exp(log_values: &[f64]) -> f64 {
    if log_values.is_empty() {
        return f64::NEG_INFINITY;
    }

    let max_val = log_values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }

    let sum_exp: f64 = log_values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum_exp.ln()
}

/// Most probable hidden-state path for `observations`
pub fn decode(params: &ModelParameters, observations: &ObservationSequence) -> Result<Decoding> {
    let (states, log_probability) = LogSpace::new(params, observations)?.viterbi()?;
    Ok(Decoding {
        path: StatePath::new(states),
        log_probability,
    })
}

/// Per-game state probabilities given the whole season
pub fn smooth(params: &ModelParameters, observations: &ObservationSequence) -> Result<Smoothing> {
    let (gamma, log_likelihood) = LogSpace::new(params, observations)?.posteriors()?;
    Ok(Smoothing {
        posteriors: PosteriorTable::new(gamma),
        log_likelihood,
    })
}

/// log P(observations | params)
pub fn log_likelihood(params: &ModelParameters, observations: &ObservationSequence) -> Result<f64> {
    let space = LogSpace::new(params, observations)?;
    let (log_alpha, log_prob) = space.forward();
    if log_prob == f64::NEG_INFINITY {
        return Err(HmmError::DegenerateEmission {
            step: first_impossible_step(&log_alpha),
        });
    }
    Ok(log_prob)
}
