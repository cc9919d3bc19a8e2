//! Baum-Welch (EM) parameter estimation.

use ndarray::{Array1, Array2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cancel::CancelToken;
use super::emission::GaussianEmission;
use super::inference::{first_impossible_step, gamma_from, LogSpace};
use super::params::ModelParameters;
use super::store::{global_covariance, InitOptions, InitStrategy, ParameterStore};
use super::validate_state_count;
use crate::error::{HmmError, Result};
use crate::types::ObservationSequence;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Maximum EM iterations
    pub max_iter: usize,
    /// Stop once the log-likelihood improves by less than this
    pub tol: f64,
    /// Added to every covariance diagonal
    pub min_covar: f64,
    /// States with less total posterior weight are reinitialized
    pub min_state_weight: f64,
    pub kmeans_iterations: usize,
    pub init: InitStrategy,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-2,
            min_covar: 1e-3,
            min_state_weight: 1e-3,
            kmeans_iterations: 25,
            init: InitStrategy::KMeans,
        }
    }
}

/// Result of one EM run
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Best parameters evaluated during the run
    pub params: ModelParameters,
    pub log_likelihood: f64,
    /// Number of E-steps evaluated
    pub iterations: usize,
    pub converged: bool,
    pub cancelled: bool,
    /// Log-likelihood at every iteration
    pub history: Vec<f64>,
    pub reinitialized_states: usize,
    pub n_observations: usize,
}

impl FitOutcome {
    /// Akaike information criterion (lower is better)
    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood + 2.0 * self.params.n_free_parameters() as f64
    }

    /// Bayesian information criterion (lower is better)
    pub fn bic(&self) -> f64 {
        -2.0 * self.log_likelihood
            + self.params.n_free_parameters() as f64 * (self.n_observations as f64).ln()
    }
}

/// Posterior statistics from one E-step
struct Expectations {
    gamma: Array2<f64>,
    xi_sum: Array2<f64>,
    log_likelihood: f64,
    log_emissions: Array2<f64>,
}

/// Gaussian HMM trainer
#[derive(Debug, Clone, Default)]
pub struct BaumWelch {
    options: FitOptions,
}

impl BaumWelch {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Fit `k` states to `observations`.
    ///
    /// Returns the best parameters seen, whether the run converged, hit the
    /// iteration cap or was cancelled. Cancellation is checked between
    /// iterations; the first iteration always runs so the returned model has
    /// a log-likelihood.
    pub fn fit<R: Rng + ?Sized>(
        &self,
        observations: &ObservationSequence,
        k: usize,
        rng: &mut R,
        cancel: &CancelToken,
    ) -> Result<FitOutcome> {
        let k = validate_state_count(k)?;
        if observations.is_empty() {
            return Err(HmmError::EmptySequence);
        }
        if self.options.max_iter == 0 {
            return Err(HmmError::InvalidParameters(
                "max_iter must be at least 1".to_string(),
            ));
        }

        let init_options = InitOptions {
            min_covar: self.options.min_covar,
            kmeans_iterations: self.options.kmeans_iterations,
        };
        let mut store = ParameterStore::new();
        let mut current = store.initialize(k, self.options.init, observations, &init_options, rng)?;

        let mut best: Option<(Arc<ModelParameters>, f64)> = None;
        let mut history = Vec::with_capacity(self.options.max_iter);
        let mut previous: Option<f64> = None;
        let mut just_reinitialized = false;
        let mut reinitialized_states = 0;
        let mut converged = false;
        let mut cancelled = false;

        for iteration in 0..self.options.max_iter {
            if iteration > 0 && cancel.is_cancelled() {
                info!("EM cancelled after {} iterations", iteration);
                cancelled = true;
                break;
            }

            let expectations = e_step(&current, observations)?;
            let log_prob = expectations.log_likelihood;
            history.push(log_prob);
            debug!("EM iteration {}: log-likelihood = {:.4}", iteration + 1, log_prob);

            let mut done = false;
            if let (Some(prev), false) = (previous, just_reinitialized) {
                done = check_progress(iteration + 1, prev, log_prob, self.options.tol)?;
            }
            if best.as_ref().map_or(true, |(_, b)| log_prob >= *b) {
                best = Some((Arc::clone(&current), log_prob));
            }
            if done {
                info!(
                    "EM converged after {} iterations (log-likelihood {:.4})",
                    iteration + 1,
                    log_prob
                );
                converged = true;
                break;
            }
            previous = Some(log_prob);

            if iteration + 1 == self.options.max_iter {
                break;
            }

            let (next, reinitialized) = self.m_step(&current, observations, &expectations)?;
            just_reinitialized = reinitialized > 0;
            reinitialized_states += reinitialized;
            current = store.replace(next);
        }

        debug!("Parameter store updated {} times", store.generation());
        if !converged && !cancelled {
            warn!(
                "EM did not converge within {} iterations; keeping best parameters",
                self.options.max_iter
            );
        }

        let (params, log_likelihood) = best.ok_or_else(|| {
            HmmError::InvalidParameters("no EM iteration was evaluated".to_string())
        })?;

        Ok(FitOutcome {
            params: params.as_ref().clone(),
            log_likelihood,
            iterations: history.len(),
            converged,
            cancelled,
            history,
            reinitialized_states,
            n_observations: observations.len(),
        })
    }

    /// Re-estimate every parameter from the E-step posteriors. Returns the new
    /// parameters and how many states had to be reinitialized.
    fn m_step(
        &self,
        current: &ModelParameters,
        observations: &ObservationSequence,
        expectations: &Expectations,
    ) -> Result<(ModelParameters, usize)> {
        let n_states = current.n_states();
        let n_features = current.n_features();
        let data = observations.observations();
        let gamma = &expectations.gamma;

        let start_prob = gamma.row(0).to_owned();

        // Rows with no expected transitions keep their previous estimate
        let mut transition = current.transition().clone();
        for i in 0..n_states {
            let row_sum: f64 = expectations.xi_sum.row(i).sum();
            if row_sum > 0.0 {
                for j in 0..n_states {
                    transition[[i, j]] = expectations.xi_sum[[i, j]] / row_sum;
                }
            }
        }

        let global_cov = global_covariance(observations, self.options.min_covar);
        let mut emissions = Vec::with_capacity(n_states);
        let mut used_for_reset = Vec::new();
        let mut covariance_resets = 0;

        for state in 0..n_states {
            let gamma_sum: f64 = gamma.column(state).sum();

            if gamma_sum < self.options.min_state_weight {
                let t = worst_explained(&expectations.log_emissions, &used_for_reset);
                used_for_reset.push(t);
                warn!(
                    "State {} has posterior weight {:.2e}; reinitializing at observation {}",
                    state,
                    gamma_sum,
                    t + 1
                );
                emissions.push(GaussianEmission::new(data.row(t).to_owned(), global_cov.clone())?);
                continue;
            }

            let mut mean = Array1::<f64>::zeros(n_features);
            for (t, row) in data.rows().into_iter().enumerate() {
                mean.scaled_add(gamma[[t, state]], &row);
            }
            mean /= gamma_sum;

            let mut cov = Array2::<f64>::zeros((n_features, n_features));
            for (t, row) in data.rows().into_iter().enumerate() {
                let diff = &row - &mean;
                let w = gamma[[t, state]];
                for i in 0..n_features {
                    for j in 0..=i {
                        cov[[i, j]] += w * diff[i] * diff[j];
                    }
                }
            }
            for i in 0..n_features {
                for j in 0..=i {
                    cov[[i, j]] /= gamma_sum;
                    cov[[j, i]] = cov[[i, j]];
                }
                cov[[i, i]] += self.options.min_covar;
            }

            let (emission, fell_back) = emission_or_global(mean, cov, &global_cov)?;
            if fell_back {
                warn!(
                    "State {} covariance lost positive definiteness; using global covariance",
                    state
                );
                covariance_resets += 1;
            }
            emissions.push(emission);
        }

        // Both kinds of reset step outside EM, so the next likelihood may drop
        let reinitialized = used_for_reset.len() + covariance_resets;
        Ok((ModelParameters::new(start_prob, transition, emissions)?, reinitialized))
    }
}

/// Build a state's emission, falling back to the global covariance when the
/// re-estimated one is not positive definite. The flag reports the fallback.
fn emission_or_global(
    mean: Array1<f64>,
    cov: Array2<f64>,
    global_cov: &Array2<f64>,
) -> Result<(GaussianEmission, bool)> {
    match GaussianEmission::new(mean.clone(), cov) {
        Ok(emission) => Ok((emission, false)),
        Err(_) => Ok((GaussianEmission::new(mean, global_cov.clone())?, true)),
    }
}

fn e_step(params: &ModelParameters, observations: &ObservationSequence) -> Result<Expectations> {
    let space = LogSpace::new(params, observations)?;
    let (log_alpha, log_likelihood) = space.forward();
    if log_likelihood == f64::NEG_INFINITY {
        return Err(HmmError::DegenerateEmission {
            step: first_impossible_step(&log_alpha),
        });
    }
    let log_beta = space.backward();

    Ok(Expectations {
        gamma: gamma_from(&log_alpha, &log_beta),
        xi_sum: space.expected_transitions(&log_alpha, &log_beta),
        log_likelihood,
        log_emissions: space.log_emissions().clone(),
    })
}

/// Compare two consecutive log-likelihoods. Ok(true) means converged.
fn check_progress(iteration: usize, previous: f64, current: f64, tol: f64) -> Result<bool> {
    let delta = current - previous;
    if delta < -tol {
        return Err(HmmError::NonConvergent {
            iteration,
            previous,
            current,
        });
    }
    Ok(delta < tol)
}

/// Observation with the lowest best-state density, skipping ones already used
fn worst_explained(log_emissions: &Array2<f64>, used: &[usize]) -> usize {
    let score = |t: usize| {
        log_emissions
            .row(t)
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max)
    };
    let candidates: Vec<usize> = (0..log_emissions.nrows())
        .filter(|t| !used.contains(t))
        .collect();
    let pool = if candidates.is_empty() {
        (0..log_emissions.nrows()).collect()
    } else {
        candidates
    };

    let mut worst = pool[0];
    for &t in &pool[1..] {
        if score(t) < score(worst) {
            worst = t;
        }
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::hmm::inference::decode;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn well_separated() -> ModelParameters {
        ModelParameters::new(
            array![0.5, 0.3, 0.2],
            array![[0.9, 0.05, 0.05], [0.1, 0.8, 0.1], [0.1, 0.1, 0.8]],
            vec![
                GaussianEmission::isotropic(array![0.0, 0.0], 1.0).unwrap(),
                GaussianEmission::isotropic(array![10.0, 0.0], 1.0).unwrap(),
                GaussianEmission::isotropic(array![0.0, 10.0], 1.0).unwrap(),
            ],
        )
        .unwrap()
    }

    fn four_game_season() -> ObservationSequence {
        ObservationSequence::from_rows(&[
            vec![1.2, -1.0, 1.1, -0.9, -1.0, 1.0],
            vec![1.0, -1.1, 0.9, -1.0, -0.9, 1.1],
            vec![-1.0, 1.0, -1.1, 1.0, 1.0, -0.9],
            vec![-1.2, 1.1, -0.9, 0.9, 0.9, -1.2],
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_state_count_and_empty() {
        let trainer = BaumWelch::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let cancel = CancelToken::new();
        assert!(matches!(
            trainer.fit(&four_game_season(), 6, &mut rng, &cancel),
            Err(HmmError::InvalidStateCount(6))
        ));
        let empty = ObservationSequence::from_rows(&[]).unwrap();
        assert!(matches!(
            trainer.fit(&empty, 2, &mut rng, &cancel),
            Err(HmmError::EmptySequence)
        ));
    }

    #[test]
    fn test_two_clusters_share_labels() {
        let obs = four_game_season();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let outcome = BaumWelch::default()
            .fit(&obs, 2, &mut rng, &CancelToken::new())
            .unwrap();
        let path = decode(&outcome.params, &obs).unwrap().path;

        assert_eq!(path.get(0), path.get(1));
        assert_eq!(path.get(2), path.get(3));
        assert_ne!(path.get(0), path.get(2));
        assert!(outcome.log_likelihood.is_finite());
    }

    #[test]
    fn test_recovers_well_separated_states() {
        let truth_params = well_separated();
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let (truth, obs) = truth_params.sample(400, &mut rng).unwrap();

        let outcome = BaumWelch::default()
            .fit(&obs, 3, &mut rng, &CancelToken::new())
            .unwrap();
        let decoded = decode(&outcome.params, &obs).unwrap().path;

        // Map each fitted state to the true state it overlaps most
        let mut overlap = [[0usize; 3]; 3];
        for (f, t) in decoded.iter().zip(truth.iter()) {
            overlap[f][t] += 1;
        }
        let matched: usize = overlap.iter().map(|row| *row.iter().max().unwrap()).sum();
        assert!(matched as f64 / 400.0 > 0.95, "matched {}", matched);
    }

    #[test]
    fn test_history_is_monotonic() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let (_, obs) = well_separated().sample(150, &mut rng).unwrap();

        for init in [InitStrategy::KMeans, InitStrategy::Random] {
            let options = FitOptions {
                init,
                ..FitOptions::default()
            };
            let outcome = BaumWelch::new(options.clone())
                .fit(&obs, 3, &mut rng, &CancelToken::new())
                .unwrap();
            if outcome.reinitialized_states == 0 {
                for pair in outcome.history.windows(2) {
                    assert!(pair[1] >= pair[0] - options.tol, "{:?}", outcome.history);
                }
            }
            assert!(outcome.history.iter().all(|ll| *ll <= outcome.log_likelihood + 1e-9));
        }
    }

    #[test]
    fn test_same_seed_same_fit() {
        let obs = four_game_season();
        let trainer = BaumWelch::default();
        let a = trainer
            .fit(&obs, 2, &mut ChaCha8Rng::seed_from_u64(3), &CancelToken::new())
            .unwrap();
        let b = trainer
            .fit(&obs, 2, &mut ChaCha8Rng::seed_from_u64(3), &CancelToken::new())
            .unwrap();
        assert_eq!(a.params, b.params);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn test_cancelled_before_start_returns_initial_model() {
        let obs = four_game_season();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = BaumWelch::default()
            .fit(&obs, 2, &mut ChaCha8Rng::seed_from_u64(1), &cancel)
            .unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.converged);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_iteration_cap_returns_best_seen() {
        let obs = four_game_season();
        let options = FitOptions {
            max_iter: 1,
            ..FitOptions::default()
        };
        let outcome = BaumWelch::new(options)
            .fit(&obs, 2, &mut ChaCha8Rng::seed_from_u64(1), &CancelToken::new())
            .unwrap();
        assert_eq!(outcome.iterations, 1);
        assert!(!outcome.converged);
        assert_eq!(outcome.history, vec![outcome.log_likelihood]);
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let options = FitOptions {
            max_iter: 0,
            ..FitOptions::default()
        };
        let err = BaumWelch::new(options)
            .fit(&four_game_season(), 2, &mut ChaCha8Rng::seed_from_u64(1), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HmmError::InvalidParameters(_)));
    }

    #[test]
    fn test_starved_states_are_reinitialized() {
        let obs = four_game_season();
        let options = FitOptions {
            max_iter: 5,
            min_state_weight: 2.5,
            ..FitOptions::default()
        };
        let outcome = BaumWelch::new(options)
            .fit(&obs, 2, &mut ChaCha8Rng::seed_from_u64(4), &CancelToken::new())
            .unwrap();
        assert!(outcome.reinitialized_states > 0);
        for emission in outcome.params.emissions() {
            assert!(emission.covariance().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_check_progress() {
        assert!(!check_progress(2, -100.0, -90.0, 1e-2).unwrap());
        assert!(check_progress(2, -100.0, -99.995, 1e-2).unwrap());
        assert!(check_progress(2, -100.0, -100.005, 1e-2).unwrap());
        assert!(matches!(
            check_progress(3, -100.0, -101.0, 1e-2),
            Err(HmmError::NonConvergent { iteration: 3, .. })
        ));
    }

    #[test]
    fn test_worst_explained_skips_used() {
        let log_b = array![[-1.0, -2.0], [-9.0, -8.0], [-5.0, -7.0]];
        assert_eq!(worst_explained(&log_b, &[]), 1);
        assert_eq!(worst_explained(&log_b, &[1]), 2);
        assert_eq!(worst_explained(&log_b, &[0, 1, 2]), 1);
    }

    #[test]
    fn test_singular_covariance_falls_back_and_is_flagged() {
        let global = array![[2.0, 0.0], [0.0, 2.0]];

        let (emission, fell_back) =
            emission_or_global(array![1.0, 1.0], Array2::zeros((2, 2)), &global).unwrap();
        assert!(fell_back);
        assert_eq!(emission.covariance(), &global);
        assert_eq!(emission.mean(), &array![1.0, 1.0]);

        let identity = array![[1.0, 0.0], [0.0, 1.0]];
        let (emission, fell_back) =
            emission_or_global(array![0.0, 0.0], identity, &global).unwrap();
        assert!(!fell_back);
        assert_eq!(emission.covariance()[[0, 0]], 1.0);
    }

    #[test]
    fn test_information_criteria() {
        let obs = four_game_season();
        let outcome = BaumWelch::default()
            .fit(&obs, 2, &mut ChaCha8Rng::seed_from_u64(42), &CancelToken::new())
            .unwrap();
        let p = outcome.params.n_free_parameters() as f64;
        assert!((outcome.aic() - (-2.0 * outcome.log_likelihood + 2.0 * p)).abs() < 1e-9);
        let expected_bic = -2.0 * outcome.log_likelihood + p * 4f64.ln();
        assert!((outcome.bic() - expected_bic).abs() < 1e-9);
    }
}
