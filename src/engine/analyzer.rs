use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::error::{HmmError, Result};
use crate::ml::hmm::{
    decode, encode_season, smooth, validate_state_count, BaumWelch, CancelToken, FitOptions,
    FitOutcome, RowPolicy, StateLabeling,
};
use crate::report::{summarize, FitDiagnostics, SeasonReport};
use crate::types::{ObservationSequence, RawGameRecord};

/// Settings for one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub seed: u64,
    pub row_policy: RowPolicy,
    pub fit: FitOptions,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            row_policy: RowPolicy::default(),
            fit: FitOptions::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_settings(config: &AppConfig) -> Self {
        Self {
            seed: config.model.seed,
            row_policy: config.input.row_policy,
            fit: config.model.fit.clone(),
        }
    }
}

/// Fit quality for one state count
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelComparison {
    pub n_states: usize,
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl ModelComparison {
    fn from_outcome(n_states: usize, outcome: &FitOutcome) -> Self {
        Self {
            n_states,
            log_likelihood: outcome.log_likelihood,
            aic: outcome.aic(),
            bic: outcome.bic(),
            iterations: outcome.iterations,
            converged: outcome.converged,
        }
    }
}

/// State count with the lowest BIC
pub fn best_by_bic(comparisons: &[ModelComparison]) -> Option<&ModelComparison> {
    comparisons.iter().min_by(|a, b| a.bic.total_cmp(&b.bic))
}

/// Runs the whole season pipeline. Holds no model between calls; every
/// analysis fits its own parameters.
#[derive(Debug, Clone, Default)]
pub struct SeasonAnalyzer {
    config: AnalyzerConfig,
}

impl SeasonAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn from_settings(config: &AppConfig) -> Self {
        Self::new(AnalyzerConfig::from_settings(config))
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn with_row_policy(mut self, policy: RowPolicy) -> Self {
        self.config.row_policy = policy;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Fit `k` states to a season and label every game.
    pub fn analyze(
        &self,
        records: &[RawGameRecord],
        k: usize,
        cancel: &CancelToken,
    ) -> Result<SeasonReport> {
        let k = validate_state_count(k)?;

        info!("━━━ Step 1: Encoding {} rows ━━━", records.len());
        let season = encode_season(records, self.config.row_policy)?;
        let (observations, scaler) = season.observations()?;
        info!(
            "  {} games kept, {} rows excluded",
            season.games.len(),
            season.excluded.len()
        );

        info!("━━━ Step 2: Fitting {}-state HMM (seed {}) ━━━", k, self.config.seed);
        let outcome = self.fit(&observations, k, cancel)?;
        info!(
            "  log-likelihood {:.3}, {} iterations, converged: {}",
            outcome.log_likelihood, outcome.iterations, outcome.converged
        );

        info!("━━━ Step 3: Decoding season ━━━");
        let decoding = decode(&outcome.params, &observations)?;
        let smoothing = smooth(&outcome.params, &observations)?;
        let labeling = StateLabeling::from_params(&outcome.params);
        let summary = summarize(&outcome.params, &decoding.path, &smoothing.posteriors)?;
        for (game, &state) in observations.labels().iter().zip(&summary.per_game_state) {
            debug!("  {}: {}", game, labeling.label(state)?);
        }

        let state_means: Vec<Vec<f64>> = outcome
            .params
            .emissions()
            .iter()
            .map(|e| scaler.inverse_transform(&e.mean().to_vec()))
            .collect();

        let report = SeasonReport::assemble(
            &season.games,
            &summary,
            &smoothing.posteriors,
            &labeling,
            &state_means,
            FitDiagnostics::from_outcome(&outcome),
            season.excluded,
            self.config.seed,
        )?;

        for count in &report.state_counts {
            info!("  {} {}: {} games", count.state.emoji(), count.state, count.games);
        }
        Ok(report)
    }

    /// Fit every state count in `ks` in parallel on the blocking pool and
    /// return the results ordered by state count.
    pub async fn compare(
        &self,
        records: Vec<RawGameRecord>,
        ks: Vec<usize>,
        cancel: CancelToken,
    ) -> Result<Vec<ModelComparison>> {
        if ks.is_empty() {
            return Err(HmmError::InvalidParameters(
                "no state counts to compare".to_string(),
            ));
        }
        for &k in &ks {
            validate_state_count(k)?;
        }

        let season = encode_season(&records, self.config.row_policy)?;
        let (observations, _) = season.observations()?;
        let observations = Arc::new(observations);
        info!("Comparing {:?} states over {} games", ks, observations.len());

        let mut tasks = JoinSet::new();
        for k in ks {
            let analyzer = self.clone();
            let observations = Arc::clone(&observations);
            let cancel = cancel.clone();
            tasks.spawn_blocking(move || {
                analyzer
                    .fit(&observations, k, &cancel)
                    .map(|outcome| ModelComparison::from_outcome(k, &outcome))
            });
        }

        let mut comparisons = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let comparison = joined.map_err(|e| HmmError::TaskFailed(e.to_string()))??;
            info!(
                "  K={}: log-likelihood {:.3}, AIC {:.2}, BIC {:.2}",
                comparison.n_states, comparison.log_likelihood, comparison.aic, comparison.bic
            );
            comparisons.push(comparison);
        }

        comparisons.sort_by_key(|c| c.n_states);
        Ok(comparisons)
    }

    fn fit(
        &self,
        observations: &ObservationSequence,
        k: usize,
        cancel: &CancelToken,
    ) -> Result<FitOutcome> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        BaumWelch::new(self.config.fit.clone()).fit(observations, k, &mut rng, cancel)
    }
}
