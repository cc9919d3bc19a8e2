use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::summary::SeasonSummary;
use crate::error::{HmmError, RecordError, Result};
use crate::ml::hmm::{FitOutcome, PerformanceState, StateLabeling};
use crate::types::{GameStats, PosteriorTable, FEATURE_NAMES};

/// One game with its decoded performance state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRow {
    pub date: NaiveDate,
    pub opponent: String,
    pub venue: String,
    pub goals_for: f64,
    pub goals_against: f64,
    pub shots_for: f64,
    pub shots_against: f64,
    pub penalty_minutes: f64,
    pub faceoff_win_pct: f64,
    pub state_number: usize,
    pub state: PerformanceState,
    pub emoji: &'static str,
    pub coach_note: &'static str,
    /// Smoothed probability of the decoded state
    pub confidence: f64,
    /// Smoothed probability of every state, indexed by display number - 1
    pub posteriors: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub number: usize,
    pub state: PerformanceState,
    pub definition: &'static str,
    pub emoji: &'static str,
    pub coach_note: &'static str,
    /// State mean in raw units, ordered like `SeasonReport::features`
    pub typical_game: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateCount {
    pub number: usize,
    pub state: PerformanceState,
    pub games: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitDiagnostics {
    pub log_likelihood: f64,
    pub aic: f64,
    pub bic: f64,
    pub iterations: usize,
    pub converged: bool,
    pub cancelled: bool,
    pub reinitialized_states: usize,
    pub free_parameters: usize,
}

impl FitDiagnostics {
    pub fn from_outcome(outcome: &FitOutcome) -> Self {
        Self {
            log_likelihood: outcome.log_likelihood,
            aic: outcome.aic(),
            bic: outcome.bic(),
            iterations: outcome.iterations,
            converged: outcome.converged,
            cancelled: outcome.cancelled,
            reinitialized_states: outcome.reinitialized_states,
            free_parameters: outcome.params.n_free_parameters(),
        }
    }
}

/// Everything a coach sees about a season. Holds no model parameters.
#[derive(Debug, Clone, Serialize)]
pub struct SeasonReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub n_states: usize,
    pub seed: u64,
    pub features: Vec<&'static str>,
    pub games: Vec<GameRow>,
    pub legend: Vec<LegendEntry>,
    pub state_counts: Vec<StateCount>,
    /// Transitions between display numbers: `[from - 1][to - 1]`
    pub transition_counts: Vec<Vec<u64>>,
    pub diagnostics: FitDiagnostics,
    pub excluded_rows: Vec<RecordError>,
}

impl SeasonReport {
    /// Combine the decoded season with state names. Model state indices are
    /// translated to display numbers throughout. `state_means` holds each
    /// model state's mean in raw units.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        games: &[GameStats],
        summary: &SeasonSummary,
        posteriors: &PosteriorTable,
        labeling: &StateLabeling,
        state_means: &[Vec<f64>],
        diagnostics: FitDiagnostics,
        excluded_rows: Vec<RecordError>,
        seed: u64,
    ) -> Result<Self> {
        if games.len() != summary.n_games() {
            return Err(HmmError::LengthMismatch {
                path: summary.n_games(),
                posteriors: games.len(),
            });
        }
        if posteriors.len() != summary.n_games() {
            return Err(HmmError::LengthMismatch {
                path: summary.n_games(),
                posteriors: posteriors.len(),
            });
        }

        let k = labeling.n_states();
        if posteriors.n_states() != k || state_means.len() != k {
            return Err(HmmError::InvalidParameters(format!(
                "expected {} states, got {} posterior columns and {} state means",
                k,
                posteriors.n_states(),
                state_means.len()
            )));
        }
        let by_rank = (0..k)
            .map(|rank| {
                labeling.state_of_rank(rank).ok_or_else(|| {
                    HmmError::InvalidParameters(format!("no state has rank {}", rank))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        let mut rows = Vec::with_capacity(games.len());
        for (t, (game, &state)) in games.iter().zip(&summary.per_game_state).enumerate() {
            let label = labeling.label(state)?;
            let ranked: Vec<f64> = by_rank
                .iter()
                .map(|&s| posteriors.probability(t, s))
                .collect();
            rows.push(GameRow {
                date: game.date,
                opponent: game.opponent.clone(),
                venue: game.venue.clone(),
                goals_for: game.goals_for,
                goals_against: game.goals_against,
                shots_for: game.shots_for,
                shots_against: game.shots_against,
                penalty_minutes: game.penalty_minutes,
                faceoff_win_pct: game.faceoff_win_pct,
                state_number: labeling.display_number(state)?,
                state: label,
                emoji: label.emoji(),
                coach_note: label.coach_note(),
                confidence: posteriors.probability(t, state),
                posteriors: ranked,
            });
        }

        let mut legend = Vec::with_capacity(k);
        let mut state_counts = Vec::with_capacity(k);
        for (rank, &model_state) in by_rank.iter().enumerate() {
            let state = PerformanceState::from_rank(rank).ok_or_else(|| {
                HmmError::InvalidParameters(format!("no state name for rank {}", rank))
            })?;
            let games_in_state = summary
                .state_frequencies
                .get(&model_state)
                .copied()
                .unwrap_or(0);

            legend.push(LegendEntry {
                number: rank + 1,
                state,
                definition: state.definition(),
                emoji: state.emoji(),
                coach_note: state.coach_note(),
                typical_game: state_means[model_state].clone(),
            });
            state_counts.push(StateCount {
                number: rank + 1,
                state,
                games: games_in_state,
            });
        }

        let mut transition_counts = vec![vec![0u64; k]; k];
        for (from, row) in summary.transition_counts.iter().enumerate() {
            for (to, &count) in row.iter().enumerate() {
                transition_counts[labeling.rank_of(from)?][labeling.rank_of(to)?] += count;
            }
        }

        Ok(Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            n_states: k,
            seed,
            features: FEATURE_NAMES.to_vec(),
            games: rows,
            legend,
            state_counts,
            transition_counts,
            diagnostics,
            excluded_rows,
        })
    }

    pub fn n_games(&self) -> usize {
        self.games.len()
    }

    /// Pretty print the season to the console
    pub fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("                  SEASON STATE REPORT");
        println!("{}", "=".repeat(60));
        if let (Some(first), Some(last)) = (self.games.first(), self.games.last()) {
            println!("Period:             {} to {}", first.date, last.date);
        }
        println!("Games:              {}", self.n_games());
        println!("States:             {}", self.n_states);
        if !self.excluded_rows.is_empty() {
            println!("Excluded rows:      {}", self.excluded_rows.len());
        }
        println!("{}", "-".repeat(60));
        println!("FIT");
        println!("  Log-likelihood:     {:.3}", self.diagnostics.log_likelihood);
        println!("  AIC / BIC:          {:.2} / {:.2}", self.diagnostics.aic, self.diagnostics.bic);
        println!(
            "  Iterations:         {} ({})",
            self.diagnostics.iterations,
            if self.diagnostics.converged {
                "converged"
            } else if self.diagnostics.cancelled {
                "cancelled"
            } else {
                "iteration cap"
            }
        );
        println!("{}", "-".repeat(60));
        println!("STATES");
        for count in &self.state_counts {
            println!(
                "  {} {} {:<14} {:>3} games",
                count.number,
                count.state.emoji(),
                count.state.as_str(),
                count.games
            );
        }
        println!("{}", "-".repeat(60));
        println!("GAMES");
        for game in &self.games {
            println!(
                "  {} {:<18} {:>2}-{:<2} {} {:<14} ({:.0}%)",
                game.date,
                game.opponent,
                game.goals_for,
                game.goals_against,
                game.emoji,
                game.state.as_str(),
                game.confidence * 100.0
            );
        }
        println!("{}", "=".repeat(60));
    }
}
