use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{HmmError, Result};
use crate::ml::hmm::ModelParameters;
use crate::types::{PosteriorTable, StatePath};

/// Season-level view of a decoded path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonSummary {
    /// Decoded state for each game, in season order
    pub per_game_state: Vec<usize>,
    /// `transition_counts[i][j]` counts consecutive games going from `i` to `j`
    pub transition_counts: Vec<Vec<u64>>,
    /// Games spent in each state. Every state is present, including unused ones
    pub state_frequencies: BTreeMap<usize, usize>,
}

impl SeasonSummary {
    pub fn n_games(&self) -> usize {
        self.per_game_state.len()
    }

    pub fn n_transitions(&self) -> u64 {
        self.transition_counts.iter().flatten().sum()
    }
}

/// Condense a decoded season into per-game states, transition counts and
/// state frequencies.
pub fn summarize(
    params: &ModelParameters,
    path: &StatePath,
    posteriors: &PosteriorTable,
) -> Result<SeasonSummary> {
    if path.len() != posteriors.len() {
        return Err(HmmError::LengthMismatch {
            path: path.len(),
            posteriors: posteriors.len(),
        });
    }

    let k = params.n_states();
    if !posteriors.is_empty() && posteriors.n_states() != k {
        return Err(HmmError::InvalidParameters(format!(
            "posterior table has {} states, model has {}",
            posteriors.n_states(),
            k
        )));
    }
    if let Some(bad) = path.iter().find(|&s| s >= k) {
        return Err(HmmError::InvalidParameters(format!(
            "state index {} out of range for {} states",
            bad, k
        )));
    }

    let mut transition_counts = vec![vec![0u64; k]; k];
    for pair in path.states().windows(2) {
        transition_counts[pair[0]][pair[1]] += 1;
    }

    let mut state_frequencies: BTreeMap<usize, usize> = (0..k).map(|s| (s, 0)).collect();
    for state in path.iter() {
        *state_frequencies.entry(state).or_insert(0) += 1;
    }

    Ok(SeasonSummary {
        per_game_state: path.states().to_vec(),
        transition_counts,
        state_frequencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::hmm::GaussianEmission;
    use ndarray::{array, Array2};

    fn two_state_params() -> ModelParameters {
        let emissions = vec![
            GaussianEmission::isotropic(array![0.0], 1.0).unwrap(),
            GaussianEmission::isotropic(array![5.0], 1.0).unwrap(),
        ];
        ModelParameters::new(
            array![0.5, 0.5],
            array![[0.9, 0.1], [0.1, 0.9]],
            emissions,
        )
        .unwrap()
    }

    fn uniform_posteriors(t: usize, k: usize) -> PosteriorTable {
        PosteriorTable::new(Array2::from_elem((t, k), 1.0 / k as f64))
    }

    #[test]
    fn test_counts_follow_path() {
        let params = two_state_params();
        let path = StatePath::new(vec![0, 0, 1, 1]);
        let summary = summarize(&params, &path, &uniform_posteriors(4, 2)).unwrap();

        assert_eq!(summary.per_game_state, vec![0, 0, 1, 1]);
        assert_eq!(summary.transition_counts, vec![vec![1, 1], vec![0, 1]]);
        assert_eq!(summary.state_frequencies[&0], 2);
        assert_eq!(summary.state_frequencies[&1], 2);
        assert_eq!(summary.n_transitions(), 3);
    }

    #[test]
    fn test_unused_state_has_zero_frequency() {
        let params = two_state_params();
        let path = StatePath::new(vec![1, 1, 1]);
        let summary = summarize(&params, &path, &uniform_posteriors(3, 2)).unwrap();
        assert_eq!(summary.state_frequencies.len(), 2);
        assert_eq!(summary.state_frequencies[&0], 0);
    }

    #[test]
    fn test_single_game_has_no_transitions() {
        let params = two_state_params();
        let path = StatePath::new(vec![0]);
        let summary = summarize(&params, &path, &uniform_posteriors(1, 2)).unwrap();
        assert_eq!(summary.n_transitions(), 0);
        assert_eq!(summary.n_games(), 1);
    }

    #[test]
    fn test_length_mismatch() {
        let params = two_state_params();
        let path = StatePath::new(vec![0, 1]);
        match summarize(&params, &path, &uniform_posteriors(3, 2)) {
            Err(HmmError::LengthMismatch { path, posteriors }) => {
                assert_eq!((path, posteriors), (2, 3));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_state_out_of_range() {
        let params = two_state_params();
        let path = StatePath::new(vec![0, 2]);
        assert!(matches!(
            summarize(&params, &path, &uniform_posteriors(2, 2)),
            Err(HmmError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_posterior_width_must_match_model() {
        let params = two_state_params();
        let path = StatePath::new(vec![0, 1]);
        let posteriors = PosteriorTable::new(Array2::from_elem((2, 3), 1.0 / 3.0));
        assert!(summarize(&params, &path, &posteriors).is_err());
    }
}
