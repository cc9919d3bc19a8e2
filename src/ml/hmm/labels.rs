//! Human-readable names for fitted states.
//!
//! States are ranked by the goal differential of their emission means and the
//! best-performing state gets the first name.

use serde::{Deserialize, Serialize};

use super::params::ModelParameters;
use crate::error::{HmmError, Result};
use crate::types::{GOALS_AGAINST, GOALS_FOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PerformanceState {
    #[serde(rename = "Locked-In")]
    LockedIn,
    Improving,
    Fatigued,
    Demoralized,
    Overconfident,
}

impl PerformanceState {
    /// Rank order, best goal differential first
    pub const ALL: [PerformanceState; 5] = [
        PerformanceState::LockedIn,
        PerformanceState::Improving,
        PerformanceState::Fatigued,
        PerformanceState::Demoralized,
        PerformanceState::Overconfident,
    ];

    pub fn from_rank(rank: usize) -> Option<Self> {
        Self::ALL.get(rank).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceState::LockedIn => "Locked-In",
            PerformanceState::Improving => "Improving",
            PerformanceState::Fatigued => "Fatigued",
            PerformanceState::Demoralized => "Demoralized",
            PerformanceState::Overconfident => "Overconfident",
        }
    }

    pub fn definition(&self) -> &'static str {
        match self {
            PerformanceState::LockedIn => "High offense & possession, low penalties.",
            PerformanceState::Improving => "Upward trend in shots and faceoff wins.",
            PerformanceState::Fatigued => "Late-game drop-offs, higher penalty minutes.",
            PerformanceState::Demoralized => "Poor results and discipline issues.",
            PerformanceState::Overconfident => "Good scoreline but sloppy fundamentals.",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            PerformanceState::LockedIn => "🟢",
            PerformanceState::Improving => "🔵",
            PerformanceState::Fatigued => "🟠",
            PerformanceState::Demoralized => "🔴",
            PerformanceState::Overconfident => "🟣",
        }
    }

    pub fn coach_note(&self) -> &'static str {
        match self {
            PerformanceState::LockedIn => "Stay the course: maintain systems and line rotations.",
            PerformanceState::Improving => "Leverage momentum: add competitive drills in practice.",
            PerformanceState::Fatigued => "Emphasize recovery: short shifts, light skill work.",
            PerformanceState::Demoralized => "Rebuild confidence: puck-handling and team bonding.",
            PerformanceState::Overconfident => "Reinforce fundamentals: focus on detail and discipline.",
        }
    }
}

impl std::fmt::Display for PerformanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Mapping between model state indices and their performance ranks
#[derive(Debug, Clone, PartialEq)]
pub struct StateLabeling {
    /// `ranks[state]` is the 0-based rank of that state
    ranks: Vec<usize>,
    /// `order[rank]` is the state holding that rank
    order: Vec<usize>,
    goal_differentials: Vec<f64>,
}

impl StateLabeling {
    /// Rank states by mean `GoalsFor - GoalsAgainst`, highest first. Equal
    /// differentials keep the lower state index first.
    pub fn from_params(params: &ModelParameters) -> Self {
        let goal_differentials: Vec<f64> = params
            .emissions()
            .iter()
            .map(|e| e.mean()[GOALS_FOR] - e.mean()[GOALS_AGAINST])
            .collect();

        let mut order: Vec<usize> = (0..goal_differentials.len()).collect();
        order.sort_by(|&a, &b| goal_differentials[b].total_cmp(&goal_differentials[a]));

        let mut ranks = vec![0; order.len()];
        for (rank, &state) in order.iter().enumerate() {
            ranks[state] = rank;
        }

        Self {
            ranks,
            order,
            goal_differentials,
        }
    }

    pub fn n_states(&self) -> usize {
        self.ranks.len()
    }

    pub fn rank_of(&self, state: usize) -> Result<usize> {
        self.ranks.get(state).copied().ok_or_else(|| {
            HmmError::InvalidParameters(format!(
                "state {} out of range for {} states",
                state,
                self.n_states()
            ))
        })
    }

    pub fn state_of_rank(&self, rank: usize) -> Option<usize> {
        self.order.get(rank).copied()
    }

    pub fn label(&self, state: usize) -> Result<PerformanceState> {
        let rank = self.rank_of(state)?;
        PerformanceState::from_rank(rank).ok_or_else(|| {
            HmmError::InvalidParameters(format!("no state name for rank {}", rank))
        })
    }

    /// 1-based number shown to users
    pub fn display_number(&self, state: usize) -> Result<usize> {
        Ok(self.rank_of(state)? + 1)
    }

    pub fn goal_differential(&self, state: usize) -> Option<f64> {
        self.goal_differentials.get(state).copied()
    }
}
