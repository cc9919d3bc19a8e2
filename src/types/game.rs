use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of numeric features fed to the HMM for each game
pub const N_FEATURES: usize = 6;

/// Feature column names, in feature-vector order
pub const FEATURE_NAMES: [&str; N_FEATURES] = [
    "GoalsFor",
    "GoalsAgainst",
    "ShotsFor",
    "ShotsAgainst",
    "PenaltyMinutes",
    "FaceoffWinPct",
];

pub const GOALS_FOR: usize = 0;
pub const GOALS_AGAINST: usize = 1;

/// One uploaded row, before any validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGameRecord {
    /// 1-based line number in the upload (the header is line 1)
    pub row: usize,
    pub fields: BTreeMap<String, String>,
}

impl RawGameRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Trimmed field value; blank values count as missing
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// A validated game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameStats {
    pub date: NaiveDate,
    pub opponent: String,
    pub venue: String,
    pub goals_for: f64,
    pub goals_against: f64,
    pub shots_for: f64,
    pub shots_against: f64,
    pub penalty_minutes: f64,
    pub faceoff_win_pct: f64,
}

impl GameStats {
    pub fn label(&self) -> String {
        format!("{} vs {}", self.date, self.opponent)
    }

    pub fn goal_differential(&self) -> f64 {
        self.goals_for - self.goals_against
    }

    pub fn to_features(&self) -> [f64; N_FEATURES] {
        [
            self.goals_for,
            self.goals_against,
            self.shots_for,
            self.shots_against,
            self.penalty_minutes,
            self.faceoff_win_pct,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_field_is_missing() {
        let record = RawGameRecord::new(2)
            .with_field("Opponent", "  ")
            .with_field("Venue", " Home ");
        assert_eq!(record.get("Opponent"), None);
        assert_eq!(record.get("Venue"), Some("Home"));
        assert_eq!(record.get("GoalsFor"), None);
    }

    #[test]
    fn test_feature_order_matches_names() {
        let game = GameStats {
            date: NaiveDate::from_ymd_opt(2024, 11, 2).unwrap(),
            opponent: "Eagles".to_string(),
            venue: "Away".to_string(),
            goals_for: 4.0,
            goals_against: 1.0,
            shots_for: 31.0,
            shots_against: 22.0,
            penalty_minutes: 6.0,
            faceoff_win_pct: 54.5,
        };
        let features = game.to_features();
        assert_eq!(features[GOALS_FOR], 4.0);
        assert_eq!(features[GOALS_AGAINST], 1.0);
        assert_eq!(features[5], 54.5);
        assert_eq!(game.goal_differential(), 3.0);
        assert_eq!(game.label(), "2024-11-02 vs Eagles");
    }
}
