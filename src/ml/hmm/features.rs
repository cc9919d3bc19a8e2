use chrono::NaiveDate;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{HmmError, RecordError, Result};
use crate::types::{GameStats, ObservationSequence, RawGameRecord, FEATURE_NAMES, N_FEATURES};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Columns every uploaded row must provide
pub const REQUIRED_FIELDS: [&str; 9] = [
    "GameDate",
    "Opponent",
    "Venue",
    "GoalsFor",
    "GoalsAgainst",
    "ShotsFor",
    "ShotsAgainst",
    "PenaltyMinutes",
    "FaceoffWinPct",
];

/// What to do with an upload where only some rows are usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPolicy {
    /// Keep the valid rows and report the excluded ones
    #[default]
    SkipInvalid,
    /// Fail the whole upload if any row is malformed
    Reject,
}

fn malformed(record: &RawGameRecord, field: &str, reason: String) -> HmmError {
    HmmError::MalformedRecord(RecordError {
        row: record.row,
        field: field.to_string(),
        reason,
    })
}

fn text_field(record: &RawGameRecord, field: &str) -> Result<String> {
    record
        .get(field)
        .map(str::to_string)
        .ok_or_else(|| malformed(record, field, "is missing".to_string()))
}

fn numeric_field(record: &RawGameRecord, field: &str) -> Result<f64> {
    let raw = record
        .get(field)
        .ok_or_else(|| malformed(record, field, "is missing".to_string()))?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(malformed(record, field, format!("is not a number: '{}'", raw))),
    }
}

/// Validate one row into a game. Fields are checked in `REQUIRED_FIELDS`
/// order and the first problem is reported.
pub fn parse_game(record: &RawGameRecord) -> Result<GameStats> {
    let raw_date = text_field(record, "GameDate")?;
    let date = NaiveDate::parse_from_str(&raw_date, DATE_FORMAT).map_err(|_| {
        malformed(
            record,
            "GameDate",
            format!("is not a YYYY-MM-DD date: '{}'", raw_date),
        )
    })?;

    Ok(GameStats {
        date,
        opponent: text_field(record, "Opponent")?,
        venue: text_field(record, "Venue")?,
        goals_for: numeric_field(record, "GoalsFor")?,
        goals_against: numeric_field(record, "GoalsAgainst")?,
        shots_for: numeric_field(record, "ShotsFor")?,
        shots_against: numeric_field(record, "ShotsAgainst")?,
        penalty_minutes: numeric_field(record, "PenaltyMinutes")?,
        faceoff_win_pct: numeric_field(record, "FaceoffWinPct")?,
    })
}

/// Raw (unscaled) feature vector for one game
pub fn encode(record: &RawGameRecord) -> Result<[f64; N_FEATURES]> {
    Ok(parse_game(record)?.to_features())
}

/// Games that passed validation, in chronological order, plus the rows that
/// did not
#[derive(Debug, Clone)]
pub struct EncodedSeason {
    pub games: Vec<GameStats>,
    pub excluded: Vec<RecordError>,
}

impl EncodedSeason {
    /// Standardize the season and build the observation sequence
    pub fn observations(&self) -> Result<(ObservationSequence, FeatureScaler)> {
        if self.games.is_empty() {
            return Err(HmmError::EmptySequence);
        }
        let mut raw = Array2::zeros((self.games.len(), N_FEATURES));
        for (t, game) in self.games.iter().enumerate() {
            raw.row_mut(t).assign(&Array1::from(game.to_features().to_vec()));
        }

        let scaler = FeatureScaler::fit(&raw);
        let labels = self.games.iter().map(GameStats::label).collect();
        let sequence = ObservationSequence::new(scaler.transform(&raw), labels)?;
        Ok((sequence, scaler))
    }
}

/// Encode every row, collecting all malformed ones, and order the valid
/// games by date. Same-day games keep upload order.
pub fn encode_season(records: &[RawGameRecord], policy: RowPolicy) -> Result<EncodedSeason> {
    let mut games = Vec::with_capacity(records.len());
    let mut excluded = Vec::new();

    for record in records {
        match parse_game(record) {
            Ok(game) => games.push(game),
            Err(HmmError::MalformedRecord(err)) => excluded.push(err),
            Err(other) => return Err(other),
        }
    }

    if !excluded.is_empty() {
        match policy {
            RowPolicy::Reject => return Err(HmmError::MalformedRecords(excluded)),
            RowPolicy::SkipInvalid => {
                for err in &excluded {
                    warn!("Excluding {}", err);
                }
                // Nothing survived: surface the row problems rather than an empty season
                if games.is_empty() {
                    return Err(HmmError::MalformedRecords(excluded));
                }
            }
        }
    }

    if games.is_empty() {
        return Err(HmmError::EmptySequence);
    }

    games.sort_by_key(|g| g.date);
    Ok(EncodedSeason { games, excluded })
}

/// Column-wise z-score standardization.
///
/// Uses the population standard deviation; a constant column is centred
/// but not rescaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(data: &Array2<f64>) -> Self {
        let n_features = data.ncols();
        if data.nrows() == 0 {
            return Self {
                means: vec![0.0; n_features],
                scales: vec![1.0; n_features],
            };
        }
        let means = data
            .mean_axis(Axis(0))
            .map(|m| m.to_vec())
            .unwrap_or_else(|| vec![0.0; n_features]);
        let scales = data
            .std_axis(Axis(0), 0.0)
            .iter()
            .map(|&s| if s > 1e-10 { s } else { 1.0 })
            .collect();
        Self { means, scales }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.means[j]) / self.scales[j];
            }
        }
        out
    }

    /// Map a standardized vector back to raw units
    pub fn inverse_transform(&self, scaled: &[f64]) -> Vec<f64> {
        scaled
            .iter()
            .enumerate()
            .map(|(j, v)| v * self.scales[j] + self.means[j])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn record(row: usize, date: &str, goals_for: &str) -> RawGameRecord {
        RawGameRecord::new(row)
            .with_field("GameDate", date)
            .with_field("Opponent", "Wolves")
            .with_field("Venue", "Home")
            .with_field("GoalsFor", goals_for)
            .with_field("GoalsAgainst", "2")
            .with_field("ShotsFor", "30")
            .with_field("ShotsAgainst", "25")
            .with_field("PenaltyMinutes", "8")
            .with_field("FaceoffWinPct", "51.5")
    }

    #[test]
    fn test_encode_valid_record() {
        let features = encode(&record(2, "2024-10-05", "3")).unwrap();
        assert_eq!(features, [3.0, 2.0, 30.0, 25.0, 8.0, 51.5]);
    }

    #[test]
    fn test_encode_is_deterministic() {
        let r = record(2, "2024-10-05", "3");
        assert_eq!(encode(&r).unwrap(), encode(&r).unwrap());
    }

    #[test]
    fn test_missing_field() {
        let mut r = record(4, "2024-10-05", "3");
        r.fields.remove("Venue");
        match encode(&r) {
            Err(HmmError::MalformedRecord(e)) => {
                assert_eq!(e.row, 4);
                assert_eq!(e.field, "Venue");
                assert_eq!(e.reason, "is missing");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_and_non_finite() {
        for bad in ["three", "NaN", "inf"] {
            match encode(&record(3, "2024-10-05", bad)) {
                Err(HmmError::MalformedRecord(e)) => assert_eq!(e.field, "GoalsFor"),
                other => panic!("unexpected for {}: {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_bad_date() {
        match encode(&record(3, "10/05/2024", "1")) {
            Err(HmmError::MalformedRecord(e)) => assert_eq!(e.field, "GameDate"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_season_sorted_by_date_stably() {
        let records = vec![
            record(2, "2024-11-01", "5"),
            record(3, "2024-10-01", "1"),
            record(4, "2024-11-01", "6"),
        ];
        let season = encode_season(&records, RowPolicy::SkipInvalid).unwrap();
        let goals: Vec<f64> = season.games.iter().map(|g| g.goals_for).collect();
        assert_eq!(goals, vec![1.0, 5.0, 6.0]);
        assert!(season.excluded.is_empty());
    }

    #[test]
    fn test_skip_policy_reports_every_bad_row() {
        let records = vec![
            record(2, "2024-10-01", "x"),
            record(3, "2024-10-02", "2"),
            record(4, "bad", "2"),
        ];
        let season = encode_season(&records, RowPolicy::SkipInvalid).unwrap();
        assert_eq!(season.games.len(), 1);
        let rows: Vec<usize> = season.excluded.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![2, 4]);
    }

    #[test]
    fn test_reject_policy_fails_whole_upload() {
        let records = vec![record(2, "2024-10-01", "x"), record(3, "2024-10-02", "2")];
        match encode_season(&records, RowPolicy::Reject) {
            Err(HmmError::MalformedRecords(errors)) => assert_eq!(errors.len(), 1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_all_rows_bad_is_reported_not_empty() {
        let records = vec![record(2, "2024-10-01", "x")];
        assert!(matches!(
            encode_season(&records, RowPolicy::SkipInvalid),
            Err(HmmError::MalformedRecords(_))
        ));
    }

    #[test]
    fn test_empty_upload() {
        assert!(matches!(
            encode_season(&[], RowPolicy::SkipInvalid),
            Err(HmmError::EmptySequence)
        ));
    }

    #[test]
    fn test_scaler_standardizes_and_inverts() {
        let data = array![[1.0, 5.0], [3.0, 5.0]];
        let scaler = FeatureScaler::fit(&data);
        let scaled = scaler.transform(&data);
        assert_eq!(scaled, array![[-1.0, 0.0], [1.0, 0.0]]);
        assert_eq!(scaler.inverse_transform(&[1.0, 0.0]), vec![3.0, 5.0]);
    }

    #[test]
    fn test_observations_are_labelled() {
        let records = vec![record(2, "2024-10-01", "1"), record(3, "2024-10-08", "4")];
        let season = encode_season(&records, RowPolicy::Reject).unwrap();
        let (obs, scaler) = season.observations().unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs.n_features(), N_FEATURES);
        assert_eq!(obs.labels()[1], "2024-10-08 vs Wolves");
        assert_eq!(scaler.means[0], 2.5);
    }
}
