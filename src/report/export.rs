use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::season::SeasonReport;
use crate::error::Result;

pub const DATA_SHEET: &str = "data.csv";
pub const LEGEND_SHEET: &str = "legend.csv";
pub const SUMMARY_SHEET: &str = "summary.csv";

/// Save the full report as pretty-printed JSON
pub fn write_json(report: &SeasonReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(path, json)?;
    info!("Saved season report to {}", path.display());
    Ok(())
}

/// Write the coach report: one CSV per sheet (game data, state legend,
/// games per state). Returns the files written.
pub fn write_coach_report(report: &SeasonReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let data_path = dir.join(DATA_SHEET);
    let mut writer = csv::Writer::from_path(&data_path)?;
    let mut headers: Vec<String> = [
        "GameDate",
        "Opponent",
        "Venue",
        "GoalsFor",
        "GoalsAgainst",
        "ShotsFor",
        "ShotsAgainst",
        "PenaltyMinutes",
        "FaceoffWinPct",
        "StateNum",
        "StateLabel",
        "StateEmoji",
        "CoachNote",
        "Confidence",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();
    headers.extend((1..=report.n_states).map(|n| format!("P(State {})", n)));
    writer.write_record(&headers)?;
    for game in &report.games {
        let mut record = vec![
            game.date.to_string(),
            game.opponent.clone(),
            game.venue.clone(),
            game.goals_for.to_string(),
            game.goals_against.to_string(),
            game.shots_for.to_string(),
            game.shots_against.to_string(),
            game.penalty_minutes.to_string(),
            game.faceoff_win_pct.to_string(),
            game.state_number.to_string(),
            game.state.to_string(),
            game.emoji.to_string(),
            game.coach_note.to_string(),
            format!("{:.4}", game.confidence),
        ];
        record.extend(game.posteriors.iter().map(|p| format!("{:.4}", p)));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    let legend_path = dir.join(LEGEND_SHEET);
    let mut writer = csv::Writer::from_path(&legend_path)?;
    let mut headers: Vec<String> = vec!["State #".into(), "Name".into(), "Definition".into()];
    headers.extend(report.features.iter().map(|f| format!("Avg {}", f)));
    writer.write_record(&headers)?;
    for entry in &report.legend {
        let mut record = vec![
            entry.number.to_string(),
            entry.state.to_string(),
            entry.definition.to_string(),
        ];
        record.extend(entry.typical_game.iter().map(|v| format!("{:.2}", v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;

    let summary_path = dir.join(SUMMARY_SHEET);
    let mut writer = csv::Writer::from_path(&summary_path)?;
    writer.write_record(["State", "Count"])?;
    for count in &report.state_counts {
        writer.write_record([count.state.to_string(), count.games.to_string()])?;
    }
    writer.flush()?;

    info!("Saved coach report to {}", dir.display());
    Ok(vec![data_path, legend_path, summary_path])
}
