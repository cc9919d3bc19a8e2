use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::types::RawGameRecord;

/// Read a game-by-game CSV with a header row.
///
/// Only the CSV structure is checked here. Short rows and bad values are kept
/// as-is so the observation model can report them per field. Each record
/// carries its line number in the file, the header being line 1.
///
/// Fields that are not valid UTF-8 (spreadsheet exports in Latin-1, say) are
/// decoded lossily. A damaged text field keeps its row; a damaged number
/// fails validation for that row only.
pub fn parse_season_csv<R: Read>(reader: R) -> Result<Vec<RawGameRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).into_owned())
        .collect();
    debug!("CSV columns: {:?}", headers);

    let mut records = Vec::new();
    for (index, result) in csv_reader.byte_records().enumerate() {
        let row = result?;
        let line = row
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(index + 2);

        let mut record = RawGameRecord::new(line);
        for (name, value) in headers.iter().zip(row.iter()) {
            let text = match std::str::from_utf8(value) {
                Ok(text) => text.to_string(),
                Err(_) => {
                    warn!("Row {}: {} is not valid UTF-8, decoding lossily", line, name);
                    String::from_utf8_lossy(value).into_owned()
                }
            };
            record.fields.insert(name.clone(), text);
        }
        records.push(record);
    }

    Ok(records)
}

pub fn load_season_csv(path: &Path) -> Result<Vec<RawGameRecord>> {
    let file = std::fs::File::open(path)?;
    let records = parse_season_csv(file)?;
    info!("Loaded {} rows from {}", records.len(), path.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HmmError;
    use std::io::Write;

    const SEASON: &str = "\
GameDate,Opponent,Venue,GoalsFor,GoalsAgainst,ShotsFor,ShotsAgainst,PenaltyMinutes,FaceoffWinPct
2024-10-04,Hawks,Home,4,1,33,20,4,57.5
2024-10-11, Wolves ,Away,1,5,18,35,12,41.0
";

    #[test]
    fn test_rows_keep_file_line_numbers() {
        let records = parse_season_csv(SEASON.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].row, 2);
        assert_eq!(records[1].row, 3);
        assert_eq!(records[1].get("Opponent"), Some("Wolves"));
        assert_eq!(records[0].get("FaceoffWinPct"), Some("57.5"));
    }

    #[test]
    fn test_short_row_is_kept_for_validation() {
        let csv = "GameDate,Opponent,Venue\n2024-10-04,Hawks\n";
        let records = parse_season_csv(csv.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("Venue"), None);
    }

    #[test]
    fn test_header_only_upload_is_empty() {
        let csv = "GameDate,Opponent,Venue\n";
        assert!(parse_season_csv(csv.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_latin1_row_does_not_drop_its_neighbours() {
        let bytes: &[u8] = b"GameDate,Opponent,GoalsFor\n\
2024-10-04,Hawks,3\n\
2024-10-11,Montr\xe9al,2\n\
2024-10-18,Wolves,\xff\n";
        let records = parse_season_csv(bytes).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get("Opponent"), Some("Hawks"));
        assert_eq!(records[1].row, 3);
        assert_eq!(records[1].get("Opponent"), Some("Montr\u{FFFD}al"));
        assert_eq!(records[2].get("Opponent"), Some("Wolves"));
        assert_eq!(records[2].get("GoalsFor"), Some("\u{FFFD}"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SEASON.as_bytes()).unwrap();
        let records = load_season_csv(file.path()).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_season_csv(Path::new("/nonexistent/season.csv"));
        assert!(matches!(result, Err(HmmError::Io(_))));
    }
}
