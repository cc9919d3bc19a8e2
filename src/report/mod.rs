//! Season summaries, coach-facing reports and their exports.

pub mod export;
pub mod season;
pub mod summary;

pub use export::{write_coach_report, write_json};
pub use season::{FitDiagnostics, GameRow, LegendEntry, SeasonReport, StateCount};
pub use summary::{summarize, SeasonSummary};
