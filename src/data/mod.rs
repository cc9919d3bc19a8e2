pub mod loader;

pub use loader::{load_season_csv, parse_season_csv};
