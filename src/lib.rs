//! Hidden Markov model tracker for a team's season: fits latent performance
//! states to game-by-game stats and reports them per game.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod ml;
pub mod report;
pub mod types;
pub mod web;

pub use error::{HmmError, Result};
