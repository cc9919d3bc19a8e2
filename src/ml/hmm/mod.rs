pub mod cancel;
pub mod emission;
pub mod estimator;
pub mod features;
pub mod inference;
pub mod labels;
pub mod params;
pub mod store;

pub use cancel::CancelToken;
pub use emission::GaussianEmission;
pub use estimator::{BaumWelch, FitOptions, FitOutcome};
pub use features::{encode, encode_season, parse_game, EncodedSeason, FeatureScaler, RowPolicy};
pub use inference::{decode, log_likelihood, smooth, Decoding, LogSpace, Smoothing};
pub use labels::{PerformanceState, StateLabeling};
pub use params::ModelParameters;
pub use store::{InitOptions, InitStrategy, ParameterStore};

use crate::error::{HmmError, Result};

/// Fewest hidden states a season model may use
pub const MIN_STATES: usize = 2;
/// Most hidden states a season model may use
pub const MAX_STATES: usize = 5;

/// Reject a state count outside [MIN_STATES, MAX_STATES]
pub fn validate_state_count(k: usize) -> Result<usize> {
    if (MIN_STATES..=MAX_STATES).contains(&k) {
        Ok(k)
    } else {
        Err(HmmError::InvalidStateCount(k))
    }
}
