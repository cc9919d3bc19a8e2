use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::SeasonAnalyzer;
use crate::ml::hmm::CancelToken;

/// Shared request state. Only configuration lives here; every request fits
/// its own model.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }

    pub fn analyzer(&self) -> SeasonAnalyzer {
        SeasonAnalyzer::from_settings(&self.config)
    }
}

/// Cancels the wrapped token when dropped, so a fit stops once its request
/// goes away
pub struct CancelOnDrop(pub CancelToken);

impl CancelOnDrop {
    pub fn new() -> Self {
        Self(CancelToken::new())
    }

    pub fn token(&self) -> CancelToken {
        self.0.clone()
    }
}

impl Default for CancelOnDrop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_cancels_on_drop() {
        let guard = CancelOnDrop::new();
        let token = guard.token();
        assert!(!token.is_cancelled());
        drop(guard);
        assert!(token.is_cancelled());
    }
}
