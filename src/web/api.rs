use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::data::parse_season_csv;
use crate::engine::{best_by_bic, ModelComparison};
use crate::error::HmmError;
use crate::ml::hmm::{validate_state_count, RowPolicy, MAX_STATES, MIN_STATES};
use crate::report::SeasonReport;

use super::{AppState, CancelOnDrop};

// === Errors ===

/// JSON error body: `{ "error": kind, "message": text }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind,
            message: message.into(),
        }
    }
}

impl From<HmmError> for ApiError {
    fn from(err: HmmError) -> Self {
        let status = match &err {
            HmmError::InvalidStateCount(_) | HmmError::Csv(_) => StatusCode::BAD_REQUEST,
            HmmError::MalformedRecord(_)
            | HmmError::MalformedRecords(_)
            | HmmError::EmptySequence
            | HmmError::DimensionMismatch { .. }
            | HmmError::DegenerateEmission { .. }
            | HmmError::NonConvergent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            HmmError::LengthMismatch { .. }
            | HmmError::InvalidParameters(_)
            | HmmError::Io(_)
            | HmmError::TaskFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        } else {
            warn!("Rejected request: {}", self.message);
        }
        (
            self.status,
            Json(json!({
                "error": self.kind,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

// === Season Endpoints ===

#[derive(Debug, Default, Deserialize)]
pub struct SeasonQuery {
    pub states: Option<usize>,
    pub seed: Option<u64>,
    /// Reject the upload if any row is malformed
    pub strict: Option<bool>,
}

pub async fn post_season(
    State(state): State<AppState>,
    Query(query): Query<SeasonQuery>,
    body: Bytes,
) -> Result<Json<SeasonReport>, ApiError> {
    let k = validate_state_count(query.states.unwrap_or(state.config.model.n_states))?;

    let mut analyzer = state.analyzer();
    if let Some(seed) = query.seed {
        analyzer = analyzer.with_seed(seed);
    }
    if query.strict == Some(true) {
        analyzer = analyzer.with_row_policy(RowPolicy::Reject);
    }

    let records = parse_season_csv(&body[..])?;
    info!("Season upload: {} rows, {} states", records.len(), k);

    let guard = CancelOnDrop::new();
    let cancel = guard.token();
    let report = tokio::task::spawn_blocking(move || analyzer.analyze(&records, k, &cancel))
        .await
        .map_err(|e| HmmError::TaskFailed(e.to_string()))??;
    drop(guard);

    Ok(Json(report))
}

#[derive(Debug, Default, Deserialize)]
pub struct CompareQuery {
    pub min: Option<usize>,
    pub max: Option<usize>,
    pub seed: Option<u64>,
}

#[derive(Serialize)]
pub struct CompareResponse {
    pub run_id: Uuid,
    pub n_rows: usize,
    pub models: Vec<ModelComparison>,
    /// State count with the lowest BIC
    pub best_n_states: Option<usize>,
}

pub async fn post_compare(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
    body: Bytes,
) -> Result<Json<CompareResponse>, ApiError> {
    let min = validate_state_count(query.min.unwrap_or(MIN_STATES))?;
    let max = validate_state_count(query.max.unwrap_or(MAX_STATES))?;
    if min > max {
        return Err(ApiError::bad_request(
            "invalid_range",
            format!("min ({}) must not exceed max ({})", min, max),
        ));
    }

    let mut analyzer = state.analyzer();
    if let Some(seed) = query.seed {
        analyzer = analyzer.with_seed(seed);
    }

    let records = parse_season_csv(&body[..])?;
    let n_rows = records.len();

    let guard = CancelOnDrop::new();
    let models = analyzer
        .compare(records, (min..=max).collect(), guard.token())
        .await?;
    drop(guard);

    let best_n_states = best_by_bic(&models).map(|m| m.n_states);
    Ok(Json(CompareResponse {
        run_id: Uuid::new_v4(),
        n_rows,
        models,
        best_n_states,
    }))
}

// === Health Check ===

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}
