use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{api, AppState};

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/api/health", get(api::health_check))
        .route("/api/season", post(api::post_season))
        .route("/api/compare", post(api::post_compare))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Season API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down season API");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    const SEASON: &str = "\
GameDate,Opponent,Venue,GoalsFor,GoalsAgainst,ShotsFor,ShotsAgainst,PenaltyMinutes,FaceoffWinPct
2024-10-04,Hawks,Home,6,1,40,20,2,60
2024-10-11,Wolves,Away,5,1,38,22,4,58
2024-10-18,Bears,Home,1,5,18,38,12,40
2024-10-25,Eagles,Away,0,6,20,40,14,42
";

    async fn send(method: Method, uri: &str, body: impl Into<Vec<u8>>) -> (StatusCode, Value) {
        let app = router(AppState::new(AppConfig::default()));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "text/csv")
            .body(Body::from(body.into()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(Method::GET, "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_season_report() {
        let (status, body) = send(Method::POST, "/api/season?states=2", SEASON).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["n_states"], 2);
        assert_eq!(body["games"].as_array().unwrap().len(), 4);
        assert_eq!(body["games"][0]["state"], "Locked-In");
        assert!(body["run_id"].is_string());
    }

    #[tokio::test]
    async fn test_six_states_rejected() {
        let (status, body) = send(Method::POST, "/api/season?states=6", SEASON).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_state_count");
    }

    #[tokio::test]
    async fn test_empty_upload_is_unprocessable() {
        let header = SEASON.lines().next().unwrap();
        let (status, body) = send(Method::POST, "/api/season?states=2", header).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "empty_sequence");
    }

    #[tokio::test]
    async fn test_strict_upload_lists_bad_rows() {
        let csv = format!("{}2024-11-01,Owls,Home,x,1,30,30,8,50\n", SEASON);
        let (status, body) = send(Method::POST, "/api/season?states=2&strict=true", csv).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "malformed_records");
        assert!(body["message"].as_str().unwrap().contains("row 6"));
    }

    #[tokio::test]
    async fn test_latin1_upload_keeps_valid_rows() {
        let mut csv = SEASON.as_bytes().to_vec();
        csv.extend_from_slice(b"2024-11-01,Montr\xe9al,Home,4,1,36,22,4,57\n");
        csv.extend_from_slice(b"2024-11-08,Owls,Away,\xff,2,30,30,8,50\n");
        let (status, body) = send(Method::POST, "/api/season?states=2", csv).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["games"].as_array().unwrap().len(), 5);
        assert_eq!(body["excluded_rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["excluded_rows"][0]["row"], 7);
        assert_eq!(body["excluded_rows"][0]["field"], "GoalsFor");
    }

    #[tokio::test]
    async fn test_compare_range() {
        let (status, body) = send(Method::POST, "/api/compare?min=2&max=2", SEASON).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models"].as_array().unwrap().len(), 1);
        assert_eq!(body["best_n_states"], 2);

        let (status, body) = send(Method::POST, "/api/compare?min=4&max=3", SEASON).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_range");
    }
}
