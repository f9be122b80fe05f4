//! `GET /health`: a small JSON liveness body for probing.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::protocol_constants::SERVICE_ID;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    active_jobs: usize,
    queued_jobs: usize,
    uptime_secs: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.job_manager.stats();
    Json(HealthResponse {
        status: "ok",
        service: SERVICE_ID,
        active_jobs: stats.active,
        queued_jobs: stats.queued,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes_expected_fields() {
        let body = HealthResponse {
            status: "ok",
            service: SERVICE_ID,
            active_jobs: 2,
            queued_jobs: 1,
            uptime_secs: 10,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"active_jobs\":2"));
    }
}
