use crate::server::AppState;
use axum::{extract::State, Json};
use chrono::Utc;
use qtrade_alpaca::{ExecutorStats, LimiterStats};
use qtrade_bot_orchestrator::DashboardStatus;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
}

/// Dashboard snapshot plus live limiter and executor counters.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub dashboard: DashboardStatus,
    pub rate_limits: Vec<LimiterStats>,
    pub executor: ExecutorStats,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let started_at = state.status.borrow().started_at;
    Json(HealthResponse {
        status: "ok",
        uptime_secs: (Utc::now() - started_at).num_seconds(),
    })
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let dashboard = state.status.borrow().clone();
    Json(StatusResponse {
        dashboard,
        rate_limits: state.executor.limiters().stats(),
        executor: state.executor.stats(),
    })
}

pub async fn get_rate_limits(State(state): State<AppState>) -> Json<Vec<LimiterStats>> {
    Json(state.executor.limiters().stats())
}

#[cfg(test)]
mod tests {
    use crate::server::{ApiServer, AppState};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use qtrade_alpaca::{RateLimiters, RequestExecutor};
    use qtrade_bot_orchestrator::DashboardStatus;
    use qtrade_core::{RetryConfig, Shutdown};
    use std::sync::Arc;
    use tokio::sync::{broadcast, watch};
    use tower::ServiceExt;

    fn state(status: DashboardStatus) -> (AppState, watch::Sender<DashboardStatus>) {
        let (status_tx, status_rx) = watch::channel(status);
        let (events, _) = broadcast::channel(8);
        let executor = Arc::new(RequestExecutor::new(
            Arc::new(RateLimiters::default()),
            RetryConfig::default(),
            Shutdown::never(),
        ));
        let state = AppState {
            status: status_rx,
            events,
            executor,
            shutdown: Shutdown::never(),
        };
        (state, status_tx)
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = ApiServer::new(state)
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    // ==================== Endpoint Tests ====================

    #[tokio::test]
    async fn test_health_reports_ok() {
        let (state, _tx) = state(DashboardStatus::new(Utc::now()));
        let (status, body) = get_json(state, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["uptime_secs"].as_i64().unwrap() >= 0);
    }

    #[tokio::test]
    async fn test_status_includes_dashboard_and_limiters() {
        let mut dashboard = DashboardStatus::new(Utc::now());
        dashboard.cycles_completed = 7;
        let (state, _tx) = state(dashboard);

        let (status, body) = get_json(state, "/api/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cycles_completed"], 7);
        assert_eq!(body["rate_limits"].as_array().unwrap().len(), 4);
        assert_eq!(body["executor"]["attempts"], 0);
        assert!(body["portfolio"].is_null());
    }

    #[tokio::test]
    async fn test_status_reflects_latest_watch_value() {
        let (state, tx) = state(DashboardStatus::new(Utc::now()));
        tx.send_modify(|status| status.error_count = 2);

        let (_, body) = get_json(state, "/api/status").await;
        assert_eq!(body["error_count"], 2);
    }

    #[tokio::test]
    async fn test_rate_limits_endpoint() {
        let (state, _tx) = state(DashboardStatus::new(Utc::now()));
        let (status, body) = get_json(state, "/api/rate-limits").await;

        assert_eq!(status, StatusCode::OK);
        let limits = body.as_array().unwrap();
        assert!(limits.iter().all(|l| l["degraded"] == false));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let (state, _tx) = state(DashboardStatus::new(Utc::now()));
        let response = ApiServer::new(state)
            .router()
            .oneshot(Request::builder().uri("/api/bots").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
