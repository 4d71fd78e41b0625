//! # Health Check Endpoints
//!
//! - `GET /health` and `GET /api/v1/health`: liveness plus a short summary
//! - `GET /api/v1/metrics`: relay counters and pool occupancy
//!
//! Load balancers only look at the status code; the body is for humans.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();
    let pool = state.pool.stats().await;

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": state.config.server.host,
            "port": state.config.server.port
        },
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.sessions_total
        },
        "pool": pool,
        "backend": {
            "model": state.config.backend.model,
            "configured": !state.config.backend.api_key.is_empty()
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();
    let pool = state.pool.stats().await;
    let uptime_seconds = state.uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "relay": metrics,
        "pool": {
            "idle": pool.idle,
            "capacity": pool.capacity,
            "idle_timeout_secs": state.config.pool.idle_timeout_secs,
            "keepalive_interval_secs": state.config.pool.keepalive_interval_secs
        },
        "frames_per_second": if uptime_seconds > 0 {
            metrics.frames_forwarded as f64 / uptime_seconds as f64
        } else {
            0.0
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_reports_pool_and_sessions() {
        let (state, _) = test_state(false);
        state.session_opened();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"]["active"], 1);
        assert_eq!(body["pool"]["capacity"], 15);
        assert_eq!(body["pool"]["idle"], 0);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint() {
        let (state, _) = test_state(false);
        state.record_frame(false);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/metrics", web::get().to(detailed_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["relay"]["frames_dropped"], 1);
        assert_eq!(body["pool"]["idle_timeout_secs"], 300);
    }
}
