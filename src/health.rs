//! # Operational Endpoints
//!
//! Health, stats and metrics for the bridge process. The stats endpoint is
//! the observability surface for live calls: active-session count, call
//! identifiers and oldest-session age.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let active_calls = state.registry.count();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "call-bridge-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_calls": active_calls,
            "calls_started": metrics.calls_started,
            "calls_completed": metrics.calls_completed
        },
        "agent": {
            "configured": config.agent.is_configured(),
            "model": config.agent.model
        },
        "memory": get_memory_info()
    }))
}

/// Live-call stats: active-session count, call identifiers, oldest age.
pub async fn call_stats(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let registry = &state.registry;

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "active_calls": registry.count(),
        "call_sids": registry.list_active(),
        "oldest_age_ms": registry.oldest_age_ms(),
        "calls_started": metrics.calls_started,
        "calls_completed": metrics.calls_completed,
        "frames_from_caller": metrics.frames_from_caller,
        "frames_gated": metrics.frames_gated,
        "frames_to_caller": metrics.frames_to_caller
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            },
            "active_calls": state.registry.count()
        },
        "bridge": {
            "calls_started": metrics.calls_started,
            "calls_completed": metrics.calls_completed,
            "frames_from_caller": metrics.frames_from_caller,
            "frames_gated": metrics.frames_gated,
            "frames_to_caller": metrics.frames_to_caller
        },
        "endpoints": endpoint_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    let pid = process::id();

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_stats_reflect_registry() {
        let state = AppState::new(AppConfig::default());
        state.registry.create("CA1", "SS1").unwrap();
        state.record_call_started();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/stats", web::get().to(call_stats)),
        )
        .await;

        let req = test::TestRequest::get().uri("/stats").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["active_calls"], 1);
        assert_eq!(body["call_sids"][0], "CA1");
        assert_eq!(body["calls_started"], 1);
        assert!(body["oldest_age_ms"].as_i64().unwrap() >= 0);
    }

    #[actix_web::test]
    async fn test_health_is_ok() {
        let state = AppState::new(AppConfig::default());

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/health", web::get().to(health_check)),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"]["name"], "call-bridge-backend");
        assert_eq!(body["agent"]["configured"], false);
    }
}
