//! Health Check Endpoint
//!
//! DB 연결에 실패해 수집 서비스가 시작되지 않은 경우에도 응답함 (`degraded`)

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub services: ServiceFlags,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct ServiceFlags {
    pub admin: bool,
    pub scraper: bool,
    pub reconciler: bool,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_start = std::time::Instant::now();
    let connected = match &state.db {
        Some(db) => db.health_check().await.is_ok(),
        None => false,
    };
    let db_status = DatabaseStatus {
        connected,
        latency_ms: connected.then(|| db_start.elapsed().as_millis() as u64),
    };

    let services = ServiceFlags {
        admin: state.admin.is_some(),
        scraper: state.db.is_some() && state.config.scraper.enabled,
        reconciler: state.db.is_some() && state.config.reconciler.enabled,
    };

    Json(HealthResponse {
        status: if db_status.connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status,
        services,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}
