//! API Routes Module
//!
//! 운영자 제어 엔드포인트 정의
//!
//! # Routes
//! - `/health` - 헬스 체크 (DB 없이도 응답)
//! - `/admin/filters` - 격리 규칙 조회
//! - `/admin/quarantine/*` - 격리 실행 / 조회 / 복원
//! - `/admin/stats` - scraper / reconciler / 격리 현황

pub mod admin;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health                                - 서버 상태 확인
///
/// GET  /admin/filters?game=                   - 규칙 + 설정 오류
/// POST /admin/quarantine/run                  - dry-run / 격리 실행
/// POST /admin/quarantine/restore              - 일괄 복원
/// GET  /admin/quarantine/:game                - 격리 기록 목록
/// POST /admin/quarantine/:game/:id/restore    - 단건 복원
/// GET  /admin/stats                           - 카운터 / 최근 reconcile
/// ```
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/admin/filters", get(admin::get_filters))
        .route("/admin/quarantine/run", post(admin::trigger_run))
        .route("/admin/quarantine/restore", post(admin::restore_all))
        .route("/admin/quarantine/:game", get(admin::list_quarantined))
        .route("/admin/quarantine/:game/:id/restore", post(admin::restore_one))
        .route("/admin/stats", get(admin::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    fn degraded_router() -> Router {
        create_router(AppState::degraded(Arc::new(Config::from_env().unwrap())))
    }

    #[tokio::test]
    async fn test_health_served_without_database() {
        let response = degraded_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_unavailable_without_database() {
        let response = degraded_router()
            .oneshot(Request::builder().uri("/admin/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
