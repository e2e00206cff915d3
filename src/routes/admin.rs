//! Operator Control Endpoints
//!
//! `AdminService`를 HTTP로 노출. 요청 검증과 variant 파싱만 담당하고
//! 나머지는 서비스 레이어에 위임

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    db::QuarantinedRecord,
    error::ApiError,
    services::admin::{AdminService, RestoreResult, ServiceStats},
    services::quarantine::{FilterListing, RunSummary, VariantRestore},
    types::{ApiResponse, GameVariant, VariantTarget},
    AppState,
};

// ============ Request Types ============

/// POST /admin/quarantine/run
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// `csgo` | `cs2` | `css` | `all` (기본값 all)
    pub game: Option<String>,
    pub filter_id: Option<String>,
    /// 생략하면 dry-run
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
    pub operator: String,
}

/// POST /admin/quarantine/restore
#[derive(Debug, Deserialize)]
pub struct RestoreAllRequest {
    pub game: Option<String>,
    pub filter_id: Option<String>,
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct OperatorBody {
    pub operator: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub filter_id: Option<String>,
    /// 기본 50
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TargetQuery {
    pub game: Option<String>,
}

fn default_dry_run() -> bool {
    true
}

// ============ Handlers ============

/// GET /admin/filters?game=cs2
pub async fn get_filters(
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> Result<Json<ApiResponse<FilterListing>>, ApiError> {
    let admin = admin(&state)?;
    let target = parse_target(query.game.as_deref())?;
    Ok(Json(ApiResponse::success(admin.get_filters(target)?)))
}

/// POST /admin/quarantine/run
///
/// # Request
///
/// ```json
/// { "game": "cs2", "filter_id": "cs2-long-lj", "dry_run": false, "operator": "alice" }
/// ```
pub async fn trigger_run(
    State(state): State<AppState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<ApiResponse<RunSummary>>, ApiError> {
    let admin = admin(&state)?;
    let target = parse_target(req.game.as_deref())?;
    let summary = admin
        .trigger_run(target, req.filter_id.as_deref(), req.dry_run, &req.operator)
        .await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// GET /admin/quarantine/:game?filter_id=&limit=&offset=
pub async fn list_quarantined(
    State(state): State<AppState>,
    Path(game): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<QuarantinedRecord>>>, ApiError> {
    let admin = admin(&state)?;
    let variant = parse_variant(&game)?;
    let records = admin
        .list_quarantined(
            variant,
            query.filter_id.as_deref(),
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(ApiResponse::success(records)))
}

/// POST /admin/quarantine/:game/:id/restore
pub async fn restore_one(
    State(state): State<AppState>,
    Path((game, id)): Path<(String, i64)>,
    Json(body): Json<OperatorBody>,
) -> Result<Json<ApiResponse<RestoreResult>>, ApiError> {
    let admin = admin(&state)?;
    let variant = parse_variant(&game)?;
    let result = admin.restore_one(variant, id, &body.operator).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// POST /admin/quarantine/restore
pub async fn restore_all(
    State(state): State<AppState>,
    Json(req): Json<RestoreAllRequest>,
) -> Result<Json<ApiResponse<Vec<VariantRestore>>>, ApiError> {
    let admin = admin(&state)?;
    let target = parse_target(req.game.as_deref())?;
    let restored = admin
        .restore_all(target, req.filter_id.as_deref(), &req.operator)
        .await?;
    Ok(Json(ApiResponse::success(restored)))
}

/// GET /admin/stats
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<ApiResponse<ServiceStats>>, ApiError> {
    let admin = admin(&state)?;
    Ok(Json(ApiResponse::success(admin.get_stats().await?)))
}

// ============ Helpers ============

/// DB 없이 기동된 경우 관리 기능 비활성
fn admin(state: &AppState) -> Result<&Arc<AdminService>, ApiError> {
    state
        .admin
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Admin service".to_string()))
}

fn parse_target(raw: Option<&str>) -> Result<VariantTarget, ApiError> {
    raw.map_or(Ok(VariantTarget::All), |s| s.parse().map_err(ApiError::BadRequest))
}

fn parse_variant(raw: &str) -> Result<GameVariant, ApiError> {
    raw.parse().map_err(ApiError::BadRequest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target(None).unwrap(), VariantTarget::All);
        assert_eq!(parse_target(Some("cs2")).unwrap(), VariantTarget::One(GameVariant::Cs2));
        assert!(matches!(parse_target(Some("tf2")), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_run_request_defaults_to_dry_run() {
        let req: RunRequest = serde_json::from_str(r#"{ "operator": "alice" }"#).unwrap();
        assert!(req.dry_run);
        assert!(req.game.is_none());
    }

    #[tokio::test]
    async fn test_admin_unavailable_without_database() {
        let state = AppState::degraded(Arc::new(Config::from_env().unwrap()));
        let result = get_stats(State(state)).await;
        assert!(matches!(result, Err(ApiError::ServiceUnavailable(_))));
    }
}
