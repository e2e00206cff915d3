//! Error Handling Module
//!
//! Provides type-safe error handling for the storage layer and the operator
//! control surface. Uses thiserror for domain errors and integrates with
//! tracing for structured logging.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// PostgreSQL lock 경합 SQLSTATE
///
/// - `40001`: serialization_failure
/// - `40P01`: deadlock_detected
/// - `55P03`: lock_not_available (`lock_timeout` 초과 포함)
const CONTENTION_CODES: [&str; 3] = ["40001", "40P01", "55P03"];

/// 저장소 에러
///
/// # Design Decision
///
/// `From<sqlx::Error>` 변환 시점에 lock 경합을 `Contention`으로 분류
/// - 재시도 판단을 호출부가 아닌 경계(boundary)에서 한 번만 수행
/// - mock repository도 `Contention`을 직접 만들어 재시도 경로 테스트 가능
#[derive(Debug, Error)]
pub enum StoreError {
    /// 재시도 가능한 lock 경합 / lock wait timeout
    #[error("lock contention: {0}")]
    Contention(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// 트랜잭션 내부 검증 실패 (복사 행 수 != 삭제 행 수 등)
    #[error("consistency check failed: {0}")]
    Inconsistent(String),
}

impl StoreError {
    /// 재시도 정책에서 사용하는 판별 함수
    pub fn is_contention(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let contended = db_err
                    .code()
                    .map(|code| CONTENTION_CODES.contains(&code.as_ref()))
                    .unwrap_or(false);
                if contended {
                    return StoreError::Contention(db_err.message().to_string());
                }
            }
            sqlx::Error::PoolTimedOut => {
                return StoreError::Contention("connection pool timed out".to_string());
            }
            _ => {}
        }
        StoreError::Database(err)
    }
}

/// API 에러 타입
///
/// 운영자 제어 엔드포인트 전용. 각 variant는 HTTP 상태 코드에 매핑됨
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 422 Unprocessable Entity ============
    #[error("Filter configuration error: {0}")]
    FilterConfig(String),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ============ 503 Service Unavailable ============
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),
            ApiError::FilterConfig(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "FILTER_CONFIG_ERROR",
                "Filter configuration could not be loaded".to_string(),
                Some(msg.clone()),
            ),
            ApiError::DatabaseError(_) => {
                // 내부 에러는 클라이언트에 상세 정보 노출 안 함
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                format!("{} is currently unavailable", service),
                None,
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Store error: {:?}", err);
        match err {
            StoreError::Contention(_) => ApiError::ServiceUnavailable("Database".to_string()),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_contention() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_contention());
    }

    #[test]
    fn test_row_not_found_is_not_contention() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_contention());
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn test_contention_maps_to_service_unavailable() {
        let api: ApiError = StoreError::Contention("deadlock".into()).into();
        let response = api.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_filter_config_maps_to_422() {
        let response = ApiError::FilterConfig("bad json".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
