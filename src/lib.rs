//! KZ Records Ingestion Core
//!
//! # Overview
//!
//! KZ 스피드런 기록을 외부 Global API에서 수집하고, ban 상태와 운영자 규칙에
//! 맞춰 파생 상태(플래그, 아카이브, 격리)를 정리하는 백엔드 라이브러리
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      Ingestion Core                      │
//! │                                                          │
//! │  ┌──────────┐  ┌────────────┐  ┌──────────────────┐     │
//! │  │ Scraper  │─▶│ Reconciler │  │ Quarantine Engine│     │
//! │  └────┬─────┘  └─────┬──────┘  └────────┬─────────┘     │
//! │       │              │                  │               │
//! │       └──────────────┴────────┬─────────┘               │
//! │                               │                         │
//! │            Retry · Checkpoint · Remote · DB             │
//! └───────────────────────────────┼─────────────────────────┘
//!                                 │
//!                ┌────────────────┴───────────────┐
//!                ▼                                ▼
//!        ┌──────────────┐                 ┌──────────────┐
//!        │  PostgreSQL  │                 │  Global API  │
//!        └──────────────┘                 └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: 운영자 HTTP 엔드포인트
//! - `services`: Scraper, Reconciler, Quarantine Engine, 공용 primitive
//! - `db`: PostgreSQL 저장소 + repository trait
//! - `types`: 공통 타입 정의
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kz_records_core::{config::Config, db::Database};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::connect(&config.database_url, config.db_lock_timeout_ms).await?;
//!     db.run_migrations().await?;
//!
//!     // ... 서비스 구성 후 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::ApiError;
pub use services::{AdminService, BanReconciler, QuarantineEngine, RecordScraper};

/// 애플리케이션 전역 상태
///
/// DB 연결에 실패하면 `db`와 `admin`이 비어 있는 상태로 `/health`만 응답
#[derive(Clone)]
pub struct AppState {
    pub db: Option<Arc<Database>>,
    pub admin: Option<Arc<AdminService>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Arc<Database>, admin: Arc<AdminService>, config: Arc<Config>) -> Self {
        Self {
            db: Some(db),
            admin: Some(admin),
            config,
        }
    }

    /// 저장소 없이 기동 (수집 서비스 미시작)
    pub fn degraded(config: Arc<Config>) -> Self {
        Self {
            db: None,
            admin: None,
            config,
        }
    }
}
