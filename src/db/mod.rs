//! Database Module
//!
//! # Tables
//!
//! ```text
//! players ─┬─< records ──────────── (archive) ──> archived_records
//!          ├─< bans                                  (ban_id tag)
//!          ├─< player_bests / map_bests   (파생 캐시, 더 빠를 때만 갱신)
//! maps ────┤
//! servers ─┘
//!
//! {csgo,cs2,css}_jumpstats ── (quarantine) ──> {variant}_jumpstats_quarantine
//!                                               (filter provenance)
//! filter_runs                  (필터 실행 감사 로그)
//! ```
//!
//! # Design Decision
//!
//! 모든 쓰기는 두 가지 패턴만 사용:
//! 1. idempotent upsert: `ON CONFLICT DO NOTHING` / `DO UPDATE`
//! 2. relocate: `WITH moved AS (DELETE ... RETURNING *) INSERT ... SELECT`
//!    (한 문장 = 원자적 이동, 행 내용 그대로 보존)
//!
//! 트랜잭션마다 `SET LOCAL lock_timeout`을 걸어 lock 대기를 제한하고,
//! 초과 시 `StoreError::Contention`으로 분류되어 서비스 쪽에서 재시도함.

mod bans;
mod lookup;
mod models;
mod quarantine;
mod records;
mod repository;

pub use lookup::{LookupCache, LookupKind};
pub use models::*;
pub use repository::{BanRepository, QuarantineRepository, RecordRepository};

#[cfg(test)]
pub use repository::mock;

use std::sync::Arc;
use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};

use crate::error::StoreError;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
    lookup: Arc<LookupCache>,
    lock_timeout_ms: u64,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10 (scraper + reconciler + admin 요청)
    /// - min_connections: 1
    /// - acquire_timeout: 3초
    pub async fn connect(database_url: &str, lock_timeout_ms: u64) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self::with_pool(pool, Arc::new(LookupCache::new()), lock_timeout_ms))
    }

    /// 이미 만들어진 pool과 캐시로 구성 (캐시는 외부에서 주입)
    pub fn with_pool(pool: PgPool, lookup: Arc<LookupCache>, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lookup,
            lock_timeout_ms,
        }
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// lock_timeout이 설정된 트랜잭션 시작
    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await?;
        // SET은 파라미터 바인딩 불가, 정수만 포맷
        sqlx::query(&format!("SET LOCAL lock_timeout = {}", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}
