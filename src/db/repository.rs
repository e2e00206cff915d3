//! Repository Pattern Implementation
//!
//! 서브시스템(Scraper, Reconciler, Quarantine Engine)은 `Database`를 직접
//! 참조하지 않고 아래 trait에만 의존함.
//!
//! - PostgreSQL 구현: `db/records.rs`, `db/bans.rs`, `db/quarantine.rs`
//! - 테스트용 Mock: 이 파일의 `mock` 모듈 (in-memory, 경합 주입 가능)
//!
//! 재시도는 repository가 아니라 호출하는 서비스의 `RetryPolicy`가 담당함.
//! repository 메서드 하나 = 트랜잭션 하나 (all-or-nothing)

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    ActiveBan, ArchiveOutcome, CacheUpdate, FilterRunLog, InsertOutcome, NewBan, NewRecord,
    Provenance, QuarantinedRecord, RestoreOutcome,
};
use crate::error::StoreError;
use crate::services::quarantine::query::Predicate;
use crate::types::GameVariant;

/// Record Scraper가 사용하는 저장소
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// 저장된 기록 중 가장 큰 Global API id (checkpoint fallback)
    async fn max_original_id(&self) -> Result<Option<i64>, StoreError>;

    /// batch 전체를 한 트랜잭션으로 insert-if-absent. 입력 순서대로 결과 반환
    async fn insert_records(&self, records: &[NewRecord]) -> Result<Vec<InsertOutcome>, StoreError>;

    /// 개인 기록 / 맵 기록 캐시를 "더 빠를 때만" 갱신
    async fn update_best_caches(
        &self,
        record_id: i64,
        record: &NewRecord,
    ) -> Result<CacheUpdate, StoreError>;
}

/// Ban Status Reconciler가 사용하는 저장소
#[async_trait]
pub trait BanRepository: Send + Sync {
    /// 밴 upsert (플레이어는 필요 시 생성). 처리한 행 수 반환
    async fn upsert_bans(&self, bans: &[NewBan]) -> Result<u64, StoreError>;

    /// `players` 중 `now` 기준 활성 밴 목록
    async fn active_bans(
        &self,
        players: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ActiveBan>, StoreError>;

    /// 현재 값과 다른 플레이어만 갱신. 실제로 바뀐 행 수 반환
    async fn set_banned(&self, players: &[i64], banned: bool) -> Result<u64, StoreError>;

    /// `players` 중 아카이브된 기록을 가진 플레이어
    async fn players_with_archives(&self, players: &[i64]) -> Result<Vec<i64>, StoreError>;

    /// sweep 대상: banned 플래그가 켜져 있거나 아카이브된 기록이 있는 플레이어
    async fn flagged_players(&self) -> Result<Vec<i64>, StoreError>;

    /// 플레이어의 활성 기록을 아카이브로 이동
    async fn archive_records(&self, player_id: i64, ban_id: i64) -> Result<ArchiveOutcome, StoreError>;

    /// 아카이브된 기록을 활성 테이블로 복원. 복원된 행 수 반환
    async fn restore_records(&self, player_id: i64) -> Result<u64, StoreError>;
}

/// Quarantine Filter Engine이 사용하는 저장소
#[async_trait]
pub trait QuarantineRepository: Send + Sync {
    async fn count_matches(&self, variant: GameVariant, predicate: &Predicate) -> Result<i64, StoreError>;

    /// 매칭 행을 quarantine으로 복사 후 활성 테이블에서 삭제 (단일 트랜잭션)
    async fn quarantine_matches(
        &self,
        variant: GameVariant,
        predicate: &Predicate,
        provenance: &Provenance,
    ) -> Result<u64, StoreError>;

    async fn restore_one(&self, variant: GameVariant, record_id: i64) -> Result<RestoreOutcome, StoreError>;

    async fn restore_all(&self, variant: GameVariant, filter_id: Option<&str>) -> Result<u64, StoreError>;

    async fn list_quarantined(
        &self,
        variant: GameVariant,
        filter_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QuarantinedRecord>, StoreError>;

    /// filter_id별 격리 건수
    async fn quarantine_counts(&self, variant: GameVariant) -> Result<Vec<(String, i64)>, StoreError>;

    async fn log_run(&self, log: &FilterRunLog) -> Result<(), StoreError>;
}
