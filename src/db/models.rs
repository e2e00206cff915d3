//! Database Models
//!
//! Global API에서 수집한 기록/밴과 파생 상태(캐시, 아카이브, quarantine)의 모델

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// 영구 밴 sentinel: Global API는 영구 밴의 `expires_on`을 9999-12-31로 내려줌
///
/// `NULL`은 "지정되지 않음"이며 영구가 아님. 이 구분은 아카이브 여부를 결정함
pub fn permanent_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// 만료 시각이 sentinel 이상이면 영구 밴
pub fn is_permanent(expires_on: Option<DateTime<Utc>>) -> bool {
    matches!(expires_on, Some(at) if at >= permanent_sentinel())
}

/// 만료 시각이 없거나 미래이면 활성
pub fn is_active(expires_on: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_on {
        None => true,
        Some(at) => at > now,
    }
}

/// 수집 대상 기록 (Global API → DB insert 직전 형태)
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Global API record id (idempotency key)
    pub original_id: i64,
    pub player_id: i64,
    pub player_name: String,
    pub map_id: i64,
    pub map_name: String,
    pub server_id: i64,
    pub server_name: String,
    /// kz_timer | kz_simple | kz_vanilla
    pub mode: String,
    pub stage: i32,
    pub tickrate: i32,
    /// 초 단위
    pub time: f64,
    pub teleports: i32,
    pub points: i32,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

impl NewRecord {
    /// TP / PRO 카테고리 구분
    pub fn has_teleports(&self) -> bool {
        self.teleports > 0
    }
}

/// 저장된 기록
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Record {
    pub id: i64,
    pub original_id: i64,
    pub player_id: i64,
    pub map_id: i64,
    pub server_id: i64,
    pub mode: String,
    pub stage: i32,
    pub tickrate: i32,
    pub time: f64,
    pub teleports: i32,
    pub points: i32,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// insert-if-absent 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 새로 저장됨 (로컬 id)
    Inserted(i64),
    /// 같은 original_id가 이미 존재
    Duplicate,
}

/// 개인 기록 / 맵 기록 캐시 갱신 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUpdate {
    pub personal_best: bool,
    pub map_best: bool,
}

/// 수집 대상 밴
#[derive(Debug, Clone, PartialEq)]
pub struct NewBan {
    pub id: i64,
    pub player_id: i64,
    pub player_name: Option<String>,
    pub ban_type: String,
    pub expires_on: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub server_id: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// 활성 밴 조회 결과 (reconcile 입력)
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ActiveBan {
    pub id: i64,
    pub player_id: i64,
    pub expires_on: Option<DateTime<Utc>>,
}

impl ActiveBan {
    pub fn is_permanent(&self) -> bool {
        is_permanent(self.expires_on)
    }
}

/// 아카이브 시도 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// n개 기록을 새로 옮김
    Archived(u64),
    /// 옮길 기록은 없지만 이미 아카이브된 기록이 있음
    AlreadyArchived,
    /// 기록 자체가 없음
    NothingToArchive,
}

/// Quarantine 출처 정보 (provenance)
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub filter_id: String,
    pub filter_name: String,
    /// 직렬화된 조건 목록
    pub filter_conditions: serde_json::Value,
    /// 실행한 운영자
    pub quarantined_by: String,
    pub run_id: Uuid,
}

/// 격리된 기록 (원본 컬럼은 JSON으로 보존)
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuarantinedRecord {
    pub id: i64,
    pub filter_id: String,
    pub filter_name: String,
    pub filter_conditions: serde_json::Value,
    pub quarantined_by: String,
    pub quarantined_on: DateTime<Utc>,
    pub run_id: Uuid,
    /// 원본 행 (provenance 컬럼 제외)
    pub record: serde_json::Value,
}

/// 단건 복원 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored,
    NotFound,
}

/// 필터 실행 감사 로그
#[derive(Debug, Clone, Serialize)]
pub struct FilterRunLog {
    pub run_id: Uuid,
    pub filter_id: String,
    pub variant: String,
    pub dry_run: bool,
    pub matched: i64,
    pub moved: i64,
    pub operator: String,
    pub started_on: DateTime<Utc>,
    pub finished_on: DateTime<Utc>,
    pub error: Option<String>,
}
