//! Scrape Checkpoint Store
//!
//! scraper 진행 상태를 JSON 파일로 보존 (crash recovery)
//!
//! # Design Decision
//!
//! - 쓰기: 임시 파일에 기록 후 rename → 부분 기록된 파일이 남지 않음
//! - 읽기: 파일이 없거나 깨져 있으면 `None` (warn 로그)
//! - fallback: 저장된 기록 중 최대 `original_id`, 테이블이 비어 있으면 1

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::RecordRepository;
use crate::error::StoreError;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// 누적 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterSnapshot {
    pub processed: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub not_found: u64,
    pub errored: u64,
    pub batches: u64,
    pub idle_polls: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// 다음 batch의 첫 ID
    pub next_id: i64,
    #[serde(default)]
    pub last_ingested_id: Option<i64>,
    #[serde(default)]
    pub last_ban_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub counters: CounterSnapshot,
    pub updated_on: DateTime<Utc>,
}

impl Checkpoint {
    pub fn starting_at(next_id: i64) -> Self {
        Self {
            next_id,
            last_ingested_id: None,
            last_ban_sync: None,
            counters: CounterSnapshot::default(),
            updated_on: Utc::now(),
        }
    }
}

pub struct CheckpointStore {
    path: PathBuf,
    /// 수집 루프와 bans task가 같은 임시 파일을 쓰지 않도록 직렬화
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일이 없거나 파싱 실패 시 `None`
    pub async fn load(&self) -> Option<Checkpoint> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read checkpoint");
                return None;
            }
        };

        match serde_json::from_str::<Checkpoint>(&raw) {
            Ok(cp) if cp.next_id >= 1 => Some(cp),
            Ok(cp) => {
                warn!(path = %self.path.display(), next_id = cp.next_id, "ignoring checkpoint with invalid cursor");
                None
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt checkpoint, ignoring");
                None
            }
        }
    }

    /// 임시 파일 + rename
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let _lock = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// checkpoint 우선, 없으면 DB에서 cursor 유도
    pub async fn load_or_derive<R>(&self, records: &R) -> Result<Checkpoint, StoreError>
    where
        R: RecordRepository + ?Sized,
    {
        if let Some(cp) = self.load().await {
            info!(next_id = cp.next_id, "resuming from checkpoint");
            return Ok(cp);
        }

        let max = records.max_original_id().await?;
        let mut cp = Checkpoint::starting_at(max.unwrap_or(1).max(1));
        cp.last_ingested_id = max;
        info!(next_id = cp.next_id, "no usable checkpoint, derived cursor from store");
        Ok(cp)
    }
}
