//! Ban Status Reconciler
//!
//! `players.is_banned`와 기록 아카이브 상태를 bans 테이블에 맞춤
//!
//! # Invariant
//!
//! 한 번의 pass가 끝나면, 다룬 모든 플레이어에 대해:
//! - `is_banned == 활성 밴 존재`
//! - `아카이브됨 == 활성 영구 밴 존재`
//!
//! 영구 밴 = `expires_on`이 sentinel(9999-12-31) 이상. `NULL` 만료는 활성이지만
//! 영구가 아니므로 플래그만 켜고 기록은 옮기지 않음.
//!
//! # Flow
//!
//! ```text
//! players ─chunk(500)─> active_bans ─┬─> set_banned(true / false)
//!                                     ├─> permanent → archive_records
//!                                     └─> 나머지 중 아카이브 보유 → restore_records
//! ```

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use super::RunGuard;
use crate::config::ReconcilerSettings;
use crate::db::{ArchiveOutcome, BanRepository};
use crate::error::StoreError;

/// reconcile pass 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: u64,
    pub flagged: u64,
    pub unflagged: u64,
    pub archived_players: u64,
    pub archived_records: u64,
    pub already_archived: u64,
    pub restored_players: u64,
    pub restored_records: u64,
    pub errors: u64,
}

pub struct BanReconciler {
    settings: ReconcilerSettings,
    bans: Arc<dyn BanRepository>,
    storage_retry: RetryPolicy,
    sweeping: AtomicBool,
    /// 마지막 sweep 시작 시각
    last_sweep: Mutex<Option<Instant>>,
    last_report: Mutex<Option<ReconcileReport>>,
}

impl BanReconciler {
    pub fn new(settings: ReconcilerSettings, bans: Arc<dyn BanRepository>) -> Self {
        Self::with_retry(settings, bans, RetryPolicy::storage())
    }

    pub fn with_retry(
        settings: ReconcilerSettings,
        bans: Arc<dyn BanRepository>,
        storage_retry: RetryPolicy,
    ) -> Self {
        Self {
            settings,
            bans,
            storage_retry,
            sweeping: AtomicBool::new(false),
            last_sweep: Mutex::new(None),
            last_report: Mutex::new(None),
        }
    }

    /// 가장 최근 pass 결과 (ingestion / sweep 구분 없음)
    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 주어진 플레이어들의 파생 상태 재계산
    ///
    /// chunk 하나가 실패해도 나머지 chunk는 계속 처리 (`errors` 증가)
    pub async fn reconcile_players(&self, players: &[i64]) -> ReconcileReport {
        let mut unique: Vec<i64> = players.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let mut report = ReconcileReport::default();
        for chunk in unique.chunks(self.settings.chunk_size.max(1)) {
            if let Err(e) = self.reconcile_chunk(chunk, &mut report).await {
                report.errors += 1;
                warn!(chunk_len = chunk.len(), error = %e, "reconcile chunk failed");
            }
        }

        debug!(?report, "reconcile pass finished");
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report.clone());
        report
    }

    async fn reconcile_chunk(&self, chunk: &[i64], report: &mut ReconcileReport) -> Result<(), StoreError> {
        let now = Utc::now();
        let bans = &self.bans;
        let retry = &self.storage_retry;

        let active = retry
            .run("active_bans", StoreError::is_contention, || bans.active_bans(chunk, now))
            .await?;
        report.checked += chunk.len() as u64;

        let mut banned = HashSet::new();
        // player → 가장 작은 영구 밴 id (아카이브 태그)
        let mut permanent: BTreeMap<i64, i64> = BTreeMap::new();
        for ban in &active {
            banned.insert(ban.player_id);
            if ban.is_permanent() {
                permanent.entry(ban.player_id).or_insert(ban.id);
            }
        }

        let (flag, unflag): (Vec<i64>, Vec<i64>) = chunk.iter().partition(|p| banned.contains(*p));
        report.flagged += retry
            .run("set_banned", StoreError::is_contention, || bans.set_banned(&flag, true))
            .await?;
        report.unflagged += retry
            .run("set_banned", StoreError::is_contention, || bans.set_banned(&unflag, false))
            .await?;

        for (&player, &ban_id) in &permanent {
            let outcome = retry
                .run("archive_records", StoreError::is_contention, || {
                    bans.archive_records(player, ban_id)
                })
                .await;
            match outcome {
                Ok(ArchiveOutcome::Archived(n)) => {
                    info!(player, ban_id, records = n, "archived records of permanently banned player");
                    report.archived_players += 1;
                    report.archived_records += n;
                }
                Ok(ArchiveOutcome::AlreadyArchived) => report.already_archived += 1,
                Ok(ArchiveOutcome::NothingToArchive) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!(player, ban_id, error = %e, "archive failed");
                }
            }
        }

        let candidates: Vec<i64> = chunk
            .iter()
            .copied()
            .filter(|p| !permanent.contains_key(p))
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }
        let holders = retry
            .run("players_with_archives", StoreError::is_contention, || {
                bans.players_with_archives(&candidates)
            })
            .await?;

        for player in holders {
            let outcome = retry
                .run("restore_records", StoreError::is_contention, || bans.restore_records(player))
                .await;
            match outcome {
                Ok(0) => {}
                Ok(n) => {
                    info!(player, records = n, "restored archived records");
                    report.restored_players += 1;
                    report.restored_records += n;
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(player, error = %e, "restore failed");
                }
            }
        }

        Ok(())
    }

    /// 주기적 전체 재검증
    ///
    /// 이미 실행 중이거나 직전 sweep 시작 후 주기가 지나지 않았으면 `None` (no-op)
    pub async fn sweep(&self) -> Option<ReconcileReport> {
        let due = self
            .last_sweep
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map_or(true, |at| at.elapsed() >= self.settings.sweep_interval);
        if !due {
            return None;
        }
        self.sweep_pass().await
    }

    /// `run`의 ticker가 호출. 주기는 ticker가 정하므로 중복 실행만 막음
    async fn sweep_pass(&self) -> Option<ReconcileReport> {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            debug!("sweep already running, skipping");
            return None;
        }
        let _guard = RunGuard(&self.sweeping);
        *self
            .last_sweep
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());

        let bans = &self.bans;
        let players = match self
            .storage_retry
            .run("flagged_players", StoreError::is_contention, || bans.flagged_players())
            .await
        {
            Ok(players) => players,
            Err(e) => {
                warn!(error = %e, "sweep could not load flagged players");
                return None;
            }
        };

        let report = self.reconcile_players(&players).await;

        info!(
            checked = report.checked,
            unflagged = report.unflagged,
            restored = report.restored_players,
            errors = report.errors,
            "ban sweep finished"
        );
        Some(report)
    }

    /// sweep 루프
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.settings.sweep_interval.as_secs(), "ban reconciler started");
        let mut ticker = tokio::time::interval(self.settings.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_pass().await;
        }
    }
}
