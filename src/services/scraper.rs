//! Record Scraper
//!
//! Global API의 단조 증가 record ID 공간을 batch 단위로 순회하며 기록을 수집
//!
//! # Batch Flow
//!
//! ```text
//! next_id ──> [next_id, next_id + batch_size) 순차 조회
//!               │  Found      → insert 대기열
//!               │  NotFound   → not_found
//!               │  Throttled  → cooldown 후 같은 ID 재시도 (throttle_attempts)
//!               │  Transient  → backoff 재시도 (fetch_attempts)
//!               ▼
//!          insert_records (한 트랜잭션, 경합 시 재시도)
//!               ▼
//!          신규 기록만 best cache 갱신 (실패해도 insert 유지)
//!               ▼
//!          cursor 이동 + checkpoint 저장
//! ```
//!
//! # Progress Rule
//!
//! 새로 insert된 기록이 없고 `last_ingested_id` 이후의 기록도 못 찾았으면
//! `next_id = last_ingested_id`로 되돌리고 idle 간격으로 대기.
//! 그 외에는 `next_id += batch_size`.
//!
//! 되감은 batch는 `last_ingested_id` 자체를 다시 읽으므로 Duplicate 하나가
//! 섞여도 idle로 판정됨.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::checkpoint::{Checkpoint, CheckpointStore, CounterSnapshot};
use super::reconciler::{BanReconciler, ReconcileReport};
use super::remote::{BanPage, FetchError, RecordSource};
use super::retry::RetryPolicy;
use super::RunGuard;
use crate::config::ScraperSettings;
use crate::db::{BanRepository, InsertOutcome, NewBan, NewRecord, RecordRepository};
use crate::error::StoreError;

/// 운영자에게 보여줄 최근 실패 ID 개수
const RECENT_ERRORS: usize = 50;

/// 수집 카운터 (주입 가능, 프로세스 전체 공유)
#[derive(Debug, Default)]
pub struct ScrapeStats {
    processed: AtomicU64,
    inserted: AtomicU64,
    skipped: AtomicU64,
    not_found: AtomicU64,
    errored: AtomicU64,
    batches: AtomicU64,
    idle_polls: AtomicU64,
    recent_errors: Mutex<VecDeque<i64>>,
}

impl ScrapeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
        }
    }

    /// checkpoint에서 누적값 복원
    pub fn restore(&self, from: &CounterSnapshot) {
        self.processed.store(from.processed, Ordering::Relaxed);
        self.inserted.store(from.inserted, Ordering::Relaxed);
        self.skipped.store(from.skipped, Ordering::Relaxed);
        self.not_found.store(from.not_found, Ordering::Relaxed);
        self.errored.store(from.errored, Ordering::Relaxed);
        self.batches.store(from.batches, Ordering::Relaxed);
        self.idle_polls.store(from.idle_polls, Ordering::Relaxed);
    }

    pub fn recent_errors(&self) -> Vec<i64> {
        self.recent_errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .copied()
            .collect()
    }

    fn record_errors(&self, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        self.errored.fetch_add(ids.len() as u64, Ordering::Relaxed);
        let mut recent = self
            .recent_errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in ids {
            if recent.len() == RECENT_ERRORS {
                recent.pop_front();
            }
            recent.push_back(*id);
        }
    }
}

/// batch 하나의 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub first_id: i64,
    pub found: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub not_found: u64,
    pub errored: u64,
    /// insert 트랜잭션이 commit되었는지 (found가 없으면 true)
    pub committed: bool,
    pub idle: bool,
    pub next_id: i64,
    #[serde(skip)]
    pub wait: Duration,
}

#[derive(Debug, Error)]
pub enum BanSyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BanSyncReport {
    pub fetched: u64,
    /// 형식 오류로 건너뛴 항목
    pub invalid: u64,
    pub upserted: u64,
    pub players: u64,
    pub reconcile: ReconcileReport,
}

/// 운영자용 상태
#[derive(Debug, Clone, Serialize)]
pub struct ScraperStatus {
    pub counters: CounterSnapshot,
    pub next_id: i64,
    pub last_ingested_id: Option<i64>,
    pub last_ban_sync: Option<DateTime<Utc>>,
    pub recent_errors: Vec<i64>,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next_id: i64,
    last_ingested_id: Option<i64>,
}

enum Fetched {
    Found(NewRecord),
    NotFound,
    GaveUp,
}

pub struct RecordScraper {
    settings: ScraperSettings,
    source: Arc<dyn RecordSource>,
    records: Arc<dyn RecordRepository>,
    bans: Arc<dyn BanRepository>,
    reconciler: Arc<BanReconciler>,
    checkpoints: CheckpointStore,
    stats: Arc<ScrapeStats>,
    storage_retry: RetryPolicy,
    transient_retry: RetryPolicy,
    throttle_retry: RetryPolicy,
    cursor: AsyncMutex<Cursor>,
    last_ban_sync: Mutex<Option<DateTime<Utc>>>,
    ban_sync_running: AtomicBool,
}

impl RecordScraper {
    /// checkpoint(또는 DB fallback)에서 cursor와 카운터를 복원해 생성
    pub async fn resume(
        settings: ScraperSettings,
        source: Arc<dyn RecordSource>,
        records: Arc<dyn RecordRepository>,
        bans: Arc<dyn BanRepository>,
        reconciler: Arc<BanReconciler>,
        stats: Arc<ScrapeStats>,
    ) -> Result<Self, StoreError> {
        let checkpoints = CheckpointStore::new(settings.checkpoint_path.clone());
        let checkpoint = checkpoints.load_or_derive(records.as_ref()).await?;
        stats.restore(&checkpoint.counters);

        Ok(Self {
            storage_retry: RetryPolicy::storage(),
            transient_retry: RetryPolicy::remote(settings.fetch_attempts),
            throttle_retry: RetryPolicy::throttle(settings.throttle_cooldown, settings.throttle_attempts),
            settings,
            source,
            records,
            bans,
            reconciler,
            checkpoints,
            stats,
            cursor: AsyncMutex::new(Cursor {
                next_id: checkpoint.next_id,
                last_ingested_id: checkpoint.last_ingested_id,
            }),
            last_ban_sync: Mutex::new(checkpoint.last_ban_sync),
            ban_sync_running: AtomicBool::new(false),
        })
    }

    /// 재시도 정책 교체 (테스트에서 대기 시간 제거용)
    pub fn with_retry_policies(mut self, storage: RetryPolicy, transient: RetryPolicy, throttle: RetryPolicy) -> Self {
        self.storage_retry = storage;
        self.transient_retry = transient;
        self.throttle_retry = throttle;
        self
    }

    pub fn stats(&self) -> &Arc<ScrapeStats> {
        &self.stats
    }

    pub async fn status(&self) -> ScraperStatus {
        let cursor = *self.cursor.lock().await;
        ScraperStatus {
            counters: self.stats.snapshot(),
            next_id: cursor.next_id,
            last_ingested_id: cursor.last_ingested_id,
            last_ban_sync: self.last_ban_sync(),
            recent_errors: self.stats.recent_errors(),
        }
    }

    fn last_ban_sync(&self) -> Option<DateTime<Utc>> {
        *self
            .last_ban_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 429 → cooldown 후 같은 ID 재시도, 일시 장애 → backoff 재시도
    async fn fetch_with_retry(&self, id: i64) -> Result<Option<NewRecord>, FetchError> {
        let source = &self.source;
        let transient = &self.transient_retry;

        let fetched = self
            .throttle_retry
            .run_with_hint("fetch_record", FetchError::is_throttled, FetchError::retry_after, move || async move {
                transient
                    .run("fetch_record", FetchError::is_transient, move || async move {
                        source.fetch_record(id).await.into_result()
                    })
                    .await
            })
            .await?;

        Ok(fetched.map(NewRecord::from))
    }

    async fn fetch_one(&self, id: i64) -> Fetched {
        match self.fetch_with_retry(id).await {
            Ok(Some(record)) => Fetched::Found(record),
            Ok(None) => Fetched::NotFound,
            Err(e @ FetchError::Invalid(_)) => {
                warn!(record_id = id, error = %e, "invalid record payload, not retrying");
                Fetched::GaveUp
            }
            Err(e) => {
                warn!(record_id = id, error = %e, "giving up on record for this batch");
                Fetched::GaveUp
            }
        }
    }

    /// batch 하나 실행 (cursor 이동 + checkpoint 저장 포함)
    pub async fn run_batch(&self) -> BatchReport {
        let mut cursor = self.cursor.lock().await;
        let first_id = cursor.next_id;
        let size = i64::from(self.settings.batch_size);

        let mut found = Vec::new();
        let mut not_found = 0u64;
        let mut gave_up = Vec::new();
        for id in first_id..first_id + size {
            match self.fetch_one(id).await {
                Fetched::Found(record) => found.push(record),
                Fetched::NotFound => not_found += 1,
                Fetched::GaveUp => gave_up.push(id),
            }
        }

        let mut report = BatchReport {
            first_id,
            found: found.len() as u64,
            inserted: 0,
            skipped: 0,
            not_found,
            errored: gave_up.len() as u64,
            committed: true,
            idle: false,
            next_id: first_id,
            wait: self.settings.active_interval,
        };

        let previous_last = cursor.last_ingested_id;
        let found_beyond_last = found
            .iter()
            .any(|r| previous_last.map_or(true, |last| r.original_id > last));

        if !found.is_empty() {
            let records = &self.records;
            let batch = &found;
            match self
                .storage_retry
                .run("insert_records", StoreError::is_contention, move || records.insert_records(batch))
                .await
            {
                Ok(outcomes) => {
                    for (record, outcome) in found.iter().zip(outcomes) {
                        match outcome {
                            InsertOutcome::Inserted(local_id) => {
                                report.inserted += 1;
                                self.refresh_caches(local_id, record).await;
                            }
                            InsertOutcome::Duplicate => report.skipped += 1,
                        }
                    }
                    let newest = found.iter().map(|r| r.original_id).max();
                    cursor.last_ingested_id = cursor.last_ingested_id.max(newest);
                }
                Err(e) => {
                    warn!(first_id, records = found.len(), error = %e, "batch insert failed, cursor unchanged");
                    report.committed = false;
                    report.errored += found.len() as u64;
                    gave_up.extend(found.iter().map(|r| r.original_id));
                }
            }
        }

        if report.committed {
            let exhausted = report.inserted == 0 && !found_beyond_last;
            match (exhausted, cursor.last_ingested_id) {
                (true, Some(last)) => {
                    cursor.next_id = last;
                    report.idle = true;
                    report.wait = self.settings.idle_interval;
                }
                _ => cursor.next_id = first_id + size,
            }
        }
        report.next_id = cursor.next_id;

        self.stats.processed.fetch_add(size as u64, Ordering::Relaxed);
        self.stats.inserted.fetch_add(report.inserted, Ordering::Relaxed);
        self.stats.skipped.fetch_add(report.skipped, Ordering::Relaxed);
        self.stats.not_found.fetch_add(report.not_found, Ordering::Relaxed);
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        if report.idle {
            self.stats.idle_polls.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.record_errors(&gave_up);

        let checkpoint = self.checkpoint(&cursor);
        drop(cursor);
        self.save_checkpoint(&checkpoint).await;

        debug!(
            first_id,
            found = report.found,
            inserted = report.inserted,
            skipped = report.skipped,
            not_found = report.not_found,
            errored = report.errored,
            next_id = report.next_id,
            idle = report.idle,
            "batch finished"
        );
        report
    }

    /// 신규 기록만 대상. 실패는 로그만 남김
    async fn refresh_caches(&self, local_id: i64, record: &NewRecord) {
        match self.records.update_best_caches(local_id, record).await {
            Ok(update) if update.map_best => {
                info!(
                    record_id = record.original_id,
                    map_id = record.map_id,
                    mode = %record.mode,
                    time = record.time,
                    "new map record"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(record_id = record.original_id, error = %e, "best cache update failed"),
        }
    }

    fn checkpoint(&self, cursor: &Cursor) -> Checkpoint {
        Checkpoint {
            next_id: cursor.next_id,
            last_ingested_id: cursor.last_ingested_id,
            last_ban_sync: self.last_ban_sync(),
            counters: self.stats.snapshot(),
            updated_on: Utc::now(),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) {
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            warn!(path = %self.checkpoints.path().display(), error = %e, "failed to write checkpoint");
        }
    }

    /// 다음 동기화까지 남은 시간 (checkpoint의 마지막 동기화 기준)
    fn ban_sync_delay(&self, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.last_ban_sync() else {
            return Duration::ZERO;
        };
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.settings.ban_sync_interval.saturating_sub(elapsed)
    }

    /// 최신 밴 목록 동기화 후 해당 플레이어 reconcile
    ///
    /// 실행 중이거나 직전 동기화 시작 후 주기가 지나지 않았으면 `Ok(None)` (no-op)
    pub async fn sync_bans(&self) -> Result<Option<BanSyncReport>, BanSyncError> {
        if self.ban_sync_delay(Utc::now()) > Duration::ZERO {
            return Ok(None);
        }
        self.sync_bans_pass().await
    }

    /// `run`의 ticker가 호출. 주기는 ticker가 정하므로 중복 실행만 막음
    async fn sync_bans_pass(&self) -> Result<Option<BanSyncReport>, BanSyncError> {
        if self.ban_sync_running.swap(true, Ordering::AcqRel) {
            debug!("ban sync already running, skipping");
            return Ok(None);
        }
        let _guard = RunGuard(&self.ban_sync_running);

        let now = Utc::now();

        let source = &self.source;
        let transient = &self.transient_retry;
        let limit = self.settings.ban_page_limit;
        let fetched = self
            .throttle_retry
            .run_with_hint("fetch_bans", FetchError::is_throttled, FetchError::retry_after, move || async move {
                transient
                    .run("fetch_bans", FetchError::is_transient, move || async move {
                        source.fetch_bans(limit, 0).await.into_result()
                    })
                    .await
            })
            .await?
            .unwrap_or_default();

        let BanPage { bans: fetched, invalid } = fetched;
        let bans: Vec<NewBan> = fetched.into_iter().map(NewBan::from).collect();
        let repo = &self.bans;
        let batch = &bans;
        let upserted = self
            .storage_retry
            .run("upsert_bans", StoreError::is_contention, move || repo.upsert_bans(batch))
            .await?;

        let mut players: Vec<i64> = bans.iter().map(|b| b.player_id).collect();
        players.sort_unstable();
        players.dedup();
        let reconcile = self.reconciler.reconcile_players(&players).await;

        *self
            .last_ban_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);
        let checkpoint = {
            let cursor = self.cursor.lock().await;
            self.checkpoint(&cursor)
        };
        self.save_checkpoint(&checkpoint).await;

        let report = BanSyncReport {
            fetched: bans.len() as u64,
            invalid,
            upserted,
            players: players.len() as u64,
            reconcile,
        };
        info!(
            fetched = report.fetched,
            invalid = report.invalid,
            players = report.players,
            flagged = report.reconcile.flagged,
            archived = report.reconcile.archived_players,
            "ban sync finished"
        );
        Ok(Some(report))
    }

    /// 수집 루프 (bans 동기화는 별도 task로 병행)
    pub async fn run(self: Arc<Self>) {
        info!(
            batch_size = self.settings.batch_size,
            checkpoint = %self.checkpoints.path().display(),
            "record scraper started"
        );

        let bans = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + bans.ban_sync_delay(Utc::now());
            let mut ticker = tokio::time::interval_at(start, bans.settings.ban_sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = bans.sync_bans_pass().await {
                    warn!(error = %e, "ban sync failed");
                }
            }
        });

        loop {
            let report = self.run_batch().await;
            tokio::time::sleep(report.wait).await;
        }
    }
}
