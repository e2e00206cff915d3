//! Quarantine Filter Engine
//!
//! 규칙별 dry-run 집계와 실제 격리(이동), 격리 해제를 담당
//!
//! # Execution
//!
//! ```text
//! load filters (매 호출)
//!   └─ variant × 규칙 (priority desc, id asc)
//!        ├─ compile → 실패 시 해당 variant에서만 제외
//!        ├─ COUNT(*)                        (dry-run은 여기서 끝)
//!        ├─ copy → quarantine (run_id)      ┐ 한 트랜잭션
//!        ├─ delete WHERE id IN run_id rows  ┘ copied == deleted 검증
//!        └─ filter_runs 감사 로그 (best effort)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::fields::schema;
use super::filter::{FilterConfigError, FilterSet, QuarantineFilter, RejectedFilter};
use super::query::compile;
use crate::db::{FilterRunLog, Provenance, QuarantineRepository, QuarantinedRecord, RestoreOutcome};
use crate::error::StoreError;
use crate::services::retry::RetryPolicy;
use crate::types::{GameVariant, VariantTarget};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] FilterConfigError),

    #[error("unknown or disabled filter `{0}`")]
    UnknownFilter(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 규칙 하나 × variant 하나의 실행 결과
#[derive(Debug, Clone, Serialize)]
pub struct FilterRunResult {
    pub filter_id: String,
    pub filter_name: String,
    pub variant: GameVariant,
    pub run_id: Uuid,
    pub dry_run: bool,
    pub matched: i64,
    pub moved: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub results: Vec<FilterRunResult>,
    pub total_matched: i64,
    pub total_moved: u64,
    /// 활성화 상태로 제외된 규칙
    pub config_errors: Vec<RejectedFilter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantRestore {
    pub variant: GameVariant,
    pub restored: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantCounts {
    pub variant: GameVariant,
    pub total: i64,
    pub by_filter: Vec<FilterCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterCount {
    pub filter_id: String,
    pub count: i64,
}

/// variant 대상에 적용 가능한 규칙 목록 + 설정 오류
#[derive(Debug, Clone, Serialize)]
pub struct FilterListing {
    pub filters: Vec<QuarantineFilter>,
    pub config_errors: Vec<RejectedFilter>,
}

pub struct QuarantineEngine {
    repo: Arc<dyn QuarantineRepository>,
    filters_path: PathBuf,
    storage_retry: RetryPolicy,
}

impl QuarantineEngine {
    pub fn new(repo: Arc<dyn QuarantineRepository>, filters_path: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            filters_path: filters_path.into(),
            storage_retry: RetryPolicy::storage(),
        }
    }

    pub fn with_retry(mut self, storage_retry: RetryPolicy) -> Self {
        self.storage_retry = storage_retry;
        self
    }

    /// 캐시하지 않음: 문서 수정은 다음 호출에 바로 반영
    pub fn load_filters(&self) -> Result<FilterSet, FilterConfigError> {
        FilterSet::load(&self.filters_path)
    }

    pub fn list_filters(&self, target: VariantTarget) -> Result<FilterListing, FilterConfigError> {
        let set = self.load_filters()?;
        let variants = target.variants();
        let filters = set
            .filters
            .iter()
            .filter(|f| variants.iter().any(|v| f.game.applies_to(*v)))
            .cloned()
            .collect();
        Ok(FilterListing {
            filters,
            config_errors: set.config_errors().cloned().collect(),
        })
    }

    /// 활성 규칙 실행 (`filter_id`가 있으면 그 규칙만)
    pub async fn run(
        &self,
        target: VariantTarget,
        filter_id: Option<&str>,
        dry_run: bool,
        operator: &str,
    ) -> Result<RunSummary, EngineError> {
        let set = self.load_filters()?;
        if let Some(id) = filter_id {
            if !set.get(id).map_or(false, |f| f.enabled) {
                return Err(EngineError::UnknownFilter(id.to_string()));
            }
        }

        let mut results = Vec::new();
        for variant in target.variants() {
            let selected = set
                .runnable_for(variant)
                .filter(|f| filter_id.map_or(true, |id| f.id == id));
            for filter in selected {
                results.push(self.run_filter(filter, variant, dry_run, operator).await);
            }
        }

        let summary = RunSummary {
            dry_run,
            total_matched: results.iter().map(|r| r.matched).sum(),
            total_moved: results.iter().map(|r| r.moved).sum(),
            results,
            config_errors: set.config_errors().cloned().collect(),
        };
        info!(
            operator,
            dry_run,
            rules = summary.results.len(),
            matched = summary.total_matched,
            moved = summary.total_moved,
            "quarantine run finished"
        );
        Ok(summary)
    }

    async fn run_filter(
        &self,
        filter: &QuarantineFilter,
        variant: GameVariant,
        dry_run: bool,
        operator: &str,
    ) -> FilterRunResult {
        let started_on = Utc::now();
        let mut result = FilterRunResult {
            filter_id: filter.id.clone(),
            filter_name: filter.name.clone(),
            variant,
            run_id: Uuid::new_v4(),
            dry_run,
            matched: 0,
            moved: 0,
            error: None,
        };

        if let Err(e) = self.execute(filter, variant, &mut result, operator).await {
            warn!(filter_id = %filter.id, %variant, error = %e, "quarantine filter failed");
            result.error = Some(e);
        }

        let log = FilterRunLog {
            run_id: result.run_id,
            filter_id: result.filter_id.clone(),
            variant: variant.to_string(),
            dry_run,
            matched: result.matched,
            moved: result.moved as i64,
            operator: operator.to_string(),
            started_on,
            finished_on: Utc::now(),
            error: result.error.clone(),
        };
        if let Err(e) = self.repo.log_run(&log).await {
            warn!(run_id = %log.run_id, error = %e, "failed to write filter run audit log");
        }

        result
    }

    async fn execute(
        &self,
        filter: &QuarantineFilter,
        variant: GameVariant,
        result: &mut FilterRunResult,
        operator: &str,
    ) -> Result<(), String> {
        let compiled = compile(filter, schema(variant)).map_err(|e| e.to_string())?;
        let predicate = &compiled;
        let repo = &self.repo;
        let retry = &self.storage_retry;

        result.matched = retry
            .run("count_matches", StoreError::is_contention, move || {
                repo.count_matches(variant, predicate)
            })
            .await
            .map_err(|e| e.to_string())?;

        if result.dry_run || result.matched == 0 {
            return Ok(());
        }

        let provenance = &Provenance {
            filter_id: filter.id.clone(),
            filter_name: filter.name.clone(),
            filter_conditions: filter.serialized_conditions(),
            quarantined_by: operator.to_string(),
            run_id: result.run_id,
        };
        result.moved = retry
            .run("quarantine_matches", StoreError::is_contention, move || {
                repo.quarantine_matches(variant, predicate, provenance)
            })
            .await
            .map_err(|e| e.to_string())?;

        info!(
            filter_id = %filter.id,
            %variant,
            matched = result.matched,
            moved = result.moved,
            run_id = %result.run_id,
            "records quarantined"
        );
        Ok(())
    }

    pub async fn restore_one(
        &self,
        variant: GameVariant,
        record_id: i64,
        operator: &str,
    ) -> Result<RestoreOutcome, StoreError> {
        let repo = &self.repo;
        let outcome = self
            .storage_retry
            .run("restore_one", StoreError::is_contention, move || repo.restore_one(variant, record_id))
            .await?;
        info!(operator, %variant, record_id, ?outcome, "quarantine restore");
        Ok(outcome)
    }

    pub async fn restore_all(
        &self,
        target: VariantTarget,
        filter_id: Option<&str>,
        operator: &str,
    ) -> Result<Vec<VariantRestore>, StoreError> {
        let repo = &self.repo;
        let mut restored = Vec::new();
        for variant in target.variants() {
            let n = self
                .storage_retry
                .run("restore_all", StoreError::is_contention, move || repo.restore_all(variant, filter_id))
                .await?;
            info!(operator, %variant, filter_id, restored = n, "quarantine bulk restore");
            restored.push(VariantRestore { variant, restored: n });
        }
        Ok(restored)
    }

    pub async fn list(
        &self,
        variant: GameVariant,
        filter_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QuarantinedRecord>, StoreError> {
        self.repo.list_quarantined(variant, filter_id, limit, offset).await
    }

    pub async fn counts(&self, target: VariantTarget) -> Result<Vec<VariantCounts>, StoreError> {
        let mut counts = Vec::new();
        for variant in target.variants() {
            let by_filter: Vec<FilterCount> = self
                .repo
                .quarantine_counts(variant)
                .await?
                .into_iter()
                .map(|(filter_id, count)| FilterCount { filter_id, count })
                .collect();
            counts.push(VariantCounts {
                variant,
                total: by_filter.iter().map(|c| c.count).sum(),
                by_filter,
            });
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::MockQuarantineRepository;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::Ordering;

    const FILTERS: &str = r#"{
        "filters": [
            {
                "id": "cs2-long-lj", "name": "Impossible LJ", "game": "cs2",
                "jump_type": "longjump",
                "conditions": [ { "field": "distance", "operator": ">", "value": 300 } ],
                "enabled": true, "priority": 10
            },
            {
                "id": "perfect-sync", "name": "Perfect sync", "game": "all",
                "conditions": [ { "field": "sync", "operator": ">=", "value": 100 } ],
                "enabled": true, "priority": 5
            },
            {
                "id": "no-efficiency", "name": "Zero gain", "game": "generic",
                "conditions": [ { "field": "efficiency", "operator": "=", "value": 0 } ],
                "enabled": true, "priority": 1
            },
            {
                "id": "disabled", "name": "Off", "game": "all",
                "conditions": [ { "field": "distance", "operator": ">", "value": 0 } ],
                "enabled": false, "priority": 99
            },
            { "id": "broken", "name": "Broken", "game": "cs2", "conditions": [], "enabled": true }
        ]
    }"#;

    struct Fixture {
        repo: Arc<MockQuarantineRepository>,
        engine: QuarantineEngine,
        _file: tempfile::NamedTempFile,
    }

    fn fixture() -> Fixture {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FILTERS.as_bytes()).unwrap();
        let repo = Arc::new(MockQuarantineRepository::new());

        repo.insert_row(GameVariant::Cs2, json!({
            "id": 1, "jump_type": "longjump", "mode": "kz_timer",
            "distance": 3_050_000, "sync_pct": 8_000, "gain_efficiency": 5_000
        }));
        repo.insert_row(GameVariant::Cs2, json!({
            "id": 2, "jump_type": "longjump", "mode": "kz_timer",
            "distance": 2_700_000, "sync_pct": 10_000, "gain_efficiency": 0
        }));
        repo.insert_row(GameVariant::Cs2, json!({
            "id": 3, "jump_type": "bhop", "mode": "kz_timer",
            "distance": 3_200_000, "sync_pct": 7_000, "gain_efficiency": 4_000
        }));
        repo.insert_row(GameVariant::Csgo, json!({
            "id": 10, "jump_type": "longjump", "mode": "kz_simple",
            "distance": 2_800_000, "sync": 10_000
        }));

        let engine = QuarantineEngine::new(repo.clone(), file.path()).with_retry(RetryPolicy::immediate(3));
        Fixture { repo, engine, _file: file }
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_moving() {
        let f = fixture();
        let summary = f
            .engine
            .run(VariantTarget::One(GameVariant::Cs2), None, true, "ops")
            .await
            .unwrap();

        let ids: Vec<&str> = summary.results.iter().map(|r| r.filter_id.as_str()).collect();
        assert_eq!(ids, vec!["cs2-long-lj", "perfect-sync", "no-efficiency"]);
        assert_eq!(summary.results[0].matched, 1);
        assert_eq!(summary.total_moved, 0);
        assert_eq!(f.repo.active_rows(GameVariant::Cs2).len(), 3);
        assert_eq!(summary.config_errors.len(), 1);
        assert_eq!(f.repo.runs(), 3);
    }

    #[tokio::test]
    async fn test_live_run_moves_then_dry_run_reports_zero() {
        let f = fixture();
        let target = VariantTarget::One(GameVariant::Cs2);

        let live = f.engine.run(target, Some("cs2-long-lj"), false, "ops").await.unwrap();
        assert_eq!(live.total_moved, 1);
        assert_eq!(f.repo.quarantined_ids(GameVariant::Cs2), vec![1]);

        let again = f.engine.run(target, Some("cs2-long-lj"), true, "ops").await.unwrap();
        assert_eq!(again.total_matched, 0);
    }

    #[tokio::test]
    async fn test_all_variants_aggregate_per_rule() {
        let f = fixture();
        let summary = f
            .engine
            .run(VariantTarget::All, Some("perfect-sync"), false, "ops")
            .await
            .unwrap();

        let moved: Vec<(GameVariant, u64)> = summary.results.iter().map(|r| (r.variant, r.moved)).collect();
        assert_eq!(
            moved,
            vec![(GameVariant::Csgo, 1), (GameVariant::Cs2, 1), (GameVariant::Css, 0)]
        );
    }

    #[tokio::test]
    async fn test_rule_with_missing_field_fails_only_for_that_variant() {
        let f = fixture();
        let summary = f
            .engine
            .run(VariantTarget::All, Some("no-efficiency"), true, "ops")
            .await
            .unwrap();

        let css = summary.results.iter().find(|r| r.variant == GameVariant::Css).unwrap();
        assert!(css.error.is_some());
        let cs2 = summary.results.iter().find(|r| r.variant == GameVariant::Cs2).unwrap();
        assert_eq!(cs2.matched, 1);
        assert!(cs2.error.is_none());
    }

    #[tokio::test]
    async fn test_restore_round_trip() {
        let f = fixture();
        let before = f.repo.active_rows(GameVariant::Cs2);
        f.engine
            .run(VariantTarget::One(GameVariant::Cs2), None, false, "ops")
            .await
            .unwrap();
        assert!(f.repo.active_rows(GameVariant::Cs2).len() < before.len());

        let restored = f
            .engine
            .restore_all(VariantTarget::One(GameVariant::Cs2), None, "ops")
            .await
            .unwrap();

        assert_eq!(restored[0].restored, 2);
        assert_eq!(f.repo.active_rows(GameVariant::Cs2), before);
        assert!(f.repo.quarantined_ids(GameVariant::Cs2).is_empty());
    }

    #[tokio::test]
    async fn test_restore_one_not_found() {
        let f = fixture();
        let outcome = f.engine.restore_one(GameVariant::Cs2, 999, "ops").await.unwrap();
        assert_eq!(outcome, RestoreOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_restore_scoped_to_filter() {
        let f = fixture();
        let target = VariantTarget::One(GameVariant::Cs2);
        f.engine.run(target, None, false, "ops").await.unwrap();

        let restored = f.engine.restore_all(target, Some("perfect-sync"), "ops").await.unwrap();
        assert_eq!(restored[0].restored, 1);
        assert_eq!(f.repo.quarantined_ids(GameVariant::Cs2), vec![1]);

        let counts = f.engine.counts(target).await.unwrap();
        assert_eq!(counts[0].total, 1);
        assert_eq!(counts[0].by_filter[0].filter_id, "cs2-long-lj");
    }

    #[tokio::test]
    async fn test_move_contention_is_retried() {
        let f = fixture();
        f.repo.move_contention.store(2, Ordering::SeqCst);

        let summary = f
            .engine
            .run(VariantTarget::One(GameVariant::Cs2), Some("cs2-long-lj"), false, "ops")
            .await
            .unwrap();

        assert_eq!(summary.total_moved, 1);
        assert!(summary.results[0].error.is_none());
    }

    #[tokio::test]
    async fn test_disabled_or_unknown_filter_is_rejected() {
        let f = fixture();
        let target = VariantTarget::All;
        assert!(matches!(
            f.engine.run(target, Some("disabled"), true, "ops").await,
            Err(EngineError::UnknownFilter(_))
        ));
        assert!(matches!(
            f.engine.run(target, Some("nope"), true, "ops").await,
            Err(EngineError::UnknownFilter(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_document_is_config_error() {
        let engine = QuarantineEngine::new(Arc::new(MockQuarantineRepository::new()), "/nonexistent/filters.json");
        assert!(matches!(
            engine.run(VariantTarget::All, None, true, "ops").await,
            Err(EngineError::Config(_))
        ));
    }
}
