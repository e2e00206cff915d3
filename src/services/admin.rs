//! Operator Control Surface
//!
//! 운영자 요청을 엔진 / scraper / reconciler 호출로 변환하고
//! 결과를 `ApiError` 계층으로 매핑함
//!
//! # Error Mapping
//!
//! | 원인 | ApiError |
//! |------|----------|
//! | 규칙 문서 읽기 / 파싱 실패 | `FilterConfig` (422) |
//! | 존재하지 않거나 비활성 규칙 | `NotFound` (404) |
//! | 빈 operator, 잘못된 페이지 값 | `BadRequest` (400) |
//! | lock 경합 | `ServiceUnavailable` (503) |

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::quarantine::{
    EngineError, FilterListing, QuarantineEngine, RunSummary, VariantCounts, VariantRestore,
};
use super::reconciler::{BanReconciler, ReconcileReport};
use super::scraper::{RecordScraper, ScraperStatus};
use crate::db::{QuarantinedRecord, RestoreOutcome};
use crate::error::ApiError;
use crate::types::{GameVariant, VariantTarget};

/// 목록 조회 최대 페이지 크기
pub const MAX_PAGE_SIZE: i64 = 500;

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config(e) => ApiError::FilterConfig(e.to_string()),
            EngineError::UnknownFilter(id) => ApiError::NotFound(format!("Filter `{}`", id)),
            EngineError::Store(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    pub variant: GameVariant,
    pub record_id: i64,
    pub outcome: RestoreOutcome,
}

/// `get_stats` 응답
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    /// scraper가 꺼져 있으면 `None`
    pub scraper: Option<ScraperStatus>,
    pub last_reconcile: Option<ReconcileReport>,
    pub quarantine: Vec<VariantCounts>,
}

pub struct AdminService {
    engine: Arc<QuarantineEngine>,
    scraper: Option<Arc<RecordScraper>>,
    reconciler: Option<Arc<BanReconciler>>,
}

impl AdminService {
    pub fn new(engine: Arc<QuarantineEngine>) -> Self {
        Self {
            engine,
            scraper: None,
            reconciler: None,
        }
    }

    pub fn with_scraper(mut self, scraper: Arc<RecordScraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn with_reconciler(mut self, reconciler: Arc<BanReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    pub async fn trigger_run(
        &self,
        target: VariantTarget,
        filter_id: Option<&str>,
        dry_run: bool,
        operator: &str,
    ) -> Result<RunSummary, ApiError> {
        let operator = require_operator(operator)?;
        info!(operator, ?target, filter_id, dry_run, "quarantine run requested");
        Ok(self.engine.run(target, filter_id, dry_run, operator).await?)
    }

    pub async fn list_quarantined(
        &self,
        variant: GameVariant,
        filter_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QuarantinedRecord>, ApiError> {
        if !(1..=MAX_PAGE_SIZE).contains(&limit) {
            return Err(ApiError::BadRequest(format!("limit must be between 1 and {}", MAX_PAGE_SIZE)));
        }
        if offset < 0 {
            return Err(ApiError::BadRequest("offset must not be negative".to_string()));
        }
        Ok(self.engine.list(variant, filter_id, limit, offset).await?)
    }

    pub async fn restore_one(
        &self,
        variant: GameVariant,
        record_id: i64,
        operator: &str,
    ) -> Result<RestoreResult, ApiError> {
        let operator = require_operator(operator)?;
        match self.engine.restore_one(variant, record_id, operator).await? {
            RestoreOutcome::NotFound => Err(ApiError::NotFound(format!(
                "Quarantined {} record {}",
                variant, record_id
            ))),
            outcome => Ok(RestoreResult {
                variant,
                record_id,
                outcome,
            }),
        }
    }

    pub async fn restore_all(
        &self,
        target: VariantTarget,
        filter_id: Option<&str>,
        operator: &str,
    ) -> Result<Vec<VariantRestore>, ApiError> {
        let operator = require_operator(operator)?;
        Ok(self.engine.restore_all(target, filter_id, operator).await?)
    }

    pub fn get_filters(&self, target: VariantTarget) -> Result<FilterListing, ApiError> {
        self.engine
            .list_filters(target)
            .map_err(|e| ApiError::FilterConfig(e.to_string()))
    }

    pub async fn get_stats(&self) -> Result<ServiceStats, ApiError> {
        let scraper = match &self.scraper {
            Some(s) => Some(s.status().await),
            None => None,
        };
        Ok(ServiceStats {
            scraper,
            last_reconcile: self.reconciler.as_ref().and_then(|r| r.last_report()),
            quarantine: self.engine.counts(VariantTarget::All).await?,
        })
    }
}

fn require_operator(operator: &str) -> Result<&str, ApiError> {
    let trimmed = operator.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest("operator is required".to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mock::{MockStore, MockQuarantineRepository};
    use crate::config::ReconcilerSettings;
    use crate::services::retry::RetryPolicy;
    use serde_json::json;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    const FILTERS: &str = r#"{
        "filters": [
            { "id": "fast-pre", "name": "Pre speed", "game": "all",
              "conditions": [ { "field": "pre_speed", "operator": ">", "value": 300 } ] }
        ]
    }"#;

    fn service(doc: &str) -> (AdminService, Arc<MockQuarantineRepository>, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.as_bytes()).unwrap();
        let repo = Arc::new(MockQuarantineRepository::new());
        repo.insert_row(GameVariant::Csgo, json!({ "id": 7, "mode": "kz_timer", "pre": 320.5 }));
        repo.insert_row(GameVariant::Csgo, json!({ "id": 8, "mode": "kz_timer", "pre": 276.0 }));
        let engine = QuarantineEngine::new(repo.clone(), file.path()).with_retry(RetryPolicy::immediate(2));
        (AdminService::new(Arc::new(engine)), repo, file)
    }

    #[tokio::test]
    async fn test_trigger_run_requires_operator() {
        let (admin, _, _file) = service(FILTERS);
        let result = admin.trigger_run(VariantTarget::All, None, true, "  ").await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_run_list_restore_flow() {
        let (admin, repo, _file) = service(FILTERS);

        let summary = assert_ok!(admin.trigger_run(VariantTarget::All, None, false, "alice").await);
        assert_eq!(summary.total_moved, 1);

        let listed = assert_ok!(admin.list_quarantined(GameVariant::Csgo, None, 50, 0).await);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].quarantined_by, "alice");
        assert_eq!(listed[0].filter_id, "fast-pre");

        let restored = assert_ok!(admin.restore_one(GameVariant::Csgo, 7, "alice").await);
        assert_eq!(restored.outcome, RestoreOutcome::Restored);
        assert_eq!(repo.active_rows(GameVariant::Csgo).len(), 2);

        let again = admin.restore_one(GameVariant::Csgo, 7, "alice").await;
        assert!(matches!(again, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_filter_maps_to_not_found() {
        let (admin, _, _file) = service(FILTERS);
        let result = admin.trigger_run(VariantTarget::All, Some("missing"), true, "alice").await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unparseable_document_maps_to_filter_config() {
        let (admin, _, _file) = service("{ broken");
        assert!(matches!(
            admin.trigger_run(VariantTarget::All, None, true, "alice").await,
            Err(ApiError::FilterConfig(_))
        ));
        assert!(matches!(admin.get_filters(VariantTarget::All), Err(ApiError::FilterConfig(_))));
    }

    #[tokio::test]
    async fn test_list_rejects_bad_paging() {
        let (admin, _, _file) = service(FILTERS);
        assert_err!(admin.list_quarantined(GameVariant::Csgo, None, 0, 0).await);
        assert_err!(admin.list_quarantined(GameVariant::Csgo, None, 10, -1).await);
    }

    #[tokio::test]
    async fn test_stats_include_reconcile_report_and_counts() {
        let (admin, _, _file) = service(FILTERS);
        let reconciler = Arc::new(BanReconciler::new(
            ReconcilerSettings::default(),
            Arc::new(MockStore::new()),
        ));
        reconciler.reconcile_players(&[]).await;
        let admin = admin.with_reconciler(reconciler);

        assert_ok!(admin.trigger_run(VariantTarget::One(GameVariant::Csgo), None, false, "alice").await);

        let stats = assert_ok!(admin.get_stats().await);
        assert!(stats.scraper.is_none());
        assert!(stats.last_reconcile.is_some());
        let csgo = stats.quarantine.iter().find(|c| c.variant == GameVariant::Csgo).unwrap();
        assert_eq!(csgo.total, 1);
    }
}
