//! Services Module
//!
//! 수집 파이프라인의 비즈니스 로직
//!
//! # Services
//! - `RecordScraper`: 원격 API에서 기록을 순차 수집
//! - `BanReconciler`: ban 상태에 맞춰 플래그 / 아카이브 정리
//! - `QuarantineEngine`: 규칙 기반 jumpstat 격리
//! - `AdminService`: 운영자용 격리 관리 API
//!
//! # Shared
//! - `RetryPolicy`: 지수 백오프 재시도
//! - `CheckpointStore`: scraper 진행 상태 보존
//! - `GlobalApiClient`: rate limit을 지키는 원격 클라이언트

use std::sync::atomic::{AtomicBool, Ordering};

pub mod admin;
pub mod checkpoint;
pub mod quarantine;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod scraper;

pub use admin::AdminService;
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use quarantine::QuarantineEngine;
pub use reconciler::{BanReconciler, ReconcileReport};
pub use remote::{GlobalApiClient, RecordSource};
pub use retry::RetryPolicy;
pub use scraper::{RecordScraper, ScrapeStats};

/// 실행 중 플래그를 drop 시점에 해제 (중복 실행 방지)
///
/// ```rust,ignore
/// if running.swap(true, Ordering::AcqRel) {
///     return None;
/// }
/// let _guard = RunGuard(&running);
/// ```
pub(crate) struct RunGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_guard_releases_flag() {
        let flag = AtomicBool::new(false);
        assert!(!flag.swap(true, Ordering::AcqRel));
        {
            let _guard = RunGuard(&flag);
            assert!(flag.load(Ordering::Acquire));
        }
        assert!(!flag.load(Ordering::Acquire));
    }
}
