//! Quarantine Filter Engine
//!
//! 운영자가 정의한 규칙에 걸린 jumpstat 기록을 variant별 격리 테이블로 옮기고,
//! 필요하면 원래 테이블로 되돌림
//!
//! # Modules
//! - `filter`: JSON 규칙 문서 로드 + 검증
//! - `fields`: 의미 필드 → variant 컬럼 매핑, 배율
//! - `query`: 규칙 → 파라미터 바인딩 SQL predicate
//! - `engine`: dry-run / 격리 / 복원 실행

pub mod fields;
pub mod filter;
pub mod query;
mod engine;

pub use engine::{
    EngineError, FilterCount, FilterListing, FilterRunResult, QuarantineEngine, RunSummary,
    VariantCounts, VariantRestore,
};
pub use filter::{FilterConfigError, FilterSet, QuarantineFilter, RejectedFilter};
