//! Quarantine filter rules
//!
//! 운영자가 편집하는 JSON 문서에서 규칙을 읽어 검증함.
//! 문서는 실행할 때마다 새로 읽으므로 수정 사항은 재시작 없이 반영됨.
//!
//! 잘못된 규칙은 경고와 함께 제외되고 `rejected`에 남음 (엔진 전체는 계속 동작)

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::types::GameVariant;

/// 필터 문서 자체를 읽을 수 없을 때
#[derive(Debug, Error)]
pub enum FilterConfigError {
    #[error("failed to read filter document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse filter document {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 지원 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "not_like")]
    NotLike,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Like => "like",
            Operator::NotLike => "not_like",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
        }
    }

    /// 값이 필요 없는 연산자 (배율 적용 안 함)
    pub fn is_null_test(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Operator::Like | Operator::NotLike)
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_lowercase().as_str() {
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "=" | "==" => Operator::Eq,
            "!=" | "<>" => Operator::Ne,
            "in" => Operator::In,
            "not_in" | "not in" => Operator::NotIn,
            "like" => Operator::Like,
            "not_like" | "not like" => Operator::NotLike,
            "is_null" | "is null" => Operator::IsNull,
            "is_not_null" | "is not null" => Operator::IsNotNull,
            other => return Err(format!("unsupported operator {:?}", other)),
        };
        Ok(op)
    }
}

/// `(field, operator, value)` 조건 하나
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    /// 자연 단위 값 (배율 적용 전)
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
}

/// 규칙이 적용되는 variant 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    Variant(GameVariant),
    Generic,
    All,
}

impl Applicability {
    pub fn applies_to(&self, variant: GameVariant) -> bool {
        match self {
            Applicability::Variant(v) => *v == variant,
            Applicability::Generic | Applicability::All => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Applicability::Variant(v) => v.as_str(),
            Applicability::Generic => "generic",
            Applicability::All => "all",
        }
    }
}

impl Serialize for Applicability {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl FromStr for Applicability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" => Ok(Applicability::Generic),
            "all" => Ok(Applicability::All),
            other => other.parse().map(Applicability::Variant),
        }
    }
}

/// 검증을 통과한 필터
#[derive(Debug, Clone, Serialize)]
pub struct QuarantineFilter {
    pub id: String,
    pub name: String,
    pub game: Applicability,
    pub jump_type: Option<String>,
    pub mode: Option<String>,
    pub conditions: Vec<Condition>,
    pub enabled: bool,
    pub priority: i32,
}

impl QuarantineFilter {
    /// provenance에 저장할 직렬화된 조건 목록 (discriminator 포함)
    pub fn serialized_conditions(&self) -> serde_json::Value {
        serde_json::json!({
            "jump_type": self.jump_type,
            "mode": self.mode,
            "conditions": self.conditions,
        })
    }
}

/// 제외된 규칙
#[derive(Debug, Clone, Serialize)]
pub struct RejectedFilter {
    pub id: Option<String>,
    pub enabled: bool,
    pub reason: String,
}

/// 문서 하나를 읽은 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterSet {
    /// priority 내림차순, 같은 priority는 id 오름차순
    pub filters: Vec<QuarantineFilter>,
    pub rejected: Vec<RejectedFilter>,
}

impl FilterSet {
    /// 파일에서 로드 (실행마다 호출, 캐시하지 않음)
    pub fn load(path: &Path) -> Result<Self, FilterConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| FilterConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| FilterConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let doc: RawDocument = serde_json::from_str(raw)?;
        let mut set = FilterSet::default();

        for raw_filter in doc.filters {
            let id = raw_filter.id.clone();
            let enabled = raw_filter.enabled.unwrap_or(true);
            match raw_filter.validate() {
                Ok(filter) => set.filters.push(filter),
                Err(reason) => {
                    warn!(filter_id = ?id, enabled, %reason, "dropping invalid quarantine filter");
                    set.rejected.push(RejectedFilter { id, enabled, reason });
                }
            }
        }

        // 같은 id가 둘 이상이면 어느 쪽도 실행하지 않음
        let mut seen: HashMap<String, usize> = HashMap::new();
        for filter in &set.filters {
            *seen.entry(filter.id.clone()).or_default() += 1;
        }
        let (unique, duplicated): (Vec<_>, Vec<_>) = std::mem::take(&mut set.filters)
            .into_iter()
            .partition(|f| seen.get(&f.id).copied().unwrap_or_default() == 1);
        set.filters = unique;
        for filter in duplicated {
            let reason = format!("duplicate filter id `{}`", filter.id);
            warn!(filter_id = %filter.id, enabled = filter.enabled, %reason, "dropping invalid quarantine filter");
            set.rejected.push(RejectedFilter {
                id: Some(filter.id),
                enabled: filter.enabled,
                reason,
            });
        }

        set.filters
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(set)
    }

    /// 실행 대상: 활성화 + 해당 variant 적용
    pub fn runnable_for(&self, variant: GameVariant) -> impl Iterator<Item = &QuarantineFilter> {
        self.filters
            .iter()
            .filter(move |f| f.enabled && f.game.applies_to(variant))
    }

    pub fn get(&self, id: &str) -> Option<&QuarantineFilter> {
        self.filters.iter().find(|f| f.id == id)
    }

    /// 활성화된 상태로 제외된 규칙 = 운영자에게 보여줄 설정 오류
    pub fn config_errors(&self) -> impl Iterator<Item = &RejectedFilter> {
        self.rejected.iter().filter(|r| r.enabled)
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    id: Option<String>,
    name: Option<String>,
    game: Option<String>,
    jump_type: Option<String>,
    mode: Option<String>,
    conditions: Option<Vec<RawCondition>>,
    enabled: Option<bool>,
    priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    field: Option<String>,
    operator: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
}

fn required(value: Option<String>, name: &str) -> Result<String, String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("missing required field `{}`", name))
}

impl RawFilter {
    fn validate(self) -> Result<QuarantineFilter, String> {
        let id = required(self.id, "id")?;
        let name = required(self.name, "name")?;
        let game: Applicability = required(self.game, "game")?.parse()?;

        let raw_conditions = self
            .conditions
            .filter(|c| !c.is_empty())
            .ok_or_else(|| "missing required field `conditions`".to_string())?;

        let conditions = raw_conditions
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.validate().map_err(|e| format!("condition #{}: {}", i, e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(QuarantineFilter {
            id,
            name,
            game,
            jump_type: self.jump_type.filter(|s| !s.trim().is_empty()),
            mode: self.mode.filter(|s| !s.trim().is_empty()),
            conditions,
            enabled: self.enabled.unwrap_or(true),
            priority: self.priority.unwrap_or(0),
        })
    }
}

impl RawCondition {
    fn validate(self) -> Result<Condition, String> {
        let field = required(self.field, "field")?;
        let operator: Operator = required(self.operator, "operator")?.parse()?;

        if operator.is_null_test() {
            return Ok(Condition {
                field,
                operator,
                value: serde_json::Value::Null,
            });
        }

        match (&self.value, operator.is_set()) {
            (serde_json::Value::Array(items), true) => {
                if items.is_empty() {
                    return Err(format!("`{}` needs a non-empty list", operator.as_str()));
                }
                if items.iter().any(|v| !is_scalar(v)) {
                    return Err(format!("`{}` list must hold scalars", operator.as_str()));
                }
            }
            (_, true) => return Err(format!("`{}` needs a list value", operator.as_str())),
            (v, false) if !is_scalar(v) => {
                return Err(format!("`{}` needs a scalar value", operator.as_str()));
            }
            _ => {}
        }

        if operator.is_pattern() && !self.value.is_string() {
            return Err(format!("`{}` needs a string pattern", operator.as_str()));
        }

        Ok(Condition {
            field,
            operator,
            value: self.value,
        })
    }
}

fn is_scalar(v: &serde_json::Value) -> bool {
    v.is_number() || v.is_string() || v.is_boolean()
}
