//! Filter → SQL predicate
//!
//! 규칙 하나를 variant 스키마에 맞춰 `WHERE` 절과 바인딩 값으로 변환함.
//! 값은 항상 `$n` placeholder로 바인딩하고, 컬럼명은 정적 매핑에서만 가져옴.
//!
//! 배율 필드(거리 x10000, 비율 x100)는 스칼라 값과 `in`/`not_in` 목록 모두
//! 같은 방식으로 배율을 적용해 정수로 반올림함. null 검사는 값이 없으므로 배율 없음.

use thiserror::Error;

use super::fields::{FieldKind, FieldSpec, VariantSchema};
use super::filter::{Condition, Operator, QuarantineFilter};
use crate::types::GameVariant;

/// 바인딩 값
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Float(f64),
    Text(String),
}

/// 컬럼 단위로 해석된 조건 (배율 적용 후)
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnCondition {
    pub column: &'static str,
    pub kind: FieldKind,
    pub operator: Operator,
    pub values: Vec<SqlValue>,
}

/// 컴파일된 WHERE 절
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// `$1`부터 시작하는 placeholder 사용
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub conditions: Vec<ColumnCondition>,
}

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("field `{field}` is not available for {variant}")]
    UnknownField { field: String, variant: GameVariant },

    #[error("field `{field}`: {reason}")]
    BadValue { field: String, reason: String },
}

/// 규칙을 variant 스키마에 맞춰 컴파일
pub fn compile(filter: &QuarantineFilter, schema: &VariantSchema) -> Result<Predicate, CompileError> {
    let mut conditions = Vec::with_capacity(filter.conditions.len() + 2);

    // discriminator는 일반 equality 조건으로 취급
    if let Some(jump_type) = &filter.jump_type {
        conditions.push(Condition {
            field: "jump_type".to_string(),
            operator: Operator::Eq,
            value: serde_json::Value::String(jump_type.clone()),
        });
    }
    if let Some(mode) = &filter.mode {
        conditions.push(Condition {
            field: "mode".to_string(),
            operator: Operator::Eq,
            value: serde_json::Value::String(mode.clone()),
        });
    }
    conditions.extend(filter.conditions.iter().cloned());

    let resolved = conditions
        .iter()
        .map(|c| resolve(c, schema))
        .collect::<Result<Vec<_>, _>>()?;

    let mut params = Vec::new();
    let clauses: Vec<String> = resolved
        .iter()
        .map(|c| render(c, &mut params))
        .collect();

    Ok(Predicate {
        sql: clauses.join(" AND "),
        params,
        conditions: resolved,
    })
}

fn resolve(condition: &Condition, schema: &VariantSchema) -> Result<ColumnCondition, CompileError> {
    let spec = schema
        .field(&condition.field)
        .ok_or_else(|| CompileError::UnknownField {
            field: condition.field.clone(),
            variant: schema.variant,
        })?;

    let bad = |reason: String| CompileError::BadValue {
        field: condition.field.clone(),
        reason,
    };

    if condition.operator.is_pattern() && spec.kind != FieldKind::Text {
        return Err(bad(format!("`{}` only applies to text fields", condition.operator.as_str())));
    }

    let values = if condition.operator.is_null_test() {
        Vec::new()
    } else if condition.operator.is_set() {
        condition
            .value
            .as_array()
            .ok_or_else(|| bad("expected a list".to_string()))?
            .iter()
            .map(|v| scale_value(spec, v).map_err(&bad))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![scale_value(spec, &condition.value).map_err(&bad)?]
    };

    Ok(ColumnCondition {
        column: spec.column,
        kind: spec.kind,
        operator: condition.operator,
        values,
    })
}

/// 자연 단위 값을 저장 단위로 변환
fn scale_value(spec: &FieldSpec, value: &serde_json::Value) -> Result<SqlValue, String> {
    match spec.kind {
        FieldKind::Integer | FieldKind::Float => {
            let n = match value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .ok_or_else(|| format!("expected a number, got {}", value))?;

            if spec.scale != 1 {
                return Ok(SqlValue::Int((n * spec.scale as f64).round() as i64));
            }
            match (spec.kind, value.as_i64()) {
                (FieldKind::Integer, Some(i)) => Ok(SqlValue::Int(i)),
                (FieldKind::Integer, None) if n.fract() == 0.0 => Ok(SqlValue::Int(n as i64)),
                _ => Ok(SqlValue::Float(n)),
            }
        }
        FieldKind::Text => match value {
            serde_json::Value::String(s) => Ok(SqlValue::Text(s.clone())),
            serde_json::Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            serde_json::Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            other => Err(format!("expected text, got {}", other)),
        },
        FieldKind::Timestamp => value
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .ok_or_else(|| format!("expected an ISO-8601 timestamp string, got {}", value)),
    }
}

fn placeholder(kind: FieldKind, index: usize) -> String {
    match kind {
        FieldKind::Timestamp => format!("${}::timestamptz", index),
        _ => format!("${}", index),
    }
}

fn render(c: &ColumnCondition, params: &mut Vec<SqlValue>) -> String {
    let column = format!("\"{}\"", c.column);
    let mut next = |value: &SqlValue| {
        params.push(value.clone());
        placeholder(c.kind, params.len())
    };

    match c.operator {
        Operator::IsNull => format!("{} IS NULL", column),
        Operator::IsNotNull => format!("{} IS NOT NULL", column),
        Operator::In | Operator::NotIn => {
            let list: Vec<String> = c.values.iter().map(&mut next).collect();
            let keyword = if c.operator == Operator::In { "IN" } else { "NOT IN" };
            format!("{} {} ({})", column, keyword, list.join(", "))
        }
        op => {
            let sql_op = match op {
                Operator::Lt => "<",
                Operator::Le => "<=",
                Operator::Gt => ">",
                Operator::Ge => ">=",
                Operator::Eq => "=",
                Operator::Ne => "<>",
                Operator::Like => "LIKE",
                _ => "NOT LIKE",
            };
            // values는 resolve에서 정확히 하나로 채워짐
            let rhs = c.values.first().map(&mut next).unwrap_or_else(|| "NULL".to_string());
            format!("{} {} {}", column, sql_op, rhs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quarantine::fields::schema;
    use crate::services::quarantine::filter::Applicability;
    use serde_json::json;

    fn filter(conditions: Vec<Condition>) -> QuarantineFilter {
        QuarantineFilter {
            id: "t".into(),
            name: "test".into(),
            game: Applicability::Generic,
            jump_type: None,
            mode: None,
            conditions,
            enabled: true,
            priority: 0,
        }
    }

    fn cond(field: &str, operator: Operator, value: serde_json::Value) -> Condition {
        Condition {
            field: field.into(),
            operator,
            value,
        }
    }

    #[test]
    fn test_cs2_distance_threshold_is_scaled() {
        let f = filter(vec![cond("distance", Operator::Gt, json!(300))]);
        let p = compile(&f, schema(GameVariant::Cs2)).unwrap();

        assert_eq!(p.sql, "\"distance\" > $1");
        assert_eq!(p.params, vec![SqlValue::Int(3_000_000)]);
    }

    #[test]
    fn test_set_membership_scaled_elementwise() {
        let f = filter(vec![cond("sync", Operator::In, json!([90, 95.5]))]);
        let p = compile(&f, schema(GameVariant::Cs2)).unwrap();

        assert_eq!(p.sql, "\"sync_pct\" IN ($1, $2)");
        assert_eq!(p.params, vec![SqlValue::Int(9_000), SqlValue::Int(9_550)]);
    }

    #[test]
    fn test_null_test_has_no_params() {
        let f = filter(vec![cond("distance", Operator::IsNull, serde_json::Value::Null)]);
        let p = compile(&f, schema(GameVariant::Csgo)).unwrap();

        assert_eq!(p.sql, "\"distance\" IS NULL");
        assert!(p.params.is_empty());
    }

    #[test]
    fn test_discriminators_and_variant_columns() {
        let mut f = filter(vec![
            cond("strafes", Operator::Ge, json!(20)),
            cond("pre_speed", Operator::Gt, json!(280.5)),
        ]);
        f.jump_type = Some("longjump".into());
        f.mode = Some("kz_timer".into());

        let p = compile(&f, schema(GameVariant::Css)).unwrap();
        assert_eq!(
            p.sql,
            "\"jumptype\" = $1 AND \"mode\" = $2 AND \"strafes\" >= $3 AND \"prestrafe\" > $4"
        );
        assert_eq!(
            p.params,
            vec![
                SqlValue::Text("longjump".into()),
                SqlValue::Text("kz_timer".into()),
                SqlValue::Int(20),
                SqlValue::Float(280.5),
            ]
        );
    }

    #[test]
    fn test_timestamp_placeholder_is_cast() {
        let f = filter(vec![cond("created_on", Operator::Lt, json!("2024-01-01T00:00:00Z"))]);
        let p = compile(&f, schema(GameVariant::Cs2)).unwrap();
        assert_eq!(p.sql, "\"created_at\" < $1::timestamptz");
    }

    #[test]
    fn test_field_missing_in_variant_is_rejected() {
        let f = filter(vec![cond("efficiency", Operator::Lt, json!(10))]);
        let err = compile(&f, schema(GameVariant::Css)).unwrap_err();
        assert!(matches!(err, CompileError::UnknownField { .. }));
    }

    #[test]
    fn test_pattern_on_numeric_field_is_rejected() {
        let f = filter(vec![cond("distance", Operator::Like, json!("2%"))]);
        assert!(compile(&f, schema(GameVariant::Csgo)).is_err());
    }

    #[test]
    fn test_non_numeric_value_for_numeric_field_is_rejected() {
        let f = filter(vec![cond("distance", Operator::Gt, json!("far"))]);
        let err = compile(&f, schema(GameVariant::Csgo)).unwrap_err();
        assert!(matches!(err, CompileError::BadValue { .. }));
    }
}
