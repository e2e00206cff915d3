//! Quarantine queries
//!
//! 테이블/컬럼명은 `fields::schema()`의 정적 매핑에서만 오고,
//! 필터 값은 모두 `$n`으로 바인딩됨.

use async_trait::async_trait;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{Postgres, Row};

use super::models::{FilterRunLog, Provenance, QuarantinedRecord, RestoreOutcome};
use super::repository::QuarantineRepository;
use super::Database;
use crate::error::StoreError;
use crate::services::quarantine::fields::{schema, VariantSchema};
use crate::services::quarantine::query::{Predicate, SqlValue};
use crate::types::GameVariant;

/// quarantine 테이블에만 있는 provenance 컬럼
const PROVENANCE_COLUMNS: [&str; 6] = [
    "filter_id",
    "filter_name",
    "filter_conditions",
    "quarantined_by",
    "quarantined_on",
    "run_id",
];

fn column_list(schema: &VariantSchema) -> String {
    schema
        .columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

#[async_trait]
impl QuarantineRepository for Database {
    async fn count_matches(&self, variant: GameVariant, predicate: &Predicate) -> Result<i64, StoreError> {
        let schema = schema(variant);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", schema.table, predicate.sql);
        let row = bind_params(sqlx::query(&sql), &predicate.params)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn quarantine_matches(
        &self,
        variant: GameVariant,
        predicate: &Predicate,
        provenance: &Provenance,
    ) -> Result<u64, StoreError> {
        let schema = schema(variant);
        let cols = column_list(schema);
        let n = predicate.params.len();

        let mut tx = self.begin().await?;

        let copy_sql = format!(
            r#"
            INSERT INTO {quarantine} ({cols}, filter_id, filter_name, filter_conditions,
                                      quarantined_by, quarantined_on, run_id)
            SELECT {cols}, ${a}, ${b}, ${c}, ${d}, NOW(), ${e}
            FROM {table}
            WHERE {predicate}
            "#,
            quarantine = schema.quarantine_table,
            table = schema.table,
            predicate = predicate.sql,
            a = n + 1,
            b = n + 2,
            c = n + 3,
            d = n + 4,
            e = n + 5,
        );
        let copied = bind_params(sqlx::query(&copy_sql), &predicate.params)
            .bind(&provenance.filter_id)
            .bind(&provenance.filter_name)
            .bind(&provenance.filter_conditions)
            .bind(&provenance.quarantined_by)
            .bind(provenance.run_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // 복사된 행만 정확히 삭제 (predicate 재평가 없음)
        let delete_sql = format!(
            "DELETE FROM {table} WHERE {id} IN (SELECT {id} FROM {quarantine} WHERE run_id = $1)",
            table = schema.table,
            quarantine = schema.quarantine_table,
            id = schema.id_column(),
        );
        let deleted = sqlx::query(&delete_sql)
            .bind(provenance.run_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if copied != deleted {
            // tx drop → rollback
            return Err(StoreError::Inconsistent(format!(
                "{}: copied {} rows but deleted {}",
                schema.table, copied, deleted
            )));
        }

        tx.commit().await?;
        Ok(copied)
    }

    async fn restore_one(&self, variant: GameVariant, record_id: i64) -> Result<RestoreOutcome, StoreError> {
        let schema = schema(variant);
        let cols = column_list(schema);

        let mut tx = self.begin().await?;
        let sql = format!(
            r#"
            WITH moved AS (
                DELETE FROM {quarantine} WHERE {id} = $1
                RETURNING {cols}
            )
            INSERT INTO {table} ({cols})
            SELECT {cols} FROM moved
            "#,
            quarantine = schema.quarantine_table,
            table = schema.table,
            id = schema.id_column(),
        );
        let restored = sqlx::query(&sql)
            .bind(record_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(if restored == 0 {
            RestoreOutcome::NotFound
        } else {
            RestoreOutcome::Restored
        })
    }

    async fn restore_all(&self, variant: GameVariant, filter_id: Option<&str>) -> Result<u64, StoreError> {
        let schema = schema(variant);
        let cols = column_list(schema);

        let mut tx = self.begin().await?;
        let sql = format!(
            r#"
            WITH moved AS (
                DELETE FROM {quarantine} WHERE ($1::text IS NULL OR filter_id = $1)
                RETURNING {cols}
            )
            INSERT INTO {table} ({cols})
            SELECT {cols} FROM moved
            "#,
            quarantine = schema.quarantine_table,
            table = schema.table,
        );
        let restored = sqlx::query(&sql)
            .bind(filter_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(restored)
    }

    async fn list_quarantined(
        &self,
        variant: GameVariant,
        filter_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<QuarantinedRecord>, StoreError> {
        let schema = schema(variant);
        let strip = PROVENANCE_COLUMNS
            .iter()
            .map(|c| format!("'{}'", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            r#"
            SELECT q.{id} AS id, q.filter_id, q.filter_name, q.filter_conditions,
                   q.quarantined_by, q.quarantined_on, q.run_id,
                   to_jsonb(q) - ARRAY[{strip}] AS record
            FROM {quarantine} q
            WHERE ($1::text IS NULL OR q.filter_id = $1)
            ORDER BY q.quarantined_on DESC, q.{id}
            LIMIT $2 OFFSET $3
            "#,
            id = schema.id_column(),
            quarantine = schema.quarantine_table,
        );
        let rows = sqlx::query_as::<_, QuarantinedRecord>(&sql)
            .bind(filter_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn quarantine_counts(&self, variant: GameVariant) -> Result<Vec<(String, i64)>, StoreError> {
        let schema = schema(variant);
        let sql = format!(
            "SELECT filter_id, COUNT(*) FROM {} GROUP BY filter_id ORDER BY filter_id",
            schema.quarantine_table
        );
        let counts = sqlx::query_as::<_, (String, i64)>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(counts)
    }

    async fn log_run(&self, log: &FilterRunLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO filter_runs (
                run_id, filter_id, variant, dry_run, matched, moved,
                operator, started_on, finished_on, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(log.run_id)
        .bind(&log.filter_id)
        .bind(&log.variant)
        .bind(log.dry_run)
        .bind(log.matched)
        .bind(log.moved)
        .bind(&log.operator)
        .bind(log.started_on)
        .bind(log.finished_on)
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
