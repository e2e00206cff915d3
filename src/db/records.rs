//! Record ingestion queries

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use super::lookup::LookupKind;
use super::models::{CacheUpdate, InsertOutcome, NewRecord};
use super::repository::RecordRepository;
use super::Database;
use crate::error::StoreError;

/// 트랜잭션 안에서 새로 만든 참조 행 (commit 후 캐시에 기록)
#[derive(Debug, Default)]
pub(super) struct CreatedRefs {
    pub players: Vec<i64>,
    pub maps: Vec<i64>,
    pub servers: Vec<i64>,
}

impl Database {
    pub(super) fn remember_refs(&self, refs: &CreatedRefs) {
        self.lookup.remember(LookupKind::Player, &refs.players);
        self.lookup.remember(LookupKind::Map, &refs.maps);
        self.lookup.remember(LookupKind::Server, &refs.servers);
    }

    /// 캐시에 없는 플레이어를 생성 (이름은 처음 본 값)
    pub(super) async fn ensure_players(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        players: &[(i64, String, Option<DateTime<Utc>>)],
    ) -> Result<Vec<i64>, StoreError> {
        let missing = self
            .lookup
            .missing(LookupKind::Player, players.iter().map(|(id, _, _)| *id));
        if missing.is_empty() {
            return Ok(missing);
        }

        let mut ids = Vec::with_capacity(missing.len());
        let mut names = Vec::with_capacity(missing.len());
        let mut seen = Vec::with_capacity(missing.len());
        for id in &missing {
            if let Some((_, name, at)) = players.iter().find(|(p, _, _)| p == id) {
                ids.push(*id);
                names.push(name.clone());
                seen.push(*at);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO players (steamid64, name, last_seen)
            SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::timestamptz[])
            ON CONFLICT (steamid64) DO NOTHING
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&seen)
        .execute(&mut **tx)
        .await?;

        Ok(missing)
    }

    async fn ensure_named(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        kind: LookupKind,
        rows: impl Iterator<Item = (i64, String)>,
    ) -> Result<Vec<i64>, StoreError> {
        let rows: HashMap<i64, String> = rows.collect();
        let missing = self.lookup.missing(kind, rows.keys().copied());
        if missing.is_empty() {
            return Ok(missing);
        }
        let names: Vec<String> = missing
            .iter()
            .map(|id| rows.get(id).cloned().unwrap_or_default())
            .collect();

        let sql = match kind {
            LookupKind::Map => {
                "INSERT INTO maps (id, name) SELECT * FROM UNNEST($1::bigint[], $2::text[]) ON CONFLICT (id) DO NOTHING"
            }
            _ => {
                "INSERT INTO servers (id, name) SELECT * FROM UNNEST($1::bigint[], $2::text[]) ON CONFLICT (id) DO NOTHING"
            }
        };
        sqlx::query(sql)
            .bind(&missing)
            .bind(&names)
            .execute(&mut **tx)
            .await?;

        Ok(missing)
    }
}

#[async_trait]
impl RecordRepository for Database {
    async fn max_original_id(&self) -> Result<Option<i64>, StoreError> {
        // 아카이브로 옮겨진 기록도 이미 수집된 id
        let max: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT GREATEST(
                (SELECT MAX(original_id) FROM records),
                (SELECT MAX(original_id) FROM archived_records)
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn insert_records(&self, records: &[NewRecord]) -> Result<Vec<InsertOutcome>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.begin().await?;

        let players: Vec<_> = records
            .iter()
            .map(|r| (r.player_id, r.player_name.clone(), Some(r.created_on)))
            .collect();
        let refs = CreatedRefs {
            players: self.ensure_players(&mut tx, &players).await?,
            maps: self
                .ensure_named(
                    &mut tx,
                    LookupKind::Map,
                    records.iter().map(|r| (r.map_id, r.map_name.clone())),
                )
                .await?,
            servers: self
                .ensure_named(
                    &mut tx,
                    LookupKind::Server,
                    records.iter().map(|r| (r.server_id, r.server_name.clone())),
                )
                .await?,
        };

        let mut outcomes = Vec::with_capacity(records.len());
        let mut last_seen: HashMap<i64, DateTime<Utc>> = HashMap::new();
        for r in records {
            let id: Option<i64> = sqlx::query_scalar(
                r#"
                INSERT INTO records (
                    original_id, player_id, map_id, server_id, mode, stage, tickrate,
                    time, teleports, points, created_on, updated_on
                )
                SELECT $1::bigint, $2::bigint, $3::bigint, $4::bigint, $5::text, $6::int, $7::int,
                       $8::float8, $9::int, $10::int, $11::timestamptz, $12::timestamptz
                WHERE NOT EXISTS (
                    SELECT 1 FROM archived_records a WHERE a.original_id = $1::bigint
                )
                ON CONFLICT (original_id) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(r.original_id)
            .bind(r.player_id)
            .bind(r.map_id)
            .bind(r.server_id)
            .bind(&r.mode)
            .bind(r.stage)
            .bind(r.tickrate)
            .bind(r.time)
            .bind(r.teleports)
            .bind(r.points)
            .bind(r.created_on)
            .bind(r.updated_on)
            .fetch_optional(&mut *tx)
            .await?;

            match id {
                Some(id) => {
                    let seen = last_seen.entry(r.player_id).or_insert(r.created_on);
                    if r.created_on > *seen {
                        *seen = r.created_on;
                    }
                    outcomes.push(InsertOutcome::Inserted(id));
                }
                None => outcomes.push(InsertOutcome::Duplicate),
            }
        }

        if !last_seen.is_empty() {
            let (ids, seen): (Vec<i64>, Vec<DateTime<Utc>>) = last_seen.into_iter().unzip();
            sqlx::query(
                r#"
                UPDATE players p
                SET last_seen = GREATEST(COALESCE(p.last_seen, v.seen), v.seen)
                FROM UNNEST($1::bigint[], $2::timestamptz[]) AS v(steamid64, seen)
                WHERE p.steamid64 = v.steamid64
                "#,
            )
            .bind(&ids)
            .bind(&seen)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.remember_refs(&refs);

        Ok(outcomes)
    }

    async fn update_best_caches(
        &self,
        record_id: i64,
        record: &NewRecord,
    ) -> Result<CacheUpdate, StoreError> {
        // WHERE 조건이 거짓이면 RETURNING 행이 없음 → 갱신 안 됨
        let personal: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO player_bests (
                player_id, map_id, mode, stage, has_teleports, record_id, time, updated_on
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (player_id, map_id, mode, stage, has_teleports)
            DO UPDATE SET
                record_id = EXCLUDED.record_id,
                time = EXCLUDED.time,
                updated_on = NOW()
            WHERE EXCLUDED.time < player_bests.time
            RETURNING record_id
            "#,
        )
        .bind(record.player_id)
        .bind(record.map_id)
        .bind(&record.mode)
        .bind(record.stage)
        .bind(record.has_teleports())
        .bind(record_id)
        .bind(record.time)
        .fetch_optional(&self.pool)
        .await?;

        let map: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO map_bests (
                map_id, mode, stage, has_teleports, record_id, player_id, time, updated_on
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (map_id, mode, stage, has_teleports)
            DO UPDATE SET
                record_id = EXCLUDED.record_id,
                player_id = EXCLUDED.player_id,
                time = EXCLUDED.time,
                updated_on = NOW()
            WHERE EXCLUDED.time < map_bests.time
            RETURNING record_id
            "#,
        )
        .bind(record.map_id)
        .bind(&record.mode)
        .bind(record.stage)
        .bind(record.has_teleports())
        .bind(record_id)
        .bind(record.player_id)
        .bind(record.time)
        .fetch_optional(&self.pool)
        .await?;

        Ok(CacheUpdate {
            personal_best: personal.is_some(),
            map_best: map.is_some(),
        })
    }
}
