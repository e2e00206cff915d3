//! Ban / archive queries

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{ActiveBan, ArchiveOutcome, NewBan};
use super::records::CreatedRefs;
use super::repository::BanRepository;
use super::Database;
use crate::error::StoreError;

/// records / archived_records 공통 컬럼 (ban_id 제외)
const RECORD_COLUMNS: &str = "id, original_id, player_id, map_id, server_id, mode, stage, \
                              tickrate, time, teleports, points, created_on, updated_on";

#[async_trait]
impl BanRepository for Database {
    async fn upsert_bans(&self, bans: &[NewBan]) -> Result<u64, StoreError> {
        if bans.is_empty() {
            return Ok(0);
        }

        let mut tx = self.begin().await?;

        let players: Vec<_> = bans
            .iter()
            .map(|b| (b.player_id, b.player_name.clone().unwrap_or_default(), None))
            .collect();
        let refs = CreatedRefs {
            players: self.ensure_players(&mut tx, &players).await?,
            ..Default::default()
        };

        let mut written = 0;
        for ban in bans {
            written += sqlx::query(
                r#"
                INSERT INTO bans (
                    id, player_id, ban_type, expires_on, notes, server_id,
                    updated_by, created_on, updated_on
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (id) DO UPDATE SET
                    ban_type = EXCLUDED.ban_type,
                    expires_on = EXCLUDED.expires_on,
                    notes = EXCLUDED.notes,
                    server_id = EXCLUDED.server_id,
                    updated_by = EXCLUDED.updated_by,
                    updated_on = EXCLUDED.updated_on
                "#,
            )
            .bind(ban.id)
            .bind(ban.player_id)
            .bind(&ban.ban_type)
            .bind(ban.expires_on)
            .bind(&ban.notes)
            .bind(ban.server_id)
            .bind(ban.updated_by)
            .bind(ban.created_on)
            .bind(ban.updated_on)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;
        self.remember_refs(&refs);

        Ok(written)
    }

    async fn active_bans(
        &self,
        players: &[i64],
        now: DateTime<Utc>,
    ) -> Result<Vec<ActiveBan>, StoreError> {
        let bans = sqlx::query_as::<_, ActiveBan>(
            r#"
            SELECT id, player_id, expires_on
            FROM bans
            WHERE player_id = ANY($1)
              AND (expires_on IS NULL OR expires_on > $2)
            ORDER BY id
            "#,
        )
        .bind(players)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(bans)
    }

    async fn set_banned(&self, players: &[i64], banned: bool) -> Result<u64, StoreError> {
        if players.is_empty() {
            return Ok(0);
        }
        let mut tx = self.begin().await?;
        let changed = sqlx::query(
            "UPDATE players SET is_banned = $2 WHERE steamid64 = ANY($1) AND is_banned <> $2",
        )
        .bind(players)
        .bind(banned)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;

        Ok(changed)
    }

    async fn players_with_archives(&self, players: &[i64]) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT player_id FROM archived_records WHERE player_id = ANY($1) ORDER BY player_id",
        )
        .bind(players)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn flagged_players(&self) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT steamid64 FROM players WHERE is_banned
            UNION
            SELECT player_id FROM archived_records
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn archive_records(&self, player_id: i64, ban_id: i64) -> Result<ArchiveOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let moved = sqlx::query(&format!(
            r#"
            WITH moved AS (
                DELETE FROM records WHERE player_id = $1
                RETURNING {cols}
            )
            INSERT INTO archived_records ({cols}, ban_id, archived_on)
            SELECT {cols}, $2, NOW() FROM moved
            "#,
            cols = RECORD_COLUMNS
        ))
        .bind(player_id)
        .bind(ban_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let outcome = if moved > 0 {
            ArchiveOutcome::Archived(moved)
        } else {
            let archived: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM archived_records WHERE player_id = $1)",
            )
            .bind(player_id)
            .fetch_one(&mut *tx)
            .await?;
            if archived {
                ArchiveOutcome::AlreadyArchived
            } else {
                ArchiveOutcome::NothingToArchive
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn restore_records(&self, player_id: i64) -> Result<u64, StoreError> {
        let mut tx = self.begin().await?;

        let restored = sqlx::query(&format!(
            r#"
            WITH moved AS (
                DELETE FROM archived_records WHERE player_id = $1
                RETURNING {cols}
            )
            INSERT INTO records ({cols})
            SELECT {cols} FROM moved
            "#,
            cols = RECORD_COLUMNS
        ))
        .bind(player_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(restored)
    }
}
