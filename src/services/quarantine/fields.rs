//! Per-variant jumpstat schema
//!
//! 세 variant는 같은 의미의 필드를 서로 다른 컬럼명으로 저장함.
//! 필터 작성자는 variant와 무관한 의미 필드명(`distance`, `sync`, ...)을 쓰고,
//! 여기 정적 매핑이 실제 컬럼으로 변환함.
//!
//! ```text
//! semantic      csgo          cs2               css
//! ─────────────────────────────────────────────────────────
//! player        steamid64     player_id         steam_id
//! distance      distance      distance          dist          (x10000)
//! sync          sync          sync_pct          sync          (x100)
//! created_on    created_on    created_at        created_on
//! ```

use crate::types::GameVariant;

/// 컬럼 값 종류 (바인딩 캐스트 결정)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Timestamp,
}

/// 의미 필드 하나의 매핑
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    /// 저장 시 곱해진 정수 배율 (1 = 배율 없음)
    pub scale: i64,
}

/// variant별 jumpstat 테이블 정의
#[derive(Debug)]
pub struct VariantSchema {
    pub variant: GameVariant,
    pub table: &'static str,
    pub quarantine_table: &'static str,
    /// 활성 테이블의 전체 컬럼 (복사/복원 시 순서 그대로 사용)
    pub columns: &'static [&'static str],
    pub fields: &'static [FieldSpec],
}

impl VariantSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn id_column(&self) -> &'static str {
        "id"
    }
}

/// 거리 계열: 1/10000 유닛 정수로 저장
pub const DISTANCE_SCALE: i64 = 10_000;
/// 비율 계열 (sync, efficiency, overlap, dead_air): 1/100 % 정수로 저장
pub const RATIO_SCALE: i64 = 100;

const fn field(name: &'static str, column: &'static str, kind: FieldKind, scale: i64) -> FieldSpec {
    FieldSpec { name, column, kind, scale }
}

use FieldKind::{Float, Integer, Text, Timestamp};

static CSGO: VariantSchema = VariantSchema {
    variant: GameVariant::Csgo,
    table: "csgo_jumpstats",
    quarantine_table: "csgo_jumpstats_quarantine",
    columns: &[
        "id", "steamid64", "server_id", "map_id", "mode", "jump_type", "distance", "edge",
        "block", "pre", "max", "strafes", "sync", "overlap", "dead_air", "height", "airtime",
        "created_on",
    ],
    fields: &[
        field("id", "id", Integer, 1),
        field("player", "steamid64", Integer, 1),
        field("server", "server_id", Integer, 1),
        field("map", "map_id", Integer, 1),
        field("mode", "mode", Text, 1),
        field("jump_type", "jump_type", Text, 1),
        field("distance", "distance", Integer, DISTANCE_SCALE),
        field("edge", "edge", Integer, DISTANCE_SCALE),
        field("block", "block", Integer, 1),
        field("pre_speed", "pre", Float, 1),
        field("max_speed", "max", Float, 1),
        field("strafes", "strafes", Integer, 1),
        field("sync", "sync", Integer, RATIO_SCALE),
        field("overlap", "overlap", Integer, RATIO_SCALE),
        field("dead_air", "dead_air", Integer, RATIO_SCALE),
        field("height", "height", Float, 1),
        field("airtime", "airtime", Integer, 1),
        field("created_on", "created_on", Timestamp, 1),
    ],
};

static CS2: VariantSchema = VariantSchema {
    variant: GameVariant::Cs2,
    table: "cs2_jumpstats",
    quarantine_table: "cs2_jumpstats_quarantine",
    columns: &[
        "id", "player_id", "server_id", "map_id", "mode", "jump_type", "distance", "edge",
        "block", "pre_speed", "max_speed", "strafe_count", "sync_pct", "gain_efficiency",
        "overlap_pct", "dead_air_pct", "max_height", "air_time", "created_at",
    ],
    fields: &[
        field("id", "id", Integer, 1),
        field("player", "player_id", Integer, 1),
        field("server", "server_id", Integer, 1),
        field("map", "map_id", Integer, 1),
        field("mode", "mode", Text, 1),
        field("jump_type", "jump_type", Text, 1),
        field("distance", "distance", Integer, DISTANCE_SCALE),
        field("edge", "edge", Integer, DISTANCE_SCALE),
        field("block", "block", Integer, 1),
        field("pre_speed", "pre_speed", Float, 1),
        field("max_speed", "max_speed", Float, 1),
        field("strafes", "strafe_count", Integer, 1),
        field("sync", "sync_pct", Integer, RATIO_SCALE),
        field("efficiency", "gain_efficiency", Integer, RATIO_SCALE),
        field("overlap", "overlap_pct", Integer, RATIO_SCALE),
        field("dead_air", "dead_air_pct", Integer, RATIO_SCALE),
        field("height", "max_height", Float, 1),
        field("airtime", "air_time", Integer, 1),
        field("created_on", "created_at", Timestamp, 1),
    ],
};

// css 파티션에는 efficiency / overlap / dead_air가 없음
static CSS: VariantSchema = VariantSchema {
    variant: GameVariant::Css,
    table: "css_jumpstats",
    quarantine_table: "css_jumpstats_quarantine",
    columns: &[
        "id", "steam_id", "server", "map", "mode", "jumptype", "dist", "edge_dist",
        "block_dist", "prestrafe", "maxspeed", "strafes", "sync", "height", "airtime",
        "created_on",
    ],
    fields: &[
        field("id", "id", Integer, 1),
        field("player", "steam_id", Integer, 1),
        field("server", "server", Integer, 1),
        field("map", "map", Integer, 1),
        field("mode", "mode", Text, 1),
        field("jump_type", "jumptype", Text, 1),
        field("distance", "dist", Integer, DISTANCE_SCALE),
        field("edge", "edge_dist", Integer, DISTANCE_SCALE),
        field("block", "block_dist", Integer, 1),
        field("pre_speed", "prestrafe", Float, 1),
        field("max_speed", "maxspeed", Float, 1),
        field("strafes", "strafes", Integer, 1),
        field("sync", "sync", Integer, RATIO_SCALE),
        field("height", "height", Float, 1),
        field("airtime", "airtime", Integer, 1),
        field("created_on", "created_on", Timestamp, 1),
    ],
};

/// variant의 스키마
pub fn schema(variant: GameVariant) -> &'static VariantSchema {
    match variant {
        GameVariant::Csgo => &CSGO,
        GameVariant::Cs2 => &CS2,
        GameVariant::Css => &CSS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_mapped_column_exists_in_table() {
        for variant in GameVariant::ALL {
            let s = schema(variant);
            for f in s.fields {
                assert!(
                    s.columns.contains(&f.column),
                    "{}: {} -> {} missing from column list",
                    variant,
                    f.name,
                    f.column
                );
            }
        }
    }

    #[test]
    fn test_semantic_fields_map_to_variant_columns() {
        assert_eq!(schema(GameVariant::Csgo).field("player").unwrap().column, "steamid64");
        assert_eq!(schema(GameVariant::Cs2).field("sync").unwrap().column, "sync_pct");
        assert_eq!(schema(GameVariant::Css).field("distance").unwrap().column, "dist");
        assert!(schema(GameVariant::Css).field("efficiency").is_none());
    }

    #[test]
    fn test_scaled_fields() {
        let cs2 = schema(GameVariant::Cs2);
        assert_eq!(cs2.field("distance").unwrap().scale, 10_000);
        assert_eq!(cs2.field("efficiency").unwrap().scale, 100);
        assert_eq!(cs2.field("strafes").unwrap().scale, 1);
    }
}
