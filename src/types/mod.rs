//! Common Types Module
//!
//! 애플리케이션 전반에서 사용되는 공통 타입 정의

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// API 응답 래퍼
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// SteamID64 타입
///
/// Global API는 steamid64를 문자열로 내려주므로 파싱 시 검증
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "SteamIdRepr", into = "String")]
pub struct SteamId64(i64);

/// 개인 계정 SteamID64의 하한 (universe 1, individual account)
const STEAMID64_BASE: i64 = 76_561_197_960_265_728;

impl SteamId64 {
    pub fn new(raw: i64) -> Result<Self, String> {
        if raw > STEAMID64_BASE {
            Ok(Self(raw))
        } else {
            Err(format!("Invalid SteamID64: {}", raw))
        }
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for SteamId64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SteamId64 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid SteamID64: {:?}", s))?;
        Self::new(raw)
    }
}

impl From<SteamId64> for String {
    fn from(id: SteamId64) -> Self {
        id.0.to_string()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SteamIdRepr {
    Text(String),
    Number(i64),
}

impl TryFrom<SteamIdRepr> for SteamId64 {
    type Error = String;

    fn try_from(repr: SteamIdRepr) -> Result<Self, Self::Error> {
        match repr {
            SteamIdRepr::Text(s) => s.parse(),
            SteamIdRepr::Number(n) => SteamId64::new(n),
        }
    }
}

/// 게임 variant (jumpstat 파티션 단위)
///
/// 세 파티션은 같은 의미의 필드를 서로 다른 컬럼명으로 저장함
/// (`services::quarantine::fields` 매핑 참고)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameVariant {
    Csgo,
    Cs2,
    Css,
}

impl GameVariant {
    pub const ALL: [GameVariant; 3] = [GameVariant::Csgo, GameVariant::Cs2, GameVariant::Css];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameVariant::Csgo => "csgo",
            GameVariant::Cs2 => "cs2",
            GameVariant::Css => "css",
        }
    }
}

impl fmt::Display for GameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csgo" => Ok(GameVariant::Csgo),
            "cs2" => Ok(GameVariant::Cs2),
            "css" => Ok(GameVariant::Css),
            other => Err(format!("Unknown game variant: {}", other)),
        }
    }
}

/// 한 번의 호출이 대상으로 하는 variant 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantTarget {
    One(GameVariant),
    All,
}

impl VariantTarget {
    pub fn variants(&self) -> Vec<GameVariant> {
        match self {
            VariantTarget::One(v) => vec![*v],
            VariantTarget::All => GameVariant::ALL.to_vec(),
        }
    }
}

impl FromStr for VariantTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(VariantTarget::All)
        } else {
            s.parse().map(VariantTarget::One)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steamid_valid() {
        let id: SteamId64 = "76561198000000000".parse().unwrap();
        assert_eq!(id.as_i64(), 76_561_198_000_000_000);
    }

    #[test]
    fn test_steamid_invalid() {
        assert!("12345".parse::<SteamId64>().is_err());
        assert!("not-a-number".parse::<SteamId64>().is_err());
    }

    #[test]
    fn test_steamid_deserializes_from_string_or_number() {
        let a: SteamId64 = serde_json::from_str("\"76561198000000001\"").unwrap();
        let b: SteamId64 = serde_json::from_str("76561198000000001").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_variant_target_parse() {
        assert_eq!("all".parse::<VariantTarget>().unwrap(), VariantTarget::All);
        assert_eq!(
            "CS2".parse::<VariantTarget>().unwrap(),
            VariantTarget::One(GameVariant::Cs2)
        );
        assert!("tf2".parse::<VariantTarget>().is_err());
        assert_eq!(VariantTarget::All.variants().len(), 3);
    }
}
