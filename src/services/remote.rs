//! Global API Client
//!
//! Rate-limited HTTP client for the KZ Global API (v2).
//!
//! # Pacing
//!
//! 모든 요청(records, bans)은 하나의 pacer를 통과함. pacer는 직전 요청
//! 시각을 잠근 채 최소 간격(`request_delay`)만큼 대기하므로, 여러 task가
//! 동시에 호출해도 전역 요청 속도는 1 / request_delay를 넘지 않음.
//!
//! # Outcomes
//!
//! | 응답 | 결과 |
//! |------|------|
//! | 2xx + body | `Found` |
//! | 404, `null` body | `NotFound` |
//! | 429 | `Throttled` (`Retry-After` 초 단위, 상한 이하일 때만 사용) |
//! | timeout, 연결 실패, 5xx, 깨진 body | `TransientError` |
//! | 정상 JSON이지만 스키마 불일치 | `Invalid` (재시도하지 않음) |
//!
//! `/bans` 페이지는 항목 단위로 검증해서 형식이 틀린 항목만 건너뜀.
//!
//! 재시도는 이 모듈이 아니라 호출하는 scraper의 `RetryPolicy`가 담당함.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::RemoteSettings;
use crate::db::{NewBan, NewRecord};
use crate::types::SteamId64;

/// 원격 호출 한 번의 결과
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Found(T),
    NotFound,
    Throttled { retry_after: Option<Duration> },
    TransientError(String),
    /// 응답은 왔지만 내용이 스키마에 맞지 않음
    Invalid(String),
}

/// 재시도 정책에 넘기기 위한 에러 형태
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("throttled by remote")]
    Throttled { retry_after: Option<Duration> },

    #[error("transient remote error: {0}")]
    Transient(String),

    #[error("invalid remote payload: {0}")]
    Invalid(String),
}

impl FetchError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, FetchError::Throttled { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl<T> FetchOutcome<T> {
    /// `NotFound`는 에러가 아니라 `Ok(None)`
    pub fn into_result(self) -> Result<Option<T>, FetchError> {
        match self {
            FetchOutcome::Found(value) => Ok(Some(value)),
            FetchOutcome::NotFound => Ok(None),
            FetchOutcome::Throttled { retry_after } => Err(FetchError::Throttled { retry_after }),
            FetchOutcome::TransientError(msg) => Err(FetchError::Transient(msg)),
            FetchOutcome::Invalid(msg) => Err(FetchError::Invalid(msg)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchOutcome<U> {
        match self {
            FetchOutcome::Found(value) => FetchOutcome::Found(f(value)),
            FetchOutcome::NotFound => FetchOutcome::NotFound,
            FetchOutcome::Throttled { retry_after } => FetchOutcome::Throttled { retry_after },
            FetchOutcome::TransientError(msg) => FetchOutcome::TransientError(msg),
            FetchOutcome::Invalid(msg) => FetchOutcome::Invalid(msg),
        }
    }
}

// ============ DTOs ============

/// `GET /records/{id}` 응답
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRecord {
    pub id: i64,
    pub steamid64: SteamId64,
    #[serde(default)]
    pub player_name: Option<String>,
    pub server_id: i64,
    #[serde(default)]
    pub server_name: Option<String>,
    pub map_id: i64,
    #[serde(default)]
    pub map_name: Option<String>,
    #[serde(default)]
    pub stage: i32,
    pub mode: String,
    #[serde(default = "default_tickrate")]
    pub tickrate: i32,
    pub time: f64,
    #[serde(default)]
    pub teleports: i32,
    #[serde(default)]
    pub points: i32,
    #[serde(deserialize_with = "timestamp::required")]
    pub created_on: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::required")]
    pub updated_on: DateTime<Utc>,
}

fn default_tickrate() -> i32 {
    128
}

impl From<ApiRecord> for NewRecord {
    fn from(r: ApiRecord) -> Self {
        NewRecord {
            original_id: r.id,
            player_id: r.steamid64.as_i64(),
            player_name: r.player_name.unwrap_or_default(),
            map_id: r.map_id,
            map_name: r.map_name.unwrap_or_default(),
            server_id: r.server_id,
            server_name: r.server_name.unwrap_or_default(),
            mode: r.mode,
            stage: r.stage,
            tickrate: r.tickrate,
            time: r.time,
            teleports: r.teleports,
            points: r.points,
            created_on: r.created_on,
            updated_on: r.updated_on,
        }
    }
}

/// `GET /bans` 응답 항목
#[derive(Debug, Clone, Deserialize)]
pub struct ApiBan {
    pub id: i64,
    pub ban_type: String,
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub expires_on: Option<DateTime<Utc>>,
    pub steamid64: SteamId64,
    #[serde(default)]
    pub player_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub server_id: Option<i64>,
    /// 문자열 steamid64 또는 숫자로 내려옴
    #[serde(default)]
    pub updated_by_id: Option<serde_json::Value>,
    #[serde(deserialize_with = "timestamp::required")]
    pub created_on: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::required")]
    pub updated_on: DateTime<Utc>,
}

impl From<ApiBan> for NewBan {
    fn from(b: ApiBan) -> Self {
        let updated_by = b.updated_by_id.as_ref().and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        NewBan {
            id: b.id,
            player_id: b.steamid64.as_i64(),
            player_name: b.player_name,
            ban_type: b.ban_type,
            expires_on: b.expires_on,
            notes: b.notes,
            server_id: b.server_id,
            updated_by,
            created_on: b.created_on,
            updated_on: b.updated_on,
        }
    }
}

/// `GET /bans` 한 페이지
#[derive(Debug, Clone, Default)]
pub struct BanPage {
    pub bans: Vec<ApiBan>,
    /// 형식이 맞지 않아 건너뛴 항목 수
    pub invalid: u64,
}

impl BanPage {
    pub fn from_entries(entries: Vec<serde_json::Value>) -> Self {
        let mut page = BanPage::default();
        for entry in entries {
            let id = entry.get("id").and_then(serde_json::Value::as_i64);
            match serde_json::from_value::<ApiBan>(entry) {
                Ok(ban) => page.bans.push(ban),
                Err(e) => {
                    page.invalid += 1;
                    warn!(ban_id = ?id, error = %e, "skipping malformed ban entry");
                }
            }
        }
        page
    }
}

/// Global API 타임스탬프: naive ISO-8601(UTC 가정) 또는 RFC 3339
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
                    .ok()
                    .map(|naive| Utc.from_utc_datetime(&naive))
            })
    }

    pub fn required<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp `{}`", raw)))
    }

    pub fn optional<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp `{}`", raw))),
        }
    }
}

// ============ Source trait ============

/// 원격 기록/밴 공급자
///
/// scraper는 이 trait에만 의존 (테스트는 `mock::ScriptedSource`)
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_record(&self, id: i64) -> FetchOutcome<ApiRecord>;

    /// 최신순 밴 목록
    async fn fetch_bans(&self, limit: u32, offset: u32) -> FetchOutcome<BanPage>;
}

// ============ HTTP client ============

pub struct GlobalApiClient {
    http: reqwest::Client,
    base_url: String,
    request_delay: Duration,
    throttle_cap: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl GlobalApiClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("kz-records-core/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            request_delay: settings.request_delay,
            throttle_cap: settings.throttle_cooldown_max,
            last_request: Mutex::new(None),
        })
    }

    /// 전역 최소 요청 간격 보장
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.request_delay {
                sleep(self.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> FetchOutcome<T> {
        self.pace().await;

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return FetchOutcome::TransientError(format!("timeout: {}", e)),
            Err(e) => return FetchOutcome::TransientError(e.to_string()),
        };

        let status = response.status();
        debug!(url, status = status.as_u16(), "remote response");

        match status {
            StatusCode::NOT_FOUND => FetchOutcome::NotFound,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, self.throttle_cap));
                FetchOutcome::Throttled { retry_after }
            }
            s if s.is_success() => match response.json::<Option<serde_json::Value>>().await {
                Ok(Some(body)) => match serde_json::from_value::<T>(body) {
                    Ok(value) => FetchOutcome::Found(value),
                    Err(e) => FetchOutcome::Invalid(e.to_string()),
                },
                Ok(None) => FetchOutcome::NotFound,
                Err(e) => FetchOutcome::TransientError(format!("malformed body: {}", e)),
            },
            s => FetchOutcome::TransientError(format!("HTTP {}", s)),
        }
    }
}

/// 초 단위 `Retry-After`. 상한을 넘으면 무시하고 기본 cooldown 사용
pub fn parse_retry_after(raw: &str, cap: Duration) -> Option<Duration> {
    let secs: u64 = raw.trim().parse().ok()?;
    let wait = Duration::from_secs(secs);
    (wait <= cap).then_some(wait)
}

#[async_trait]
impl RecordSource for GlobalApiClient {
    async fn fetch_record(&self, id: i64) -> FetchOutcome<ApiRecord> {
        let url = format!("{}/records/{}", self.base_url, id);
        self.get_json(&url).await
    }

    async fn fetch_bans(&self, limit: u32, offset: u32) -> FetchOutcome<BanPage> {
        let url = format!("{}/bans?limit={}&offset={}", self.base_url, limit, offset);
        self.get_json::<Vec<serde_json::Value>>(&url)
            .await
            .map(BanPage::from_entries)
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    /// id별로 미리 정한 결과를 순서대로 돌려주는 source
    ///
    /// 스크립트가 비어 있으면 `NotFound`
    #[derive(Default)]
    pub struct ScriptedSource {
        records: StdMutex<HashMap<i64, VecDeque<FetchOutcome<ApiRecord>>>>,
        bans: StdMutex<VecDeque<FetchOutcome<BanPage>>>,
        pub record_calls: AtomicU32,
        pub ban_calls: AtomicU32,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&self, id: i64, outcome: FetchOutcome<ApiRecord>) {
            self.records.lock().unwrap().entry(id).or_default().push_back(outcome);
        }

        pub fn found(&self, record: ApiRecord) {
            self.push(record.id, FetchOutcome::Found(record));
        }

        pub fn push_bans(&self, outcome: FetchOutcome<BanPage>) {
            self.bans.lock().unwrap().push_back(outcome);
        }

        pub fn calls(&self) -> u32 {
            self.record_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn fetch_record(&self, id: i64) -> FetchOutcome<ApiRecord> {
            self.record_calls.fetch_add(1, Ordering::SeqCst);
            self.records
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(|q| q.pop_front())
                .unwrap_or(FetchOutcome::NotFound)
        }

        async fn fetch_bans(&self, _limit: u32, _offset: u32) -> FetchOutcome<BanPage> {
            self.ban_calls.fetch_add(1, Ordering::SeqCst);
            self.bans
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| FetchOutcome::Found(BanPage::default()))
        }
    }

    pub fn api_record(id: i64, player: i64, map: i64, time: f64) -> ApiRecord {
        let at = timestamp::parse("2024-03-01T12:00:00").unwrap();
        ApiRecord {
            id,
            steamid64: SteamId64::new(player).unwrap(),
            player_name: Some(format!("player-{}", player)),
            server_id: 1,
            server_name: Some("server".into()),
            map_id: map,
            map_name: Some(format!("kz_map_{}", map)),
            stage: 0,
            mode: "kz_timer".into(),
            tickrate: 128,
            time,
            teleports: 0,
            points: 1000,
            created_on: at,
            updated_on: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::is_permanent;

    #[test]
    fn test_record_from_api_json() {
        let raw = r#"{
            "id": 21000001,
            "steamid64": "76561198000000001",
            "player_name": "runner",
            "steam_id": "STEAM_1:1:19867136",
            "server_id": 1203,
            "map_id": 200,
            "stage": 0,
            "mode": "kz_simple",
            "tickrate": 128,
            "time": 95.5,
            "teleports": 3,
            "created_on": "2024-03-01T12:00:00",
            "updated_on": "2024-03-01T12:00:00",
            "updated_by": 0,
            "server_name": "KZ Server",
            "map_name": "kz_beginnerblock_go",
            "points": 870,
            "record_filter_id": 0,
            "replay_id": 0
        }"#;
        let record: NewRecord = serde_json::from_str::<ApiRecord>(raw).unwrap().into();

        assert_eq!(record.original_id, 21_000_001);
        assert_eq!(record.player_id, 76_561_198_000_000_001);
        assert_eq!(record.map_name, "kz_beginnerblock_go");
        assert!(record.has_teleports());
        assert_eq!(record.created_on.to_rfc3339(), "2024-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_ban_sentinel_and_null_expiry() {
        let permanent = r#"{
            "id": 1, "ban_type": "bhop_hack", "expires_on": "9999-12-31T00:00:00",
            "steamid64": "76561198000000001", "updated_by_id": "76561198000000009",
            "created_on": "2024-01-01T00:00:00", "updated_on": "2024-01-01T00:00:00"
        }"#;
        let open = r#"{
            "id": 2, "ban_type": "other", "expires_on": null,
            "steamid64": 76561198000000002,
            "created_on": "2024-01-01T00:00:00Z", "updated_on": "2024-01-01T00:00:00Z"
        }"#;

        let permanent: NewBan = serde_json::from_str::<ApiBan>(permanent).unwrap().into();
        let open: NewBan = serde_json::from_str::<ApiBan>(open).unwrap().into();

        assert!(is_permanent(permanent.expires_on));
        assert_eq!(permanent.updated_by, Some(76_561_198_000_000_009));
        assert_eq!(open.expires_on, None);
        assert!(!is_permanent(open.expires_on));
    }

    #[test]
    fn test_bad_timestamp_is_rejected() {
        let raw = r#"{
            "id": 3, "ban_type": "x", "steamid64": "76561198000000001",
            "created_on": "yesterday", "updated_on": "2024-01-01T00:00:00"
        }"#;
        assert!(serde_json::from_str::<ApiBan>(raw).is_err());
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(FetchOutcome::Found(1).into_result(), Ok(Some(1)));
        assert_eq!(FetchOutcome::<i32>::NotFound.into_result(), Ok(None));

        let throttled = FetchOutcome::<i32>::Throttled { retry_after: None }.into_result();
        assert!(throttled.unwrap_err().is_throttled());

        let transient = FetchOutcome::<i32>::TransientError("HTTP 502".into()).into_result();
        assert!(transient.unwrap_err().is_transient());

        let invalid = FetchOutcome::<i32>::Invalid("missing field `time`".into()).into_result().unwrap_err();
        assert!(!invalid.is_transient());
        assert!(!invalid.is_throttled());
    }

    #[test]
    fn test_ban_page_skips_malformed_entries() {
        let entries = vec![
            serde_json::json!({
                "id": 1, "ban_type": "bhop_hack", "expires_on": null,
                "steamid64": "76561198000000001",
                "created_on": "2024-01-01T00:00:00", "updated_on": "2024-01-01T00:00:00"
            }),
            serde_json::json!({ "id": 2, "ban_type": "bhop_hack", "steamid64": "not-a-steamid" }),
        ];

        let page = BanPage::from_entries(entries);

        assert_eq!(page.bans.len(), 1);
        assert_eq!(page.bans[0].id, 1);
        assert_eq!(page.invalid, 1);
    }

    #[test]
    fn test_retry_after_respects_cap() {
        let cap = Duration::from_secs(60);
        assert_eq!(parse_retry_after("30", cap), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("600", cap), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", cap), None);
    }

    #[tokio::test]
    async fn test_pacer_spaces_requests() {
        let settings = RemoteSettings {
            request_delay: Duration::from_millis(40),
            ..RemoteSettings::default()
        };
        let client = GlobalApiClient::new(&settings).unwrap();

        let started = Instant::now();
        client.pace().await;
        client.pace().await;
        client.pace().await;

        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
