//! In-memory lookup cache
//!
//! 이미 DB에 존재함이 확인된 player / map / server id 집합.
//! 프로세스 수명 동안 추가만 되며(append-only), 키는 해당 행을 만든
//! 트랜잭션이 commit된 뒤에만 기록됨. 동시에 같은 키를 놓친 경우
//! `ON CONFLICT DO NOTHING` 왕복이 한 번 더 생길 뿐 데이터는 안전함.

use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind {
    Player,
    Map,
    Server,
}

#[derive(Debug, Default)]
pub struct LookupCache {
    known: RwLock<HashSet<(LookupKind, i64)>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 캐시에 없는 id만 중복 없이 반환
    pub fn missing(&self, kind: LookupKind, ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
        let known = self.known.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| !known.contains(&(kind, *id)) && seen.insert(*id))
            .collect()
    }

    pub fn remember(&self, kind: LookupKind, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        let mut known = self.known.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        known.extend(ids.iter().map(|id| (kind, *id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dedups_and_skips_known() {
        let cache = LookupCache::new();
        cache.remember(LookupKind::Map, &[1, 2]);

        let missing = cache.missing(LookupKind::Map, vec![2, 3, 3, 4]);
        assert_eq!(missing, vec![3, 4]);
    }

    #[test]
    fn test_kinds_are_separate() {
        let cache = LookupCache::new();
        cache.remember(LookupKind::Player, &[7]);

        assert!(cache.missing(LookupKind::Player, vec![7]).is_empty());
        assert_eq!(cache.missing(LookupKind::Server, vec![7]), vec![7]);
    }
}
