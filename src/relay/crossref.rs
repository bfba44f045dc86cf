//! Cross-reference maps
//!
//! Six directional tables (one per ordered platform pair) mapping a native id
//! on one platform to the native id of the same relayed message on another.
//! All tables sit behind one lock so both directions of a pair become
//! visible together. Entries are never evicted; after a restart the maps are
//! empty and resolution falls back to the identity store.

use super::types::{NativeId, Platform};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type Route = (Platform, Platform);

/// Process-lifetime bidirectional id maps shared by all dispatch pipelines
#[derive(Clone)]
pub struct CrossRefMaps {
    tables: Arc<RwLock<HashMap<Route, HashMap<NativeId, NativeId>>>>,
}

impl CrossRefMaps {
    /// Create empty maps for every ordered platform pair
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        for from in Platform::ALL {
            for to in from.others() {
                tables.insert((from, to), HashMap::new());
            }
        }
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Insert both directions of a pair as one unit.
    ///
    /// Returns false (and inserts nothing) when both ids belong to the same
    /// platform.
    pub async fn insert_pair(&self, a: NativeId, b: NativeId) -> bool {
        if a.platform() == b.platform() {
            tracing::warn!(a = %a, b = %b, "Refusing same-platform cross reference");
            return false;
        }
        let mut tables = self.tables.write().await;
        Self::insert_locked(&mut tables, a, b);
        true
    }

    /// Insert every cross-platform pair among `ids` under a single lock
    pub async fn insert_group(&self, ids: &[NativeId]) -> usize {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                if a.platform() != b.platform() {
                    Self::insert_locked(&mut tables, a.clone(), b.clone());
                    inserted += 1;
                }
            }
        }
        inserted
    }

    fn insert_locked(
        tables: &mut HashMap<Route, HashMap<NativeId, NativeId>>,
        a: NativeId,
        b: NativeId,
    ) {
        let (pa, pb) = (a.platform(), b.platform());
        tables.entry((pa, pb)).or_default().insert(a.clone(), b.clone());
        tables.entry((pb, pa)).or_default().insert(b, a);
    }

    /// Foreign id on `target` for a native id, if a pair was recorded
    pub async fn lookup(&self, id: &NativeId, target: Platform) -> Option<NativeId> {
        if id.platform() == target {
            return None;
        }
        let tables = self.tables.read().await;
        tables
            .get(&(id.platform(), target))
            .and_then(|table| table.get(id))
            .cloned()
    }

    /// Number of entries in one directional table
    pub async fn len(&self, from: Platform, to: Platform) -> usize {
        let tables = self.tables.read().await;
        tables.get(&(from, to)).map(HashMap::len).unwrap_or(0)
    }

    /// Total entries across all six tables
    pub async fn total_entries(&self) -> usize {
        let tables = self.tables.read().await;
        tables.values().map(HashMap::len).sum()
    }
}

impl Default for CrossRefMaps {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_maps_have_six_empty_tables() {
        let maps = CrossRefMaps::new();
        assert_eq!(maps.tables.read().await.len(), 6);
        assert_eq!(maps.total_entries().await, 0);
    }

    #[tokio::test]
    async fn test_insert_pair_is_bidirectional() {
        let maps = CrossRefMaps::new();
        assert!(
            maps.insert_pair(NativeId::Telegram(100), NativeId::Discord(555))
                .await
        );

        assert_eq!(
            maps.lookup(&NativeId::Telegram(100), Platform::Discord).await,
            Some(NativeId::Discord(555))
        );
        assert_eq!(
            maps.lookup(&NativeId::Discord(555), Platform::Telegram).await,
            Some(NativeId::Telegram(100))
        );
        // Unrelated tables untouched
        assert_eq!(
            maps.lookup(&NativeId::Telegram(100), Platform::Slack).await,
            None
        );
        assert_eq!(maps.len(Platform::Telegram, Platform::Discord).await, 1);
        assert_eq!(maps.len(Platform::Discord, Platform::Telegram).await, 1);
        assert_eq!(maps.total_entries().await, 2);
    }

    #[tokio::test]
    async fn test_same_platform_pair_rejected() {
        let maps = CrossRefMaps::new();
        assert!(
            !maps
                .insert_pair(NativeId::Telegram(1), NativeId::Telegram(2))
                .await
        );
        assert_eq!(maps.total_entries().await, 0);
        assert_eq!(
            maps.lookup(&NativeId::Telegram(1), Platform::Telegram).await,
            None
        );
    }

    #[tokio::test]
    async fn test_insert_group_links_every_pair() {
        let maps = CrossRefMaps::new();
        let slack = NativeId::Slack("1712345678.000200".to_string());
        let inserted = maps
            .insert_group(&[NativeId::Telegram(7), NativeId::Discord(9), slack.clone()])
            .await;
        assert_eq!(inserted, 3);
        assert_eq!(maps.total_entries().await, 6);

        assert_eq!(
            maps.lookup(&slack, Platform::Telegram).await,
            Some(NativeId::Telegram(7))
        );
        assert_eq!(
            maps.lookup(&NativeId::Discord(9), Platform::Slack).await,
            Some(slack)
        );
    }

    #[tokio::test]
    async fn test_concurrent_inserts_never_one_sided() {
        let maps = CrossRefMaps::new();
        let mut handles = Vec::new();
        for i in 0..64i64 {
            let maps = maps.clone();
            handles.push(tokio::spawn(async move {
                maps.insert_pair(NativeId::Telegram(i), NativeId::Discord(1000 + i as u64))
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        for i in 0..64i64 {
            let forward = maps.lookup(&NativeId::Telegram(i), Platform::Discord).await;
            let backward = maps
                .lookup(&NativeId::Discord(1000 + i as u64), Platform::Telegram)
                .await;
            assert_eq!(forward, Some(NativeId::Discord(1000 + i as u64)));
            assert_eq!(backward, Some(NativeId::Telegram(i)));
        }
    }
}
