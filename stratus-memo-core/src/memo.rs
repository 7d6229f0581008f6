use moka::sync::Cache;
use std::{any::Any, sync::Arc};

/// Which side of a reconciliation a memoized record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Cloud,
    Db,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    side: Side,
    kind: &'static str,
    id: Arc<str>,
}

impl MemoKey {
    pub fn new(side: Side, kind: &'static str, id: &str) -> Self {
        Self {
            side,
            kind,
            id: Arc::from(id),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

pub type MemoValue = Arc<dyn Any + Send + Sync>;
type MemoCacheStore = Cache<MemoKey, MemoValue, ahash::RandomState>;

/// Records already read during one reconciliation pass.
///
/// Values are stored type-erased and cloned back out on hit; a lookup with the
/// wrong type behaves like a miss. The store is never persisted and must not
/// outlive the pass that created it.
pub struct MemoStore {
    cache: MemoCacheStore,
}

impl MemoStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity.max(1))
            .build_with_hasher(ahash::RandomState::new());

        Self { cache }
    }

    pub fn get<T>(&self, side: Side, kind: &'static str, id: &str) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.cache
            .get(&MemoKey::new(side, kind, id))
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    pub fn put<T>(&self, side: Side, kind: &'static str, id: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.cache
            .insert(MemoKey::new(side, kind, id), Arc::new(value) as MemoValue);
    }

    pub fn forget(&self, side: Side, kind: &'static str, id: &str) {
        self.cache.invalidate(&MemoKey::new(side, kind, id));
    }

    pub fn contains(&self, side: Side, kind: &'static str, id: &str) -> bool {
        self.cache.contains_key(&MemoKey::new(side, kind, id))
    }

    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Vpc {
        cidr: String,
    }

    #[test]
    fn get_returns_none_when_nothing_was_read() {
        let memo = MemoStore::new(16);
        assert!(memo.get::<Vpc>(Side::Cloud, "vpc", "vpc-1|us-east-1").is_none());
    }

    #[test]
    fn sides_are_kept_apart() {
        let memo = MemoStore::new(16);
        let cloud = Vpc {
            cidr: "10.0.0.0/16".to_string(),
        };
        memo.put(Side::Cloud, "vpc", "vpc-1|us-east-1", cloud.clone());

        assert_eq!(
            memo.get::<Vpc>(Side::Cloud, "vpc", "vpc-1|us-east-1"),
            Some(cloud)
        );
        assert!(memo.get::<Vpc>(Side::Db, "vpc", "vpc-1|us-east-1").is_none());
    }

    #[test]
    fn wrong_type_is_a_miss() {
        let memo = MemoStore::new(16);
        memo.put(Side::Db, "topic", "orders|us-east-1", 7_u32);
        assert!(memo.get::<String>(Side::Db, "topic", "orders|us-east-1").is_none());
        assert_eq!(memo.get::<u32>(Side::Db, "topic", "orders|us-east-1"), Some(7));
    }

    #[test]
    fn forget_drops_entry() {
        let memo = MemoStore::new(16);
        memo.put(Side::Cloud, "subnet", "subnet-1|eu-west-1", 1_u8);
        assert!(memo.contains(Side::Cloud, "subnet", "subnet-1|eu-west-1"));
        memo.forget(Side::Cloud, "subnet", "subnet-1|eu-west-1");
        assert!(!memo.contains(Side::Cloud, "subnet", "subnet-1|eu-west-1"));
        assert!(memo.is_empty());
    }
}
