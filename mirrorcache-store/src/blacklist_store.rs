use crate::db::PersistentStore;
use mirrorcache_core::blacklist::Blacklist;
use std::sync::Arc;

/// Wraps the in-memory `Blacklist` (mirrorcache-core) with durability
/// against the `blacklist` table — mutations write through, reads are
/// served entirely from memory (§4.5, §5).
#[derive(Clone)]
pub struct BlacklistStore {
    store: Arc<PersistentStore>,
    blacklist: Arc<Blacklist>,
}

impl BlacklistStore {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            blacklist: Arc::new(Blacklist::new()),
        }
    }

    pub fn blacklist(&self) -> Arc<Blacklist> {
        Arc::clone(&self.blacklist)
    }

    pub async fn load_from_store(&self) -> Result<(), sqlx::Error> {
        let patterns = self.store.load_blacklist().await?;
        self.blacklist.replace_all(patterns);
        Ok(())
    }

    pub async fn add(&self, pattern: &str) -> Result<(), sqlx::Error> {
        self.store.add_blacklist_pattern(pattern).await?;
        self.blacklist.add(pattern);
        Ok(())
    }

    pub async fn remove(&self, pattern: &str) -> Result<bool, sqlx::Error> {
        let removed = self.store.remove_blacklist_pattern(pattern).await?;
        self.blacklist.remove(pattern);
        Ok(removed)
    }

    pub fn patterns(&self) -> Vec<String> {
        self.blacklist.patterns()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_load_round_trip() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let bl = BlacklistStore::new(store.clone());
        bl.add("*.deb").await.unwrap();

        let reloaded = BlacklistStore::new(store);
        reloaded.load_from_store().await.unwrap();
        assert!(reloaded.blacklist().matches("x.deb"));
    }

    #[tokio::test]
    async fn remove_updates_memory_immediately() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let bl = BlacklistStore::new(store);
        bl.add("nvidia").await.unwrap();
        assert!(bl.remove("nvidia").await.unwrap());
        assert!(!bl.blacklist().matches("nvidia-driver"));
    }
}
