use crate::db::PersistentStore;
use dashmap::DashMap;
use mirrorcache_core::mirror::{Mirror, MirrorStatus};
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// In-memory mirror map reflecting the persisted `mirrors` table (§4.4).
/// Reads never touch the store; every mutation writes through.
#[derive(Clone)]
pub struct MirrorRegistry {
    store: Arc<PersistentStore>,
    mirrors: Arc<DashMap<String, Mirror>>,
    http: reqwest::Client,
}

impl MirrorRegistry {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self {
            store,
            mirrors: Arc::new(DashMap::new()),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client"),
        }
    }

    pub async fn load_from_store(&self) -> Result<(), sqlx::Error> {
        let mirrors = self.store.load_mirrors().await?;
        self.mirrors.clear();
        let count = mirrors.len();
        for mirror in mirrors {
            self.mirrors.insert(mirror.name.clone(), mirror);
        }
        info!(count, "loaded mirrors from persistent store");
        Ok(())
    }

    /// Approved mirrors only, as used for cache routing.
    pub fn get_approved(&self) -> std::collections::HashMap<String, Vec<String>> {
        self.mirrors
            .iter()
            .filter(|entry| entry.status == MirrorStatus::Approved)
            .map(|entry| (entry.name.clone(), entry.urls.clone()))
            .collect()
    }

    /// Full table, for the admin panel.
    pub fn get_all(&self) -> Vec<Mirror> {
        self.mirrors.iter().map(|entry| entry.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Mirror> {
        self.mirrors.get(name).map(|entry| entry.clone())
    }

    /// Insert a new mirror. Rejects self-referencing names and filters out
    /// unreachable URLs; fails if none survive (§4.4, §8 property 7).
    pub async fn save(
        &self,
        name: &str,
        urls: Vec<String>,
        status: MirrorStatus,
    ) -> Result<bool, sqlx::Error> {
        if is_self(name) {
            warn!(name, "refusing to save self-referencing mirror");
            return Ok(false);
        }

        let valid_urls = self.filter_reachable(urls).await;
        if valid_urls.is_empty() {
            warn!(name, "no reachable urls for mirror, not saving");
            return Ok(false);
        }

        let mirror = Mirror::new(name, valid_urls, status);
        self.store.upsert_mirror(&mirror).await?;
        self.mirrors.insert(name.to_string(), mirror);
        info!(name, "saved mirror");
        Ok(true)
    }

    pub async fn update(
        &self,
        name: &str,
        urls: Option<Vec<String>>,
        status: Option<MirrorStatus>,
    ) -> Result<bool, sqlx::Error> {
        let Some(mut current) = self.get(name) else {
            return Ok(false);
        };

        if let Some(urls) = urls {
            let valid = self.filter_reachable(urls).await;
            if valid.is_empty() {
                warn!(name, "no valid urls provided for update");
                return Ok(false);
            }
            current.urls = valid;
        }
        if let Some(status) = status {
            current.status = status;
        }

        self.store.upsert_mirror(&current).await?;
        self.mirrors.insert(name.to_string(), current);
        info!(name, "updated mirror");
        Ok(true)
    }

    pub async fn delete(&self, name: &str) -> Result<bool, sqlx::Error> {
        let deleted = self.store.delete_mirror(name).await?;
        self.mirrors.remove(name);
        Ok(deleted)
    }

    async fn filter_reachable(&self, urls: Vec<String>) -> Vec<String> {
        let mut valid = Vec::with_capacity(urls.len());
        for url in urls {
            if self.is_reachable(&url).await {
                valid.push(url);
            }
        }
        valid
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(resp) => resp.status().as_u16() < 400,
            Err(e) => {
                warn!(url, error = %e, "mirror reachability check failed");
                false
            }
        }
    }

    /// Choose which approved mirror name to use for `(distro, package_path)`
    /// (§4.4): prefer `{distro}-security` when the path looks like a
    /// security update and that mirror exists, else fall back to `distro`.
    pub fn pick_upstream_key(&self, distro: &str, package_path: &str) -> String {
        if package_path.to_lowercase().contains("security") {
            let security_key = format!("{distro}-security");
            if self
                .mirrors
                .get(&security_key)
                .is_some_and(|m| m.status == MirrorStatus::Approved)
            {
                return security_key;
            }
        }
        distro.to_string()
    }
}

/// True if `host` names this process: the well-known loopback spellings, or
/// a hostname that resolves to one of this machine's own addresses (§4.4).
pub fn is_self(host: &str) -> bool {
    let hostname = host.split(':').next().unwrap_or(host);

    if matches!(hostname, "localhost" | "127.0.0.1" | "::1" | "0.0.0.0") {
        return true;
    }

    let Some(local_hostname) = local_hostname() else {
        return false;
    };

    let local_ips: Vec<std::net::IpAddr> = (local_hostname.as_str(), 0)
        .to_socket_addrs()
        .map(|iter| iter.map(|sa| sa.ip()).collect())
        .unwrap_or_default();

    let host_ips: Vec<std::net::IpAddr> = (hostname, 0)
        .to_socket_addrs()
        .map(|iter| iter.map(|sa| sa.ip()).collect())
        .unwrap_or_default();

    host_ips.iter().any(|ip| local_ips.contains(ip))
}

/// This machine's hostname via the POSIX `gethostname(2)` syscall.
fn local_hostname() -> Option<String> {
    let mut buf = vec![0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if ret != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..end].to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_loopback_spellings_are_self() {
        for host in ["localhost", "127.0.0.1", "::1", "0.0.0.0"] {
            assert!(is_self(host));
        }
    }

    #[test]
    fn unrelated_host_is_not_self() {
        assert!(!is_self("deb.debian.org"));
    }

    #[test]
    fn loopback_with_port_is_still_self() {
        assert!(is_self("127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn pick_upstream_key_prefers_security_variant_when_present() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let registry = MirrorRegistry::new(store);
        // Insert directly rather than through `save`, which would perform a
        // real network reachability check.
        registry.mirrors.insert(
            "ubuntu-security".to_string(),
            Mirror::new("ubuntu-security", vec!["http://a.test".into()], MirrorStatus::Approved),
        );
        assert_eq!(
            registry.pick_upstream_key("ubuntu", "dists/jammy-security/main"),
            "ubuntu-security"
        );
    }

    #[tokio::test]
    async fn pick_upstream_key_falls_back_to_distro_without_security_mirror() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let registry = MirrorRegistry::new(store);
        assert_eq!(
            registry.pick_upstream_key("ubuntu", "dists/jammy-security/main"),
            "ubuntu"
        );
    }

    #[tokio::test]
    async fn save_rejects_self_referencing_name_without_mutating_state() {
        let store = Arc::new(PersistentStore::open_in_memory().await.unwrap());
        let registry = MirrorRegistry::new(store);
        let saved = registry
            .save("localhost", vec!["http://localhost/repo".into()], MirrorStatus::Pending)
            .await
            .unwrap();
        assert!(!saved);
        assert!(registry.get("localhost").is_none());
    }
}
