use mirrorcache_core::mirror::{Mirror, MirrorStatus};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Built-in mirror table seeded into an empty `mirrors` table on first run
/// (§1: "specific default mirror list... is data, not design" — a small,
/// representative seed rather than an exhaustive one).
fn default_mirrors() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        ("debian", &["http://deb.debian.org/debian"]),
        ("debian-security", &["http://security.debian.org/debian-security"]),
        ("ubuntu", &["http://archive.ubuntu.com/ubuntu"]),
        ("ubuntu-security", &["http://security.ubuntu.com/ubuntu"]),
        ("fedora", &["http://download.fedoraproject.org/pub/fedora/linux"]),
        ("archlinux", &["http://mirrors.kernel.org/archlinux"]),
        ("alpine", &["http://dl-cdn.alpinelinux.org/alpine"]),
    ]
}

pub const STATS_KEYS: [&str; 4] = [
    "requests_total",
    "cache_hits",
    "cache_misses",
    "bytes_served",
];

/// A single-file relational datastore (§4.2): `stats`, `mirrors`,
/// `blacklist`. Guarded by a one-connection pool so every operation is
/// naturally serialized — short-lived, no long-running transactions.
#[derive(Clone)]
pub struct PersistentStore {
    pool: SqlitePool,
}

impl PersistentStore {
    pub async fn open(database_path: &str) -> Result<Self, sqlx::Error> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = std::fs::create_dir_all(parent);
            }
        }
        let url = format!("sqlite://{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stats (key TEXT PRIMARY KEY, value INTEGER NOT NULL DEFAULT 0)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS mirrors (
                name TEXT PRIMARY KEY,
                urls TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'approved'
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blacklist (
                pattern TEXT PRIMARY KEY,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;

        // Legacy rows written before the status column existed default to
        // 'approved' — matches the source's migration-on-read behavior.
        // Nothing to alter here since CREATE TABLE IF NOT EXISTS already
        // includes the column for fresh databases; genuinely pre-existing
        // files without the column would fail the INSERT/SELECT below and
        // are handled by the query-level COALESCE.

        for key in STATS_KEYS {
            sqlx::query("INSERT OR IGNORE INTO stats (key, value) VALUES (?, 0)")
                .bind(key)
                .execute(&self.pool)
                .await?;
        }

        let count: i64 = sqlx::query("SELECT COUNT(*) as c FROM mirrors")
            .fetch_one(&self.pool)
            .await?
            .get("c");

        if count == 0 {
            info!("seeding default mirrors into empty mirrors table");
            for (name, urls) in default_mirrors() {
                let urls_json = serde_json::to_string(urls).unwrap();
                sqlx::query("INSERT INTO mirrors (name, urls, status) VALUES (?, ?, 'approved')")
                    .bind(name)
                    .bind(urls_json)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    pub async fn load_stats(&self) -> Result<HashMap<String, i64>, sqlx::Error> {
        let rows = sqlx::query("SELECT key, value FROM stats")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<i64, _>("value")))
            .collect())
    }

    pub async fn save_stats(&self, counters: &HashMap<&'static str, i64>) -> Result<(), sqlx::Error> {
        for (key, value) in counters {
            sqlx::query("UPDATE stats SET value = ? WHERE key = ?")
                .bind(value)
                .bind(*key)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn load_mirrors(&self) -> Result<Vec<Mirror>, sqlx::Error> {
        let rows = sqlx::query("SELECT name, urls, status FROM mirrors")
            .fetch_all(&self.pool)
            .await?;

        let mut mirrors = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let urls_json: String = row.get("urls");
            let status_str: String = row.get("status");
            let urls: Vec<String> = match serde_json::from_str(&urls_json) {
                Ok(v) => v,
                Err(e) => {
                    warn!(mirror = %name, error = %e, "skipping mirror row with malformed urls json");
                    continue;
                }
            };
            let status = MirrorStatus::parse(&status_str).unwrap_or(MirrorStatus::Approved);
            mirrors.push(Mirror::new(name, urls, status));
        }
        Ok(mirrors)
    }

    pub async fn upsert_mirror(&self, mirror: &Mirror) -> Result<(), sqlx::Error> {
        let urls_json = serde_json::to_string(&mirror.urls).unwrap();
        sqlx::query("INSERT OR REPLACE INTO mirrors (name, urls, status) VALUES (?, ?, ?)")
            .bind(&mirror.name)
            .bind(urls_json)
            .bind(mirror.status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_mirror(&self, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM mirrors WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn load_blacklist(&self) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT pattern FROM blacklist ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("pattern")).collect())
    }

    pub async fn add_blacklist_pattern(&self, pattern: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO blacklist (pattern) VALUES (?)")
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_blacklist_pattern(&self, pattern: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM blacklist WHERE pattern = ?")
            .bind(pattern)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
