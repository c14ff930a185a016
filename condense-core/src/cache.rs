//! Content cache: token counts and semantic data keyed by content and profile fingerprints
//!
//! Entries live in a concurrent map shared by scan workers. A handle opened
//! with [`CacheHandle::open`] is backed by SQLite and persists across runs;
//! [`CacheHandle::flush`] writes new entries and removes evicted ones.
//! Rendered (truncated) content is never cached: it depends on the budget
//! left at assembly time, not only on the profile.

use crate::document::SemanticData;
use dashmap::DashMap;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntryKind {
    Tokens,
    Semantic,
}

impl EntryKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Tokens => "tokens",
            Self::Semantic => "semantic",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "tokens" => Some(Self::Tokens),
            "semantic" => Some(Self::Semantic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: EntryKind,
    content_fp: String,
    profile_fp: String,
}

#[derive(Debug, Clone)]
enum CachedValue {
    Tokens(usize),
    Semantic(SemanticData),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    path: String,
    value: CachedValue,
    cached_at: i64,
    dirty: bool,
}

/// Counters reported in the run report
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub evictions: usize,
    pub entries: usize,
    pub persistent: bool,
}

pub struct CacheHandle {
    entries: DashMap<CacheKey, CacheEntry>,
    /// path -> content fingerprint last observed for it
    by_path: DashMap<String, String>,
    evicted: Mutex<Vec<CacheKey>>,
    ttl_secs: i64,
    conn: Option<Mutex<Connection>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    evictions: AtomicUsize,
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("entries", &self.entries.len())
            .field("ttl_secs", &self.ttl_secs)
            .field("persistent", &self.conn.is_some())
            .finish()
    }
}

fn now_secs() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

impl CacheHandle {
    /// Process-local cache with no durable storage
    pub fn in_memory(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            by_path: DashMap::new(),
            evicted: Mutex::new(Vec::new()),
            ttl_secs: ttl.as_secs() as i64,
            conn: None,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
        }
    }

    /// Open (or create) a SQLite-backed cache, dropping expired rows.
    pub fn open(db_path: &Path, ttl: Duration) -> crate::Result<Self> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS entries (
                content_fp TEXT NOT NULL,
                profile_fp TEXT NOT NULL,
                kind TEXT NOT NULL,
                path TEXT NOT NULL,
                payload TEXT NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (content_fp, profile_fp, kind)
            );
            CREATE INDEX IF NOT EXISTS idx_entries_path ON entries(path);
            "#,
        )?;

        let mut cache = Self::in_memory(ttl);
        let cutoff = now_secs() - cache.ttl_secs;
        let expired = conn.execute("DELETE FROM entries WHERE cached_at < ?", params![cutoff])?;
        if expired > 0 {
            debug!(expired, "dropped expired cache rows");
        }

        {
            let mut stmt = conn.prepare(
                "SELECT content_fp, profile_fp, kind, path, payload, cached_at FROM entries",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?;

            for row in rows {
                let (content_fp, profile_fp, kind, path, payload, cached_at) = row?;
                let Some(kind) = EntryKind::parse(&kind) else {
                    continue;
                };
                let value = match kind {
                    EntryKind::Tokens => payload.parse().ok().map(CachedValue::Tokens),
                    EntryKind::Semantic => serde_json::from_str(&payload)
                        .ok()
                        .map(CachedValue::Semantic),
                };
                // Rows written by an incompatible version are skipped
                let Some(value) = value else {
                    continue;
                };
                cache.by_path.insert(path.clone(), content_fp.clone());
                cache.entries.insert(
                    CacheKey {
                        kind,
                        content_fp,
                        profile_fp,
                    },
                    CacheEntry {
                        path,
                        value,
                        cached_at,
                        dirty: false,
                    },
                );
            }
        }

        info!(entries = cache.entries.len(), path = %db_path.display(), "cache loaded");
        cache.conn = Some(Mutex::new(conn));
        Ok(cache)
    }

    pub fn is_persistent(&self) -> bool {
        self.conn.is_some()
    }

    /// Record the current fingerprint of `path`. Entries cached for an older
    /// version of the same path are evicted.
    pub fn observe(&self, path: &str, content_fp: &str) {
        let previous = self
            .by_path
            .insert(path.to_string(), content_fp.to_string());
        if let Some(old_fp) = previous {
            if old_fp != content_fp {
                self.evict_where(|key, entry| key.content_fp == old_fp && entry.path == path);
            }
        }
    }

    pub fn get_tokens(&self, content_fp: &str, tokenizer_fp: &str) -> Option<usize> {
        self.get_tokens_at(content_fp, tokenizer_fp, now_secs())
    }

    fn get_tokens_at(&self, content_fp: &str, tokenizer_fp: &str, now: i64) -> Option<usize> {
        match self.lookup(EntryKind::Tokens, content_fp, tokenizer_fp, now) {
            Some(CachedValue::Tokens(count)) => Some(count),
            _ => None,
        }
    }

    pub fn get_semantic(&self, content_fp: &str, profile_fp: &str) -> Option<SemanticData> {
        match self.lookup(EntryKind::Semantic, content_fp, profile_fp, now_secs()) {
            Some(CachedValue::Semantic(data)) => Some(data),
            _ => None,
        }
    }

    pub fn put_tokens(&self, path: &str, content_fp: &str, tokenizer_fp: &str, count: usize) {
        self.store(
            EntryKind::Tokens,
            path,
            content_fp,
            tokenizer_fp,
            CachedValue::Tokens(count),
        );
    }

    pub fn put_semantic(&self, path: &str, content_fp: &str, profile_fp: &str, data: SemanticData) {
        self.store(
            EntryKind::Semantic,
            path,
            content_fp,
            profile_fp,
            CachedValue::Semantic(data),
        );
    }

    fn store(
        &self,
        kind: EntryKind,
        path: &str,
        content_fp: &str,
        profile_fp: &str,
        value: CachedValue,
    ) {
        self.entries.insert(
            CacheKey {
                kind,
                content_fp: content_fp.to_string(),
                profile_fp: profile_fp.to_string(),
            },
            CacheEntry {
                path: path.to_string(),
                value,
                cached_at: now_secs(),
                dirty: true,
            },
        );
    }

    fn lookup(
        &self,
        kind: EntryKind,
        content_fp: &str,
        profile_fp: &str,
        now: i64,
    ) -> Option<CachedValue> {
        let key = CacheKey {
            kind,
            content_fp: content_fp.to_string(),
            profile_fp: profile_fp.to_string(),
        };

        let found = self
            .entries
            .get(&key)
            .map(|entry| (entry.value.clone(), now - entry.cached_at > self.ttl_secs));

        match found {
            Some((value, false)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some((_, true)) => {
                self.entries.remove(&key);
                self.record_eviction(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn evict_where(&self, pred: impl Fn(&CacheKey, &CacheEntry) -> bool) {
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|item| pred(item.key(), item.value()))
            .map(|item| item.key().clone())
            .collect();
        for key in stale {
            self.entries.remove(&key);
            self.record_eviction(key);
        }
    }

    fn record_eviction(&self, key: CacheKey) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if self.conn.is_some() {
            self.evicted
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(key);
        }
    }

    /// Drop every entry older than the TTL
    pub fn evict_expired(&self) {
        let cutoff = now_secs() - self.ttl_secs;
        self.evict_where(|_, entry| entry.cached_at < cutoff);
    }

    /// Write dirty entries and deletions to SQLite. No-op for in-memory caches.
    pub fn flush(&self) -> crate::Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let mut conn = conn.lock().unwrap_or_else(|e| e.into_inner());
        let evicted: Vec<CacheKey> =
            std::mem::take(&mut *self.evicted.lock().unwrap_or_else(|e| e.into_inner()));

        let tx = conn.transaction()?;
        let mut written = 0usize;
        {
            let mut delete = tx.prepare(
                "DELETE FROM entries WHERE content_fp = ? AND profile_fp = ? AND kind = ?",
            )?;
            for key in &evicted {
                delete.execute(params![key.content_fp, key.profile_fp, key.kind.as_str()])?;
            }

            let mut upsert = tx.prepare(
                "INSERT OR REPLACE INTO entries (content_fp, profile_fp, kind, path, payload, cached_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )?;
            for mut item in self.entries.iter_mut() {
                if !item.dirty {
                    continue;
                }
                let payload = match &item.value {
                    CachedValue::Tokens(count) => count.to_string(),
                    CachedValue::Semantic(data) => serde_json::to_string(data)?,
                };
                let key = item.key().clone();
                upsert.execute(params![
                    key.content_fp,
                    key.profile_fp,
                    key.kind.as_str(),
                    item.path,
                    payload,
                    item.cached_at,
                ])?;
                item.dirty = false;
                written += 1;
            }
        }
        tx.commit()?;

        debug!(written, deleted = evicted.len(), "cache flushed");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
            persistent: self.is_persistent(),
        }
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        if self.conn.is_some() {
            if let Err(e) = self.flush() {
                warn!(error = %e, "failed to flush cache on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(86400);

    #[test]
    fn test_key_includes_profile_fingerprint() {
        let cache = CacheHandle::in_memory(DAY);
        cache.put_tokens("a.py", "content1", "profileA", 42);

        assert_eq!(cache.get_tokens("content1", "profileA"), Some(42));
        assert_eq!(cache.get_tokens("content1", "profileB"), None);
        assert_eq!(cache.get_tokens("content2", "profileA"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = CacheHandle::in_memory(DAY);
        cache.put_tokens("a.py", "fp", "tok", 7);
        let later = now_secs() + 8 * 86400;
        assert_eq!(cache.get_tokens_at("fp", "tok", later), None);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_changed_content_evicts_old_entries() {
        let cache = CacheHandle::in_memory(DAY);
        cache.observe("a.py", "v1");
        cache.put_tokens("a.py", "v1", "tok", 10);
        cache.put_semantic("a.py", "v1", "prof", SemanticData::default());

        cache.observe("a.py", "v1");
        assert_eq!(cache.stats().entries, 2);

        cache.observe("a.py", "v2");
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_persists_across_handles() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join(".condense").join("cache.db");

        {
            let cache = CacheHandle::open(&db, DAY).unwrap();
            cache.put_tokens("a.py", "fp", "tok", 99);
            let data = SemanticData {
                imports: vec!["os".to_string()],
                ..SemanticData::default()
            };
            cache.put_semantic("a.py", "fp", "prof", data);
            cache.flush().unwrap();
        }

        let cache = CacheHandle::open(&db, DAY).unwrap();
        assert!(cache.is_persistent());
        assert_eq!(cache.get_tokens("fp", "tok"), Some(99));
        let data = cache.get_semantic("fp", "prof").unwrap();
        assert_eq!(data.imports, vec!["os".to_string()]);
    }

    #[test]
    fn test_flush_deletes_evicted_rows() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("cache.db");

        {
            let cache = CacheHandle::open(&db, DAY).unwrap();
            cache.observe("a.py", "v1");
            cache.put_tokens("a.py", "v1", "tok", 1);
            cache.flush().unwrap();
            cache.observe("a.py", "v2");
            cache.flush().unwrap();
        }

        let cache = CacheHandle::open(&db, DAY).unwrap();
        assert_eq!(cache.stats().entries, 0);
    }
}
