use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use linkgrab_core::models::media::MediaKind;
use linkgrab_core::models::settings::CacheSettings;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;

use crate::core::error::FetchResult;

const PART_SUFFIX: &str = "part";
const STALE_PART_AGE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct CacheLimits {
    pub ttl: Duration,
    pub high_water_bytes: u64,
    pub low_water_bytes: u64,
}

impl From<&CacheSettings> for CacheLimits {
    fn from(s: &CacheSettings) -> Self {
        Self {
            ttl: s.ttl(),
            high_water_bytes: s.high_water_bytes,
            low_water_bytes: s.low_water_bytes,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct CacheRow {
    file_path: String,
    inserted_at_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimReport {
    pub expired: usize,
    pub stale_records: usize,
    pub orphan_files: usize,
    pub evicted: usize,
    pub freed_bytes: u64,
    pub total_bytes: u64,
}

/// Downloaded files keyed by (canonical URL, media kind), indexed in SQLite.
pub struct CacheStore {
    pool: SqlitePool,
    dir: PathBuf,
    limits: CacheLimits,
    /// Held while files in `dir` and their rows change together.
    writer: tokio::sync::Mutex<()>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `sha256(kind ‖ url)` plus the source file's extension.
pub fn cache_file_name(url: &str, kind: MediaKind, source: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(url.as_bytes());
    let digest = hasher.finalize();

    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .unwrap_or(kind.default_extension())
        .to_lowercase();
    format!("{:x}.{}", digest, ext)
}

async fn file_len(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("[cache] failed to remove {}: {}", path.display(), e);
        }
    }
}

impl CacheStore {
    pub async fn open(database_path: &Path, dir: &Path, limits: CacheLimits) -> FetchResult<Self> {
        if let Some(parent) = database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(dir).await?;

        let opts = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            dir: dir.to_path_buf(),
            limits,
            writer: tokio::sync::Mutex::new(()),
        };
        store.migrate().await?;

        tracing::info!(
            "[cache] opened {} (files in {})",
            database_path.display(),
            dir.display()
        );
        Ok(store)
    }

    pub async fn open_with(settings: &CacheSettings) -> FetchResult<Self> {
        Self::open(&settings.database_path, &settings.dir, CacheLimits::from(settings)).await
    }

    async fn migrate(&self) -> FetchResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                url TEXT NOT NULL,
                kind TEXT NOT NULL,
                file_path TEXT NOT NULL,
                inserted_at_ms INTEGER NOT NULL,
                PRIMARY KEY (url, kind)
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_inserted ON cache_entries (inserted_at_ms)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cached file for the key, only if it still exists on disk. A record
    /// whose file is gone is left in place for [`CacheStore::reconcile`].
    pub async fn lookup(&self, url: &str, kind: MediaKind) -> Option<PathBuf> {
        let row: Option<String> = match sqlx::query_scalar(
            "SELECT file_path FROM cache_entries WHERE url = ? AND kind = ?",
        )
        .bind(url)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("[cache] lookup failed for {}: {}", url, e);
                return None;
            }
        };

        let path = PathBuf::from(row?);
        if file_len(&path).await.is_some() {
            tracing::debug!("[cache] hit {} ({})", url, kind);
            Some(path)
        } else {
            tracing::debug!("[cache] stale record for {} ({})", url, kind);
            None
        }
    }

    /// Copies `source` into the cache and records it, replacing any previous
    /// entry for the same key. The source is left untouched.
    pub async fn insert(&self, url: &str, kind: MediaKind, source: &Path) -> FetchResult<PathBuf> {
        self.insert_at(url, kind, source, now_ms()).await
    }

    pub(crate) async fn insert_at(
        &self,
        url: &str,
        kind: MediaKind,
        source: &Path,
        inserted_at_ms: i64,
    ) -> FetchResult<PathBuf> {
        let name = cache_file_name(url, kind, source);
        let dest = self.dir.join(&name);

        // Each insert stages into its own file; the copy runs outside the lock.
        let staging = tempfile::Builder::new()
            .prefix(&format!("{}.", name))
            .suffix(&format!(".{}", PART_SUFFIX))
            .tempfile_in(&self.dir)?
            .into_temp_path();
        tokio::fs::copy(source, &staging).await?;

        let _writer = self.writer.lock().await;
        staging.persist(&dest).map_err(|e| e.error)?;

        let previous: Option<String> = sqlx::query_scalar(
            "SELECT file_path FROM cache_entries WHERE url = ? AND kind = ?",
        )
        .bind(url)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO cache_entries (url, kind, file_path, inserted_at_ms) VALUES (?, ?, ?, ?)
             ON CONFLICT(url, kind) DO UPDATE SET
                file_path = excluded.file_path,
                inserted_at_ms = excluded.inserted_at_ms",
        )
        .bind(url)
        .bind(kind.as_str())
        .bind(dest.to_string_lossy().as_ref())
        .bind(inserted_at_ms)
        .execute(&self.pool)
        .await?;

        if let Some(old) = previous.map(PathBuf::from) {
            if old != dest {
                remove_quietly(&old).await;
            }
        }

        tracing::debug!("[cache] stored {} ({}) at {}", url, kind, dest.display());
        Ok(dest)
    }

    /// Drops the record pointing at `path` and deletes the file.
    pub async fn invalidate(&self, path: &Path) -> FetchResult<()> {
        let _writer = self.writer.lock().await;
        let removed = sqlx::query("DELETE FROM cache_entries WHERE file_path = ?")
            .bind(path.to_string_lossy().as_ref())
            .execute(&self.pool)
            .await?
            .rows_affected();
        remove_quietly(path).await;
        tracing::info!(
            "[cache] invalidated {} ({} record(s))",
            path.display(),
            removed
        );
        Ok(())
    }

    pub async fn len(&self) -> FetchResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    pub async fn is_empty(&self) -> FetchResult<bool> {
        Ok(self.len().await? == 0)
    }

    async fn rows_oldest_first(&self) -> FetchResult<Vec<CacheRow>> {
        Ok(sqlx::query_as::<_, CacheRow>(
            "SELECT file_path, inserted_at_ms FROM cache_entries ORDER BY inserted_at_ms ASC",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Bytes on disk held by recorded entries.
    pub async fn total_size(&self) -> FetchResult<u64> {
        let mut total = 0u64;
        for row in self.rows_oldest_first().await? {
            total += file_len(Path::new(&row.file_path)).await.unwrap_or(0);
        }
        Ok(total)
    }

    pub async fn evict_expired(&self) -> FetchResult<usize> {
        self.evict_expired_at(now_ms()).await
    }

    /// Removes entries strictly older than the TTL relative to `now_ms`.
    pub(crate) async fn evict_expired_at(&self, now_ms: i64) -> FetchResult<usize> {
        let cutoff = now_ms - self.limits.ttl.as_millis() as i64;
        let _writer = self.writer.lock().await;
        let paths: Vec<String> = sqlx::query_scalar(
            "DELETE FROM cache_entries WHERE inserted_at_ms < ? RETURNING file_path",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        for path in &paths {
            remove_quietly(Path::new(path)).await;
        }
        if !paths.is_empty() {
            tracing::info!("[cache] evicted {} expired entries", paths.len());
        }
        Ok(paths.len())
    }

    /// Drops records whose file vanished and deletes files no record points
    /// at. Returns `(stale_records, orphan_files)`.
    pub async fn reconcile(&self) -> FetchResult<(usize, usize)> {
        let _writer = self.writer.lock().await;
        let mut known: HashSet<PathBuf> = HashSet::new();
        let mut stale = 0usize;

        for row in self.rows_oldest_first().await? {
            let path = PathBuf::from(&row.file_path);
            if file_len(&path).await.is_some() {
                known.insert(path);
                continue;
            }
            sqlx::query("DELETE FROM cache_entries WHERE file_path = ?")
                .bind(&row.file_path)
                .execute(&self.pool)
                .await?;
            stale += 1;
        }

        let mut orphans = 0usize;
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() || known.contains(&path) {
                continue;
            }
            let is_part = path.extension().and_then(|e| e.to_str()) == Some(PART_SUFFIX);
            if is_part {
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .unwrap_or_default();
                if age < STALE_PART_AGE {
                    continue;
                }
            }
            remove_quietly(&path).await;
            orphans += 1;
        }

        if stale > 0 || orphans > 0 {
            tracing::info!(
                "[cache] reconciled: {} stale records, {} orphan files",
                stale,
                orphans
            );
        }
        Ok((stale, orphans))
    }

    /// When above the high-water mark, deletes oldest entries until the total
    /// is at or below the low-water mark. Returns `(evicted, freed_bytes)`.
    pub async fn evict_to_low_water(&self) -> FetchResult<(usize, u64)> {
        let _writer = self.writer.lock().await;
        let mut sized = Vec::new();
        let mut total = 0u64;
        for row in self.rows_oldest_first().await? {
            let len = file_len(Path::new(&row.file_path)).await.unwrap_or(0);
            total += len;
            sized.push((row, len));
        }

        if total <= self.limits.high_water_bytes {
            return Ok((0, 0));
        }

        let mut evicted = 0usize;
        let mut freed = 0u64;
        for (row, len) in sized {
            if total <= self.limits.low_water_bytes {
                break;
            }
            sqlx::query("DELETE FROM cache_entries WHERE file_path = ?")
                .bind(&row.file_path)
                .execute(&self.pool)
                .await?;
            remove_quietly(Path::new(&row.file_path)).await;
            tracing::debug!(
                "[cache] evicted {} (inserted {} ms)",
                row.file_path,
                row.inserted_at_ms
            );
            total -= len;
            freed += len;
            evicted += 1;
        }

        tracing::info!(
            "[cache] evicted {} entries for capacity, freed {} bytes",
            evicted,
            freed
        );
        Ok((evicted, freed))
    }

    /// One full maintenance pass: TTL, reconciliation, then size.
    pub async fn reclaim(&self) -> FetchResult<ReclaimReport> {
        let expired = self.evict_expired().await?;
        let (stale_records, orphan_files) = self.reconcile().await?;
        let (evicted, freed_bytes) = self.evict_to_low_water().await?;
        let total_bytes = self.total_size().await?;

        Ok(ReclaimReport {
            expired,
            stale_records,
            orphan_files,
            evicted,
            freed_bytes,
            total_bytes,
        })
    }

    /// Runs [`CacheStore::reclaim`] now and then every `interval` until
    /// cancelled. Failures are logged and the next pass still runs.
    pub fn spawn_reclaimer(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.reclaim().await {
                    Ok(report) => tracing::info!(
                        "[cache] reclaim pass: {} expired, {} stale, {} orphans, {} evicted, {} bytes cached",
                        report.expired,
                        report.stale_records,
                        report.orphan_files,
                        report.evicted,
                        report.total_bytes
                    ),
                    Err(e) => tracing::warn!("[cache] reclaim pass failed: {}", e),
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
            tracing::debug!("[cache] reclaimer stopped");
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HOUR_MS: i64 = 3600 * 1000;

    struct Fixture {
        _root: TempDir,
        src_dir: PathBuf,
        store: CacheStore,
    }

    async fn fixture(limits: CacheLimits) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let src_dir = root.path().join("src");
        std::fs::create_dir_all(&src_dir).unwrap();
        let store = CacheStore::open(
            &root.path().join("db").join("cache.db"),
            &root.path().join("files"),
            limits,
        )
        .await
        .unwrap();
        Fixture {
            _root: root,
            src_dir,
            store,
        }
    }

    fn default_limits() -> CacheLimits {
        CacheLimits {
            ttl: Duration::from_secs(6 * 3600),
            high_water_bytes: 10 * 1024 * 1024 * 1024,
            low_water_bytes: 8 * 1024 * 1024 * 1024,
        }
    }

    fn source(f: &Fixture, name: &str, len: usize) -> PathBuf {
        let p = f.src_dir.join(name);
        std::fs::write(&p, vec![7u8; len]).unwrap();
        p
    }

    #[test]
    fn file_name_is_content_addressed() {
        let a = cache_file_name("https://x/1", MediaKind::Video, Path::new("a.mp4"));
        let b = cache_file_name("https://x/1", MediaKind::Video, Path::new("other.mp4"));
        let c = cache_file_name("https://x/1", MediaKind::Audio, Path::new("a.mp4"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".mp4"));
        assert_eq!(a.len(), 64 + 4);
        let d = cache_file_name("https://x/1", MediaKind::Audio, Path::new("noext"));
        assert!(d.ends_with(".mp3"));
    }

    #[tokio::test]
    async fn lookup_after_insert_returns_copy() {
        let f = fixture(default_limits()).await;
        let src = source(&f, "clip.mp4", 1234);

        let stored = f.store.insert("https://v/1", MediaKind::Video, &src).await.unwrap();
        assert!(src.exists(), "source must be copied, not moved");
        assert!(stored.starts_with(f.store.dir()));

        let hit = f.store.lookup("https://v/1", MediaKind::Video).await.unwrap();
        assert_eq!(hit, stored);
        assert_eq!(std::fs::metadata(&hit).unwrap().len(), 1234);

        assert!(f.store.lookup("https://v/1", MediaKind::Audio).await.is_none());
        assert!(f.store.lookup("https://v/2", MediaKind::Video).await.is_none());
    }

    #[tokio::test]
    async fn insert_replaces_previous_entry() {
        let f = fixture(default_limits()).await;
        let first = f
            .store
            .insert("https://v/1", MediaKind::Video, &source(&f, "a.webm", 10))
            .await
            .unwrap();
        let second = f
            .store
            .insert("https://v/1", MediaKind::Video, &source(&f, "a.mp4", 20))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(!first.exists());
        assert_eq!(f.store.len().await.unwrap(), 1);
        assert_eq!(
            f.store.lookup("https://v/1", MediaKind::Video).await,
            Some(second)
        );
    }

    #[tokio::test]
    async fn stale_record_misses_until_reconciled() {
        let f = fixture(default_limits()).await;
        let stored = f
            .store
            .insert("https://v/1", MediaKind::Video, &source(&f, "a.mp4", 10))
            .await
            .unwrap();
        std::fs::remove_file(&stored).unwrap();

        assert!(f.store.lookup("https://v/1", MediaKind::Video).await.is_none());
        assert_eq!(f.store.len().await.unwrap(), 1);

        let (stale, orphans) = f.store.reconcile().await.unwrap();
        assert_eq!((stale, orphans), (1, 0));
        assert_eq!(f.store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reconcile_removes_orphan_files() {
        let f = fixture(default_limits()).await;
        let kept = f
            .store
            .insert("https://v/1", MediaKind::Video, &source(&f, "a.mp4", 10))
            .await
            .unwrap();
        let orphan = f.store.dir().join("leftover.mp4");
        std::fs::write(&orphan, b"x").unwrap();
        let fresh_part = f.store.dir().join("inflight.part");
        std::fs::write(&fresh_part, b"x").unwrap();

        let (stale, orphans) = f.store.reconcile().await.unwrap();
        assert_eq!((stale, orphans), (0, 1));
        assert!(!orphan.exists());
        assert!(kept.exists());
        assert!(fresh_part.exists());
    }

    #[tokio::test]
    async fn ttl_evicts_strictly_older_entries() {
        let f = fixture(default_limits()).await;
        let now = now_ms();
        let ttl = 6 * HOUR_MS;

        let old = f
            .store
            .insert_at("https://v/old", MediaKind::Video, &source(&f, "o.mp4", 5), now - ttl - 1)
            .await
            .unwrap();
        let edge = f
            .store
            .insert_at("https://v/edge", MediaKind::Video, &source(&f, "e.mp4", 5), now - ttl)
            .await
            .unwrap();
        f.store
            .insert_at("https://v/new", MediaKind::Audio, &source(&f, "n.mp3", 5), now)
            .await
            .unwrap();

        assert_eq!(f.store.evict_expired_at(now).await.unwrap(), 1);
        assert!(!old.exists());
        assert!(edge.exists());
        assert_eq!(f.store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn size_eviction_stops_at_low_water() {
        let f = fixture(CacheLimits {
            ttl: Duration::from_secs(3600),
            high_water_bytes: 250,
            low_water_bytes: 150,
        })
        .await;
        let now = now_ms();
        let mut stored = Vec::new();
        for i in 0..3 {
            let src = source(&f, &format!("{}.mp4", i), 100);
            stored.push(
                f.store
                    .insert_at(&format!("https://v/{}", i), MediaKind::Video, &src, now - 1000 + i)
                    .await
                    .unwrap(),
            );
        }

        let (evicted, freed) = f.store.evict_to_low_water().await.unwrap();
        assert_eq!((evicted, freed), (2, 200));
        assert!(!stored[0].exists());
        assert!(!stored[1].exists());
        assert!(stored[2].exists());
        assert_eq!(f.store.total_size().await.unwrap(), 100);
    }

    #[tokio::test]
    async fn size_eviction_is_idle_below_high_water() {
        let f = fixture(CacheLimits {
            ttl: Duration::from_secs(3600),
            high_water_bytes: 250,
            low_water_bytes: 150,
        })
        .await;
        for i in 0..2 {
            let src = source(&f, &format!("{}.mp4", i), 100);
            f.store
                .insert(&format!("https://v/{}", i), MediaKind::Video, &src)
                .await
                .unwrap();
        }
        assert_eq!(f.store.evict_to_low_water().await.unwrap(), (0, 0));
        assert_eq!(f.store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn invalidate_removes_record_and_file() {
        let f = fixture(default_limits()).await;
        let stored = f
            .store
            .insert("https://v/1", MediaKind::Audio, &source(&f, "a.mp3", 10))
            .await
            .unwrap();
        f.store.invalidate(&stored).await.unwrap();
        assert!(!stored.exists());
        assert!(f.store.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn reclaim_reports_every_pass() {
        let f = fixture(CacheLimits {
            ttl: Duration::from_secs(3600),
            high_water_bytes: 150,
            low_water_bytes: 100,
        })
        .await;
        let now = now_ms();
        f.store
            .insert_at("https://v/old", MediaKind::Video, &source(&f, "o.mp4", 10), now - 2 * HOUR_MS)
            .await
            .unwrap();
        f.store
            .insert_at("https://v/a", MediaKind::Video, &source(&f, "a.mp4", 100), now - 10)
            .await
            .unwrap();
        f.store
            .insert_at("https://v/b", MediaKind::Video, &source(&f, "b.mp4", 100), now)
            .await
            .unwrap();
        std::fs::write(f.store.dir().join("stray.bin"), b"zz").unwrap();

        let report = f.store.reclaim().await.unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(report.orphan_files, 1);
        assert_eq!(report.evicted, 1);
        assert_eq!(report.total_bytes, 100);
    }

    #[tokio::test]
    async fn reclaimer_stops_on_cancel() {
        let f = fixture(default_limits()).await;
        let store = Arc::new(f.store);
        let cancel = CancellationToken::new();
        let handle = store
            .clone()
            .spawn_reclaimer(Duration::from_secs(3600), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_for_one_key_keep_a_whole_file() {
        let f = fixture(default_limits()).await;
        let len = 2 * 1024 * 1024;
        let sources: Vec<PathBuf> = (0..8u8)
            .map(|n| {
                let p = f.src_dir.join(format!("src{}.mp4", n));
                std::fs::write(&p, vec![n; len]).unwrap();
                p
            })
            .collect();

        let results = futures::future::join_all(
            sources
                .iter()
                .map(|src| f.store.insert("https://v/same", MediaKind::Video, src)),
        )
        .await;
        for r in &results {
            assert!(r.is_ok(), "insert failed: {:?}", r);
        }

        let hit = f.store.lookup("https://v/same", MediaKind::Video).await.unwrap();
        let bytes = std::fs::read(&hit).unwrap();
        assert_eq!(bytes.len(), len);
        assert!(bytes.iter().all(|b| *b == bytes[0]), "cached file mixes sources");
        assert_eq!(f.store.len().await.unwrap(), 1);

        let leftovers: Vec<_> = std::fs::read_dir(f.store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != hit)
            .collect();
        assert!(leftovers.is_empty(), "staging files left behind: {:?}", leftovers);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconcile_during_inserts_keeps_new_files() {
        let f = fixture(default_limits()).await;
        let sources: Vec<PathBuf> = (0..16)
            .map(|n| source(&f, &format!("c{}.mp4", n), 64 * 1024))
            .collect();

        let inserts = futures::future::join_all(sources.iter().enumerate().map(|(n, src)| {
            let url = format!("https://v/{}", n);
            let store = &f.store;
            async move { store.insert(&url, MediaKind::Video, src).await }
        }));
        let sweeps = async {
            for _ in 0..16 {
                f.store.reconcile().await.unwrap();
                tokio::task::yield_now().await;
            }
        };
        let (results, _) = tokio::join!(inserts, sweeps);
        assert!(results.iter().all(|r| r.is_ok()));

        f.store.reconcile().await.unwrap();
        for n in 0..16 {
            let url = format!("https://v/{}", n);
            assert!(
                f.store.lookup(&url, MediaKind::Video).await.is_some(),
                "entry {} lost its file",
                url
            );
        }
    }
}
