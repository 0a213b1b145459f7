//! 磁盘缓存索引子模块
//!
//! ## 职责
//! - 创建 / 迁移 `entries` 表（`PRAGMA user_version` 版本化）
//! - 记录每条缓存的 URL、正文大小、内容类型、写入与访问时间
//! - 为淘汰逻辑提供按访问时间排序的候选
//!
//! ## 错误语义
//! - 所有 SQL 失败统一映射为 `ImageError::Cache`

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::image_handler::ImageError;

const SCHEMA_VERSION: i64 = 1;

/// 索引中的一行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct IndexEntry {
    pub url: String,
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub stored_at: i64,
    pub last_accessed: i64,
}

pub(super) struct CacheIndex {
    conn: Connection,
}

fn cache_err(context: &str, e: rusqlite::Error) -> ImageError {
    ImageError::Cache(format!("{}: {}", context, e))
}

impl CacheIndex {
    pub fn open(path: &Path) -> Result<Self, ImageError> {
        let conn = Connection::open(path).map_err(|e| cache_err("打开缓存索引失败", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| cache_err("设置缓存索引 WAL 失败", e))?;

        let index = Self { conn };
        index.initialize_schema()?;
        Ok(index)
    }

    fn user_version(&self) -> Result<i64, ImageError> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| cache_err("读取缓存索引版本失败", e))
    }

    fn initialize_schema(&self) -> Result<(), ImageError> {
        let version = self.user_version()?;
        if version > SCHEMA_VERSION {
            return Err(ImageError::Cache(format!(
                "缓存索引版本过新: {} > {}",
                version, SCHEMA_VERSION
            )));
        }

        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS entries (
                    url TEXT PRIMARY KEY,
                    key TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    content_type TEXT,
                    stored_at INTEGER NOT NULL,
                    last_accessed INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_entries_last_accessed ON entries(last_accessed);",
            )
            .map_err(|e| cache_err("创建缓存索引表失败", e))?;

        if version < SCHEMA_VERSION {
            self.conn
                .execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
                .map_err(|e| cache_err("写入缓存索引版本失败", e))?;
        }
        Ok(())
    }

    pub fn lookup(&self, url: &str) -> Result<Option<IndexEntry>, ImageError> {
        self.conn
            .query_row(
                "SELECT url, key, size, content_type, stored_at, last_accessed
                 FROM entries WHERE url = ?1",
                params![url],
                |row| {
                    Ok(IndexEntry {
                        url: row.get(0)?,
                        key: row.get(1)?,
                        size: row.get::<_, i64>(2)?.max(0) as u64,
                        content_type: row.get(3)?,
                        stored_at: row.get(4)?,
                        last_accessed: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(|e| cache_err("查询缓存索引失败", e))
    }

    pub fn upsert(&self, entry: &IndexEntry) -> Result<(), ImageError> {
        self.conn
            .execute(
                "INSERT INTO entries (url, key, size, content_type, stored_at, last_accessed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(url) DO UPDATE SET
                    key = excluded.key,
                    size = excluded.size,
                    content_type = excluded.content_type,
                    stored_at = excluded.stored_at,
                    last_accessed = excluded.last_accessed",
                params![
                    entry.url,
                    entry.key,
                    entry.size as i64,
                    entry.content_type,
                    entry.stored_at,
                    entry.last_accessed
                ],
            )
            .map_err(|e| cache_err("写入缓存索引失败", e))?;
        Ok(())
    }

    pub fn touch(&self, url: &str, now: i64) -> Result<(), ImageError> {
        self.conn
            .execute(
                "UPDATE entries SET last_accessed = ?2 WHERE url = ?1",
                params![url, now],
            )
            .map_err(|e| cache_err("更新缓存访问时间失败", e))?;
        Ok(())
    }

    pub fn delete(&self, url: &str) -> Result<(), ImageError> {
        self.conn
            .execute("DELETE FROM entries WHERE url = ?1", params![url])
            .map_err(|e| cache_err("删除缓存索引失败", e))?;
        Ok(())
    }

    /// 清空索引，返回被移除条目的正文键。
    pub fn clear(&self) -> Result<Vec<String>, ImageError> {
        let keys = self.keys()?;
        self.conn
            .execute("DELETE FROM entries", [])
            .map_err(|e| cache_err("清空缓存索引失败", e))?;
        Ok(keys)
    }

    fn keys(&self) -> Result<Vec<String>, ImageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM entries")
            .map_err(|e| cache_err("读取缓存键失败", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| cache_err("读取缓存键失败", e))?;
        let keys = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| cache_err("读取缓存键失败", e))?;
        Ok(keys)
    }

    /// `(条目数, 正文总字节数)`
    pub fn totals(&self) -> Result<(u64, u64), ImageError> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM entries",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .map(|(count, bytes)| (count.max(0) as u64, bytes.max(0) as u64))
            .map_err(|e| cache_err("统计缓存失败", e))
    }

    /// 最久未访问的条目（排除 `keep_url`）。
    pub fn least_recently_used(&self, keep_url: &str) -> Result<Option<(String, String, u64)>, ImageError> {
        self.conn
            .query_row(
                "SELECT url, key, size FROM entries
                 WHERE url != ?1
                 ORDER BY last_accessed ASC, stored_at ASC
                 LIMIT 1",
                params![keep_url],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?.max(0) as u64,
                    ))
                },
            )
            .optional()
            .map_err(|e| cache_err("查询淘汰候选失败", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, size: u64, accessed: i64) -> IndexEntry {
        IndexEntry {
            url: url.to_string(),
            key: format!("key-{url}"),
            size,
            content_type: Some("image/png".to_string()),
            stored_at: accessed,
            last_accessed: accessed,
        }
    }

    fn open_temp() -> (tempfile::TempDir, CacheIndex) {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = CacheIndex::open(&dir.path().join("index.db")).expect("open index");
        (dir, index)
    }

    #[test]
    fn schema_version_is_recorded() {
        let (_dir, index) = open_temp();
        assert_eq!(index.user_version().expect("version"), SCHEMA_VERSION);
    }

    #[test]
    fn reopening_keeps_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("index.db");
        {
            let index = CacheIndex::open(&path).expect("open");
            index.upsert(&entry("a", 10, 1)).expect("upsert");
        }

        let index = CacheIndex::open(&path).expect("reopen");
        assert_eq!(index.lookup("a").expect("lookup"), Some(entry("a", 10, 1)));
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let (_dir, index) = open_temp();
        index.upsert(&entry("a", 10, 1)).expect("upsert");
        index.upsert(&entry("a", 25, 2)).expect("upsert");

        assert_eq!(index.totals().expect("totals"), (1, 25));
    }

    #[test]
    fn least_recently_used_skips_kept_url() {
        let (_dir, index) = open_temp();
        index.upsert(&entry("old", 1, 1)).expect("upsert");
        index.upsert(&entry("mid", 1, 5)).expect("upsert");
        index.upsert(&entry("new", 1, 9)).expect("upsert");
        index.touch("old", 10).expect("touch");

        let victim = index.least_recently_used("new").expect("query");
        assert_eq!(victim.map(|(url, _, _)| url), Some("mid".to_string()));
    }

    #[test]
    fn clear_returns_removed_keys() {
        let (_dir, index) = open_temp();
        index.upsert(&entry("a", 1, 1)).expect("upsert");
        index.upsert(&entry("b", 1, 1)).expect("upsert");

        let mut keys = index.clear().expect("clear");
        keys.sort();

        assert_eq!(keys, vec!["key-a".to_string(), "key-b".to_string()]);
        assert_eq!(index.totals().expect("totals"), (0, 0));
    }
}
