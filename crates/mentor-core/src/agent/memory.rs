use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

/// A persisted conversation turn.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub created_at: i64,
}

/// Durable per-subject memory: working-memory profiles plus every stored
/// message with its embedding.
///
/// One database per installation. Subjects (resource ids) are isolated by
/// key, never by file.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS working_memory (
                resource_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                thread_id TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id, id);
            CREATE INDEX IF NOT EXISTS idx_messages_resource ON messages(resource_id);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))
    }

    /// The subject's working memory, seeded from `template` on first use.
    pub fn working_memory(&self, resource_id: &str, template: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO working_memory (resource_id, content, updated_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![resource_id, template, chrono::Utc::now().timestamp()],
        )?;
        let content = conn.query_row(
            "SELECT content FROM working_memory WHERE resource_id = ?1",
            [resource_id],
            |row| row.get(0),
        )?;
        Ok(content)
    }

    /// Replace the subject's working memory.
    pub fn update_working_memory(&self, resource_id: &str, content: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO working_memory (resource_id, content, updated_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![resource_id, content, chrono::Utc::now().timestamp()],
        )?;
        debug!("Working memory updated for '{resource_id}' ({} chars)", content.len());
        Ok(())
    }

    /// Append a message. Returns its id, which also orders the thread.
    pub fn append_message(
        &self,
        thread_id: &str,
        resource_id: &str,
        role: &str,
        content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO messages (thread_id, resource_id, role, content, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                thread_id,
                resource_id,
                role,
                content,
                embedding.map(encode_embedding),
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// The last `limit` messages of a thread, oldest first.
    pub fn recent_messages(&self, thread_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, thread_id, role, content, created_at FROM messages
             WHERE thread_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows = stmt
            .query_map(rusqlite::params![thread_id, limit as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Messages of this subject most similar to `query`, each widened by
    /// `message_range` neighbours on both sides within its thread.
    ///
    /// At most `top_k` hits. Ids in `exclude` are never returned. The result
    /// is deduplicated and ordered by thread, then position.
    pub fn recall(
        &self,
        resource_id: &str,
        query: &[f32],
        top_k: usize,
        message_range: usize,
        exclude: &[i64],
    ) -> Result<Vec<StoredMessage>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.lock_conn()?;

        let mut scored: Vec<(f32, i64, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, thread_id, embedding FROM messages
                 WHERE resource_id = ?1 AND embedding IS NOT NULL",
            )?;
            let rows = stmt.query_map([resource_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                ))
            })?;
            let mut scored = Vec::new();
            for row in rows {
                let (id, thread_id, blob) = row?;
                if exclude.contains(&id) {
                    continue;
                }
                let score = cosine_similarity(query, &decode_embedding(&blob));
                scored.push((score, id, thread_id));
            }
            scored
        };

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(top_k);

        let mut excerpt: BTreeMap<(String, i64), StoredMessage> = BTreeMap::new();
        let mut before = conn.prepare(
            "SELECT id, thread_id, role, content, created_at FROM messages
             WHERE thread_id = ?1 AND id < ?2 ORDER BY id DESC LIMIT ?3",
        )?;
        let mut hit = conn.prepare(
            "SELECT id, thread_id, role, content, created_at FROM messages WHERE id = ?1",
        )?;
        let mut after = conn.prepare(
            "SELECT id, thread_id, role, content, created_at FROM messages
             WHERE thread_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        )?;

        for (_, id, thread_id) in &scored {
            let range = message_range as i64;
            let mut found: Vec<StoredMessage> = before
                .query_map(rusqlite::params![thread_id, id, range], row_to_message)?
                .collect::<rusqlite::Result<_>>()?;
            if let Some(m) = hit.query_row([id], row_to_message).optional()? {
                found.push(m);
            }
            found.extend(
                after
                    .query_map(rusqlite::params![thread_id, id, range], row_to_message)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            );
            for m in found {
                if !exclude.contains(&m.id) {
                    excerpt.insert((m.thread_id.clone(), m.id), m);
                }
            }
        }

        debug!(
            "Semantic recall for '{resource_id}': {} hits, {} messages",
            scored.len(),
            excerpt.len()
        );

        Ok(excerpt.into_values().collect())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn encode_embedding(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("memory.db");
        let _store = MemoryStore::open(&db).unwrap();
        assert!(db.exists());
    }

    #[test]
    fn test_working_memory_seeded_once() {
        let store = MemoryStore::in_memory().unwrap();
        assert_eq!(store.working_memory("s1", "# Profile").unwrap(), "# Profile");

        store.update_working_memory("s1", "# Profile\n- Name: Ada").unwrap();
        // A later seed attempt must not overwrite the updated profile.
        assert_eq!(
            store.working_memory("s1", "# Profile").unwrap(),
            "# Profile\n- Name: Ada"
        );
    }

    #[test]
    fn test_working_memory_isolated_per_subject() {
        let store = MemoryStore::in_memory().unwrap();
        store.update_working_memory("s1", "likes algebra").unwrap();
        assert_eq!(store.working_memory("s2", "blank").unwrap(), "blank");
        assert_eq!(store.working_memory("s1", "blank").unwrap(), "likes algebra");
    }

    #[test]
    fn test_working_memory_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("memory.db");
        {
            let store = MemoryStore::open(&db).unwrap();
            store.update_working_memory("s1", "prefers examples").unwrap();
        }
        let store = MemoryStore::open(&db).unwrap();
        assert_eq!(store.working_memory("s1", "").unwrap(), "prefers examples");
    }

    #[test]
    fn test_recent_messages_window_is_oldest_first() {
        let store = MemoryStore::in_memory().unwrap();
        for i in 0..20 {
            store
                .append_message("t1", "s1", "user", &format!("msg {i}"), None)
                .unwrap();
        }
        store.append_message("t2", "s1", "user", "other thread", None).unwrap();

        let recent = store.recent_messages("t1", 15).unwrap();
        assert_eq!(recent.len(), 15);
        assert_eq!(recent[0].content, "msg 5");
        assert_eq!(recent[14].content, "msg 19");
        assert!(recent.iter().all(|m| m.thread_id == "t1"));
    }

    #[test]
    fn test_recall_returns_best_match_with_context() {
        let store = MemoryStore::in_memory().unwrap();
        store.append_message("t1", "s1", "user", "a", Some(&[1.0, 0.0])).unwrap();
        store.append_message("t1", "s1", "assistant", "b", Some(&[0.9, 0.1])).unwrap();
        let target = store.append_message("t1", "s1", "user", "c", Some(&[0.0, 1.0])).unwrap();
        store.append_message("t1", "s1", "assistant", "d", Some(&[0.5, 0.5])).unwrap();
        store.append_message("t1", "s1", "user", "e", Some(&[1.0, 0.0])).unwrap();

        let hits = store.recall("s1", &[0.0, 1.0], 1, 1, &[]).unwrap();
        let contents: Vec<&str> = hits.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c", "d"]);
        assert!(hits.iter().any(|m| m.id == target));
    }

    #[test]
    fn test_recall_bounded_by_top_k() {
        let store = MemoryStore::in_memory().unwrap();
        // Separate threads so context windows cannot pull in extra hits.
        for i in 0..10 {
            store
                .append_message(&format!("t{i}"), "s1", "user", &format!("m{i}"), Some(&[1.0, i as f32]))
                .unwrap();
        }
        let hits = store.recall("s1", &[1.0, 0.0], 5, 3, &[]).unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_recall_is_scoped_to_subject() {
        let store = MemoryStore::in_memory().unwrap();
        store.append_message("t1", "s1", "user", "mine", Some(&[1.0, 0.0])).unwrap();
        store.append_message("t9", "s2", "user", "theirs", Some(&[1.0, 0.0])).unwrap();

        let hits = store.recall("s1", &[1.0, 0.0], 5, 3, &[]).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "mine");
    }

    #[test]
    fn test_recall_skips_excluded_and_unembedded() {
        let store = MemoryStore::in_memory().unwrap();
        let a = store.append_message("t1", "s1", "user", "a", Some(&[1.0, 0.0])).unwrap();
        store.append_message("t2", "s1", "user", "no vector", None).unwrap();

        let hits = store.recall("s1", &[1.0, 0.0], 5, 0, &[a]).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_recall_zero_top_k() {
        let store = MemoryStore::in_memory().unwrap();
        store.append_message("t1", "s1", "user", "a", Some(&[1.0])).unwrap();
        assert!(store.recall("s1", &[1.0], 0, 3, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_embedding_encoding() {
        let v = vec![0.25f32, -1.5, 3.0];
        assert_eq!(decode_embedding(&encode_embedding(&v)), v);
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-6);
    }
}
