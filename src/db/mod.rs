pub mod models;

use std::path::Path;
use std::sync::Mutex;

use models::{MatchedChunk, Message, Room};
use rusqlite::{params, Connection, OptionalExtension, Result};

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS rooms (
                id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                text TEXT NOT NULL,
                is_ai INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (room_id) REFERENCES rooms(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }

    // ── Rooms ──

    pub fn create_room(&self, id: &str, created_by: &str) -> Result<Room> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rooms (id, created_by) VALUES (?1, ?2)",
            params![id, created_by],
        )?;
        conn.query_row(
            "SELECT id, created_by, created_at FROM rooms WHERE id = ?1",
            params![id],
            room_from_row,
        )
    }

    /// Rooms created before `cutoff` (SQLite `datetime('now')` format, UTC).
    /// Pre-filter for the sweep: younger rooms are never candidates.
    pub fn rooms_created_before(&self, cutoff: &str) -> Result<Vec<Room>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, created_by, created_at FROM rooms WHERE created_at < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], room_from_row)?;
        rows.collect()
    }

    /// Delete `room_id` unless a message at or after `cutoff` exists. The
    /// guard closes the observe-then-delete window against a concurrent send.
    /// Returns whether a row was deleted; messages go with the room (cascade).
    pub fn delete_room_if_inactive(&self, room_id: &str, cutoff: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM rooms WHERE id = ?1
             AND NOT EXISTS (
                 SELECT 1 FROM messages WHERE room_id = ?1 AND created_at >= ?2
             )",
            params![room_id, cutoff],
        )?;
        Ok(changed > 0)
    }

    // ── Messages ──

    pub fn add_message(
        &self,
        room_id: &str,
        sender: &str,
        text: &str,
        is_ai: bool,
    ) -> Result<Message> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, room_id, sender, text, is_ai) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, room_id, sender, text, is_ai],
        )?;
        conn.query_row(
            "SELECT id, room_id, sender, text, is_ai, created_at FROM messages WHERE id = ?1",
            params![id],
            message_from_row,
        )
    }

    /// Newest `limit` messages of a room, newest first.
    pub fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, room_id, sender, text, is_ai, created_at FROM messages
             WHERE room_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![room_id, limit as i64], message_from_row)?;
        rows.collect()
    }

    /// All messages of a room in chronological order.
    pub fn room_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, room_id, sender, text, is_ai, created_at FROM messages
             WHERE room_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![room_id], message_from_row)?;
        rows.collect()
    }

    /// Timestamp of a room's newest message, if it has any.
    pub fn newest_message_at(&self, room_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT created_at FROM messages WHERE room_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![room_id],
            |row| row.get(0),
        )
        .optional()
    }

    // ── Document chunks ──

    pub fn insert_chunk(&self, content: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO documents (id, content, embedding) VALUES (?1, ?2, ?3)",
            params![id, content, embedding_to_bytes(embedding)],
        )?;
        Ok(())
    }

    /// Store-side similarity search: rank every stored chunk against the
    /// query vector, keep those above `threshold`, return the best `count`.
    pub fn match_documents(
        &self,
        query: &[f32],
        threshold: f32,
        count: usize,
    ) -> Result<Vec<MatchedChunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT content, embedding FROM documents")?;
        let rows = stmt.query_map([], |row| {
            let content: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((content, bytes_to_embedding(&bytes)))
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let (content, embedding) = row?;
            let similarity = cosine_similarity(query, &embedding);
            if similarity > threshold {
                matches.push(MatchedChunk {
                    content,
                    similarity,
                });
            }
        }
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(count);
        Ok(matches)
    }
}

fn room_from_row(row: &rusqlite::Row) -> Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        created_by: row.get(1)?,
        created_at: row.get(2)?,
    })
}

fn message_from_row(row: &rusqlite::Row) -> Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender: row.get(2)?,
        text: row.get(3)?,
        is_ai: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Serialize an embedding to bytes for SQLite BLOB storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding from SQLite BLOB bytes.
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
