//! Resume-token store: one SQLite table keyed by (chat_id, owner_id, engine). Grounded
//! on the teacher's `db.rs` (single connection, WAL, `CREATE TABLE IF NOT EXISTS` at
//! open) and spec §6's resume-token persistence surface.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Connection};

const DB_FILE: &str = "resume_tokens.db";

pub struct ResumeStore {
    conn: Connection,
}

impl ResumeStore {
    pub fn open(working_dir: &Path) -> rusqlite::Result<Self> {
        let db_path = working_dir.join(DB_FILE);
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        create_tables(&conn)?;
        reconcile_cwd(&conn, working_dir)?;
        Ok(Self { conn })
    }

    pub fn get(&self, chat_id: &str, owner_id: &str, engine: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT resume_value FROM resume_tokens WHERE chat_id = ?1 AND owner_id = ?2 AND engine = ?3",
                params![chat_id, owner_id, engine],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })
    }

    pub fn set(&self, chat_id: &str, owner_id: &str, engine: &str, resume_value: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT INTO resume_tokens (chat_id, owner_id, engine, resume_value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chat_id, owner_id, engine) DO UPDATE SET resume_value = excluded.resume_value, updated_at = excluded.updated_at",
            params![chat_id, owner_id, engine, resume_value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn clear(&self, chat_id: &str, owner_id: &str, engine: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "DELETE FROM resume_tokens WHERE chat_id = ?1 AND owner_id = ?2 AND engine = ?3",
            params![chat_id, owner_id, engine],
        )?;
        Ok(())
    }
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS resume_tokens (
            chat_id      TEXT NOT NULL,
            owner_id     TEXT NOT NULL,
            engine       TEXT NOT NULL,
            resume_value TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            PRIMARY KEY (chat_id, owner_id, engine)
        );

        CREATE TABLE IF NOT EXISTS process_cwd (
            id  INTEGER PRIMARY KEY CHECK (id = 0),
            cwd TEXT NOT NULL
        );
        ",
    )
}

/// If the process cwd changed since the DB was last opened, every resume token is
/// stale (the vendor CLI resolves sessions relative to its launch directory) — clear
/// them all rather than hand back a resume id that now points at the wrong project.
fn reconcile_cwd(conn: &Connection, working_dir: &Path) -> rusqlite::Result<()> {
    let current = working_dir.to_string_lossy().to_string();
    let recorded: Option<String> = conn
        .query_row("SELECT cwd FROM process_cwd WHERE id = 0", [], |row| row.get(0))
        .ok();
    if recorded.as_deref() != Some(current.as_str()) {
        conn.execute("DELETE FROM resume_tokens", [])?;
        conn.execute(
            "INSERT INTO process_cwd (id, cwd) VALUES (0, ?1) ON CONFLICT(id) DO UPDATE SET cwd = excluded.cwd",
            params![current],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("resume-store-test-{}-{}", std::process::id(), rand_suffix()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().subsec_nanos() as u64
    }

    #[test]
    fn set_then_get_roundtrips() {
        let dir = temp_dir();
        let store = ResumeStore::open(&dir).unwrap();
        store.set("chat-1", "user-1", "claude", "sess-abc").unwrap();
        assert_eq!(store.get("chat-1", "user-1", "claude").unwrap().as_deref(), Some("sess-abc"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn clear_removes_entry() {
        let dir = temp_dir();
        let store = ResumeStore::open(&dir).unwrap();
        store.set("chat-1", "user-1", "claude", "sess-abc").unwrap();
        store.clear("chat-1", "user-1", "claude").unwrap();
        assert!(store.get("chat-1", "user-1", "claude").unwrap().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }
}
