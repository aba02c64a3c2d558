use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, TransactionBehavior};

use crate::{now_ts, ConversationTurn, MemoryError};

/// Durable conversation memory: append-only turns keyed by
/// (user_id, session_id, seq). The only state this process owns.
pub(crate) struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub(crate) fn open_or_create(path: &Path) -> Result<MemoryStore, MemoryError> {
        let conn =
            Connection::open(path).map_err(|e| MemoryError::Unavailable(format!("open: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                ts_utc INTEGER NOT NULL,
                PRIMARY KEY (user_id, session_id, seq)
            );
            CREATE INDEX IF NOT EXISTS idx_turns_session
                ON turns (user_id, session_id, seq);",
        )
        .map_err(|e| MemoryError::Unavailable(format!("schema: {e}")))?;
        Ok(MemoryStore {
            conn: Mutex::new(conn),
        })
    }

    /// Append one turn, assigning the next sequence number for the session.
    /// The MAX(seq)+1 read and the insert share one IMMEDIATE transaction,
    /// so sequence numbers stay strictly increasing and gapless even when
    /// another process shares the database file; in-process callers are
    /// additionally serialized by the connection mutex.
    pub(crate) fn append(
        &self,
        user_id: &str,
        session_id: &str,
        role: &str,
        content: &str,
    ) -> Result<i64, MemoryError> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| MemoryError::Unavailable(format!("begin: {e}")))?;
        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM turns
                 WHERE user_id = ?1 AND session_id = ?2",
                params![user_id, session_id],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::Unavailable(format!("next seq: {e}")))?;
        tx.execute(
            "INSERT INTO turns (user_id, session_id, seq, role, content, ts_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user_id, session_id, seq, role, content, now_ts()],
        )
        .map_err(|e| MemoryError::Unavailable(format!("insert: {e}")))?;
        tx.commit()
            .map_err(|e| MemoryError::Unavailable(format!("commit: {e}")))?;
        Ok(seq)
    }

    /// Last `limit` turns for a session, oldest to newest.
    pub(crate) fn recent_turns(
        &self,
        user_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, MemoryError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn
            .prepare(
                "SELECT user_id, session_id, seq, role, content, ts_utc FROM turns
                 WHERE user_id = ?1 AND session_id = ?2
                 ORDER BY seq DESC LIMIT ?3",
            )
            .map_err(|e| MemoryError::Unavailable(format!("prepare: {e}")))?;
        let rows = stmt
            .query_map(params![user_id, session_id, limit as i64], row_to_turn)
            .map_err(|e| MemoryError::Unavailable(format!("query: {e}")))?;
        let mut turns: Vec<ConversationTurn> = rows
            .collect::<Result<_, _>>()
            .map_err(|e| MemoryError::Unavailable(format!("row: {e}")))?;
        turns.reverse();
        Ok(turns)
    }
}

fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationTurn> {
    Ok(ConversationTurn {
        user_id: row.get(0)?,
        session_id: row.get(1)?,
        seq: row.get(2)?,
        role: row.get(3)?,
        content: row.get(4)?,
        ts_utc: row.get(5)?,
    })
}
