//! Durable ordered log of conversation turns, keyed by session.
//!
//! The core depends only on append / read-all / delete-from-head semantics,
//! not on a specific storage engine. `SqliteMessageStore` persists across
//! process restarts; `InMemoryMessageStore` serves non-persistent
//! deployments and tests. Sessions are fully independent; there is no
//! cross-session visibility.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use engram_types::{SessionId, Turn, TurnSeq};

/// A turn as read back from a store, with its assigned sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTurn {
    pub seq: TurnSeq,
    pub turn: Turn,
}

/// Backing log for the live queue.
pub trait MessageStore: Send + Sync {
    /// Append a turn to the session's log, returning its sequence number.
    fn append(&mut self, session: &SessionId, turn: &Turn) -> Result<TurnSeq>;

    /// All turns of a session, oldest first.
    fn read_all(&self, session: &SessionId) -> Result<Vec<StoredTurn>>;

    /// Remove up to `count` turns from the head of the session's log,
    /// returning how many were removed.
    fn delete_oldest(&mut self, session: &SessionId, count: usize) -> Result<usize>;
}

/// SQLite-backed store. Turns are serialized as JSON rows keyed by session.
///
/// The connection sits behind a mutex so the store can be held in shared
/// structures; the manager serializes writes above this layer anyway.
pub struct SqliteMessageStore {
    db: Mutex<Connection>,
}

impl SqliteMessageStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS turns (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL,
            turn_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_session
        ON turns(session_id, seq);
    ";

    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open message store at {}", path.display()))?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory message store")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .context("Failed to set message store pragmas")?;
        db.execute_batch(Self::SCHEMA)
            .context("Failed to create message store schema")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unix_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

impl MessageStore for SqliteMessageStore {
    fn append(&mut self, session: &SessionId, turn: &Turn) -> Result<TurnSeq> {
        let json = serde_json::to_string(turn).context("Failed to serialize turn")?;

        let db = self.conn();
        db.execute(
            "INSERT INTO turns (session_id, turn_json, created_at)
             VALUES (?1, ?2, ?3)",
            params![session.as_str(), json, unix_millis(turn.timestamp())],
        )
        .context("Failed to insert turn")?;

        Ok(TurnSeq::new(db.last_insert_rowid() as u64))
    }

    fn read_all(&self, session: &SessionId) -> Result<Vec<StoredTurn>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(
                "SELECT seq, turn_json FROM turns
                 WHERE session_id = ?1
                 ORDER BY seq ASC",
            )
            .context("Failed to prepare read_all query")?;

        let rows = stmt
            .query_map([session.as_str()], |row| {
                let seq: i64 = row.get(0)?;
                let json: String = row.get(1)?;
                Ok((seq, json))
            })
            .context("Failed to query turns")?;

        let mut turns = Vec::new();
        for row in rows {
            let (seq, json) = row.context("Failed to read turn row")?;
            let turn: Turn = serde_json::from_str(&json)
                .with_context(|| format!("Failed to deserialize turn {seq}"))?;
            turns.push(StoredTurn {
                seq: TurnSeq::new(seq as u64),
                turn,
            });
        }

        Ok(turns)
    }

    fn delete_oldest(&mut self, session: &SessionId, count: usize) -> Result<usize> {
        let removed = self
            .conn()
            .execute(
                "DELETE FROM turns
                 WHERE session_id = ?1
                   AND seq IN (
                       SELECT seq FROM turns
                       WHERE session_id = ?1
                       ORDER BY seq ASC
                       LIMIT ?2
                   )",
                params![session.as_str(), count as i64],
            )
            .context("Failed to delete oldest turns")?;

        Ok(removed)
    }
}

#[derive(Debug, Default)]
struct SessionLog {
    next_seq: u64,
    turns: Vec<StoredTurn>,
}

/// In-memory store for non-persistent deployments.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    sessions: HashMap<SessionId, SessionLog>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn append(&mut self, session: &SessionId, turn: &Turn) -> Result<TurnSeq> {
        let log = self.sessions.entry(session.clone()).or_default();
        log.next_seq += 1;
        let seq = TurnSeq::new(log.next_seq);
        log.turns.push(StoredTurn {
            seq,
            turn: turn.clone(),
        });
        Ok(seq)
    }

    fn read_all(&self, session: &SessionId) -> Result<Vec<StoredTurn>> {
        Ok(self
            .sessions
            .get(session)
            .map(|log| log.turns.clone())
            .unwrap_or_default())
    }

    fn delete_oldest(&mut self, session: &SessionId, count: usize) -> Result<usize> {
        let Some(log) = self.sessions.get_mut(session) else {
            return Ok(0);
        };
        let removed = count.min(log.turns.len());
        log.turns.drain(..removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryMessageStore, MessageStore, SqliteMessageStore};
    use engram_types::{SessionId, Turn};

    fn session(name: &str) -> SessionId {
        SessionId::new(name)
    }

    fn run_store_contract(store: &mut dyn MessageStore) {
        let a = session("a");
        let b = session("b");

        let s1 = store.append(&a, &Turn::try_user("first").expect("non-empty")).expect("append");
        let s2 = store.append(&a, &Turn::try_assistant("second").expect("non-empty")).expect("append");
        store.append(&b, &Turn::try_user("other session").expect("non-empty")).expect("append");

        assert!(s1 < s2);

        let turns = store.read_all(&a).expect("read");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].turn.text_content(), "first");
        assert_eq!(turns[1].turn.text_content(), "second");

        // Sessions are independent.
        let other = store.read_all(&b).expect("read");
        assert_eq!(other.len(), 1);

        let removed = store.delete_oldest(&a, 1).expect("delete");
        assert_eq!(removed, 1);
        let turns = store.read_all(&a).expect("read");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].turn.text_content(), "second");
        assert_eq!(store.read_all(&b).expect("read").len(), 1);

        // Deleting more than exists removes what's there.
        let removed = store.delete_oldest(&a, 10).expect("delete");
        assert_eq!(removed, 1);
        assert!(store.read_all(&a).expect("read").is_empty());

        // Unknown session is empty, deletion a no-op.
        assert!(store.read_all(&session("ghost")).expect("read").is_empty());
        assert_eq!(store.delete_oldest(&session("ghost"), 3).expect("delete"), 0);
    }

    #[test]
    fn in_memory_contract() {
        let mut store = InMemoryMessageStore::new();
        run_store_contract(&mut store);
    }

    #[test]
    fn sqlite_contract() {
        let mut store = SqliteMessageStore::open_in_memory().expect("open");
        run_store_contract(&mut store);
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("turns.db");
        let a = session("persisted");

        {
            let mut store = SqliteMessageStore::open(&path).expect("open");
            store.append(&a, &Turn::try_user("survives restart").expect("non-empty")).expect("append");
        }

        let store = SqliteMessageStore::open(&path).expect("reopen");
        let turns = store.read_all(&a).expect("read");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].turn.text_content(), "survives restart");
    }

    #[test]
    fn sqlite_round_trips_binary_parts() {
        use engram_types::{ContentPart, Role};

        let mut store = SqliteMessageStore::open_in_memory().expect("open");
        let a = session("binary");
        let turn = Turn::new(
            Role::User,
            vec![
                ContentPart::text("see image").expect("non-empty"),
                ContentPart::image("image/png", vec![1, 2, 3]),
            ],
            std::time::SystemTime::now(),
        );

        store.append(&a, &turn).expect("append");
        let turns = store.read_all(&a).expect("read");
        assert_eq!(turns[0].turn.parts().len(), 2);
        assert_eq!(turns[0].turn.parts()[1], ContentPart::image("image/png", vec![1, 2, 3]));
    }
}
