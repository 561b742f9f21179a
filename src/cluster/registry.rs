//! SQLite-backed registry of cluster members and their heartbeats.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use crate::types::GitCredentials;

/// Returns the current Unix timestamp in seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Shared membership table. Every node registers itself and heartbeats; each
/// node reads the others from here when it builds a sync cycle.
pub struct ClusterRegistry {
    conn: Mutex<Connection>,
}

/// A member row as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    pub local_address: String,
    pub git_url: String,
    pub auth: GitCredentials,
    pub registered_at: i64,
    pub last_heartbeat_at: i64,
}

impl MemberRecord {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let auth: String = row.get(2)?;
        let auth = serde_json::from_str(&auth)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
        Ok(Self {
            local_address: row.get(0)?,
            git_url: row.get(1)?,
            auth,
            registered_at: row.get(3)?,
            last_heartbeat_at: row.get(4)?,
        })
    }
}

const SELECT_MEMBER: &str =
    "SELECT local_address, git_url, auth, registered_at, last_heartbeat_at FROM members";

impl ClusterRegistry {
    /// Open or create the registry database at the given path.
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory registry, used for a node that keeps no state on disk.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initialize the database schema. This is idempotent.
    pub fn init(&self) -> Result<(), rusqlite::Error> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS members (
                local_address TEXT PRIMARY KEY,
                git_url TEXT NOT NULL,
                auth TEXT NOT NULL,
                registered_at INTEGER NOT NULL,
                last_heartbeat_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_members_heartbeat ON members(last_heartbeat_at);
            ",
        )?;
        Ok(())
    }

    /// Insert a member or update its URL and credentials. Counts as a heartbeat.
    pub fn register(
        &self,
        local_address: &str,
        git_url: &str,
        auth: &GitCredentials,
    ) -> Result<(), rusqlite::Error> {
        let auth = serde_json::to_string(auth)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let now = now_unix();

        self.conn().execute(
            "INSERT INTO members (local_address, git_url, auth, registered_at, last_heartbeat_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(local_address) DO UPDATE SET
                git_url = excluded.git_url,
                auth = excluded.auth,
                last_heartbeat_at = excluded.last_heartbeat_at",
            params![local_address, git_url, auth, now],
        )?;
        Ok(())
    }

    /// Refresh a member's heartbeat. Returns false if the member is unknown.
    pub fn heartbeat(&self, local_address: &str) -> Result<bool, rusqlite::Error> {
        self.heartbeat_at(local_address, now_unix())
    }

    /// Refresh a member's heartbeat with a provided timestamp.
    pub fn heartbeat_at(&self, local_address: &str, ts: i64) -> Result<bool, rusqlite::Error> {
        let updated = self.conn().execute(
            "UPDATE members SET last_heartbeat_at = ?1 WHERE local_address = ?2",
            params![ts, local_address],
        )?;
        Ok(updated > 0)
    }

    /// Delete a member. Returns false if it was not registered.
    pub fn remove(&self, local_address: &str) -> Result<bool, rusqlite::Error> {
        let removed = self.conn().execute(
            "DELETE FROM members WHERE local_address = ?1",
            params![local_address],
        )?;
        Ok(removed > 0)
    }

    /// All members ordered by address.
    pub fn list(&self) -> Result<Vec<MemberRecord>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{} ORDER BY local_address", SELECT_MEMBER))?;
        let rows = stmt.query_map([], MemberRecord::from_row)?;
        rows.collect()
    }

    /// Members other than `excluding` that heartbeated within `timeout_secs`,
    /// ordered by address.
    pub fn active_members(
        &self,
        excluding: &str,
        timeout_secs: u64,
    ) -> Result<Vec<MemberRecord>, rusqlite::Error> {
        let threshold = now_unix() - timeout_secs as i64;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE local_address != ?1 AND last_heartbeat_at >= ?2 ORDER BY local_address",
            SELECT_MEMBER
        ))?;
        let rows = stmt.query_map(params![excluding, threshold], MemberRecord::from_row)?;
        rows.collect()
    }
}
