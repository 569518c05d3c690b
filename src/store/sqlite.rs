//! SQLite-backed account store.
//!
//! One `accounts` table keyed by handle. Timestamps are stored as Unix
//! milliseconds. The upsert is written so that a stale or partial record can
//! never un-follow an account, clear a resolved identity, replace an assigned
//! priority tier or lower the attempt count. Only `reset_attempts` lowers it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::CandidateAccount;
use crate::error::{FollowError, Result};
use crate::store::traits::{AccountCounts, AccountStore};

const SELECT_COLUMNS: &str = "handle, identity, follower_count, priority, followed, attempts, saved_on, last_checked, follow_date";

/// Account store on a local SQLite database.
pub struct SqliteAccountStore {
    path: PathBuf,
    db: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteAccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteAccountStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl SqliteAccountStore {
    /// Open or create the database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let db = Connection::open(&path)?;
        Self::init_schema(&db)?;
        log::debug!("Opened account store at {}", path.display());

        Ok(Self {
            path,
            db: Mutex::new(db),
        })
    }

    /// In-memory store, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            db: Mutex::new(db),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                handle TEXT PRIMARY KEY,
                identity TEXT NOT NULL DEFAULT '',
                follower_count INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                followed INTEGER NOT NULL DEFAULT 0,
                attempts INTEGER NOT NULL DEFAULT 0,
                saved_on INTEGER,
                last_checked INTEGER,
                follow_date INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_followed ON accounts(followed);
            CREATE INDEX IF NOT EXISTS idx_accounts_identity ON accounts(identity);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| FollowError::Storage(e.to_string()))
    }

    /// Copy every account into a fresh in-memory store.
    ///
    /// Dry runs dispatch against the copy so that simulated follows never
    /// reach the durable file.
    pub fn copy_to_memory(&self) -> Result<Self> {
        let copy = Self::open_in_memory()?;
        let accounts = self.load_all()?;
        for account in &accounts {
            copy.upsert(account)?;
        }
        log::debug!("Copied {} accounts from {} into memory", accounts.len(), self.path.display());
        Ok(copy)
    }
}

impl AccountStore for SqliteAccountStore {
    fn load_all(&self) -> Result<Vec<CandidateAccount>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY priority DESC, follower_count DESC, handle",
            SELECT_COLUMNS
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_account)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    fn get(&self, handle: &str) -> Result<Option<CandidateAccount>> {
        let db = self.conn()?;
        let sql = format!("SELECT {} FROM accounts WHERE handle = ?1", SELECT_COLUMNS);
        Ok(db.query_row(&sql, [handle], row_to_account).optional()?)
    }

    fn get_by_identity(&self, identity: &str) -> Result<Option<CandidateAccount>> {
        if identity.is_empty() {
            return Ok(None);
        }
        let db = self.conn()?;
        let sql = format!(
            "SELECT {} FROM accounts WHERE identity = ?1 ORDER BY followed DESC LIMIT 1",
            SELECT_COLUMNS
        );
        Ok(db.query_row(&sql, [identity], row_to_account).optional()?)
    }

    fn upsert(&self, account: &CandidateAccount) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO accounts
            (handle, identity, follower_count, priority, followed, attempts, saved_on, last_checked, follow_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(handle) DO UPDATE SET
              identity = CASE WHEN excluded.identity <> '' THEN excluded.identity ELSE accounts.identity END,
              follower_count = excluded.follower_count,
              priority = CASE WHEN accounts.priority > 0 THEN accounts.priority ELSE excluded.priority END,
              followed = MAX(accounts.followed, excluded.followed),
              attempts = MAX(accounts.attempts, excluded.attempts),
              saved_on = COALESCE(accounts.saved_on, excluded.saved_on),
              last_checked = COALESCE(excluded.last_checked, accounts.last_checked),
              follow_date = COALESCE(accounts.follow_date, excluded.follow_date)
            "#,
            params![
                account.handle,
                account.identity,
                account.follower_count as i64,
                account.priority,
                account.followed,
                account.attempts,
                account.saved_on.map(|t| t.timestamp_millis()),
                account.last_checked.map(|t| t.timestamp_millis()),
                account.follow_date.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    fn reset_attempts(&self, handle: &str) -> Result<()> {
        let db = self.conn()?;
        db.execute("UPDATE accounts SET attempts = 0 WHERE handle = ?1", [handle])?;
        Ok(())
    }

    fn counts(&self, max_attempts: u32) -> Result<AccountCounts> {
        let db = self.conn()?;
        let counts = db.query_row(
            r#"
            SELECT
              COUNT(*),
              COALESCE(SUM(CASE WHEN followed = 1 THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN followed = 0 AND attempts < ?1 THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN followed = 0 AND attempts >= ?1 THEN 1 ELSE 0 END), 0)
            FROM accounts
            "#,
            [max_attempts],
            |row| {
                Ok(AccountCounts {
                    total: row.get::<_, i64>(0)? as usize,
                    followed: row.get::<_, i64>(1)? as usize,
                    pending: row.get::<_, i64>(2)? as usize,
                    exhausted: row.get::<_, i64>(3)? as usize,
                })
            },
        )?;
        Ok(counts)
    }
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<CandidateAccount> {
    let follower_count: i64 = row.get(2)?;
    Ok(CandidateAccount {
        handle: row.get(0)?,
        identity: row.get(1)?,
        follower_count: follower_count.max(0) as u64,
        priority: row.get(3)?,
        followed: row.get(4)?,
        attempts: row.get(5)?,
        saved_on: millis_to_time(row.get(6)?),
        last_checked: millis_to_time(row.get(7)?),
        follow_date: millis_to_time(row.get(8)?),
    })
}

fn millis_to_time(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}
