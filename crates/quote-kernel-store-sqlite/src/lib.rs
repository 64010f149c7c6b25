use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use quote_kernel_core::{default_quotes, CategoryFilter, Quote};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

pub const QUOTES_KEY: &str = "quotes";
pub const SELECTED_CATEGORY_KEY: &str = "selectedCategory";
pub const LAST_QUOTE_KEY: &str = "lastQuote";

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS local_storage (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_storage (
  session_id TEXT NOT NULL,
  key TEXT NOT NULL,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (session_id, key)
);

CREATE INDEX IF NOT EXISTS idx_session_storage_session ON session_storage(session_id);
";

/// Identifies one ephemeral storage scope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SessionId(pub Ulid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a session identifier from its ULID text form.
    ///
    /// # Errors
    /// Returns an error when `raw` is not a valid ULID.
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed = Ulid::from_string(raw).with_context(|| format!("invalid session id: {raw}"))?;
        Ok(Self(parsed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrigin {
    Stored,
    Defaults,
    Recovered,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadedQuotes {
    pub quotes: Vec<Quote>,
    pub origin: LoadOrigin,
}

impl SqliteStore {
    /// Open a SQLite-backed quote store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            self.apply_migration_1()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn apply_migration_1(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![1_i64, now_rfc3339()?],
        )
        .context("failed to record migration version 1")?;
        tx.commit().context("failed to commit migration v1")?;
        tracing::debug!(version = 1, "applied schema migration");
        Ok(())
    }

    /// Read one durable value.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM local_storage WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .with_context(|| format!("failed to read local_storage key {key}"))
    }

    /// Write one durable value, replacing any previous value under `key`.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    pub fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO local_storage(key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now_rfc3339()?],
            )
            .with_context(|| format!("failed to write local_storage key {key}"))?;
        Ok(())
    }

    /// Delete one durable value; returns whether a row existed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn remove_item(&mut self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM local_storage WHERE key = ?1", params![key])
            .with_context(|| format!("failed to remove local_storage key {key}"))?;
        Ok(removed > 0)
    }

    /// Read one value from a session scope.
    ///
    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn session_get_item(&self, session: SessionId, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM session_storage WHERE session_id = ?1 AND key = ?2",
                params![session.to_string(), key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read session_storage key {key}"))
    }

    /// Write one value into a session scope.
    ///
    /// # Errors
    /// Returns an error when the write fails.
    pub fn session_set_item(&mut self, session: SessionId, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO session_storage(session_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![session.to_string(), key, value, now_rfc3339()?],
            )
            .with_context(|| format!("failed to write session_storage key {key}"))?;
        Ok(())
    }

    /// Drop every value held by `session`; returns the number of rows removed.
    ///
    /// # Errors
    /// Returns an error when the delete fails.
    pub fn end_session(&mut self, session: SessionId) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM session_storage WHERE session_id = ?1",
                params![session.to_string()],
            )
            .context("failed to end session")?;
        tracing::debug!(%session, removed, "session ended");
        Ok(removed)
    }

    /// Load the persisted quote collection, falling back to the seed set.
    ///
    /// An absent key yields the defaults. A stored value that is not a JSON array is
    /// treated as absent; nothing is written back.
    ///
    /// # Errors
    /// Returns an error only when the underlying read fails.
    pub fn load_quotes(&self) -> Result<LoadedQuotes> {
        let Some(raw) = self.get_item(QUOTES_KEY)? else {
            return Ok(LoadedQuotes { quotes: default_quotes(), origin: LoadOrigin::Defaults });
        };

        match serde_json::from_str::<Vec<Quote>>(&raw) {
            Ok(quotes) => Ok(LoadedQuotes { quotes, origin: LoadOrigin::Stored }),
            Err(err) => {
                tracing::debug!(error = %err, "stored quotes unreadable; using defaults");
                Ok(LoadedQuotes { quotes: default_quotes(), origin: LoadOrigin::Recovered })
            }
        }
    }

    /// Serialize the whole collection under the `quotes` key.
    ///
    /// # Errors
    /// Returns an error when serialization or the write fails.
    pub fn save_quotes(&mut self, quotes: &[Quote]) -> Result<()> {
        let json = serde_json::to_string(quotes).context("failed to serialize quotes")?;
        self.set_item(QUOTES_KEY, &json)?;
        tracing::debug!(count = quotes.len(), "quotes persisted");
        Ok(())
    }

    /// # Errors
    /// Returns an error when the underlying read fails.
    pub fn selected_category(&self) -> Result<CategoryFilter> {
        let raw = self.get_item(SELECTED_CATEGORY_KEY)?;
        Ok(raw.map_or(CategoryFilter::All, |value| CategoryFilter::parse(&value)))
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn save_selected_category(&mut self, filter: &CategoryFilter) -> Result<()> {
        self.set_item(SELECTED_CATEGORY_KEY, filter.as_str())
    }

    /// # Errors
    /// Returns an error when the underlying read fails.
    pub fn last_quote(&self, session: SessionId) -> Result<Option<Quote>> {
        let Some(raw) = self.session_get_item(session, LAST_QUOTE_KEY)? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    /// # Errors
    /// Returns an error when serialization or the write fails.
    pub fn save_last_quote(&mut self, session: SessionId, quote: &Quote) -> Result<()> {
        let json = serde_json::to_string(quote).context("failed to serialize last quote")?;
        self.session_set_item(session, LAST_QUOTE_KEY, &json)
    }

    /// Write a consistent copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status,
        })
    }
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
