// src/db/models.rs

//! Row models for catalogs, lock rules and pending transactions
//!
//! Resolvable rows are written by [`crate::store::CatalogStore`] and read by
//! [`crate::source::SourceLoader`]; the tables here are small enough to be
//! handled as plain records.

use crate::arch::Arch;
use crate::capability::Relation;
use crate::error::Result;
use crate::version::Edition;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;
use tracing::warn;

/// A catalog record (`catalogs` table)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub id: String,
    pub name: String,
    pub alias: String,
    pub description: String,
    pub priority: i32,
    pub subscribed: bool,
    pub checksum: Option<String>,
    pub timestamp: Option<String>,
}

impl CatalogRecord {
    /// Create a new catalog record
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            alias: String::new(),
            description: String::new(),
            priority: 0,
            subscribed: true,
            checksum: None,
            timestamp: None,
        }
    }

    /// Fill an empty alias from the name and an empty description from
    /// the alias
    pub fn with_defaults(mut self) -> Self {
        if self.alias.is_empty() {
            self.alias = self.name.clone();
        }
        if self.description.is_empty() {
            self.description = self.alias.clone();
        }
        self
    }

    /// Insert this catalog into the database
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO catalogs (id, name, alias, description, priority, subscribed, checksum, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &self.id,
                &self.name,
                &self.alias,
                &self.description,
                self.priority,
                self.subscribed,
                &self.checksum,
                &self.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Update name, alias and description; empty arguments keep the
    /// stored value. Returns false if no such catalog exists.
    pub fn update(conn: &Connection, id: &str, name: &str, alias: &str, description: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE catalogs SET
                name = CASE WHEN ?2 = '' THEN name ELSE ?2 END,
                alias = CASE WHEN ?3 = '' THEN alias ELSE ?3 END,
                description = CASE WHEN ?4 = '' THEN description ELSE ?4 END
             WHERE id = ?1",
            params![id, name, alias, description],
        )?;
        Ok(changed > 0)
    }

    /// Record the checksum and time of the latest import
    pub fn touch(conn: &Connection, id: &str, checksum: &str, timestamp: &str) -> Result<()> {
        conn.execute(
            "UPDATE catalogs SET checksum = ?2, timestamp = ?3 WHERE id = ?1",
            params![id, checksum, timestamp],
        )?;
        Ok(())
    }

    pub fn exists(conn: &Connection, id: &str) -> Result<bool> {
        let found = conn
            .query_row("SELECT 1 FROM catalogs WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Find a catalog by ID
    pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, alias, description, priority, subscribed, checksum, timestamp
             FROM catalogs WHERE id = ?1",
        )?;

        let record = stmt.query_row([id], Self::from_row).optional()?;
        Ok(record.flatten())
    }

    /// List all catalogs, skipping rows without an id
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, alias, description, priority, subscribed, checksum, timestamp
             FROM catalogs ORDER BY priority DESC, id",
        )?;

        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let total = rows.len();
        let records: Vec<Self> = rows.into_iter().flatten().collect();
        if records.len() < total {
            warn!("Skipped {} catalog rows without an id", total - records.len());
        }

        Ok(records)
    }

    /// Delete a catalog record by ID
    pub fn delete(conn: &Connection, id: &str) -> Result<()> {
        conn.execute("DELETE FROM catalogs WHERE id = ?1", [id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Option<Self>> {
        let Some(id) = row.get::<_, Option<String>>(0)? else {
            return Ok(None);
        };

        Ok(Some(Self {
            id,
            name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            alias: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            priority: row.get::<_, Option<i32>>(4)?.unwrap_or(0),
            subscribed: row.get::<_, Option<bool>>(5)?.unwrap_or(true),
            checksum: row.get(6)?,
            timestamp: row.get(7)?,
        }))
    }
}

/// A user lock (`locks` table)
///
/// Either `glob` holds a `name-pattern [op edition]` expression, or the
/// name/relation/edition columns describe the lock directly.
#[derive(Debug, Clone, PartialEq)]
pub struct LockRule {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub relation: Relation,
    pub edition: Option<Edition>,
    pub arch: Option<Arch>,
    pub catalog: Option<String>,
    pub glob: Option<String>,
    pub importance: Option<i32>,
    pub importance_gteq: bool,
}

impl LockRule {
    fn empty() -> Self {
        Self {
            id: None,
            name: None,
            relation: Relation::Any,
            edition: None,
            arch: None,
            catalog: None,
            glob: None,
            importance: None,
            importance_gteq: false,
        }
    }

    /// Lock described by a single expression, e.g. `"kernel-* >= 5.0"`
    pub fn from_glob(glob: impl Into<String>) -> Self {
        Self {
            glob: Some(glob.into()),
            ..Self::empty()
        }
    }

    /// Lock described by explicit columns
    pub fn from_columns(name: impl Into<String>, relation: Relation, edition: Option<Edition>) -> Self {
        Self {
            name: Some(name.into()),
            relation,
            edition,
            ..Self::empty()
        }
    }

    /// Insert this lock into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        let (version, release, epoch) = match &self.edition {
            Some(ed) => (Some(ed.version.as_str()), Some(ed.release.as_str()), Some(ed.epoch)),
            None => (None, None, None),
        };

        conn.execute(
            "INSERT INTO locks (name, version, release, epoch, arch, relation, catalog, glob, importance, importance_gteq)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                &self.name,
                version,
                release,
                epoch,
                self.arch.map(|a| a.code()),
                self.relation.code(),
                &self.catalog,
                &self.glob,
                self.importance,
                self.importance_gteq,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// List all locks in insertion order
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, version, release, epoch, arch, relation, catalog, glob, importance, importance_gteq
             FROM locks ORDER BY id",
        )?;

        let locks = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(locks)
    }

    /// Delete a lock by ID
    pub fn delete(conn: &Connection, id: i64) -> Result<()> {
        conn.execute("DELETE FROM locks WHERE id = ?1", [id])?;
        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let version: Option<String> = row.get(2)?;
        let release: Option<String> = row.get(3)?;
        let epoch: Option<u32> = row.get(4)?;
        let edition = version.map(|v| Edition::new(v, release.unwrap_or_default(), epoch.unwrap_or(0)));

        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            relation: Relation::from_code(row.get::<_, Option<i64>>(6)?.unwrap_or(0)),
            edition,
            arch: row.get::<_, Option<i64>>(5)?.map(Arch::from_code),
            catalog: row.get(7)?,
            glob: row.get(8)?,
            importance: row.get(9)?,
            importance_gteq: row.get::<_, Option<bool>>(10)?.unwrap_or(false),
        })
    }
}

/// Action of a pending transaction row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionAction {
    Remove,
    Install,
    Upgrade,
    InstallBest,
}

impl TransactionAction {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionAction::Remove => "remove",
            TransactionAction::Install => "install",
            TransactionAction::Upgrade => "upgrade",
            TransactionAction::InstallBest => "install-best",
        }
    }

    /// Past participle used in lock conflict messages
    pub fn verb(&self) -> &str {
        match self {
            TransactionAction::Remove => "removed",
            TransactionAction::Install | TransactionAction::InstallBest => "installed",
            TransactionAction::Upgrade => "upgraded",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TransactionAction::Remove => 0,
            TransactionAction::Install => 1,
            TransactionAction::Upgrade => 2,
            TransactionAction::InstallBest => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TransactionAction::Remove),
            1 => Some(TransactionAction::Install),
            2 => Some(TransactionAction::Upgrade),
            3 => Some(TransactionAction::InstallBest),
            _ => None,
        }
    }
}

impl FromStr for TransactionAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "remove" => Ok(TransactionAction::Remove),
            "install" => Ok(TransactionAction::Install),
            "upgrade" => Ok(TransactionAction::Upgrade),
            "install-best" => Ok(TransactionAction::InstallBest),
            _ => Err(format!("Invalid transaction action: {}", s)),
        }
    }
}

/// A row of the `transactions` queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRow {
    pub action: TransactionAction,
    /// Resolvable id the request refers to
    pub id: i64,
    pub details: Option<String>,
}

impl TransactionRow {
    pub fn new(action: TransactionAction, id: i64) -> Self {
        Self {
            action,
            id,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Append this request to the queue
    pub fn insert(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO transactions (action, id, details) VALUES (?1, ?2, ?3)",
            params![self.action.code(), self.id, &self.details],
        )?;
        Ok(())
    }

    /// All queued rows in insertion order
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT action, id, details FROM transactions ORDER BY rowid")?;

        let rows = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Remove every row for a resolvable id
    pub fn delete_by_id(conn: &Connection, id: i64) -> Result<usize> {
        Ok(conn.execute("DELETE FROM transactions WHERE id = ?1", [id])?)
    }

    pub fn clear(conn: &Connection) -> Result<usize> {
        Ok(conn.execute("DELETE FROM transactions", [])?)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let code: i64 = row.get(0)?;
        let action = TransactionAction::from_code(code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Integer,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Invalid transaction action code: {}", code),
                )),
            )
        })?;

        Ok(Self {
            action,
            id: row.get(1)?,
            details: row.get(2)?,
        })
    }
}
