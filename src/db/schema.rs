// src/db/schema.rs

//! Database schema definitions
//!
//! The column layout here is the compatibility contract with other tools
//! reading the same store. The schema is created once and versioned only so
//! that an existing store can be recognized.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Create the schema if this store has none yet
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    create_tables(conn)?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [SCHEMA_VERSION],
    )?;

    info!("Created catalog schema version {}", SCHEMA_VERSION);
    Ok(())
}

/// Schema version 1
///
/// - catalogs: one row per imported catalog
/// - resolvables: common envelope for every stored kind
/// - *_details: one optional row per resolvable, by kind
/// - delta_packages, patch_packages: child records of packages
/// - dependencies: capability rows, owned by a resolvable
/// - locks, transactions: user pins and the pending request queue
fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS catalogs (
            id TEXT PRIMARY KEY,
            name TEXT,
            alias TEXT,
            description TEXT,
            priority INTEGER DEFAULT 0,
            subscribed INTEGER DEFAULT 1,
            checksum TEXT,
            timestamp TEXT
        );

        -- rows without name or version are rejected by the loader
        CREATE TABLE IF NOT EXISTS resolvables (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            version TEXT,
            release TEXT,
            epoch INTEGER,
            arch INTEGER,
            installed_size INTEGER,
            catalog TEXT,
            installed INTEGER,
            local INTEGER,
            status INTEGER DEFAULT 0,
            category TEXT,
            license TEXT,
            kind INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_resolvables_catalog ON resolvables(catalog);
        CREATE INDEX IF NOT EXISTS idx_resolvables_name ON resolvables(name);

        CREATE TABLE IF NOT EXISTS package_details (
            resolvable_id INTEGER PRIMARY KEY,
            rpm_group TEXT,
            summary TEXT,
            description TEXT,
            package_url TEXT,
            package_filename TEXT,
            signature_filename TEXT,
            file_size INTEGER,
            install_only INTEGER,
            media_nr INTEGER,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS patch_details (
            resolvable_id INTEGER PRIMARY KEY,
            patch_id TEXT,
            status INTEGER,
            creation_time INTEGER,
            category TEXT,
            reboot INTEGER,
            restart INTEGER,
            interactive INTEGER,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS pattern_details (
            resolvable_id INTEGER PRIMARY KEY,
            status INTEGER,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS product_details (
            resolvable_id INTEGER PRIMARY KEY,
            status INTEGER,
            category TEXT,
            dist_name TEXT,
            dist_version TEXT,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS message_details (
            resolvable_id INTEGER PRIMARY KEY,
            content TEXT,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS script_details (
            resolvable_id INTEGER PRIMARY KEY,
            do_script TEXT,
            undo_script TEXT,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS delta_packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            media_nr INTEGER,
            location TEXT,
            checksum TEXT,
            download_size INTEGER,
            build_time INTEGER,
            baseversion_version TEXT,
            baseversion_release TEXT,
            baseversion_epoch INTEGER,
            baseversion_checksum TEXT,
            baseversion_build_time INTEGER,
            baseversion_sequence_info TEXT,
            FOREIGN KEY (package_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_delta_packages_package ON delta_packages(package_id);

        CREATE TABLE IF NOT EXISTS patch_packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            media_nr INTEGER,
            location TEXT,
            checksum TEXT,
            download_size INTEGER,
            build_time INTEGER,
            FOREIGN KEY (package_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_patch_packages_package ON patch_packages(package_id);

        CREATE TABLE IF NOT EXISTS patch_packages_baseversions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patch_package_id INTEGER NOT NULL,
            version TEXT,
            release TEXT,
            epoch INTEGER,
            FOREIGN KEY (patch_package_id) REFERENCES patch_packages(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS dependencies (
            resolvable_id INTEGER NOT NULL,
            dep_type INTEGER,
            name TEXT,
            version TEXT,
            release TEXT,
            epoch INTEGER,
            arch INTEGER,
            relation INTEGER,
            dep_target INTEGER,
            FOREIGN KEY (resolvable_id) REFERENCES resolvables(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_dependencies_resolvable ON dependencies(resolvable_id);

        CREATE TABLE IF NOT EXISTS locks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT,
            version TEXT,
            release TEXT,
            epoch INTEGER,
            arch INTEGER,
            relation INTEGER,
            catalog TEXT,
            glob TEXT,
            importance INTEGER,
            importance_gteq INTEGER
        );

        -- id references resolvables(id); dangling ids fail when read
        CREATE TABLE IF NOT EXISTS transactions (
            action INTEGER NOT NULL,
            id INTEGER NOT NULL,
            details TEXT
        );
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_migrate_creates_tables() {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for table in [
            "catalogs",
            "resolvables",
            "package_details",
            "patch_details",
            "pattern_details",
            "product_details",
            "message_details",
            "script_details",
            "delta_packages",
            "patch_packages",
            "patch_packages_baseversions",
            "dependencies",
            "locks",
            "transactions",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let temp_file = NamedTempFile::new().unwrap();
        let conn = Connection::open(temp_file.path()).unwrap();

        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
