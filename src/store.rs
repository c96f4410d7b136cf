// src/store.rs

//! Write side of the catalog store
//!
//! [`CatalogStore`] owns the SQLite connection for one session. In write
//! mode the session runs inside a single ambient transaction that is
//! committed by [`CatalogStore::close`] (or on drop). Resolvables are written
//! as an envelope row in `resolvables`, one detail row for their kind, child
//! rows for delta and patch rpms, and one row per capability.

use crate::arch::Arch;
use crate::capability::{Dependencies, Relation};
use crate::db::models::CatalogRecord;
use crate::error::{Error, Result};
use crate::resolvable::{Kind, PackageDetails, Payload, Resolvable, ResolvableStatus};
use rusqlite::{Connection, params};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

const INSERT_RESOLVABLE: &str = "INSERT INTO resolvables
    (name, version, release, epoch, arch, installed_size, catalog, installed, local, status, category, license, kind)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const INSERT_PACKAGE: &str = "INSERT INTO package_details
    (resolvable_id, rpm_group, summary, description, package_url, package_filename, signature_filename, file_size, install_only, media_nr)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const INSERT_PATCH: &str = "INSERT INTO patch_details
    (resolvable_id, patch_id, status, creation_time, category, reboot, restart, interactive)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const INSERT_PATTERN: &str = "INSERT INTO pattern_details (resolvable_id, status) VALUES (?1, ?2)";

const INSERT_PRODUCT: &str = "INSERT INTO product_details
    (resolvable_id, status, category, dist_name, dist_version)
    VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_MESSAGE: &str = "INSERT INTO message_details (resolvable_id, content) VALUES (?1, ?2)";

const INSERT_SCRIPT: &str = "INSERT INTO script_details (resolvable_id, do_script, undo_script) VALUES (?1, ?2, ?3)";

const INSERT_DELTA: &str = "INSERT INTO delta_packages
    (package_id, media_nr, location, checksum, download_size, build_time,
     baseversion_version, baseversion_release, baseversion_epoch,
     baseversion_checksum, baseversion_build_time, baseversion_sequence_info)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

const INSERT_PATCH_RPM: &str = "INSERT INTO patch_packages
    (package_id, media_nr, location, checksum, download_size, build_time)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

const INSERT_BASEVERSION: &str = "INSERT INTO patch_packages_baseversions
    (patch_package_id, version, release, epoch)
    VALUES (?1, ?2, ?3, ?4)";

const INSERT_DEPENDENCY: &str = "INSERT INTO dependencies
    (resolvable_id, dep_type, name, version, release, epoch, arch, relation, dep_target)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const WRITE_STATEMENTS: [&str; 11] = [
    INSERT_RESOLVABLE,
    INSERT_PACKAGE,
    INSERT_PATCH,
    INSERT_PATTERN,
    INSERT_PRODUCT,
    INSERT_MESSAGE,
    INSERT_SCRIPT,
    INSERT_DELTA,
    INSERT_PATCH_RPM,
    INSERT_BASEVERSION,
    INSERT_DEPENDENCY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Who is responsible for fetching a package's bytes
///
/// Server-owned packages store their location as `package_url`; the other
/// two store it as `package_filename` and mark the envelope `local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    ServerOwned,
    CacheOwned,
    LocalFile,
}

impl Ownership {
    pub fn as_str(&self) -> &str {
        match self {
            Ownership::ServerOwned => "server",
            Ownership::CacheOwned => "cache",
            Ownership::LocalFile => "local",
        }
    }

    pub fn is_local(&self) -> bool {
        !matches!(self, Ownership::ServerOwned)
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ownership {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "server" => Ok(Ownership::ServerOwned),
            "cache" => Ok(Ownership::CacheOwned),
            "local" => Ok(Ownership::LocalFile),
            _ => Err(format!("Invalid ownership: {}", s)),
        }
    }
}

/// Result of writing one resolvable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written under the new store id
    Written(i64),
    /// The kind has no store representation
    Skipped,
}

/// A session against the catalog database
pub struct CatalogStore {
    conn: Connection,
    path: String,
    in_session: bool,
    system_arch: Arch,
}

impl CatalogStore {
    /// Open an initialized store
    ///
    /// Write mode relaxes `synchronous`, checks that every insert statement
    /// prepares against the schema, and begins the session transaction.
    pub fn open(path: &str, mode: OpenMode) -> Result<Self> {
        let open_err = |reason: String| Error::StoreOpen {
            path: path.to_string(),
            reason,
        };

        if !Path::new(path).exists() {
            return Err(open_err("no such file".to_string()));
        }

        let conn = Connection::open(path).map_err(|e| open_err(e.to_string()))?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(|e| open_err(e.to_string()))?;

        let has_schema: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'resolvables'",
                [],
                |row| row.get(0),
            )
            .map_err(|e| open_err(e.to_string()))?;
        if has_schema == 0 {
            return Err(open_err("no catalog schema".to_string()));
        }

        let mut store = Self {
            conn,
            path: path.to_string(),
            in_session: false,
            system_arch: Arch::host(),
        };

        if mode == OpenMode::Write {
            store.conn.set_prepared_statement_cache_capacity(WRITE_STATEMENTS.len() * 2);
            store
                .conn
                .execute_batch("PRAGMA synchronous = OFF;")
                .map_err(|e| open_err(e.to_string()))?;
            store
                .prepare_write_statements()
                .map_err(|e| open_err(e.to_string()))?;
            store
                .conn
                .execute_batch("BEGIN")
                .map_err(|e| open_err(e.to_string()))?;
            store.in_session = true;
        }

        debug!("Opened catalog store {} ({:?})", path, mode);
        Ok(store)
    }

    /// Architecture used to filter catalog contents on write
    pub fn with_system_arch(mut self, arch: Arch) -> Self {
        self.system_arch = arch;
        self
    }

    pub fn system_arch(&self) -> Arch {
        self.system_arch
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    fn prepare_write_statements(&self) -> Result<()> {
        for sql in WRITE_STATEMENTS {
            self.conn.prepare_cached(sql).map_err(|e| {
                let head = sql.lines().next().unwrap_or(sql);
                Error::PrepareStatement(format!("{} ({})", e, head))
            })?;
        }
        Ok(())
    }

    /// Commit the session transaction and close the store
    pub fn close(mut self) -> Result<()> {
        if self.in_session {
            self.in_session = false;
            self.conn.execute_batch("COMMIT")?;
            debug!("Committed catalog store session {}", self.path);
        }
        Ok(())
    }

    /// Write one resolvable with its details and capabilities
    pub fn write_resolvable(
        &self,
        obj: &Resolvable,
        status: ResolvableStatus,
        catalog_id: &str,
        ownership: Ownership,
    ) -> Result<WriteOutcome> {
        let kind = obj.kind();
        let kind_code = match kind.store_code() {
            Some(code) if kind.is_stored() => code,
            _ => {
                debug!("Not storing {} ({} is not a stored kind)", obj, kind);
                return Ok(WriteOutcome::Skipped);
            }
        };

        let mut stmt = self.conn.prepare_cached(INSERT_RESOLVABLE)?;
        stmt.execute(params![
            &obj.name,
            &obj.edition.version,
            &obj.edition.release,
            obj.edition.epoch,
            obj.arch.code(),
            obj.installed_size as i64,
            catalog_id,
            obj.installed,
            ownership.is_local(),
            status.code(),
            &obj.category,
            &obj.license,
            kind_code,
        ])?;
        let id = self.conn.last_insert_rowid();

        self.write_details(id, &obj.payload, status, ownership)?;
        self.write_dependencies(id, &obj.deps)?;

        Ok(WriteOutcome::Written(id))
    }

    fn write_details(&self, id: i64, payload: &Payload, status: ResolvableStatus, ownership: Ownership) -> Result<()> {
        match payload {
            Payload::Package(details) => self.write_package(id, details, ownership)?,
            Payload::Patch(d) => {
                self.conn.prepare_cached(INSERT_PATCH)?.execute(params![
                    id,
                    &d.patch_id,
                    status.code(),
                    d.timestamp,
                    &d.category,
                    d.reboot_needed,
                    d.affects_package_manager,
                    d.interactive,
                ])?;
            }
            Payload::Pattern => {
                self.conn
                    .prepare_cached(INSERT_PATTERN)?
                    .execute(params![id, status.code()])?;
            }
            Payload::Product(d) => {
                self.conn.prepare_cached(INSERT_PRODUCT)?.execute(params![
                    id,
                    status.code(),
                    &d.category,
                    &d.dist_name,
                    d.dist_edition.as_ref().map(|e| e.to_string()),
                ])?;
            }
            Payload::Message(text) => {
                self.conn
                    .prepare_cached(INSERT_MESSAGE)?
                    .execute(params![id, text])?;
            }
            Payload::Script(s) => {
                self.conn
                    .prepare_cached(INSERT_SCRIPT)?
                    .execute(params![id, &s.do_script, &s.undo_script])?;
            }
            Payload::Language | Payload::Atom => {}
            Payload::Selection | Payload::SrcPackage | Payload::System => {}
        }
        Ok(())
    }

    fn write_package(&self, id: i64, d: &PackageDetails, ownership: Ownership) -> Result<()> {
        let (url, filename) = match ownership {
            Ownership::ServerOwned => (Some(&d.location), None),
            Ownership::CacheOwned | Ownership::LocalFile => (None, Some(&d.location)),
        };

        self.conn.prepare_cached(INSERT_PACKAGE)?.execute(params![
            id,
            &d.group,
            &d.summary,
            strip_authors(&d.description),
            url,
            filename,
            &d.signature_filename,
            d.archive_size as i64,
            d.install_only,
            d.media_nr,
        ])?;

        for delta in &d.delta_rpms {
            let base = &delta.base;
            self.conn.prepare_cached(INSERT_DELTA)?.execute(params![
                id,
                delta.location.media_nr,
                &delta.location.filename,
                delta.location.checksum.to_string(),
                delta.location.download_size as i64,
                delta.build_time,
                &base.edition.version,
                &base.edition.release,
                base.edition.epoch,
                base.checksum.to_string(),
                base.build_time,
                &base.sequence_info,
            ])?;
        }

        for patch in &d.patch_rpms {
            self.conn.prepare_cached(INSERT_PATCH_RPM)?.execute(params![
                id,
                patch.location.media_nr,
                &patch.location.filename,
                patch.location.checksum.to_string(),
                patch.location.download_size as i64,
                patch.build_time,
            ])?;
            let patch_id = self.conn.last_insert_rowid();

            let mut stmt = self.conn.prepare_cached(INSERT_BASEVERSION)?;
            for base in &patch.base_versions {
                stmt.execute(params![patch_id, &base.version, &base.release, base.epoch])?;
            }
        }

        Ok(())
    }

    fn write_dependencies(&self, id: i64, deps: &Dependencies) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(INSERT_DEPENDENCY)?;
        let mut written = 0;

        for (class, cap) in deps.iter() {
            let Some(target) = cap.kind.store_code() else {
                debug!("Skipping capability {} with unmappable target kind", cap);
                continue;
            };

            let (version, release, epoch, relation) = match &cap.edition {
                Some(ed) if cap.relation.is_constrained() => {
                    (Some(&ed.version), Some(&ed.release), Some(ed.epoch), cap.relation)
                }
                _ => (None, None, None, Relation::None),
            };

            stmt.execute(params![
                id,
                class.code(),
                &cap.name,
                version,
                release,
                epoch,
                Arch::Unknown.code(),
                relation.code(),
                target,
            ])?;
            written += 1;
        }

        Ok(written)
    }

    /// Write every storable entry of a catalog
    ///
    /// Source packages are never stored. Other entries are stored if they
    /// are installed, of kind atom, or compatible with the system
    /// architecture. If any write fails the catalog is emptied before the
    /// error is returned. Returns the number of resolvables written.
    pub fn write_catalog_contents(
        &self,
        resolvables: &[Resolvable],
        status: ResolvableStatus,
        catalog_id: &str,
        ownership: Ownership,
    ) -> Result<usize> {
        let mut written = 0;

        for obj in resolvables {
            if !self.wants(obj) {
                debug!("Not storing {} for system arch {}", obj, self.system_arch);
                continue;
            }

            match self.write_resolvable(obj, status, catalog_id, ownership) {
                Ok(WriteOutcome::Written(_)) => written += 1,
                Ok(WriteOutcome::Skipped) => {}
                Err(e) => {
                    error!("Failed to write {} to catalog {}: {}", obj, catalog_id, e);
                    if let Err(cleanup) = self.empty_catalog(catalog_id) {
                        warn!("Could not empty catalog {}: {}", catalog_id, cleanup);
                    }
                    return Err(e);
                }
            }
        }

        info!("Wrote {} resolvables to catalog {}", written, catalog_id);
        Ok(written)
    }

    fn wants(&self, obj: &Resolvable) -> bool {
        match obj.kind() {
            Kind::SrcPackage => false,
            Kind::Atom => true,
            _ => obj.installed || obj.arch.is_compatible_with(self.system_arch),
        }
    }

    /// Replace a catalog's contents: empty it, then write everything again
    pub fn refresh_catalog(
        &self,
        resolvables: &[Resolvable],
        status: ResolvableStatus,
        catalog_id: &str,
        ownership: Ownership,
    ) -> Result<usize> {
        self.empty_catalog(catalog_id)?;
        self.write_catalog_contents(resolvables, status, catalog_id, ownership)
    }

    /// Delete all resolvables of a catalog; details, child records and
    /// capabilities go with them
    pub fn empty_catalog(&self, catalog_id: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM resolvables WHERE catalog = ?1", [catalog_id])?;
        debug!("Emptied catalog {} ({} resolvables)", catalog_id, removed);
        Ok(removed)
    }

    /// Delete a catalog record together with its resolvables
    pub fn remove_catalog(&self, catalog_id: &str) -> Result<()> {
        self.empty_catalog(catalog_id)?;
        CatalogRecord::delete(&self.conn, catalog_id)?;
        info!("Removed catalog {}", catalog_id);
        Ok(())
    }

    pub fn have_catalog(&self, catalog_id: &str) -> Result<bool> {
        CatalogRecord::exists(&self.conn, catalog_id)
    }

    pub fn insert_catalog(&self, record: &CatalogRecord) -> Result<()> {
        record.insert(&self.conn)
    }

    /// Update a catalog's name, alias and description; empty values keep
    /// what is stored
    pub fn update_catalog(&self, catalog_id: &str, name: &str, alias: &str, description: &str) -> Result<bool> {
        CatalogRecord::update(&self.conn, catalog_id, name, alias, description)
    }

    /// Write back the establish status of a resolvable
    pub fn update_status(&self, id: i64, status: ResolvableStatus) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE resolvables SET status = ?1 WHERE id = ?2",
            params![status.code(), id],
        )?;
        Ok(changed > 0)
    }
}

impl Drop for CatalogStore {
    fn drop(&mut self) {
        if self.in_session {
            if let Err(e) = self.conn.execute_batch("COMMIT") {
                warn!("Failed to commit catalog store session {}: {}", self.path, e);
            }
        }
    }
}

/// Cut a package description at its `Authors:` trailer
fn strip_authors(description: &str) -> &str {
    match description.find("Authors:") {
        Some(pos) => description[..pos].trim_end(),
        None => description,
    }
}
