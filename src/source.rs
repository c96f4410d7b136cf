// src/source.rs

//! Read side of the catalog store
//!
//! [`SourceLoader`] rebuilds the resolvables of one catalog: one query per
//! stored kind (envelope joined with the kind's detail table), child queries
//! for package delta/patch rpms, and one dependency query per resolvable when
//! the load policy asks for capabilities.

use crate::arch::Arch;
use crate::capability::{Capability, DepClass, Dependencies, Relation};
use crate::error::{Error, Result};
use crate::resolvable::{
    Checksum, DeltaBase, DeltaRpm, Kind, OnMediaLocation, PackageDetails, PatchDetails, PatchRpm, Payload,
    ProductDetails, Resolvable, ResolvableStatus, ScriptDetails,
};
use crate::version::Edition;
use rusqlite::types::Value;
use rusqlite::{Connection, Row};
use tracing::{debug, info, warn};

const ENVELOPE_COLUMNS: &str = "r.id, r.name, r.version, r.release, r.epoch, r.arch, r.installed_size, \
     r.installed, r.local, r.status, r.category, r.license";

/// Index of the first kind-specific column in a per-kind query
const DETAIL_OFFSET: usize = 12;

/// What to reconstruct besides the envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPolicy {
    /// Read capability rows; transaction-only loads can skip them
    pub create_dependencies: bool,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            create_dependencies: true,
        }
    }
}

/// Loads the resolvables of one catalog from the store
pub struct SourceLoader<'c> {
    conn: &'c Connection,
    catalog_id: String,
    policy: LoadPolicy,
}

/// Envelope columns as read, before validation
struct EnvelopeRow {
    id: i64,
    name: Option<String>,
    version: Option<String>,
    release: Option<String>,
    epoch: Option<i64>,
    arch: Option<i64>,
    installed_size: Option<i64>,
    installed: Option<bool>,
    local: Option<bool>,
    status: Option<i64>,
    category: Option<String>,
    license: Option<String>,
}

impl EnvelopeRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            release: row.get(3)?,
            epoch: row.get(4)?,
            arch: row.get(5)?,
            installed_size: row.get(6)?,
            installed: row.get(7)?,
            local: row.get(8)?,
            status: row.get(9)?,
            category: row.get(10)?,
            license: row.get(11)?,
        })
    }
}

impl<'c> SourceLoader<'c> {
    pub fn new(conn: &'c Connection, catalog_id: impl Into<String>, policy: LoadPolicy) -> Self {
        Self {
            conn,
            catalog_id: catalog_id.into(),
            policy,
        }
    }

    pub fn catalog_id(&self) -> &str {
        &self.catalog_id
    }

    /// Load every stored resolvable of the catalog
    ///
    /// A row without name or version fails the whole load with
    /// [`Error::RowDecode`]. Malformed capabilities and child records with
    /// undecodable checksums are skipped with a warning.
    pub fn load_catalog(&self) -> Result<Vec<Resolvable>> {
        let mut resolvables = Vec::new();

        for kind in Kind::STORED {
            let rows = self.query_kind(kind)?;
            debug!("Catalog {}: {} {} rows", self.catalog_id, rows.len(), kind);

            for (envelope, payload) in rows {
                let mut obj = self.build(envelope, payload)?;
                let id = obj.id.unwrap_or_default();

                if let Payload::Package(details) = &mut obj.payload {
                    details.delta_rpms = self.read_delta_rpms(id)?;
                    details.patch_rpms = self.read_patch_rpms(id)?;
                }

                if kind == Kind::Product {
                    obj.name = obj.name.replace(' ', "_");
                }

                if self.policy.create_dependencies {
                    obj.deps = self.read_dependencies(id)?;
                }

                resolvables.push(obj);
            }
        }

        info!(
            "Loaded {} resolvables from catalog {}",
            resolvables.len(),
            self.catalog_id
        );
        Ok(resolvables)
    }

    fn decode_error(&self, reason: String) -> Error {
        Error::RowDecode {
            catalog: self.catalog_id.clone(),
            reason,
        }
    }

    fn query_kind(&self, kind: Kind) -> Result<Vec<(EnvelopeRow, Payload)>> {
        let (detail_columns, join) = match kind {
            Kind::Package => (
                ", d.rpm_group, d.summary, d.description, d.package_url, d.package_filename, \
                 d.signature_filename, d.file_size, d.install_only, d.media_nr",
                "LEFT JOIN package_details d ON d.resolvable_id = r.id",
            ),
            Kind::Patch => (
                ", d.patch_id, d.creation_time, d.category, d.reboot, d.restart, d.interactive",
                "LEFT JOIN patch_details d ON d.resolvable_id = r.id",
            ),
            Kind::Product => (
                ", d.category, d.dist_name, d.dist_version",
                "LEFT JOIN product_details d ON d.resolvable_id = r.id",
            ),
            Kind::Message => (
                ", d.content",
                "LEFT JOIN message_details d ON d.resolvable_id = r.id",
            ),
            Kind::Script => (
                ", d.do_script, d.undo_script",
                "LEFT JOIN script_details d ON d.resolvable_id = r.id",
            ),
            _ => ("", ""),
        };

        let sql = format!(
            "SELECT {}{} FROM resolvables r {} WHERE r.catalog = ?1 AND r.kind = ?2 ORDER BY r.id",
            ENVELOPE_COLUMNS, detail_columns, join
        );

        let kind_code = kind.store_code().unwrap_or_default();
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![&self.catalog_id, kind_code], |row| {
                Ok((EnvelopeRow::read(row)?, read_payload(kind, row)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| self.decode_error(format!("{} row: {}", kind, e)))?;

        Ok(rows)
    }

    fn build(&self, env: EnvelopeRow, payload: Payload) -> Result<Resolvable> {
        let name = env
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| self.decode_error(format!("resolvable {} has no name", env.id)))?;
        let version = env
            .version
            .ok_or_else(|| self.decode_error(format!("resolvable {} ({}) has no version", env.id, name)))?;
        let epoch = u32::try_from(env.epoch.unwrap_or(0))
            .map_err(|_| self.decode_error(format!("resolvable {} ({}) has a negative epoch", env.id, name)))?;

        let edition = Edition::new(version, env.release.unwrap_or_default(), epoch);
        let arch = env.arch.map_or(Arch::Unknown, Arch::from_code);

        let mut obj = Resolvable::new(name, edition, arch, payload);
        obj.id = Some(env.id);
        obj.catalog = self.catalog_id.clone();
        obj.installed = env.installed.unwrap_or(false);
        obj.local = env.local.unwrap_or(false);
        obj.installed_size = env.installed_size.unwrap_or(0).max(0) as u64;
        obj.status = env.status.map_or(ResolvableStatus::Undetermined, ResolvableStatus::from_code);
        obj.category = env.category;
        obj.license = env.license;
        Ok(obj)
    }

    fn read_delta_rpms(&self, package_id: i64) -> Result<Vec<DeltaRpm>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT media_nr, location, checksum, download_size, build_time,
                    baseversion_version, baseversion_release, baseversion_epoch,
                    baseversion_checksum, baseversion_build_time, baseversion_sequence_info
             FROM delta_packages WHERE package_id = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map([package_id], |row| {
                Ok((
                    read_location_columns(row, 0)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Value>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<i64>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut deltas = Vec::with_capacity(rows.len());
        for (raw, build_time, bv_version, bv_release, bv_epoch, bv_checksum, bv_build_time, bv_sequence) in rows {
            let Some(location) = raw.decode(package_id, "delta rpm") else {
                continue;
            };
            let Some(base_checksum) = decode_checksum(bv_checksum.as_deref(), package_id, "delta rpm base") else {
                continue;
            };
            let bv_epoch = match epoch(&bv_epoch) {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping delta rpm of package {}: {}", package_id, e);
                    continue;
                }
            };

            deltas.push(DeltaRpm {
                location,
                build_time: build_time.unwrap_or(0),
                base: DeltaBase {
                    edition: Edition::new(
                        bv_version.unwrap_or_default(),
                        bv_release.unwrap_or_default(),
                        bv_epoch,
                    ),
                    checksum: base_checksum,
                    build_time: bv_build_time.unwrap_or(0),
                    sequence_info: bv_sequence.unwrap_or_default(),
                },
            });
        }

        Ok(deltas)
    }

    fn read_patch_rpms(&self, package_id: i64) -> Result<Vec<PatchRpm>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT media_nr, location, checksum, download_size, build_time, id
             FROM patch_packages WHERE package_id = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map([package_id], |row| {
                Ok((
                    read_location_columns(row, 0)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut patches = Vec::with_capacity(rows.len());
        for (raw, build_time, patch_package_id) in rows {
            let Some(location) = raw.decode(package_id, "patch rpm") else {
                continue;
            };

            patches.push(PatchRpm {
                location,
                build_time: build_time.unwrap_or(0),
                base_versions: self.read_base_versions(patch_package_id)?,
            });
        }

        Ok(patches)
    }

    fn read_base_versions(&self, patch_package_id: i64) -> Result<Vec<Edition>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT version, release, epoch FROM patch_packages_baseversions
             WHERE patch_package_id = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map([patch_package_id], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    row.get::<_, Value>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut editions = Vec::with_capacity(rows.len());
        for (version, release, raw_epoch) in rows {
            match epoch(&raw_epoch) {
                Ok(e) => editions.push(Edition::new(version, release, e)),
                Err(e) => warn!("Skipping base version of patch rpm {}: {}", patch_package_id, e),
            }
        }

        Ok(editions)
    }

    fn read_dependencies(&self, resolvable_id: i64) -> Result<Dependencies> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT dep_type, name, version, release, epoch, relation, dep_target
             FROM dependencies WHERE resolvable_id = ?1 ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map([resolvable_id], |row| {
                Ok(DependencyRow {
                    dep_type: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    release: row.get(3)?,
                    epoch: row.get(4)?,
                    relation: row.get(5)?,
                    dep_target: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut deps = Dependencies::default();
        for dep in rows {
            let Some(class) = integer(&dep.dep_type).ok().flatten().and_then(DepClass::from_code) else {
                warn!(
                    "Unknown dependency type {:?} for resolvable {}",
                    dep.dep_type, resolvable_id
                );
                continue;
            };

            match dep.into_capability() {
                Ok(cap) => {
                    deps.insert(class, cap);
                }
                Err(e) => warn!("Skipping dependency of resolvable {}: {}", resolvable_id, e),
            }
        }

        Ok(deps)
    }
}

/// Detail columns of one kind, with defaults for absent rows
fn read_payload(kind: Kind, row: &Row) -> rusqlite::Result<Payload> {
    let text = |i: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(DETAIL_OFFSET + i)?.unwrap_or_default())
    };
    let flag = |i: usize| -> rusqlite::Result<bool> {
        Ok(row.get::<_, Option<bool>>(DETAIL_OFFSET + i)?.unwrap_or(false))
    };
    let int = |i: usize| -> rusqlite::Result<i64> {
        Ok(row.get::<_, Option<i64>>(DETAIL_OFFSET + i)?.unwrap_or(0))
    };

    let payload = match kind {
        Kind::Package => {
            let url: Option<String> = row.get(DETAIL_OFFSET + 3)?;
            let filename: Option<String> = row.get(DETAIL_OFFSET + 4)?;
            Payload::Package(PackageDetails {
                group: text(0)?,
                summary: text(1)?,
                description: text(2)?,
                location: url.or(filename).unwrap_or_default(),
                signature_filename: row.get(DETAIL_OFFSET + 5)?,
                archive_size: int(6)?.max(0) as u64,
                install_only: flag(7)?,
                media_nr: int(8)?.clamp(0, u32::MAX as i64) as u32,
                delta_rpms: Vec::new(),
                patch_rpms: Vec::new(),
            })
        }
        Kind::Patch => Payload::Patch(PatchDetails {
            patch_id: text(0)?,
            timestamp: int(1)?,
            category: text(2)?,
            reboot_needed: flag(3)?,
            affects_package_manager: flag(4)?,
            interactive: flag(5)?,
        }),
        Kind::Product => {
            let dist_version: Option<String> = row.get(DETAIL_OFFSET + 2)?;
            let dist_edition = dist_version.and_then(|v| match v.parse::<Edition>() {
                Ok(ed) => Some(ed),
                Err(e) => {
                    warn!("Ignoring product dist version: {}", e);
                    None
                }
            });
            Payload::Product(ProductDetails {
                category: text(0)?,
                dist_name: text(1)?,
                dist_edition,
            })
        }
        Kind::Message => Payload::Message(text(0)?),
        Kind::Script => Payload::Script(ScriptDetails {
            do_script: text(0)?,
            undo_script: text(1)?,
        }),
        Kind::Pattern => Payload::Pattern,
        Kind::Language => Payload::Language,
        Kind::Atom => Payload::Atom,
        Kind::Selection => Payload::Selection,
        Kind::SrcPackage => Payload::SrcPackage,
        Kind::System => Payload::System,
    };

    Ok(payload)
}

/// `media_nr, location, checksum, download_size` starting at `start`
struct LocationColumns {
    media_nr: Option<u32>,
    filename: Option<String>,
    checksum: Option<String>,
    download_size: Option<i64>,
}

fn read_location_columns(row: &Row, start: usize) -> rusqlite::Result<LocationColumns> {
    Ok(LocationColumns {
        media_nr: row.get(start)?,
        filename: row.get(start + 1)?,
        checksum: row.get(start + 2)?,
        download_size: row.get(start + 3)?,
    })
}

impl LocationColumns {
    fn decode(self, package_id: i64, what: &str) -> Option<OnMediaLocation> {
        let checksum = decode_checksum(self.checksum.as_deref(), package_id, what)?;
        Some(OnMediaLocation {
            media_nr: self.media_nr.unwrap_or(1),
            filename: self.filename.unwrap_or_default(),
            checksum,
            download_size: self.download_size.unwrap_or(0).max(0) as u64,
        })
    }
}

fn decode_checksum(raw: Option<&str>, package_id: i64, what: &str) -> Option<Checksum> {
    match raw.map(str::parse::<Checksum>) {
        Some(Ok(sum)) => Some(sum),
        Some(Err(e)) => {
            warn!("Skipping {} of package {}: {}", what, package_id, e);
            None
        }
        None => {
            warn!("Skipping {} of package {}: no checksum", what, package_id);
            None
        }
    }
}

/// A `dependencies` row as read
// Integer columns stay untyped until the row is checked, so one mistyped
// value costs only its own row.
struct DependencyRow {
    dep_type: Value,
    name: Option<String>,
    version: Option<String>,
    release: Option<String>,
    epoch: Value,
    relation: Value,
    dep_target: Value,
}

/// Integer column value; `Err` when the column holds another type
fn integer(value: &Value) -> std::result::Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(n) => Ok(Some(*n)),
        other => Err(format!("expected an integer, found {}", other.data_type())),
    }
}

/// Epoch column value, NULL reads as 0
fn epoch(value: &Value) -> std::result::Result<u32, String> {
    let raw = integer(value)?.unwrap_or(0);
    u32::try_from(raw).map_err(|_| format!("epoch {} out of range", raw))
}

impl DependencyRow {
    fn into_capability(self) -> Result<Capability> {
        let fail = |reason: &str| Error::CapabilityParse {
            expr: self.name.clone().unwrap_or_default(),
            reason: reason.to_string(),
        };

        let kind = integer(&self.dep_target)
            .ok()
            .flatten()
            .and_then(Kind::from_store_code)
            .ok_or_else(|| fail("unknown target kind"))?;

        let name = match self.name.as_deref() {
            Some(n) if !n.is_empty() => n,
            _ => return Err(fail("empty name")),
        };

        // NULL version means unconstrained, whatever the relation says
        let Some(version) = self.version.as_deref() else {
            return Ok(Capability::unconstrained(kind, name));
        };
        if version.is_empty() {
            return Err(fail("empty version"));
        }

        let relation = integer(&self.relation)
            .map_err(|e| fail(&format!("relation: {}", e)))?
            .map_or(Relation::None, Relation::from_code);
        let epoch = epoch(&self.epoch).map_err(|e| fail(&e))?;
        let edition = Edition::new(version, self.release.clone().unwrap_or_default(), epoch);
        Ok(Capability::new(kind, name, relation, Some(edition)))
    }
}
