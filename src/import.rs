// src/import.rs

//! Catalog dumps
//!
//! A dump is a JSON document (optionally gzip-compressed) listing the
//! resolvables of one catalog. Importing it replaces the catalog's rows in
//! the store and stamps the catalog with the dump's sha256 and the import
//! time.

use crate::arch::Arch;
use crate::capability::{Capability, DepClass};
use crate::db::models::CatalogRecord;
use crate::error::{Error, Result};
use crate::resolvable::{
    Checksum, ChecksumType, DeltaBase, DeltaRpm, Kind, OnMediaLocation, PackageDetails, PatchDetails, PatchRpm, Payload,
    ProductDetails, Resolvable, ResolvableStatus, ScriptDetails,
};
use crate::store::{CatalogStore, Ownership};
use crate::version::Edition;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CatalogDump {
    #[serde(default)]
    pub resolvables: Vec<DumpEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DumpEntry {
    /// `package`, `patch`, `pattern`, ...
    #[serde(default = "default_kind")]
    pub kind: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub release: String,
    #[serde(default)]
    pub epoch: u32,
    #[serde(default = "default_arch")]
    pub arch: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub installed_size: u64,
    pub category: Option<String>,
    pub license: Option<String>,

    /// Dependency class name to `[kind:]name [op edition]` expressions
    #[serde(default)]
    pub deps: BTreeMap<String, Vec<String>>,

    pub package: Option<PackageDump>,
    pub patch: Option<PatchDump>,
    pub product: Option<ProductDump>,
    pub message: Option<String>,
    pub script: Option<ScriptDump>,
}

fn default_kind() -> String {
    "package".to_string()
}

fn default_arch() -> String {
    "noarch".to_string()
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageDump {
    pub group: String,
    pub summary: String,
    pub description: String,
    pub location: String,
    pub signature_filename: Option<String>,
    pub archive_size: u64,
    pub install_only: bool,
    pub media_nr: u32,
    pub deltas: Vec<DeltaDump>,
    pub patch_rpms: Vec<PatchRpmDump>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationDump {
    pub media_nr: u32,
    pub filename: String,
    /// `algorithm:digest`
    pub checksum: String,
    pub download_size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaDump {
    pub location: LocationDump,
    pub build_time: i64,
    /// `[epoch:]version[-release]`
    pub base_version: String,
    pub base_checksum: String,
    pub base_build_time: i64,
    pub sequence_info: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchRpmDump {
    pub location: LocationDump,
    pub build_time: i64,
    pub base_versions: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchDump {
    pub patch_id: String,
    pub timestamp: i64,
    pub category: String,
    pub reboot_needed: bool,
    pub affects_package_manager: bool,
    pub interactive: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductDump {
    pub category: String,
    pub dist_name: String,
    pub dist_version: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptDump {
    pub do_script: String,
    pub undo_script: String,
}

/// Read a dump from disk; `.gz` files are decompressed
pub fn read_dump(path: &Path) -> Result<CatalogDump> {
    debug!("Reading catalog dump {}", path.display());
    let file = BufReader::new(File::open(path)?);

    let reader: Box<dyn Read> = if path.extension().is_some_and(|e| e == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    serde_json::from_reader(reader)
        .map_err(|e| Error::ParseError(format!("Invalid catalog dump {}: {}", path.display(), e)))
}

impl CatalogDump {
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ParseError(format!("Invalid catalog dump: {}", e)))
    }

    /// Convert every entry; the first bad entry aborts the conversion
    pub fn into_resolvables(self) -> Result<Vec<Resolvable>> {
        self.resolvables.into_iter().map(DumpEntry::into_resolvable).collect()
    }
}

impl DumpEntry {
    pub fn into_resolvable(self) -> Result<Resolvable> {
        let kind: Kind = self.kind.parse().map_err(Error::ParseError)?;
        let arch: Arch = self.arch.parse().map_err(Error::ParseError)?;
        if self.name.is_empty() {
            return Err(Error::ParseError("Catalog entry without a name".to_string()));
        }

        let payload = match kind {
            Kind::Package => Payload::Package(self.package.map(convert_package).transpose()?.unwrap_or_default()),
            Kind::Patch => Payload::Patch(self.patch.map(convert_patch).unwrap_or_default()),
            Kind::Product => Payload::Product(self.product.map(convert_product).transpose()?.unwrap_or_default()),
            Kind::Message => Payload::Message(self.message.unwrap_or_default()),
            Kind::Script => Payload::Script(
                self.script
                    .map(|s| ScriptDetails {
                        do_script: s.do_script,
                        undo_script: s.undo_script,
                    })
                    .unwrap_or_default(),
            ),
            Kind::Pattern => Payload::Pattern,
            Kind::Language => Payload::Language,
            Kind::Atom => Payload::Atom,
            Kind::Selection => Payload::Selection,
            Kind::SrcPackage => Payload::SrcPackage,
            Kind::System => Payload::System,
        };

        let mut obj = Resolvable::new(self.name, Edition::new(self.version, self.release, self.epoch), arch, payload);
        obj.installed = self.installed;
        obj.local = self.local;
        obj.installed_size = self.installed_size;
        obj.category = self.category;
        obj.license = self.license;

        for (class, exprs) in self.deps {
            let class: DepClass = class.parse().map_err(Error::ParseError)?;
            for expr in exprs {
                match Capability::parse(Kind::Package, &expr) {
                    Ok(cap) => {
                        obj.deps.insert(class, cap);
                    }
                    Err(e) => warn!("Skipping {} dependency of {}: {}", class.as_str(), obj.name, e),
                }
            }
        }

        Ok(obj)
    }
}

fn convert_location(loc: LocationDump) -> Result<OnMediaLocation> {
    Ok(OnMediaLocation {
        media_nr: loc.media_nr,
        filename: loc.filename,
        checksum: loc.checksum.parse::<Checksum>()?,
        download_size: loc.download_size,
    })
}

fn convert_package(pkg: PackageDump) -> Result<PackageDetails> {
    let mut delta_rpms = Vec::with_capacity(pkg.deltas.len());
    for delta in pkg.deltas {
        delta_rpms.push(DeltaRpm {
            location: convert_location(delta.location)?,
            build_time: delta.build_time,
            base: DeltaBase {
                edition: delta.base_version.parse()?,
                checksum: delta.base_checksum.parse()?,
                build_time: delta.base_build_time,
                sequence_info: delta.sequence_info,
            },
        });
    }

    let mut patch_rpms = Vec::with_capacity(pkg.patch_rpms.len());
    for prpm in pkg.patch_rpms {
        patch_rpms.push(PatchRpm {
            location: convert_location(prpm.location)?,
            build_time: prpm.build_time,
            base_versions: prpm
                .base_versions
                .iter()
                .map(|v| v.parse::<Edition>())
                .collect::<Result<Vec<_>>>()?,
        });
    }

    Ok(PackageDetails {
        group: pkg.group,
        summary: pkg.summary,
        description: pkg.description,
        location: pkg.location,
        signature_filename: pkg.signature_filename,
        archive_size: pkg.archive_size,
        install_only: pkg.install_only,
        media_nr: pkg.media_nr,
        delta_rpms,
        patch_rpms,
    })
}

fn convert_patch(patch: PatchDump) -> PatchDetails {
    PatchDetails {
        patch_id: patch.patch_id,
        timestamp: patch.timestamp,
        category: patch.category,
        reboot_needed: patch.reboot_needed,
        affects_package_manager: patch.affects_package_manager,
        interactive: patch.interactive,
    }
}

fn convert_product(product: ProductDump) -> Result<ProductDetails> {
    Ok(ProductDetails {
        category: product.category,
        dist_name: product.dist_name,
        dist_edition: product.dist_version.map(|v| v.parse()).transpose()?,
    })
}

/// Import options beyond the catalog record itself
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub ownership: Ownership,
    pub status: ResolvableStatus,
    /// Mark every entry installed (the system catalog)
    pub installed: bool,
    /// Checksum the dump file must match before anything is written
    pub expected: Option<Checksum>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            ownership: Ownership::ServerOwned,
            status: ResolvableStatus::Undetermined,
            installed: false,
            expected: None,
        }
    }
}

/// Replace a catalog's contents with a dump file
///
/// The catalog record is created if missing, otherwise its name, alias and
/// description are updated. Returns the number of resolvables written.
pub fn import_catalog(
    store: &CatalogStore,
    record: &CatalogRecord,
    path: &Path,
    options: ImportOptions,
) -> Result<usize> {
    if let Some(expected) = &options.expected {
        expected.verify_file(path)?;
    }

    let mut resolvables = read_dump(path)?.into_resolvables()?;
    if options.installed {
        for obj in &mut resolvables {
            obj.installed = true;
        }
    }

    if store.have_catalog(&record.id)? {
        store.update_catalog(&record.id, &record.name, &record.alias, &record.description)?;
    } else {
        store.insert_catalog(record)?;
    }

    let written = store.refresh_catalog(&resolvables, options.status, &record.id, options.ownership)?;

    let checksum = ChecksumType::Sha256.hash_file(path)?;
    CatalogRecord::touch(store.connection(), &record.id, &checksum, &chrono::Utc::now().to_rfc3339())?;

    info!(
        "Imported {} of {} resolvables into catalog {}",
        written,
        resolvables.len(),
        record.id
    );
    Ok(written)
}
