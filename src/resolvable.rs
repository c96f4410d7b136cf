// src/resolvable.rs

//! The resolvable model
//!
//! A [`Resolvable`] is the common envelope (identity, edition, arch, catalog,
//! flags) plus a [`Payload`] holding the kind-specific details. Every read or
//! write boundary matches on the payload once instead of probing for kinds.

use crate::arch::Arch;
use crate::capability::Dependencies;
use crate::error::{Error, Result};
use crate::version::Edition;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Kind of a resolvable, also used as a capability's target kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Package,
    Script,
    Message,
    Patch,
    Selection,
    Pattern,
    Product,
    Language,
    Atom,
    SrcPackage,
    System,
}

impl Kind {
    /// Kinds that have a row in the `resolvables` table, in load order
    pub const STORED: [Kind; 8] = [
        Kind::Package,
        Kind::Patch,
        Kind::Pattern,
        Kind::Product,
        Kind::Message,
        Kind::Script,
        Kind::Language,
        Kind::Atom,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Kind::Package => "package",
            Kind::Script => "script",
            Kind::Message => "message",
            Kind::Patch => "patch",
            Kind::Selection => "selection",
            Kind::Pattern => "pattern",
            Kind::Product => "product",
            Kind::Language => "language",
            Kind::Atom => "atom",
            Kind::SrcPackage => "srcpackage",
            Kind::System => "system",
        }
    }

    /// Code written to `resolvables.kind` and `dependencies.dep_target`
    ///
    /// `System` only ever appears on the read side and has no write mapping.
    pub fn store_code(&self) -> Option<i32> {
        match self {
            Kind::Package => Some(0),
            Kind::Script => Some(1),
            Kind::Message => Some(2),
            Kind::Patch => Some(3),
            Kind::Selection => Some(4),
            Kind::Pattern => Some(5),
            Kind::Product => Some(6),
            Kind::Language => Some(7),
            Kind::Atom => Some(8),
            Kind::SrcPackage => Some(9),
            Kind::System => None,
        }
    }

    pub fn from_store_code(code: i64) -> Option<Kind> {
        match code {
            0 => Some(Kind::Package),
            1 => Some(Kind::Script),
            2 => Some(Kind::Message),
            3 => Some(Kind::Patch),
            4 => Some(Kind::Selection),
            5 => Some(Kind::Pattern),
            6 => Some(Kind::Product),
            7 => Some(Kind::Language),
            8 => Some(Kind::Atom),
            9 => Some(Kind::SrcPackage),
            10 => Some(Kind::System),
            _ => None,
        }
    }

    /// Whether resolvables of this kind are written to the store
    pub fn is_stored(&self) -> bool {
        Self::STORED.contains(self)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "package" => Ok(Kind::Package),
            "script" => Ok(Kind::Script),
            "message" => Ok(Kind::Message),
            "patch" => Ok(Kind::Patch),
            "selection" => Ok(Kind::Selection),
            "pattern" => Ok(Kind::Pattern),
            "product" => Ok(Kind::Product),
            "language" => Ok(Kind::Language),
            "atom" => Ok(Kind::Atom),
            "srcpackage" => Ok(Kind::SrcPackage),
            "system" => Ok(Kind::System),
            _ => Err(format!("Invalid resolvable kind: {}", s)),
        }
    }
}

/// Establish status of a resolvable (patches, patterns, products)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolvableStatus {
    #[default]
    Undetermined,
    Unneeded,
    Satisfied,
    Broken,
}

impl ResolvableStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ResolvableStatus::Undetermined => "undetermined",
            ResolvableStatus::Unneeded => "unneeded",
            ResolvableStatus::Satisfied => "satisfied",
            ResolvableStatus::Broken => "broken",
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ResolvableStatus::Undetermined => 0,
            ResolvableStatus::Unneeded => 1,
            ResolvableStatus::Satisfied => 2,
            ResolvableStatus::Broken => 3,
        }
    }

    pub fn from_code(code: i64) -> ResolvableStatus {
        match code {
            1 => ResolvableStatus::Unneeded,
            2 => ResolvableStatus::Satisfied,
            3 => ResolvableStatus::Broken,
            _ => ResolvableStatus::Undetermined,
        }
    }
}

impl FromStr for ResolvableStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "undetermined" => Ok(ResolvableStatus::Undetermined),
            "unneeded" => Ok(ResolvableStatus::Unneeded),
            "satisfied" => Ok(ResolvableStatus::Satisfied),
            "broken" => Ok(ResolvableStatus::Broken),
            _ => Err(format!("Invalid resolvable status: {}", s)),
        }
    }
}

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumType {
    pub fn as_str(&self) -> &str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha512 => "sha512",
        }
    }

    /// Hex digest of a local file
    ///
    /// Only sha256 and sha512 can be computed locally.
    pub fn hash_file(&self, path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        match self {
            ChecksumType::Sha256 => {
                let mut hasher = Sha256::new();
                io::copy(&mut file, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
            ChecksumType::Sha512 => {
                let mut hasher = Sha512::new();
                io::copy(&mut file, &mut hasher)?;
                Ok(format!("{:x}", hasher.finalize()))
            }
            other => Err(Error::ParseError(format!("Cannot verify {} checksums", other.as_str()))),
        }
    }
}

impl FromStr for ChecksumType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(ChecksumType::Md5),
            "sha1" | "sha" => Ok(ChecksumType::Sha1),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha512" => Ok(ChecksumType::Sha512),
            _ => Err(format!("Unknown checksum type: {}", s)),
        }
    }
}

/// A `{algorithm}:{digest}` checksum as stored in child-record columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub kind: ChecksumType,
    pub digest: String,
}

impl Checksum {
    pub fn new(kind: ChecksumType, digest: impl Into<String>) -> Self {
        Self {
            kind,
            digest: digest.into(),
        }
    }

    /// Hash a local file and compare against this checksum
    pub fn verify_file(&self, path: &Path) -> Result<()> {
        debug!("Verifying {} checksum for {}", self.kind.as_str(), path.display());

        let actual = self.kind.hash_file(path)?;
        if !actual.eq_ignore_ascii_case(&self.digest) {
            return Err(Error::ChecksumMismatch {
                expected: self.digest.clone(),
                actual,
            });
        }

        Ok(())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.digest)
    }
}

impl FromStr for Checksum {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(Error::ParseError(format!("Malformed checksum: '{}'", s)));
        }

        let kind = parts[0].parse::<ChecksumType>().map_err(Error::ParseError)?;
        Ok(Checksum::new(kind, parts[1]))
    }
}

/// Where a payload lives on its installation medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnMediaLocation {
    pub media_nr: u32,
    pub filename: String,
    pub checksum: Checksum,
    pub download_size: u64,
}

/// The edition a delta rpm applies against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaBase {
    pub edition: Edition,
    pub checksum: Checksum,
    pub build_time: i64,
    pub sequence_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaRpm {
    pub location: OnMediaLocation,
    pub build_time: i64,
    pub base: DeltaBase,
}

/// A patch rpm with the editions it can be applied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRpm {
    pub location: OnMediaLocation,
    pub build_time: i64,
    pub base_versions: Vec<Edition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDetails {
    pub group: String,
    pub summary: String,
    pub description: String,
    /// Remote URL or local file name, depending on ownership
    pub location: String,
    pub signature_filename: Option<String>,
    pub archive_size: u64,
    pub install_only: bool,
    pub media_nr: u32,
    pub delta_rpms: Vec<DeltaRpm>,
    pub patch_rpms: Vec<PatchRpm>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchDetails {
    pub patch_id: String,
    pub timestamp: i64,
    pub category: String,
    pub reboot_needed: bool,
    pub affects_package_manager: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductDetails {
    pub category: String,
    pub dist_name: String,
    pub dist_edition: Option<Edition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDetails {
    pub do_script: String,
    pub undo_script: String,
}

/// Kind-specific part of a resolvable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Package(PackageDetails),
    Patch(PatchDetails),
    Pattern,
    Product(ProductDetails),
    Message(String),
    Script(ScriptDetails),
    Language,
    Atom,
    Selection,
    SrcPackage,
    System,
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Package(_) => Kind::Package,
            Payload::Patch(_) => Kind::Patch,
            Payload::Pattern => Kind::Pattern,
            Payload::Product(_) => Kind::Product,
            Payload::Message(_) => Kind::Message,
            Payload::Script(_) => Kind::Script,
            Payload::Language => Kind::Language,
            Payload::Atom => Kind::Atom,
            Payload::Selection => Kind::Selection,
            Payload::SrcPackage => Kind::SrcPackage,
            Payload::System => Kind::System,
        }
    }
}

/// A tracked package-manager entity
#[derive(Debug, Clone, PartialEq)]
pub struct Resolvable {
    /// Store-assigned id; `None` until written
    pub id: Option<i64>,
    pub name: String,
    pub edition: Edition,
    pub arch: Arch,
    pub catalog: String,
    pub installed: bool,
    pub local: bool,
    pub installed_size: u64,
    pub status: ResolvableStatus,
    pub category: Option<String>,
    pub license: Option<String>,
    pub payload: Payload,
    pub deps: Dependencies,
}

impl Resolvable {
    pub fn new(name: impl Into<String>, edition: Edition, arch: Arch, payload: Payload) -> Self {
        Self {
            id: None,
            name: name.into(),
            edition,
            arch,
            catalog: String::new(),
            installed: false,
            local: false,
            installed_size: 0,
            status: ResolvableStatus::default(),
            category: None,
            license: None,
            payload,
            deps: Dependencies::default(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }
}

/// `[kind:]name-edition.arch`, with the kind prefix omitted for packages
impl fmt::Display for Resolvable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind() != Kind::Package {
            write!(f, "{}:", self.kind())?;
        }
        write!(f, "{}-{}.{}", self.name, self.edition, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_kind_store_codes() {
        assert_eq!(Kind::Package.store_code(), Some(0));
        assert_eq!(Kind::Atom.store_code(), Some(8));
        assert_eq!(Kind::System.store_code(), None);
        assert_eq!(Kind::from_store_code(10), Some(Kind::System));
        assert_eq!(Kind::from_store_code(42), None);

        for kind in Kind::STORED {
            let code = kind.store_code().unwrap() as i64;
            assert_eq!(Kind::from_store_code(code), Some(kind));
        }
        assert!(!Kind::SrcPackage.is_stored());
    }

    #[test]
    fn test_checksum_parse() {
        let sum: Checksum = "sha256:abcdef".parse().unwrap();
        assert_eq!(sum.kind, ChecksumType::Sha256);
        assert_eq!(sum.digest, "abcdef");
        assert_eq!(sum.to_string(), "sha256:abcdef");

        assert!("abcdef".parse::<Checksum>().is_err());
        assert!("sha256:".parse::<Checksum>().is_err());
        assert!("sha256:ab:cd".parse::<Checksum>().is_err());
        assert!("crc32:abcd".parse::<Checksum>().is_err());
    }

    #[test]
    fn test_checksum_verify_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();

        let good = Checksum::new(
            ChecksumType::Sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        );
        assert!(good.verify_file(file.path()).is_ok());

        let bad = Checksum::new(ChecksumType::Sha256, "00");
        assert!(matches!(
            bad.verify_file(file.path()),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_display_item() {
        let pkg = Resolvable::new(
            "foo",
            Edition::new("1.0", "2", 0),
            Arch::X86_64,
            Payload::Package(PackageDetails::default()),
        );
        assert_eq!(pkg.to_string(), "foo-1.0-2.x86_64");

        let patch = Resolvable::new(
            "fix",
            Edition::new("3", "", 0),
            Arch::Noarch,
            Payload::Patch(PatchDetails::default()),
        );
        assert_eq!(patch.to_string(), "patch:fix-3.noarch");
    }
}
