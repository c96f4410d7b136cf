// src/config.rs

//! Runtime settings
//!
//! There are no config files. The binary fills a [`Config`] from flags and
//! environment variables and hands it to the library.

use crate::arch::Arch;
use crate::error::Result;
use crate::registry::OwnedCatalogs;
use crate::store::{CatalogStore, OpenMode};
use std::path::PathBuf;

pub const DEFAULT_DB_PATH: &str = "/var/lib/catalogd/catalog.db";
pub const DEFAULT_OWNED_CATALOGS: &str = "/var/lib/catalogd/owned-catalogs";
pub const DEFAULT_LOG_FILE: &str = "/var/log/catalogd.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    /// Architecture used to filter catalog contents on write
    pub system_arch: Arch,
    pub owned_catalogs: PathBuf,
    /// Where logs go; stderr if unset
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            system_arch: Arch::host(),
            owned_catalogs: PathBuf::from(DEFAULT_OWNED_CATALOGS),
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
        }
    }
}

impl Config {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Open the catalog store with this configuration's architecture
    pub fn open_store(&self, mode: OpenMode) -> Result<CatalogStore> {
        Ok(CatalogStore::open(&self.db_path, mode)?.with_system_arch(self.system_arch))
    }

    pub fn load_owned(&self) -> Result<OwnedCatalogs> {
        OwnedCatalogs::load(&self.owned_catalogs)
    }
}
