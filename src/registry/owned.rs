// src/registry/owned.rs

//! The set of catalogs whose packages the package service fetches itself
//!
//! Persisted as a plain file with one catalog id per line. The registry is
//! loaded once per run, passed to whoever needs it, and written back with
//! [`OwnedCatalogs::save`].

use crate::error::Result;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OwnedCatalogs {
    path: PathBuf,
    ids: BTreeSet<String>,
}

impl OwnedCatalogs {
    /// Read the registry file; a missing file is an empty registry
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ids = match fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeSet::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded {} owned catalogs from {}", ids.len(), path.display());
        Ok(Self { path, ids })
    }

    pub fn contains(&self, catalog_id: &str) -> bool {
        self.ids.contains(catalog_id)
    }

    /// Returns false if the catalog was already owned
    pub fn add(&mut self, catalog_id: &str) -> bool {
        self.ids.insert(catalog_id.to_string())
    }

    /// Returns false if the catalog was not owned
    pub fn remove(&mut self, catalog_id: &str) -> bool {
        self.ids.remove(catalog_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Write the registry back to its file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut contents = String::new();
        for id in &self.ids {
            contents.push_str(id);
            contents.push('\n');
        }
        fs::write(&self.path, contents)?;
        Ok(())
    }
}
