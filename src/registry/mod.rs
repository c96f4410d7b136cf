// src/registry/mod.rs

//! Catalog registry
//!
//! Enumerates the `catalogs` table, loads each catalog through a
//! [`SourceLoader`], and keeps the loaded resolvables in an arena indexed by
//! store id. The pool and the lock/transaction engines address resolvables
//! through [`ResolvableRef`] handles into this arena.
//!
//! Optionally, each catalog is bound to a live source (something that can
//! refresh it or fetch package bytes) found through a [`LiveSourceLookup`].

pub mod owned;
pub mod uri;

pub use owned::OwnedCatalogs;
pub use uri::CatalogUri;

use crate::db::models::CatalogRecord;
use crate::error::Result;
use crate::resolvable::Resolvable;
use crate::source::{LoadPolicy, SourceLoader};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// A source with transport capability behind a catalog
pub trait LiveSource: Send + Sync {
    fn alias(&self) -> &str;
    fn url(&self) -> &str;
    fn name(&self) -> &str;

    /// Re-read the source's metadata
    fn refresh(&self) -> Result<()>;

    /// Fetch a package payload to a local path
    fn fetch(&self, location: &str) -> Result<PathBuf>;
}

/// Finds live sources registered outside this crate
pub trait LiveSourceLookup {
    fn find_by_alias(&self, alias: &str) -> Option<Arc<dyn LiveSource>>;
    fn find_by_url(&self, url: &str) -> Option<Arc<dyn LiveSource>>;
    fn find_by_name(&self, name: &str) -> Option<Arc<dyn LiveSource>>;
}

/// A loaded catalog
pub struct Catalog {
    pub record: CatalogRecord,
    pub resolvables: Vec<Resolvable>,
    pub live: Option<Arc<dyn LiveSource>>,
}

impl Catalog {
    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Arena position of a resolvable: catalog slot and index within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolvableRef {
    pub catalog: usize,
    pub index: usize,
}

pub struct CatalogRegistry {
    policy: LoadPolicy,
    owned: Option<OwnedCatalogs>,
    lookup: Option<Box<dyn LiveSourceLookup>>,
    catalogs: Vec<Catalog>,
    index: HashMap<i64, ResolvableRef>,
    loaded: bool,
}

impl CatalogRegistry {
    pub fn new(policy: LoadPolicy) -> Self {
        Self {
            policy,
            owned: None,
            lookup: None,
            catalogs: Vec::new(),
            index: HashMap::new(),
            loaded: false,
        }
    }

    /// Catalogs allowed to bind a live source
    pub fn with_owned(mut self, owned: OwnedCatalogs) -> Self {
        self.owned = Some(owned);
        self
    }

    pub fn with_lookup(mut self, lookup: Box<dyn LiveSourceLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Load all catalogs, or return the cached result unless `refresh` is set
    pub fn list_catalogs(&mut self, conn: &Connection, bind_live: bool, refresh: bool) -> Result<&[Catalog]> {
        if self.loaded && !refresh {
            return Ok(&self.catalogs);
        }

        self.catalogs.clear();
        self.index.clear();
        self.loaded = false;

        for record in CatalogRecord::list_all(conn)? {
            let record = record.with_defaults();
            let resolvables = SourceLoader::new(conn, record.id.clone(), self.policy).load_catalog()?;

            let live = if bind_live { self.bind_live(&record) } else { None };

            let slot = self.catalogs.len();
            for (i, obj) in resolvables.iter().enumerate() {
                if let Some(id) = obj.id {
                    self.index.insert(id, ResolvableRef { catalog: slot, index: i });
                }
            }

            debug!(
                "Catalog {} ({}): {} resolvables",
                record.id,
                record.alias,
                resolvables.len()
            );
            self.catalogs.push(Catalog {
                record,
                resolvables,
                live,
            });
        }

        self.loaded = true;
        info!(
            "Loaded {} catalogs with {} resolvables",
            self.catalogs.len(),
            self.index.len()
        );
        Ok(&self.catalogs)
    }

    /// Locate a live source by alias, then by the catalog id as URL, then by
    /// name; attach it only if the catalog is owned
    fn bind_live(&self, record: &CatalogRecord) -> Option<Arc<dyn LiveSource>> {
        let lookup = self.lookup.as_ref()?;

        let source = lookup
            .find_by_alias(&record.alias)
            .or_else(|| lookup.find_by_url(&record.id))
            .or_else(|| lookup.find_by_name(&record.name))?;

        let owned = self.owned.as_ref().is_some_and(|o| o.contains(&record.id));
        if !owned {
            debug!("Catalog {} has a live source but is not owned", record.id);
            return None;
        }

        debug!("Bound catalog {} to live source {}", record.id, source.url());
        Some(source)
    }

    pub fn catalogs(&self) -> &[Catalog] {
        &self.catalogs
    }

    pub fn catalog(&self, catalog_id: &str) -> Option<&Catalog> {
        self.catalogs.iter().find(|c| c.id() == catalog_id)
    }

    /// Dereference a store id
    pub fn get(&self, id: i64) -> Option<&Resolvable> {
        self.locate(id).map(|r| self.resolve(r))
    }

    pub fn locate(&self, id: i64) -> Option<ResolvableRef> {
        self.index.get(&id).copied()
    }

    /// Dereference an arena handle
    ///
    /// Handles are only valid for the load that produced them.
    pub fn resolve(&self, r: ResolvableRef) -> &Resolvable {
        &self.catalogs[r.catalog].resolvables[r.index]
    }

    /// Every loaded resolvable with its handle
    pub fn iter(&self) -> impl Iterator<Item = (ResolvableRef, &Resolvable)> {
        self.catalogs.iter().enumerate().flat_map(|(c, catalog)| {
            catalog
                .resolvables
                .iter()
                .enumerate()
                .map(move |(i, obj)| (ResolvableRef { catalog: c, index: i }, obj))
        })
    }

    pub fn len(&self) -> usize {
        self.catalogs.iter().map(|c| c.resolvables.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
