// src/pool.rs

//! The working set handed to the resolver
//!
//! A [`Pool`] borrows the registry's arena and tracks a status per entry,
//! a by-name index, a provides index and the additional requirements that
//! install-best requests register.

use crate::capability::{Capability, DepClass, Relation};
use crate::registry::{CatalogRegistry, ResolvableRef};
use crate::resolvable::Resolvable;
use std::collections::HashMap;
use std::fmt;

/// Status of a pool entry across one reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemStatus {
    #[default]
    Unmarked,
    /// Matched by a user lock
    Locked,
    ToInstall,
    ToRemove,
    /// Chosen by the resolver, not yet persisted
    SolverSelected,
    /// Requested but not chosen by the resolver
    Unchanged,
    Persisted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ItemStatus::Unmarked => "unmarked",
            ItemStatus::Locked => "locked",
            ItemStatus::ToInstall => "to-install",
            ItemStatus::ToRemove => "to-remove",
            ItemStatus::SolverSelected => "selected",
            ItemStatus::Unchanged => "unchanged",
            ItemStatus::Persisted => "persisted",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEntry {
    pub item: ResolvableRef,
    pub id: i64,
    pub status: ItemStatus,
}

pub struct Pool<'r> {
    registry: &'r CatalogRegistry,
    entries: Vec<PoolEntry>,
    by_id: HashMap<i64, usize>,
    by_name: HashMap<String, Vec<usize>>,
    provides: HashMap<String, Vec<(Capability, usize)>>,
    additional_requires: Vec<Capability>,
}

impl<'r> Pool<'r> {
    /// Build a pool over everything the registry has loaded
    ///
    /// Each entry provides itself (`name = edition`) besides its explicit
    /// provides.
    pub fn new(registry: &'r CatalogRegistry) -> Self {
        let mut pool = Self {
            registry,
            entries: Vec::with_capacity(registry.len()),
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            provides: HashMap::new(),
            additional_requires: Vec::new(),
        };

        for (item, obj) in registry.iter() {
            let Some(id) = obj.id else {
                continue;
            };
            let idx = pool.entries.len();
            pool.entries.push(PoolEntry {
                item,
                id,
                status: ItemStatus::Unmarked,
            });
            pool.by_id.insert(id, idx);
            pool.by_name.entry(obj.name.clone()).or_default().push(idx);

            let own = Capability::new(
                obj.kind(),
                obj.name.clone(),
                Relation::Eq,
                Some(obj.edition.clone()),
            );
            pool.add_provide(own, idx);
            for cap in obj.deps.get(DepClass::Provides) {
                pool.add_provide(cap.clone(), idx);
            }
        }

        pool
    }

    fn add_provide(&mut self, cap: Capability, idx: usize) {
        self.provides.entry(cap.name.clone()).or_default().push((cap, idx));
    }

    pub fn registry(&self) -> &'r CatalogRegistry {
        self.registry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, idx: usize) -> &PoolEntry {
        &self.entries[idx]
    }

    pub fn resolvable(&self, idx: usize) -> &'r Resolvable {
        self.registry.resolve(self.entries[idx].item)
    }

    /// Pool index of a store id
    pub fn find(&self, id: i64) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    pub fn status(&self, idx: usize) -> ItemStatus {
        self.entries[idx].status
    }

    pub fn set_status(&mut self, idx: usize, status: ItemStatus) {
        self.entries[idx].status = status;
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &PoolEntry)> {
        self.entries.iter().enumerate()
    }

    /// Indices with the given status
    pub fn with_status(&self, status: ItemStatus) -> Vec<usize> {
        self.iter()
            .filter(|(_, e)| e.status == status)
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct resolvable names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    pub fn by_name(&self, name: &str) -> &[usize] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Entries with a provide satisfying `cap`, in pool order
    pub fn providers(&self, cap: &Capability) -> Vec<usize> {
        let mut found: Vec<usize> = self
            .provides
            .get(&cap.name)
            .into_iter()
            .flatten()
            .filter(|(provided, _)| cap.matches(provided))
            .map(|(_, idx)| *idx)
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Register a requirement the resolver must satisfy in addition to
    /// the per-entry requests
    pub fn add_requirement(&mut self, cap: Capability) {
        if !self.additional_requires.contains(&cap) {
            self.additional_requires.push(cap);
        }
    }

    pub fn additional_requires(&self) -> &[Capability] {
        &self.additional_requires
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::db;
    use crate::db::models::CatalogRecord;
    use crate::resolvable::{Kind, PackageDetails, Payload, ResolvableStatus};
    use crate::source::LoadPolicy;
    use crate::store::{CatalogStore, OpenMode, Ownership};
    use crate::version::Edition;
    use tempfile::NamedTempFile;

    fn setup() -> (NamedTempFile, CatalogStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        db::init(path).unwrap();
        let store = CatalogStore::open(path, OpenMode::Write)
            .unwrap()
            .with_system_arch(Arch::X86_64);

        store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();

        let mut foo = Resolvable::new(
            "foo",
            Edition::new("1.0", "1", 0),
            Arch::X86_64,
            Payload::Package(PackageDetails::default()),
        );
        foo.deps.insert(
            DepClass::Provides,
            Capability::new(Kind::Package, "libfoo", Relation::Eq, Some(Edition::new("1.0", "", 0))),
        );
        let foo2 = Resolvable::new(
            "foo",
            Edition::new("2.0", "1", 0),
            Arch::X86_64,
            Payload::Package(PackageDetails::default()),
        );

        store
            .write_catalog_contents(&[foo, foo2], ResolvableStatus::Undetermined, "c1", Ownership::ServerOwned)
            .unwrap();
        (temp_file, store)
    }

    #[test]
    fn test_pool_indexes() {
        let (_temp, store) = setup();
        let mut registry = CatalogRegistry::new(LoadPolicy::default());
        registry.list_catalogs(store.connection(), false, false).unwrap();
        let pool = Pool::new(&registry);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.by_name("foo").len(), 2);
        assert!(pool.by_name("bar").is_empty());
        assert_eq!(pool.names().count(), 1);

        let any_foo = Capability::unconstrained(Kind::Package, "foo");
        assert_eq!(pool.providers(&any_foo).len(), 2);

        let new_foo = Capability::new(Kind::Package, "foo", Relation::Ge, Some(Edition::new("2.0", "", 0)));
        let found = pool.providers(&new_foo);
        assert_eq!(found.len(), 1);
        assert_eq!(pool.resolvable(found[0]).edition.version, "2.0");

        let lib = Capability::new(Kind::Package, "libfoo", Relation::Ge, Some(Edition::new("0.9", "", 0)));
        assert_eq!(pool.providers(&lib).len(), 1);
    }

    #[test]
    fn test_status_and_requirements() {
        let (_temp, store) = setup();
        let mut registry = CatalogRegistry::new(LoadPolicy::default());
        registry.list_catalogs(store.connection(), false, false).unwrap();
        let mut pool = Pool::new(&registry);

        let idx = pool.by_name("foo")[0];
        let id = pool.entry(idx).id;
        assert_eq!(pool.find(id), Some(idx));
        assert_eq!(pool.status(idx), ItemStatus::Unmarked);

        pool.set_status(idx, ItemStatus::Locked);
        assert_eq!(pool.with_status(ItemStatus::Locked), vec![idx]);

        let cap = Capability::unconstrained(Kind::Package, "foo");
        pool.add_requirement(cap.clone());
        pool.add_requirement(cap);
        assert_eq!(pool.additional_requires().len(), 1);
    }
}
