// src/resolver.rs

//! The seam between the pool and a dependency solver
//!
//! Solving itself happens elsewhere; the transaction log only needs to read
//! back what was decided and why.

use crate::pool::{ItemStatus, Pool};
use std::collections::HashMap;

/// Decisions of a finished solver run, addressed by store id
pub trait ResolverContext {
    fn installs(&self) -> Vec<i64>;
    fn uninstalls(&self) -> Vec<i64>;

    /// `(installed, replacement)` pairs
    fn upgrades(&self) -> Vec<(i64, i64)>;

    /// Explanation trail for a decision, oldest first
    fn explain(&self, id: i64) -> Vec<String>;
}

/// Recorded decisions
#[derive(Debug, Clone, Default)]
pub struct Decisions {
    installs: Vec<i64>,
    uninstalls: Vec<i64>,
    upgrades: Vec<(i64, i64)>,
    notes: HashMap<i64, Vec<String>>,
}

impl Decisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, id: i64) -> &mut Self {
        self.installs.push(id);
        self
    }

    pub fn uninstall(&mut self, id: i64) -> &mut Self {
        self.uninstalls.push(id);
        self
    }

    pub fn upgrade(&mut self, from: i64, to: i64) -> &mut Self {
        self.upgrades.push((from, to));
        self
    }

    pub fn note(&mut self, id: i64, message: impl Into<String>) -> &mut Self {
        self.notes.entry(id).or_default().push(message.into());
        self
    }

    /// Accept the pool's requests as they stand
    ///
    /// Entries marked for install or removal are taken over unchanged; an
    /// install of something whose name is already installed becomes an
    /// upgrade. Each additional requirement is satisfied by its newest
    /// uninstalled provider, if any.
    pub fn from_requests(pool: &Pool) -> Self {
        let mut decisions = Self::new();

        for (idx, entry) in pool.iter() {
            let obj = pool.resolvable(idx);
            match entry.status {
                ItemStatus::ToRemove => {
                    decisions.uninstall(entry.id).note(entry.id, "requested removal");
                }
                ItemStatus::ToInstall => {
                    let installed = pool
                        .by_name(&obj.name)
                        .iter()
                        .copied()
                        .find(|&other| other != idx && pool.resolvable(other).installed);
                    match installed {
                        Some(old) => {
                            decisions
                                .upgrade(pool.entry(old).id, entry.id)
                                .note(entry.id, "requested upgrade");
                        }
                        None => {
                            decisions.install(entry.id).note(entry.id, "requested install");
                        }
                    }
                }
                _ => {}
            }
        }

        for cap in pool.additional_requires() {
            let best = pool
                .providers(cap)
                .into_iter()
                .filter(|&idx| !pool.resolvable(idx).installed)
                .max_by(|&a, &b| {
                    pool.resolvable(a)
                        .edition
                        .compare(&pool.resolvable(b).edition)
                });
            if let Some(idx) = best {
                let id = pool.entry(idx).id;
                decisions.install(id).note(id, format!("best candidate for {}", cap));
            }
        }

        decisions
    }
}

impl ResolverContext for Decisions {
    fn installs(&self) -> Vec<i64> {
        self.installs.clone()
    }

    fn uninstalls(&self) -> Vec<i64> {
        self.uninstalls.clone()
    }

    fn upgrades(&self) -> Vec<(i64, i64)> {
        self.upgrades.clone()
    }

    fn explain(&self, id: i64) -> Vec<String> {
        self.notes.get(&id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::capability::{Capability, Relation};
    use crate::db;
    use crate::db::models::CatalogRecord;
    use crate::registry::CatalogRegistry;
    use crate::resolvable::{Kind, PackageDetails, Payload, Resolvable, ResolvableStatus};
    use crate::source::LoadPolicy;
    use crate::store::{CatalogStore, OpenMode, Ownership};
    use crate::version::Edition;
    use tempfile::NamedTempFile;

    #[test]
    fn test_recorded_decisions() {
        let mut d = Decisions::new();
        d.install(1).note(1, "a").note(1, "b");
        d.uninstall(2).upgrade(3, 4);

        assert_eq!(d.installs(), vec![1]);
        assert_eq!(d.uninstalls(), vec![2]);
        assert_eq!(d.upgrades(), vec![(3, 4)]);
        assert_eq!(d.explain(1), vec!["a", "b"]);
        assert!(d.explain(2).is_empty());
    }

    #[test]
    fn test_from_requests() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        db::init(path).unwrap();
        let store = CatalogStore::open(path, OpenMode::Write)
            .unwrap()
            .with_system_arch(Arch::X86_64);

        store.insert_catalog(&CatalogRecord::new("@system", "System")).unwrap();
        store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();

        let pkg = |name: &str, version: &str| {
            Resolvable::new(
                name,
                Edition::new(version, "1", 0),
                Arch::X86_64,
                Payload::Package(PackageDetails::default()),
            )
        };
        let mut old = pkg("foo", "1.0");
        old.installed = true;
        store
            .write_catalog_contents(&[old], ResolvableStatus::Satisfied, "@system", Ownership::LocalFile)
            .unwrap();
        store
            .write_catalog_contents(
                &[pkg("foo", "2.0"), pkg("bar", "1.0"), pkg("bar", "1.5")],
                ResolvableStatus::Undetermined,
                "c1",
                Ownership::ServerOwned,
            )
            .unwrap();

        let mut registry = CatalogRegistry::new(LoadPolicy::default());
        registry.list_catalogs(store.connection(), false, false).unwrap();
        let mut pool = Pool::new(&registry);

        let new_foo = pool
            .by_name("foo")
            .iter()
            .copied()
            .find(|&i| !pool.resolvable(i).installed)
            .unwrap();
        pool.set_status(new_foo, ItemStatus::ToInstall);
        pool.add_requirement(Capability::new(
            Kind::Package,
            "bar",
            Relation::Ge,
            Some(Edition::new("1.0", "", 0)),
        ));

        let d = Decisions::from_requests(&pool);
        assert!(d.uninstalls().is_empty());
        assert_eq!(d.upgrades().len(), 1);
        assert_eq!(d.upgrades()[0].1, pool.entry(new_foo).id);

        let installs = d.installs();
        assert_eq!(installs.len(), 1);
        let bar = registry.get(installs[0]).unwrap();
        assert_eq!(bar.edition.version, "1.5");
        assert_eq!(d.explain(installs[0]), vec!["best candidate for bar >= 1.0"]);
    }
}
