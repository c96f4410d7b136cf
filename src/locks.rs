// src/locks.rs

//! User locks
//!
//! Each row of the `locks` table names a pattern (with `*` and `?`
//! wildcards) and an optional edition constraint. Every pool entry whose
//! provides satisfy the expanded constraint is marked [`ItemStatus::Locked`].

use crate::capability::{Capability, Relation};
use crate::db::models::LockRule;
use crate::error::Result;
use crate::pool::{ItemStatus, Pool};
use crate::resolvable::Kind;
use regex::{Regex, RegexBuilder};
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Outcome of [`apply_locks`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockSummary {
    /// Rules that were usable
    pub rules: usize,
    /// Pool entries newly marked locked
    pub locked: usize,
}

/// Mark every pool entry matched by a stored lock as locked
pub fn apply_locks(pool: &mut Pool, conn: &Connection) -> Result<LockSummary> {
    let mut summary = LockSummary::default();

    for rule in LockRule::list_all(conn)? {
        let Some(target) = rule_target(&rule) else {
            continue;
        };

        let pattern = match glob_to_regex(&target.name) {
            Ok(re) => re,
            Err(e) => {
                warn!("Skipping lock {:?}: bad pattern '{}': {}", rule.id, target.name, e);
                continue;
            }
        };

        let names: BTreeSet<String> = pool
            .names()
            .filter(|n| pattern.is_match(n))
            .map(String::from)
            .collect();

        summary.rules += 1;
        debug!("Lock '{}' matches {} names", target, names.len());

        for name in names {
            let cap = Capability::new(target.kind, name, target.relation, target.edition.clone());
            for idx in pool.providers(&cap) {
                if pool.status(idx) != ItemStatus::Locked {
                    pool.set_status(idx, ItemStatus::Locked);
                    summary.locked += 1;
                }
            }
        }
    }

    info!("Applied {} locks, {} entries locked", summary.rules, summary.locked);
    Ok(summary)
}

/// The name pattern and constraint a lock row describes, or None if the row
/// is unusable
fn rule_target(rule: &LockRule) -> Option<Capability> {
    if let Some(glob) = rule.glob.as_deref().filter(|g| !g.trim().is_empty()) {
        return match Capability::parse(Kind::Package, glob) {
            Ok(cap) => Some(cap),
            Err(e) => {
                warn!("Skipping lock {:?}: {}", rule.id, e);
                None
            }
        };
    }

    match rule.name.as_deref() {
        Some(name) if !name.is_empty() => {
            let relation = if rule.relation == Relation::None {
                Relation::Any
            } else {
                rule.relation
            };
            Some(Capability::new(Kind::Package, name, relation, rule.edition.clone()))
        }
        _ => {
            debug!("Skipping lock {:?} without name or expression", rule.id);
            None
        }
    }
}

/// Turn a shell-style pattern into an anchored, case-insensitive regex
pub fn glob_to_regex(glob: &str) -> std::result::Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');

    RegexBuilder::new(&pattern).case_insensitive(true).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::db;
    use crate::db::models::CatalogRecord;
    use crate::registry::CatalogRegistry;
    use crate::resolvable::{PackageDetails, Payload, Resolvable, ResolvableStatus};
    use crate::source::LoadPolicy;
    use crate::store::{CatalogStore, OpenMode, Ownership};
    use crate::version::Edition;
    use tempfile::NamedTempFile;

    fn matching<'a>(glob: &str, names: &[&'a str]) -> Vec<&'a str> {
        let re = glob_to_regex(glob).unwrap();
        names.iter().copied().filter(|n| re.is_match(n)).collect()
    }

    #[test]
    fn test_glob_matching() {
        let names = ["abc", "abd", "xbc"];
        assert_eq!(matching("ab?", &names), vec!["abc", "abd"]);
        assert_eq!(matching("*bc", &names), vec!["abc", "xbc"]);
        assert_eq!(matching("abc", &names), vec!["abc"]);
        assert_eq!(matching("ABC", &names), vec!["abc"]);
        assert!(matching("a.c", &names).is_empty());
    }

    fn create_test_db() -> (NamedTempFile, CatalogStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        db::init(path).unwrap();
        let store = CatalogStore::open(path, OpenMode::Write)
            .unwrap()
            .with_system_arch(Arch::X86_64);

        store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();

        let pkg = |name: &str, version: &str| {
            Resolvable::new(
                name,
                Edition::new(version, "1", 0),
                Arch::X86_64,
                Payload::Package(PackageDetails::default()),
            )
        };
        store
            .write_catalog_contents(
                &[pkg("kernel-default", "5.0"), pkg("kernel-default", "6.1"), pkg("vim", "9.0")],
                ResolvableStatus::Undetermined,
                "c1",
                Ownership::ServerOwned,
            )
            .unwrap();
        (temp_file, store)
    }

    #[test]
    fn test_apply_glob_lock_with_edition() {
        let (_temp, store) = create_test_db();
        LockRule::from_glob("kernel-* >= 6.0")
            .insert(store.connection())
            .unwrap();

        let mut registry = CatalogRegistry::new(LoadPolicy::default());
        registry.list_catalogs(store.connection(), false, false).unwrap();
        let mut pool = Pool::new(&registry);

        let summary = apply_locks(&mut pool, store.connection()).unwrap();
        assert_eq!(summary, LockSummary { rules: 1, locked: 1 });

        let locked = pool.with_status(ItemStatus::Locked);
        assert_eq!(locked.len(), 1);
        assert_eq!(pool.resolvable(locked[0]).edition.version, "6.1");
    }

    #[test]
    fn test_column_lock_and_unusable_rules() {
        let (_temp, store) = create_test_db();
        let conn = store.connection();
        LockRule::from_columns("vim", Relation::None, None).insert(conn).unwrap();
        LockRule::from_columns("", Relation::Any, None).insert(conn).unwrap();
        LockRule::from_glob("vim >= ").insert(conn).unwrap();

        let mut registry = CatalogRegistry::new(LoadPolicy::default());
        registry.list_catalogs(conn, false, false).unwrap();
        let mut pool = Pool::new(&registry);

        let summary = apply_locks(&mut pool, conn).unwrap();
        assert_eq!(summary.rules, 1);
        assert_eq!(summary.locked, 1);
        let locked = pool.with_status(ItemStatus::Locked);
        assert_eq!(pool.resolvable(locked[0]).name, "vim");
    }
}
