// src/transactions.rs

//! The pending-transaction queue
//!
//! Front ends append `(action, id)` requests to the `transactions` table.
//! [`TransactionLog::apply_pending_requests`] turns them into pool statuses
//! and extra requirements before solving; [`TransactionLog::persist_decisions`]
//! writes the solver's answer back as the new queue.

use crate::capability::{Capability, Relation};
use crate::db;
use crate::db::models::{TransactionAction, TransactionRow};
use crate::error::{Error, Result};
use crate::pool::{ItemStatus, Pool};
use crate::resolver::ResolverContext;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// What to do with a request that targets a locked item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Drop the request and keep going
    #[default]
    Skip,
    /// Fail with [`Error::LockedItemConflict`]
    Abort,
}

/// Result of reading the queue into a pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSummary {
    /// Requests read
    pub count: usize,
    pub removals: usize,
    /// Whether any install-best request was seen
    pub have_best: bool,
    /// Store id to pool index of every applied request
    pub items: BTreeMap<i64, usize>,
    /// Requests dropped because their target is locked
    pub skipped_locked: Vec<i64>,
    /// Applied requests in queue order
    pub requests: Vec<(TransactionAction, i64)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionLog {
    policy: LockPolicy,
}

impl TransactionLog {
    pub fn new(policy: LockPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LockPolicy {
        self.policy
    }

    /// Mark the pool according to the queued requests
    pub fn apply_pending_requests(&self, pool: &mut Pool, conn: &Connection) -> Result<PendingSummary> {
        let mut summary = PendingSummary::default();

        for row in TransactionRow::list_all(conn)? {
            let idx = pool.find(row.id).ok_or(Error::RowLookup(row.id))?;
            summary.count += 1;

            // Install-best only adds a requirement, so locks do not apply to it
            if row.action != TransactionAction::InstallBest && pool.status(idx) == ItemStatus::Locked {
                let obj = pool.resolvable(idx);
                match self.policy {
                    LockPolicy::Skip => {
                        warn!("{} is locked, ignoring {} request", obj, row.action.as_str());
                        summary.skipped_locked.push(row.id);
                        continue;
                    }
                    LockPolicy::Abort => {
                        return Err(Error::LockedItemConflict {
                            item: obj.to_string(),
                            verb: row.action.verb().to_string(),
                        });
                    }
                }
            }

            match row.action {
                TransactionAction::Remove => {
                    pool.set_status(idx, ItemStatus::ToRemove);
                    summary.removals += 1;
                }
                TransactionAction::Install | TransactionAction::Upgrade => {
                    pool.set_status(idx, ItemStatus::ToInstall);
                }
                TransactionAction::InstallBest => {
                    let cap = best_requirement(pool, idx, row.details.as_deref());
                    debug!("Install-best request for {} requires {}", pool.resolvable(idx), cap);
                    pool.add_requirement(cap);
                    summary.have_best = true;
                }
            }

            summary.items.insert(row.id, idx);
            summary.requests.push((row.action, row.id));
        }

        info!(
            "Applied {} pending requests ({} removals, {} skipped as locked)",
            summary.count - summary.skipped_locked.len(),
            summary.removals,
            summary.skipped_locked.len()
        );
        Ok(summary)
    }

    /// Replace the queue with the resolver's decisions
    ///
    /// Locked entries and installs of something already installed with the
    /// same name, edition and architecture are left out. Returns `Ok(false)`
    /// if any row could not be written; the queue is then left untouched.
    pub fn persist_decisions(
        &self,
        pool: &mut Pool,
        conn: &mut Connection,
        ctx: &dyn ResolverContext,
    ) -> Result<bool> {
        let mut rows: Vec<(TransactionRow, usize)> = Vec::new();
        let mut seen = HashSet::new();

        let installs = ctx
            .installs()
            .into_iter()
            .chain(ctx.upgrades().into_iter().map(|(_, to)| to));
        let wanted = installs
            .map(|id| (TransactionAction::Install, id))
            .chain(ctx.uninstalls().into_iter().map(|id| (TransactionAction::Remove, id)));

        for (action, id) in wanted {
            if !seen.insert((action, id)) {
                continue;
            }
            let idx = pool.find(id).ok_or(Error::RowLookup(id))?;
            let obj = pool.resolvable(idx);

            if pool.status(idx) == ItemStatus::Locked {
                debug!("Not recording {} of locked {}", action.as_str(), obj);
                continue;
            }
            if action == TransactionAction::Install && is_installed(pool, idx) {
                debug!("{} is already installed", obj);
                continue;
            }

            let mut row = TransactionRow::new(action, id);
            let trail = ctx.explain(id);
            if !trail.is_empty() {
                row = row.with_details(join_trail(&trail));
            }
            rows.push((row, idx));
        }

        for (_, idx) in &rows {
            pool.set_status(*idx, ItemStatus::SolverSelected);
        }

        let written = db::transaction(conn, |tx| {
            TransactionRow::clear(tx)?;
            for (row, _) in &rows {
                row.insert(tx)?;
            }
            Ok(())
        });

        if let Err(e) = written {
            warn!("Could not persist transactions: {}", e);
            return Ok(false);
        }

        let chosen: HashSet<usize> = rows.iter().map(|(_, idx)| *idx).collect();
        for idx in 0..pool.len() {
            match pool.status(idx) {
                ItemStatus::SolverSelected => pool.set_status(idx, ItemStatus::Persisted),
                ItemStatus::ToInstall | ItemStatus::ToRemove if !chosen.contains(&idx) => {
                    pool.set_status(idx, ItemStatus::Unchanged)
                }
                _ => {}
            }
        }

        info!("Persisted {} transactions", rows.len());
        Ok(true)
    }

    /// Remove every queued row for a resolvable id
    pub fn drop_transaction(conn: &Connection, id: i64) -> Result<usize> {
        let removed = TransactionRow::delete_by_id(conn, id)?;
        debug!("Dropped {} transactions for {}", removed, id);
        Ok(removed)
    }

    /// After an external commit, drop queued rows whose entries no longer
    /// transact
    pub fn drop_committed(conn: &Connection, summary: &PendingSummary, pool: &Pool) -> Result<usize> {
        let mut removed = 0;
        for (&id, &idx) in &summary.items {
            let transacting = matches!(
                pool.status(idx),
                ItemStatus::ToInstall | ItemStatus::ToRemove | ItemStatus::SolverSelected | ItemStatus::Persisted
            );
            if !transacting {
                removed += TransactionRow::delete_by_id(conn, id)?;
            }
        }
        for &id in &summary.skipped_locked {
            removed += TransactionRow::delete_by_id(conn, id)?;
        }
        Ok(removed)
    }
}

/// Requirement registered for an install-best request
///
/// An explicit constraint in the request's details wins. Otherwise, if
/// something providing the name is installed, ask for anything newer than
/// the newest installed edition.
fn best_requirement(pool: &Pool, idx: usize, details: Option<&str>) -> Capability {
    let obj = pool.resolvable(idx);

    if let Some(expr) = details.filter(|d| !d.trim().is_empty()) {
        match Capability::parse(obj.kind(), expr) {
            Ok(cap) if !cap.is_unconstrained() => return cap,
            Ok(_) => {}
            Err(e) => warn!("Ignoring install-best constraint for {}: {}", obj, e),
        }
    }

    let any = Capability::unconstrained(obj.kind(), obj.name.clone());
    let newest_installed = pool
        .providers(&any)
        .into_iter()
        .map(|i| pool.resolvable(i))
        .filter(|r| r.installed)
        .map(|r| &r.edition)
        .max_by(|a, b| a.compare(b));

    match newest_installed {
        Some(edition) => Capability::new(obj.kind(), obj.name.clone(), Relation::Gt, Some(edition.clone())),
        None => any,
    }
}

/// Whether an installed entry other than `idx` has the same identity
fn is_installed(pool: &Pool, idx: usize) -> bool {
    let obj = pool.resolvable(idx);
    if obj.installed {
        return true;
    }
    pool.by_name(&obj.name).iter().any(|&other| {
        let r = pool.resolvable(other);
        other != idx && r.installed && r.kind() == obj.kind() && r.arch == obj.arch && r.edition == obj.edition
    })
}

fn join_trail(trail: &[String]) -> String {
    let mut out = String::new();
    for msg in trail {
        out.push_str(msg);
        out.push('|');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::db::models::{CatalogRecord, LockRule};
    use crate::locks::apply_locks;
    use crate::registry::CatalogRegistry;
    use crate::resolvable::{Kind, PackageDetails, Payload, Resolvable, ResolvableStatus};
    use crate::resolver::Decisions;
    use crate::source::LoadPolicy;
    use crate::store::{CatalogStore, OpenMode, Ownership};
    use crate::version::Edition;
    use tempfile::NamedTempFile;

    fn pkg(name: &str, version: &str, installed: bool) -> Resolvable {
        let mut obj = Resolvable::new(
            name,
            Edition::new(version, "1", 0),
            Arch::X86_64,
            Payload::Package(PackageDetails::default()),
        );
        obj.installed = installed;
        obj
    }

    fn create_test_db() -> (NamedTempFile, CatalogStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap();
        db::init(path).unwrap();
        let store = CatalogStore::open(path, OpenMode::Write)
            .unwrap()
            .with_system_arch(Arch::X86_64);

        store.insert_catalog(&CatalogRecord::new("@system", "System")).unwrap();
        store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();
        store
            .write_catalog_contents(
                &[pkg("foo", "2.0", true), pkg("vim", "9.0", true)],
                ResolvableStatus::Satisfied,
                "@system",
                Ownership::LocalFile,
            )
            .unwrap();
        store
            .write_catalog_contents(
                &[pkg("foo", "2.0", false), pkg("foo", "3.0", false), pkg("bar", "1.0", false)],
                ResolvableStatus::Undetermined,
                "c1",
                Ownership::ServerOwned,
            )
            .unwrap();
        (temp_file, store)
    }

    fn id_of(registry: &CatalogRegistry, catalog: &str, name: &str, version: &str) -> i64 {
        registry
            .catalog(catalog)
            .unwrap()
            .resolvables
            .iter()
            .find(|r| r.name == name && r.edition.version == version)
            .and_then(|r| r.id)
            .unwrap()
    }

    fn load(store: &CatalogStore) -> CatalogRegistry {
        let mut registry = CatalogRegistry::new(LoadPolicy::default());
        registry.list_catalogs(store.connection(), false, false).unwrap();
        registry
    }

    #[test]
    fn test_install_best_strengthens_to_newer_than_installed() {
        let (_temp, store) = create_test_db();
        let registry = load(&store);
        let foo3 = id_of(&registry, "c1", "foo", "3.0");
        TransactionRow::new(TransactionAction::InstallBest, foo3)
            .insert(store.connection())
            .unwrap();

        let mut pool = Pool::new(&registry);
        let summary = TransactionLog::default()
            .apply_pending_requests(&mut pool, store.connection())
            .unwrap();

        assert!(summary.have_best);
        assert_eq!(summary.count, 1);
        let expected = Capability::new(Kind::Package, "foo", Relation::Gt, Some(Edition::new("2.0", "1", 0)));
        assert_eq!(pool.additional_requires(), &[expected]);
    }

    #[test]
    fn test_install_best_explicit_constraint() {
        let (_temp, store) = create_test_db();
        let registry = load(&store);
        let foo3 = id_of(&registry, "c1", "foo", "3.0");
        TransactionRow::new(TransactionAction::InstallBest, foo3)
            .with_details("foo >= 2.5")
            .insert(store.connection())
            .unwrap();

        let mut pool = Pool::new(&registry);
        TransactionLog::default()
            .apply_pending_requests(&mut pool, store.connection())
            .unwrap();

        let expected = Capability::new(Kind::Package, "foo", Relation::Ge, Some(Edition::new("2.5", "", 0)));
        assert_eq!(pool.additional_requires(), &[expected]);
    }

    #[test]
    fn test_unknown_id_is_fatal() {
        let (_temp, store) = create_test_db();
        let registry = load(&store);
        TransactionRow::new(TransactionAction::Install, 424242)
            .insert(store.connection())
            .unwrap();

        let mut pool = Pool::new(&registry);
        let err = TransactionLog::default()
            .apply_pending_requests(&mut pool, store.connection())
            .unwrap_err();
        assert!(matches!(err, Error::RowLookup(424242)));
    }

    #[test]
    fn test_locked_request_policies() {
        let (_temp, store) = create_test_db();
        let registry = load(&store);
        let vim = id_of(&registry, "@system", "vim", "9.0");
        let bar = id_of(&registry, "c1", "bar", "1.0");
        LockRule::from_glob("vim").insert(store.connection()).unwrap();
        TransactionRow::new(TransactionAction::Remove, vim)
            .insert(store.connection())
            .unwrap();
        TransactionRow::new(TransactionAction::Install, bar)
            .insert(store.connection())
            .unwrap();

        let mut pool = Pool::new(&registry);
        apply_locks(&mut pool, store.connection()).unwrap();
        let summary = TransactionLog::new(LockPolicy::Skip)
            .apply_pending_requests(&mut pool, store.connection())
            .unwrap();
        assert_eq!(summary.skipped_locked, vec![vim]);
        assert_eq!(summary.removals, 0);
        assert_eq!(summary.requests, vec![(TransactionAction::Install, bar)]);

        let mut pool = Pool::new(&registry);
        apply_locks(&mut pool, store.connection()).unwrap();
        let err = TransactionLog::new(LockPolicy::Abort)
            .apply_pending_requests(&mut pool, store.connection())
            .unwrap_err();
        assert_eq!(err.to_string(), "vim-9.0-1.x86_64 is locked and cannot be removed");
    }

    #[test]
    fn test_install_best_ignores_locks() {
        let (_temp, store) = create_test_db();
        let registry = load(&store);
        let foo3 = id_of(&registry, "c1", "foo", "3.0");
        LockRule::from_glob("foo").insert(store.connection()).unwrap();
        TransactionRow::new(TransactionAction::InstallBest, foo3)
            .insert(store.connection())
            .unwrap();
        let expected = Capability::new(Kind::Package, "foo", Relation::Gt, Some(Edition::new("2.0", "1", 0)));

        for policy in [LockPolicy::Skip, LockPolicy::Abort] {
            let mut pool = Pool::new(&registry);
            apply_locks(&mut pool, store.connection()).unwrap();
            let idx = pool.find(foo3).unwrap();
            assert_eq!(pool.status(idx), ItemStatus::Locked);

            let summary = TransactionLog::new(policy)
                .apply_pending_requests(&mut pool, store.connection())
                .unwrap();
            assert!(summary.have_best, "{:?} should keep the install-best request", policy);
            assert!(summary.skipped_locked.is_empty());
            assert_eq!(summary.requests, vec![(TransactionAction::InstallBest, foo3)]);
            assert_eq!(pool.additional_requires(), &[expected.clone()]);
            assert_eq!(pool.status(idx), ItemStatus::Locked);
        }
    }

    #[test]
    fn test_persist_decisions() {
        let (_temp, mut store) = create_test_db();
        let registry = load(&store);
        let foo_sys = id_of(&registry, "@system", "foo", "2.0");
        let foo2 = id_of(&registry, "c1", "foo", "2.0");
        let foo3 = id_of(&registry, "c1", "foo", "3.0");
        let bar = id_of(&registry, "c1", "bar", "1.0");
        let vim = id_of(&registry, "@system", "vim", "9.0");
        LockRule::from_glob("vim").insert(store.connection()).unwrap();
        TransactionRow::new(TransactionAction::Install, bar)
            .insert(store.connection())
            .unwrap();

        let mut pool = Pool::new(&registry);
        apply_locks(&mut pool, store.connection()).unwrap();
        let log = TransactionLog::default();
        log.apply_pending_requests(&mut pool, store.connection()).unwrap();

        let mut decisions = Decisions::new();
        decisions
            .upgrade(foo_sys, foo3)
            .note(foo3, "newer version available")
            .note(foo3, "requested");
        decisions.install(foo2).uninstall(vim);

        assert!(log.persist_decisions(&mut pool, store.connection_mut(), &decisions).unwrap());

        let rows = TransactionRow::list_all(store.connection()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, TransactionAction::Install);
        assert_eq!(rows[0].id, foo3);
        assert_eq!(rows[0].details.as_deref(), Some("newer version available|requested|"));

        let idx = |id| pool.find(id).unwrap();
        assert_eq!(pool.status(idx(foo3)), ItemStatus::Persisted);
        assert_eq!(pool.status(idx(vim)), ItemStatus::Locked);
        assert_eq!(pool.status(idx(bar)), ItemStatus::Unchanged);
    }

    #[test]
    fn test_persist_failure_keeps_queue() {
        let (_temp, mut store) = create_test_db();
        let registry = load(&store);
        let foo3 = id_of(&registry, "c1", "foo", "3.0");
        let bar = id_of(&registry, "c1", "bar", "1.0");
        TransactionRow::new(TransactionAction::Install, bar)
            .insert(store.connection())
            .unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER fail_insert BEFORE INSERT ON transactions
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .unwrap();

        let mut pool = Pool::new(&registry);
        let mut decisions = Decisions::new();
        decisions.install(foo3);

        let log = TransactionLog::default();
        assert!(!log.persist_decisions(&mut pool, store.connection_mut(), &decisions).unwrap());

        let rows = TransactionRow::list_all(store.connection()).unwrap();
        assert_eq!(rows, vec![TransactionRow::new(TransactionAction::Install, bar)]);
    }

    #[test]
    fn test_persist_unknown_id() {
        let (_temp, mut store) = create_test_db();
        let registry = load(&store);
        let mut pool = Pool::new(&registry);
        let mut decisions = Decisions::new();
        decisions.uninstall(999_999);

        let err = TransactionLog::default()
            .persist_decisions(&mut pool, store.connection_mut(), &decisions)
            .unwrap_err();
        assert!(matches!(err, Error::RowLookup(999_999)));
    }

    #[test]
    fn test_drop_transactions() {
        let (_temp, store) = create_test_db();
        let registry = load(&store);
        let bar = id_of(&registry, "c1", "bar", "1.0");
        let foo3 = id_of(&registry, "c1", "foo", "3.0");
        let conn = store.connection();
        TransactionRow::new(TransactionAction::Install, bar).insert(conn).unwrap();
        TransactionRow::new(TransactionAction::Install, foo3).insert(conn).unwrap();

        let mut pool = Pool::new(&registry);
        let summary = TransactionLog::default().apply_pending_requests(&mut pool, conn).unwrap();

        // bar went through, foo was not picked
        pool.set_status(pool.find(foo3).unwrap(), ItemStatus::Unchanged);
        assert_eq!(TransactionLog::drop_committed(conn, &summary, &pool).unwrap(), 1);
        assert_eq!(TransactionLog::drop_transaction(conn, bar).unwrap(), 1);
        assert!(TransactionRow::list_all(conn).unwrap().is_empty());
    }
}
