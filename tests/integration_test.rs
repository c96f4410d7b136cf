// tests/integration_test.rs

//! Integration tests for catalogd
//!
//! These tests verify end-to-end functionality across modules.

use catalogd::arch::Arch;
use catalogd::capability::{Capability, DepClass, Relation};
use catalogd::db;
use catalogd::db::models::{CatalogRecord, LockRule, TransactionAction, TransactionRow};
use catalogd::locks::apply_locks;
use catalogd::pool::{ItemStatus, Pool};
use catalogd::registry::CatalogRegistry;
use catalogd::resolvable::{Kind, PackageDetails, Payload, Resolvable, ResolvableStatus};
use catalogd::resolver::{Decisions, ResolverContext};
use catalogd::source::{LoadPolicy, SourceLoader};
use catalogd::store::{CatalogStore, OpenMode, Ownership};
use catalogd::transactions::TransactionLog;
use catalogd::version::Edition;
use catalogd::Error;
use tempfile::NamedTempFile;

fn package(name: &str, version: &str, installed: bool) -> Resolvable {
    let mut obj = Resolvable::new(
        name,
        Edition::new(version, "1", 0),
        Arch::X86_64,
        Payload::Package(PackageDetails::default()),
    );
    obj.installed = installed;
    obj
}

/// Fresh database with an open write session
fn create_test_store() -> (NamedTempFile, CatalogStore) {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    db::init(&db_path).unwrap();

    let store = CatalogStore::open(&db_path, OpenMode::Write)
        .unwrap()
        .with_system_arch(Arch::X86_64);
    (temp_file, store)
}

fn catalog_row_count(store: &CatalogStore, catalog: &str) -> i64 {
    store
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM resolvables WHERE catalog = ?1",
            [catalog],
            |row| row.get(0),
        )
        .unwrap()
}

#[test]
fn test_database_lifecycle() {
    // Create a temporary database
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();

    // Remove the temp file so init can create it
    drop(temp_file);

    // Opening a store before init must fail
    assert!(
        matches!(
            CatalogStore::open(&db_path, OpenMode::Read),
            Err(Error::StoreOpen { .. })
        ),
        "Opening a missing store should fail"
    );

    db::init(&db_path).expect("Database initialization should succeed");
    assert!(
        std::path::Path::new(&db_path).exists(),
        "Database file should exist after initialization"
    );

    // Verify the catalog schema is in place
    let conn = db::open(&db_path).unwrap();
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('resolvables', 'catalogs', 'transactions', 'locks')",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 4, "Core tables should exist");
}

#[test]
fn test_database_init_creates_parent_directories() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("nested/path/to/catalog.db")
        .to_str()
        .unwrap()
        .to_string();

    let result = db::init(&db_path);
    assert!(result.is_ok(), "Should create parent directories");
    assert!(
        std::path::Path::new(&db_path).exists(),
        "Database should exist in nested path"
    );
}

#[test]
fn test_database_pragmas_are_set() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    db::init(&db_path).unwrap();
    let conn = db::open(&db_path).unwrap();

    // Verify foreign keys are enabled
    let foreign_keys: i32 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1, "Foreign keys should be enabled");

    // Verify WAL mode (on a fresh init)
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(journal_mode.to_lowercase(), "wal", "Journal mode should be WAL");
}

#[test]
fn test_catalog_round_trip_across_sessions() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    db::init(&db_path).unwrap();

    let mut foo = package("foo", "1.2", false);
    foo.license = Some("GPL-2.0".to_string());
    foo.deps.insert(DepClass::Requires, Capability::unconstrained(Kind::Package, "libc"));
    foo.deps.insert(
        DepClass::Requires,
        Capability::new(Kind::Package, "libbar", Relation::Ge, Some(Edition::new("2.0", "", 0))),
    );
    foo.deps.insert(
        DepClass::Provides,
        Capability::new(Kind::Package, "foo-tools", Relation::Eq, Some(Edition::new("1.2", "1", 0))),
    );
    foo.deps.insert(DepClass::Supplements, Capability::unconstrained(Kind::Pattern, "devel"));

    // Write in one session and commit
    let store = CatalogStore::open(&db_path, OpenMode::Write)
        .unwrap()
        .with_system_arch(Arch::X86_64);
    store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();
    let written = store
        .write_catalog_contents(
            std::slice::from_ref(&foo),
            ResolvableStatus::Undetermined,
            "c1",
            Ownership::ServerOwned,
        )
        .unwrap();
    assert_eq!(written, 1);
    store.close().unwrap();

    // Read back from a separate read-only session
    let reader = CatalogStore::open(&db_path, OpenMode::Read).unwrap();
    let loaded = SourceLoader::new(reader.connection(), "c1", LoadPolicy::default())
        .load_catalog()
        .unwrap();

    assert_eq!(loaded.len(), 1);
    let back = &loaded[0];
    assert_eq!(back.name, "foo");
    assert_eq!(back.edition, foo.edition);
    assert_eq!(back.arch, Arch::X86_64);
    assert_eq!(back.catalog, "c1");
    assert_eq!(back.license.as_deref(), Some("GPL-2.0"));
    assert_eq!(back.deps, foo.deps, "Capability sets should survive the round trip");
    assert!(
        back.deps
            .get(DepClass::Requires)
            .any(|c| c.name == "libc" && c.is_unconstrained()),
        "Unconstrained capability should read back unconstrained"
    );
}

#[test]
fn test_partial_write_leaves_catalog_empty() {
    let (_temp, store) = create_test_store();
    store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();

    store
        .connection()
        .execute_batch(
            "CREATE TRIGGER fail_boom BEFORE INSERT ON resolvables
             WHEN NEW.name = 'boom'
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();

    let result = store.write_catalog_contents(
        &[package("a", "1.0", false), package("boom", "1.0", false), package("c", "1.0", false)],
        ResolvableStatus::Undetermined,
        "c1",
        Ownership::ServerOwned,
    );

    assert!(result.is_err(), "Write should fail on the aborted insert");
    assert_eq!(catalog_row_count(&store, "c1"), 0, "No rows should remain for the catalog");
}

#[test]
fn test_refresh_is_idempotent() {
    let (_temp, store) = create_test_store();
    store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();
    let contents = [package("a", "1.0", false), package("b", "2.0", false)];

    for _ in 0..3 {
        store
            .refresh_catalog(&contents, ResolvableStatus::Undetermined, "c1", Ownership::ServerOwned)
            .unwrap();
    }

    assert_eq!(catalog_row_count(&store, "c1"), 2);
}

#[test]
fn test_transaction_rollback_on_error() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();
    drop(temp_file);

    db::init(&db_path).unwrap();
    let mut conn = db::open(&db_path).unwrap();

    // Try a transaction that will fail
    let result = db::transaction(&mut conn, |tx| {
        CatalogRecord::new("dup", "First").insert(tx)?;

        // Same id again (should fail due to PRIMARY KEY constraint)
        CatalogRecord::new("dup", "Second").insert(tx)?;

        Ok(())
    });

    assert!(result.is_err(), "Transaction should fail on duplicate");

    // Verify nothing was committed (rollback worked)
    assert!(
        CatalogRecord::find_by_id(&conn, "dup").unwrap().is_none(),
        "No catalogs should be in database after rollback"
    );
}

/// System catalog with foo 2.0 and vim installed, remote catalog with newer foo and bar
fn populated_store() -> (NamedTempFile, CatalogStore) {
    let (temp, store) = create_test_store();
    store.insert_catalog(&CatalogRecord::new("@system", "System")).unwrap();
    store.insert_catalog(&CatalogRecord::new("c1", "Main")).unwrap();
    store
        .write_catalog_contents(
            &[package("foo", "2.0", true), package("vim", "9.0", true)],
            ResolvableStatus::Satisfied,
            "@system",
            Ownership::LocalFile,
        )
        .unwrap();
    store
        .write_catalog_contents(
            &[package("foo", "3.0", false), package("bar", "1.0", false)],
            ResolvableStatus::Undetermined,
            "c1",
            Ownership::ServerOwned,
        )
        .unwrap();
    (temp, store)
}

fn find_id(registry: &CatalogRegistry, name: &str, installed: bool) -> i64 {
    registry
        .iter()
        .map(|(_, obj)| obj)
        .find(|obj| obj.name == name && obj.installed == installed)
        .and_then(|obj| obj.id)
        .unwrap()
}

#[test]
fn test_install_best_requires_newer_than_installed() {
    let (_temp, store) = populated_store();
    let mut registry = CatalogRegistry::new(LoadPolicy::default());
    registry.list_catalogs(store.connection(), false, false).unwrap();

    let foo_new = find_id(&registry, "foo", false);
    TransactionRow::new(TransactionAction::InstallBest, foo_new)
        .insert(store.connection())
        .unwrap();

    let mut pool = Pool::new(&registry);
    let summary = TransactionLog::default()
        .apply_pending_requests(&mut pool, store.connection())
        .unwrap();

    assert!(summary.have_best);
    assert_eq!(
        pool.additional_requires(),
        &[Capability::new(
            Kind::Package,
            "foo",
            Relation::Gt,
            Some(Edition::new("2.0", "1", 0))
        )],
        "Install-best should ask for something newer than the installed foo"
    );

    // The passthrough resolver picks the newest candidate
    let decisions = Decisions::from_requests(&pool);
    assert_eq!(decisions.installs(), vec![foo_new]);
}

#[test]
fn test_locks_win_over_decisions() {
    let (_temp, mut store) = populated_store();
    LockRule::from_glob("v?m").insert(store.connection()).unwrap();

    let mut registry = CatalogRegistry::new(LoadPolicy::default());
    registry.list_catalogs(store.connection(), false, false).unwrap();
    let vim = find_id(&registry, "vim", true);
    let bar = find_id(&registry, "bar", false);

    TransactionRow::new(TransactionAction::Remove, vim)
        .insert(store.connection())
        .unwrap();
    TransactionRow::new(TransactionAction::Install, bar)
        .insert(store.connection())
        .unwrap();

    let mut pool = Pool::new(&registry);
    let locks = apply_locks(&mut pool, store.connection()).unwrap();
    assert_eq!(locks.locked, 1);

    let log = TransactionLog::default();
    let summary = log.apply_pending_requests(&mut pool, store.connection()).unwrap();
    assert_eq!(summary.skipped_locked, vec![vim]);

    // A resolver that still wants vim gone must not get its way
    let mut decisions = Decisions::from_requests(&pool);
    decisions.uninstall(vim);
    assert!(log.persist_decisions(&mut pool, store.connection_mut(), &decisions).unwrap());

    let rows = TransactionRow::list_all(store.connection()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, TransactionAction::Install);
    assert_eq!(rows[0].id, bar);
    assert_eq!(pool.status(pool.find(vim).unwrap()), ItemStatus::Locked);
}

#[test]
fn test_pending_request_for_unknown_id_is_fatal() {
    let (_temp, store) = populated_store();
    let mut registry = CatalogRegistry::new(LoadPolicy::default());
    registry.list_catalogs(store.connection(), false, false).unwrap();

    TransactionRow::new(TransactionAction::Remove, 987_654)
        .insert(store.connection())
        .unwrap();

    let mut pool = Pool::new(&registry);
    let result = TransactionLog::default().apply_pending_requests(&mut pool, store.connection());
    assert!(matches!(result, Err(Error::RowLookup(987_654))));
}
