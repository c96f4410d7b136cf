// src/main.rs

use anyhow::{Context, Result, anyhow, bail};
use catalogd::arch::Arch;
use catalogd::capability::Capability;
use catalogd::config::{self, Config};
use catalogd::db::models::{CatalogRecord, LockRule};
use catalogd::import::{self, ImportOptions};
use catalogd::locks;
use catalogd::pool::Pool;
use catalogd::protocol::{StatusLine, item_line};
use catalogd::registry::{CatalogRegistry, CatalogUri};
use catalogd::resolvable::{Checksum, Kind, ResolvableStatus};
use catalogd::resolver::Decisions;
use catalogd::source::LoadPolicy;
use catalogd::store::{OpenMode, Ownership};
use catalogd::transactions::{LockPolicy, TransactionLog};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catalogd")]
#[command(author, version, about = "Package catalog store with lock and transaction reconciliation", long_about = None)]
struct Cli {
    /// System architecture used to filter catalog contents (default: host)
    #[arg(long, global = true, env = "CATALOGD_ARCH")]
    system_arch: Option<String>,

    /// File listing the catalogs whose packages are fetched by this service
    #[arg(long, global = true, env = "CATALOGD_OWNED_CATALOGS", default_value = config::DEFAULT_OWNED_CATALOGS)]
    owned_catalogs: PathBuf,

    /// Log file; stdout and stderr carry the line protocol
    #[arg(long, global = true, env = "CATALOGD_LOGFILE", default_value = config::DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog database
    Init {
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Replace a catalog's contents with a JSON dump (.json or .json.gz)
    Import {
        /// Catalog id
        catalog_id: String,
        /// Path to the dump
        file: PathBuf,
        /// Display name (default: the source URL, then the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        alias: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Priority (higher = preferred)
        #[arg(short, long, default_value = "0")]
        priority: i32,
        /// Source URL, optionally with ?alias=NAME
        #[arg(long)]
        uri: Option<String>,
        /// Who fetches the packages: server, cache or local
        #[arg(long, default_value = "server")]
        owner: String,
        /// Mark every entry installed
        #[arg(long)]
        installed: bool,
        /// Expected checksum of the dump, e.g. sha256:<hex>
        #[arg(long)]
        checksum: Option<String>,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Remove a catalog and everything in it
    RemoveCatalog {
        catalog_id: String,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// List catalogs
    ListCatalogs {
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Print pool entries
    QueryPool {
        /// all, packages, patches, patterns, selections or products
        filter: Option<String>,
        /// Catalog alias or id; @system shows installed entries only
        catalog: Option<String>,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Add a lock, e.g. "kernel-* >= 6.0"
    LockAdd {
        expression: String,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// List locks
    ListLocks {
        /// Apply the locks to the pool and report what they match
        #[arg(long)]
        apply: bool,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Read the pending transaction queue into the pool
    Pending {
        /// Fail on requests that target a locked entry instead of skipping them
        #[arg(long)]
        abort_on_locked: bool,
        /// Accept the requests as decisions and write them back
        #[arg(long)]
        persist: bool,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Write back the establish status of a resolvable
    UpdateStatus {
        id: i64,
        /// undetermined, unneeded, satisfied or broken
        status: String,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Drop queued transactions for a resolvable id
    DropTransaction {
        id: i64,
        /// Database path (default: /var/lib/catalogd/catalog.db)
        #[arg(short, long, default_value = config::DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    fn db_path(&self) -> &str {
        match self {
            Commands::Init { db_path }
            | Commands::Import { db_path, .. }
            | Commands::RemoveCatalog { db_path, .. }
            | Commands::ListCatalogs { db_path }
            | Commands::QueryPool { db_path, .. }
            | Commands::LockAdd { db_path, .. }
            | Commands::ListLocks { db_path, .. }
            | Commands::Pending { db_path, .. }
            | Commands::UpdateStatus { db_path, .. }
            | Commands::DropTransaction { db_path, .. } => db_path.as_str(),
            Commands::Completions { .. } => config::DEFAULT_DB_PATH,
        }
    }
}

/// Log to the given file, or to stderr if it cannot be opened
fn init_logging(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        Err(_) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_file);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{}", StatusLine::Error(format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let system_arch = match &cli.system_arch {
        Some(s) => s.parse::<Arch>().map_err(|e| anyhow!(e))?,
        None => Arch::host(),
    };
    let config = Config {
        db_path: command.db_path().to_string(),
        system_arch,
        owned_catalogs: cli.owned_catalogs,
        log_file: Some(cli.log_file),
    };

    match command {
        Commands::Init { db_path } => {
            info!("Initializing catalog database at: {}", db_path);
            catalogd::db::init(&db_path)?;
            println!("{}", StatusLine::Finish(Some(format!("Database initialized at {}", db_path))));
            Ok(())
        }
        Commands::Import {
            catalog_id,
            file,
            name,
            alias,
            description,
            priority,
            uri,
            owner,
            installed,
            checksum,
            ..
        } => {
            let ownership: Ownership = owner.parse().map_err(|e: String| anyhow!(e))?;
            let expected = checksum
                .as_deref()
                .map(str::parse::<Checksum>)
                .transpose()?;
            let uri = uri.as_deref().map(CatalogUri::parse).transpose()?;

            let name = name
                .or_else(|| uri.as_ref().map(|u| u.url.clone()))
                .unwrap_or_else(|| catalog_id.clone());
            let mut record = CatalogRecord::new(catalog_id.clone(), name);
            record.alias = alias
                .or_else(|| uri.as_ref().and_then(|u| u.alias.clone()))
                .unwrap_or_default();
            record.description = description.unwrap_or_default();
            record.priority = priority;
            let record = record.with_defaults();

            let store = config.open_store(OpenMode::Write)?;
            let options = ImportOptions {
                ownership,
                status: ResolvableStatus::Undetermined,
                installed,
                expected,
            };
            let written = import::import_catalog(&store, &record, &file, options)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            store.close()?;

            let mut owned = config.load_owned()?;
            let changed = if ownership == Ownership::ServerOwned {
                owned.add(&catalog_id)
            } else {
                owned.remove(&catalog_id)
            };
            if changed {
                owned.save()?;
            }

            println!(
                "{}",
                StatusLine::Finish(Some(format!("Imported {} resolvables into {}", written, catalog_id)))
            );
            Ok(())
        }
        Commands::RemoveCatalog { catalog_id, .. } => {
            let store = config.open_store(OpenMode::Write)?;
            if !store.have_catalog(&catalog_id)? {
                bail!("Catalog '{}' not found", catalog_id);
            }
            store.remove_catalog(&catalog_id)?;
            store.close()?;

            let mut owned = config.load_owned()?;
            if owned.remove(&catalog_id) {
                owned.save()?;
            }
            println!("{}", StatusLine::Finish(Some(format!("Removed catalog {}", catalog_id))));
            Ok(())
        }
        Commands::ListCatalogs { .. } => {
            let store = config.open_store(OpenMode::Read)?;
            let owned = config.load_owned()?;
            let mut registry = CatalogRegistry::new(LoadPolicy { create_dependencies: false });
            let catalogs = registry.list_catalogs(store.connection(), false, false)?;

            println!("{}", StatusLine::Total(catalogs.len()));
            for catalog in catalogs {
                let r = &catalog.record;
                println!(
                    "{}",
                    StatusLine::Progress(vec![
                        r.id.clone(),
                        r.name.clone(),
                        r.alias.clone(),
                        r.priority.to_string(),
                        catalog.resolvables.len().to_string(),
                        if owned.contains(&r.id) { "owned" } else { "" }.to_string(),
                    ])
                );
            }
            println!("{}", StatusLine::Finish(None));
            Ok(())
        }
        Commands::QueryPool { filter, catalog, .. } => {
            let kind = match filter.as_deref() {
                None | Some("all") | Some("") => None,
                Some("packages") => Some(Kind::Package),
                Some("patches") => Some(Kind::Patch),
                Some("patterns") => Some(Kind::Pattern),
                Some("selections") => Some(Kind::Selection),
                Some("products") => Some(Kind::Product),
                Some(other) => bail!(
                    "Unknown filter '{}', expected all, packages, patches, patterns, selections or products",
                    other
                ),
            };

            let store = config.open_store(OpenMode::Read)?;
            let mut registry = CatalogRegistry::new(LoadPolicy { create_dependencies: false });
            registry.list_catalogs(store.connection(), false, false)?;

            let system_only = catalog.as_deref() == Some("@system");
            let catalog_id = match catalog.as_deref() {
                None | Some("@system") => None,
                Some(wanted) => Some(
                    registry
                        .catalogs()
                        .iter()
                        .find(|c| c.record.alias == wanted || c.id() == wanted)
                        .map(|c| c.id().to_string())
                        .ok_or_else(|| anyhow!("Catalog '{}' not found", wanted))?,
                ),
            };

            let pool = Pool::new(&registry);
            for (idx, _) in pool.iter() {
                let obj = pool.resolvable(idx);
                if kind.is_some_and(|k| obj.kind() != k)
                    || (system_only && !obj.installed)
                    || catalog_id.as_deref().is_some_and(|id| obj.catalog != id)
                {
                    continue;
                }
                println!("{}", item_line(obj));
            }
            Ok(())
        }
        Commands::LockAdd { expression, .. } => {
            Capability::parse(Kind::Package, &expression)?;

            let store = config.open_store(OpenMode::Write)?;
            let id = LockRule::from_glob(expression.trim()).insert(store.connection())?;
            store.close()?;
            println!("{}", StatusLine::Finish(Some(format!("Added lock {}", id))));
            Ok(())
        }
        Commands::ListLocks { apply, .. } => {
            let store = config.open_store(OpenMode::Read)?;
            let rules = LockRule::list_all(store.connection())?;

            println!("{}", StatusLine::Total(rules.len()));
            for rule in &rules {
                let expr = match (&rule.glob, &rule.name) {
                    (Some(glob), _) => glob.clone(),
                    (None, Some(name)) => Capability::new(Kind::Package, name.clone(), rule.relation, rule.edition.clone())
                        .to_string(),
                    (None, None) => String::new(),
                };
                let id = rule.id.map(|i| i.to_string()).unwrap_or_default();
                println!("{}", StatusLine::Progress(vec![id, expr]));
            }

            if apply {
                let mut registry = CatalogRegistry::new(LoadPolicy::default());
                registry.list_catalogs(store.connection(), false, false)?;
                let mut pool = Pool::new(&registry);
                let summary = locks::apply_locks(&mut pool, store.connection())?;
                for idx in pool.with_status(catalogd::pool::ItemStatus::Locked) {
                    println!(
                        "{}",
                        StatusLine::Progress(vec!["locked".to_string(), pool.resolvable(idx).to_string()])
                    );
                }
                println!(
                    "{}",
                    StatusLine::Finish(Some(format!("{} entries locked", summary.locked)))
                );
            } else {
                println!("{}", StatusLine::Finish(None));
            }
            Ok(())
        }
        Commands::Pending {
            abort_on_locked,
            persist,
            ..
        } => {
            let policy = if abort_on_locked { LockPolicy::Abort } else { LockPolicy::Skip };
            let log = TransactionLog::new(policy);

            let mut store = config.open_store(OpenMode::Write)?;
            let mut registry = CatalogRegistry::new(LoadPolicy::default()).with_owned(config.load_owned()?);
            registry.list_catalogs(store.connection(), false, false)?;

            let mut pool = Pool::new(&registry);
            locks::apply_locks(&mut pool, store.connection())?;
            let summary = log.apply_pending_requests(&mut pool, store.connection())?;

            println!("{}", StatusLine::Total(summary.requests.len() * 2));
            for (action, id) in &summary.requests {
                let item = registry.get(*id).map(|r| r.to_string()).unwrap_or_default();
                println!(
                    "{}",
                    StatusLine::Progress(vec![action.as_str().to_string(), item])
                );
            }

            if persist {
                let decisions = Decisions::from_requests(&pool);
                if !log.persist_decisions(&mut pool, store.connection_mut(), &decisions)? {
                    bail!("Could not persist transactions");
                }
            }
            store.close()?;

            println!(
                "{}",
                StatusLine::Finish(Some(format!(
                    "{} requests, {} removals, {} skipped as locked",
                    summary.count,
                    summary.removals,
                    summary.skipped_locked.len()
                )))
            );
            Ok(())
        }
        Commands::UpdateStatus { id, status, .. } => {
            let status: ResolvableStatus = status.parse().map_err(|e: String| anyhow!(e))?;
            let store = config.open_store(OpenMode::Write)?;
            if !store.update_status(id, status)? {
                return Err(catalogd::Error::RowLookup(id).into());
            }
            store.close()?;
            println!("{}", StatusLine::Finish(None));
            Ok(())
        }
        Commands::DropTransaction { id, .. } => {
            let store = config.open_store(OpenMode::Write)?;
            let removed = TransactionLog::drop_transaction(store.connection(), id)?;
            store.close()?;
            println!("{}", StatusLine::Finish(Some(format!("Dropped {} transactions", removed))));
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "catalogd", &mut std::io::stdout());
            Ok(())
        }
    }
}
