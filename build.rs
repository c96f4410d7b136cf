// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

const DB_PATH: &str = "/var/lib/catalogd/catalog.db";

fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value(DB_PATH)
        .help("Database path")
}

fn build_cli() -> Command {
    Command::new("catalogd")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Catalogd Contributors")
        .about("Package catalog store with lock and transaction reconciliation")
        .subcommand_required(false)
        .arg(
            Arg::new("system_arch")
                .long("system-arch")
                .global(true)
                .env("CATALOGD_ARCH")
                .help("System architecture used to filter catalog contents"),
        )
        .arg(
            Arg::new("owned_catalogs")
                .long("owned-catalogs")
                .global(true)
                .env("CATALOGD_OWNED_CATALOGS")
                .default_value("/var/lib/catalogd/owned-catalogs")
                .help("File listing the catalogs whose packages are fetched by this service"),
        )
        .arg(
            Arg::new("log_file")
                .long("log-file")
                .global(true)
                .env("CATALOGD_LOGFILE")
                .default_value("/var/log/catalogd.log")
                .help("Log file"),
        )
        .subcommand(
            Command::new("init")
                .about("Initialize the catalog database")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("import")
                .about("Replace a catalog's contents with a JSON dump (.json or .json.gz)")
                .arg(Arg::new("catalog_id").required(true).help("Catalog id"))
                .arg(Arg::new("file").required(true).help("Path to the dump"))
                .arg(Arg::new("name").long("name").help("Display name"))
                .arg(Arg::new("alias").long("alias").help("Catalog alias"))
                .arg(Arg::new("description").long("description").help("Catalog description"))
                .arg(
                    Arg::new("priority")
                        .short('p')
                        .long("priority")
                        .default_value("0")
                        .help("Priority (higher = preferred)"),
                )
                .arg(Arg::new("uri").long("uri").help("Source URL, optionally with ?alias=NAME"))
                .arg(
                    Arg::new("owner")
                        .long("owner")
                        .default_value("server")
                        .value_parser(["server", "cache", "local"])
                        .help("Who fetches the packages"),
                )
                .arg(
                    Arg::new("installed")
                        .long("installed")
                        .action(ArgAction::SetTrue)
                        .help("Mark every entry installed"),
                )
                .arg(
                    Arg::new("checksum")
                        .long("checksum")
                        .help("Expected checksum of the dump, e.g. sha256:<hex>"),
                )
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("remove-catalog")
                .about("Remove a catalog and everything in it")
                .arg(Arg::new("catalog_id").required(true).help("Catalog id"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("list-catalogs")
                .about("List catalogs")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("query-pool")
                .about("Print pool entries")
                .arg(Arg::new("filter").help("all, packages, patches, patterns, selections or products"))
                .arg(Arg::new("catalog").help("Catalog alias or id; @system shows installed entries only"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("lock-add")
                .about("Add a lock, e.g. \"kernel-* >= 6.0\"")
                .arg(Arg::new("expression").required(true).help("Lock expression"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("list-locks")
                .about("List locks")
                .arg(
                    Arg::new("apply")
                        .long("apply")
                        .action(ArgAction::SetTrue)
                        .help("Apply the locks to the pool and report what they match"),
                )
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("pending")
                .about("Read the pending transaction queue into the pool")
                .arg(
                    Arg::new("abort_on_locked")
                        .long("abort-on-locked")
                        .action(ArgAction::SetTrue)
                        .help("Fail on requests that target a locked entry"),
                )
                .arg(
                    Arg::new("persist")
                        .long("persist")
                        .action(ArgAction::SetTrue)
                        .help("Accept the requests as decisions and write them back"),
                )
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("update-status")
                .about("Write back the establish status of a resolvable")
                .arg(Arg::new("id").required(true).help("Resolvable id"))
                .arg(
                    Arg::new("status")
                        .required(true)
                        .value_parser(["undetermined", "unneeded", "satisfied", "broken"])
                        .help("New status"),
                )
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("drop-transaction")
                .about("Drop queued transactions for a resolvable id")
                .arg(Arg::new("id").required(true).help("Resolvable id"))
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("catalogd.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
