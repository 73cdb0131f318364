#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cookie_schema::{cookies, Settings, SqliteService};
use tracing_subscriber::EnvFilter;

/// Create the cookie shop tables in a SQLite file and show the demo insert.
#[derive(Debug, Parser)]
#[command(name = "cookie-schema", version)]
struct Cli {
    /// TOML settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the settings file.
    #[arg(long, global = true)]
    db: Option<String>,

    /// Do not enforce foreign keys on this connection.
    #[arg(long, global = true)]
    no_foreign_keys: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create any missing tables.
    Init,
    /// Print the chocolate chip insert statement and its parameters.
    InsertDemo {
        /// Also run the insert against the database.
        #[arg(long)]
        execute: bool,
    },
    /// List the tables present in the database.
    Tables,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli, &mut io::stdout().lock()) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if cli.no_foreign_keys {
        settings.foreign_keys = false;
    }
    setup_logging(&settings.log_level);

    let config = settings.into_sqlite_config(cookies::schema());
    let db_path = config.db_path.clone();
    let service =
        SqliteService::open(config).with_context(|| format!("opening database {db_path}"))?;
    service.create_all().context("creating tables")?;

    match cli.command {
        Command::Init => {
            writeln!(out, "tables ready in {db_path}")?;
        }
        Command::InsertDemo { execute } => {
            let table = service.schema().require_table(cookies::COOKIES)?;
            let insert = cookies::chocolate_chip(table);
            let query = insert.compile(service.clock())?;
            writeln!(out, "{}", query.statement)?;
            writeln!(out)?;
            writeln!(out, "{}", serde_json::to_string_pretty(&query.params)?)?;
            if execute {
                service.execute(&query).context("inserting demo cookie")?;
                let rowid = service.connection().last_insert_rowid();
                writeln!(out, "inserted cookie_id {rowid}")?;
            }
        }
        Command::Tables => {
            for name in service.table_names()? {
                writeln!(out, "{name}")?;
            }
        }
    }
    Ok(())
}

fn setup_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber installed earlier in the process keeps its place.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use cookie_schema::{Select, SqliteConfig};
    use tempfile::TempDir;

    fn run_cli(dir: &TempDir, args: &[&str]) -> String {
        let db = dir.path().join("cookies.db").to_string_lossy().into_owned();
        let mut argv = vec!["cookie-schema", "--db", db.as_str()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv).unwrap();
        let mut out = Vec::new();
        run(cli, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn open_store(dir: &TempDir) -> SqliteService {
        let db = dir.path().join("cookies.db").to_string_lossy().into_owned();
        SqliteService::open(SqliteConfig::new(db, cookies::schema())).unwrap()
    }

    #[test]
    fn init_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_cli(&dir, &["init"]);
        assert!(out.starts_with("tables ready in "));
        assert_eq!(
            open_store(&dir).table_names().unwrap(),
            ["cookies", "line_items", "orders", "users"]
        );
    }

    #[test]
    fn tables_lists_one_name_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_cli(&dir, &["tables"]);
        assert_eq!(out, "cookies\nline_items\norders\nusers\n");
    }

    #[test]
    fn insert_demo_prints_statement_and_params() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_cli(&dir, &["insert-demo"]);
        let (statement, params) = out.split_once("\n\n").unwrap();
        assert_eq!(
            statement,
            "INSERT INTO cookies (cookie_name, cookie_recipe_url, cookie_sku, quantity, \
             unit_cost, created_on, updated_on) VALUES (:cookie_name, :cookie_recipe_url, \
             :cookie_sku, :quantity, :unit_cost, :created_on, :updated_on)"
        );

        let params: serde_json::Value = serde_json::from_str(params).unwrap();
        assert_eq!(params["cookie_sku"], "CC01");
        assert_eq!(params["quantity"], 12);
        let created_on = params["created_on"].as_str().unwrap();
        assert!(cookie_schema::clock::parse_timestamp(created_on).is_some());
        assert_eq!(created_on.len(), "2026-10-16 04:08:41.947387".len());
        assert!(!created_on.contains('T'));

        let table = cookies::cookies();
        assert!(open_store(&dir).select(&Select::new(&table)).unwrap().is_empty());
    }

    #[test]
    fn insert_demo_execute_stores_the_cookie() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_cli(&dir, &["insert-demo", "--execute"]);
        assert!(out.ends_with("inserted cookie_id 1\n"));

        let table = cookies::cookies();
        let rows = open_store(&dir).select(&Select::new(&table)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["cookie_name"].as_text(), Some("chocolate chip"));
    }

    #[test]
    fn missing_config_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml").to_string_lossy().into_owned();
        let cli =
            Cli::try_parse_from(["cookie-schema", "--config", missing.as_str(), "init"]).unwrap();
        let err = run(cli, &mut Vec::new()).unwrap_err();
        assert!(format!("{err:#}").starts_with("loading settings from "));
    }
}
