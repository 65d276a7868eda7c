//! `kcidb-db`: manage and query a KCIDB report database.
//!
//! # Usage
//!
//! ```text
//! kcidb-db --database kcidb.sqlite3 init
//! kcidb-db --database kcidb.sqlite3 load < report.json
//! kcidb-db --database kcidb.sqlite3 dump -o 1000 --after checkouts=2024-01-01T00:00:00Z
//! kcidb-db --database kcidb.sqlite3 query --id tests=origin:t1 --parents
//! ```
//!
//! Report documents go to stdout, one per line; logs go to stderr.

mod args;
mod config;

use std::{
  collections::BTreeSet,
  io::{self, BufWriter, Write},
  path::PathBuf,
};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use kcidb_core::{
  Version,
  io::{Id, IdKind, QueryIds, Report},
  orm::Pattern,
  store::{DumpParams, QueryParams, ReportStore, TimeBounds},
};
use kcidb_store_sqlite::{SqliteStore, connection::PARAMS_DOC};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage and query a KCIDB report database", after_help = PARAMS_DOC)]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "kcidb.toml")]
  config: PathBuf,

  /// Database connection parameters, overriding the configuration.
  #[arg(short, long, value_name = "PARAMS")]
  database: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Initialize an empty database.
  Init {
    /// Schema version to create (default: latest).
    #[arg(long = "ver", value_name = "M.m")]
    version: Option<Version>,
  },
  /// Upgrade the database schema in place, keeping its data.
  Upgrade {
    /// Schema version to upgrade to (default: latest).
    #[arg(long = "ver", value_name = "M.m")]
    version: Option<Version>,
  },
  /// Drop every table.
  Cleanup,
  /// Delete every row, keeping the schema.
  Empty,
  /// Print the schema version.
  Version,
  /// Dump the database as report documents.
  Dump {
    /// Maximum objects per document, zero for no limit.
    #[arg(short = 'o', long, default_value_t = 0)]
    objects_per_report: usize,
    #[arg(long)]
    with_metadata:      bool,
    /// Only objects of LIST which arrived after TIME.
    #[arg(long, value_name = "LIST=TIME", value_parser = args::parse_bound)]
    after:              Vec<(String, DateTime<Utc>)>,
    /// Only objects of LIST which arrived at or before TIME.
    #[arg(long, value_name = "LIST=TIME", value_parser = args::parse_bound)]
    until:              Vec<(String, DateTime<Utc>)>,
  },
  /// Load report documents from stdin.
  Load {
    /// Keep metadata fields found in the documents.
    #[arg(long)]
    with_metadata: bool,
  },
  /// Fetch objects by identity as report documents.
  Query {
    /// An object to match; multi-field identities are comma-separated and
    /// a double-quoted component is always text.
    #[arg(long = "id", value_name = "LIST=ID", value_parser = args::parse_list_id)]
    ids:                Vec<(String, Id)>,
    /// Also match parents of matched objects.
    #[arg(long)]
    parents:            bool,
    /// Also match children of matched objects.
    #[arg(long)]
    children:           bool,
    #[arg(short = 'o', long, default_value_t = 0)]
    objects_per_report: usize,
    #[arg(long)]
    with_metadata:      bool,
  },
  /// Fetch OO objects of one type.
  OoQuery {
    #[arg(long = "type", value_name = "TYPE")]
    obj_type: String,
    /// Restrict to these identities (default: every object).
    #[arg(long = "id", value_name = "ID", value_parser = args::parse_id)]
    ids:      Vec<Id>,
  },
  /// Print the earliest arrival time of each object list.
  FirstModified,
  /// Print the latest arrival time of each object list.
  LastModified,
}

// ─── Entry point ─────────────────────────────────────────────────────────────

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let mut cfg = CliConfig::load(&cli.config)?;
  if let Some(database) = cli.database {
    cfg.database = Some(database);
  }
  let database = cfg.database()?;

  let mut store = SqliteStore::open_with_options(database, cfg.store_options())
    .with_context(|| format!("failed to open database {database:?}"))?;

  run(&mut store, cli.command)?;
  store.close().context("failed to close database")
}

fn run(store: &mut SqliteStore, command: Command) -> Result<()> {
  match command {
    Command::Init { version } => store.init_version(version).context("init failed")?,
    Command::Upgrade { version } => store.upgrade(version).context("upgrade failed")?,
    Command::Cleanup => store.cleanup().context("cleanup failed")?,
    Command::Empty => store.empty().context("empty failed")?,
    Command::Version => match store.version() {
      Some(version) => println!("{version}"),
      None => println!("uninitialized"),
    },
    Command::Dump { objects_per_report, with_metadata, after, until } => {
      let params = DumpParams {
        objects_per_report,
        with_metadata,
        after: after.into_iter().collect::<TimeBounds>(),
        until: until.into_iter().collect::<TimeBounds>(),
      };
      let mut out = BufWriter::new(io::stdout().lock());
      store.dump_iter(&params, |report| write_line(&mut out, &report)).context("dump failed")?;
      out.flush()?;
    }
    Command::Load { with_metadata } => load(store, with_metadata)?,
    Command::Query { ids, parents, children, objects_per_report, with_metadata } => {
      let io_schema = store.schema()?.io;
      let mut query_ids = QueryIds::new();
      for (list, id) in ids {
        let kinds: Vec<IdKind> = io_schema.list(&list)?.id_fields.iter().map(|f| f.kind).collect();
        query_ids.entry(list).or_default().insert(args::coerce_id(id, &kinds));
      }
      let params = QueryParams { ids: query_ids, children, parents, objects_per_report, with_metadata };
      let mut out = BufWriter::new(io::stdout().lock());
      store.query_iter(&params, |report| write_line(&mut out, &report)).context("query failed")?;
      out.flush()?;
    }
    Command::OoQuery { obj_type, ids } => {
      let ids = (!ids.is_empty()).then(|| ids.into_iter().collect::<BTreeSet<Id>>());
      let pattern = Pattern::new(&obj_type, ids).context("invalid pattern")?;
      tracing::info!(%pattern, "querying OO objects");
      let data = store.oo_query(&BTreeSet::from([pattern])).context("OO query failed")?;
      print_pretty(&data)?;
    }
    Command::FirstModified => print_pretty(&store.get_first_modified()?)?,
    Command::LastModified => print_pretty(&store.get_last_modified()?)?,
  }
  Ok(())
}

/// Load every document of a concatenated JSON stream on stdin, upgrading
/// older compatible ones to the database's report version.
fn load(store: &SqliteStore, with_metadata: bool) -> Result<()> {
  let io_schema = store.schema()?.io;
  let stdin = io::stdin().lock();
  let mut loaded = 0usize;
  for (index, report) in serde_json::Deserializer::from_reader(stdin).into_iter::<Report>().enumerate() {
    let report = report.with_context(|| format!("failed to parse document #{index}"))?;
    let report = io_schema
      .upgrade(report)
      .with_context(|| format!("document #{index} is incompatible"))?;
    store
      .load(&report, with_metadata)
      .with_context(|| format!("failed to load document #{index}"))?;
    loaded += 1;
  }
  tracing::info!(documents = loaded, "loaded");
  Ok(())
}

fn write_line<W: Write>(out: &mut W, report: &Report) -> kcidb_store_sqlite::Result<()> {
  serde_json::to_writer(&mut *out, report)?;
  out.write_all(b"\n").map_err(serde_json::Error::io)?;
  Ok(())
}

fn print_pretty<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
