//! Reftree CLI - inspect and maintain an entity reference tree database

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use reftree::config::{self, ReftreeConfig};
use reftree::reconcile::{purge_edges, sever_edges};
use reftree::storage::SqliteStore;
use reftree::ui::{self, Icons};
use reftree::{EdgeFilter, EntityKey, UNVERSIONED};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "reftree")]
#[command(version = "0.0.1")]
#[command(about = "Entity reference tree - inspect and maintain stored reference edges")]
#[command(long_about = r#"
Reftree keeps one row per reference position between entity versions and
answers parent, root and published-ancestor questions over them.

Entity keys are written type/bundle/id[@version], for example:
  reftree edges --from node/article/12@40
  reftree edges --to media/image/7 --field field_media
  reftree sever paragraph/gallery/3
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Path to the database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and create the database schema
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        force: bool,
    },

    /// Show statistics about the stored edges
    Stats,

    /// List stored edges by referencing and/or referenced entity
    Edges {
        /// Referencing entity (all versions unless @version is given)
        #[arg(long)]
        from: Option<EntityKey>,

        /// Referenced entity (all versions unless @version is given)
        #[arg(long)]
        to: Option<EntityKey>,

        /// Restrict to one field
        #[arg(long)]
        field: Option<String>,
    },

    /// Delete every edge recorded by an entity type or bundle
    Purge {
        /// Entity type whose outgoing edges are removed
        #[arg(short, long)]
        entity_type: String,

        /// Only this bundle of the type
        #[arg(short, long)]
        bundle: Option<String>,
    },

    /// Delete every edge touching an entity, in both directions
    Sever {
        /// Entity key (the version part is ignored)
        key: EntityKey,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let config = config::load_config(Some(&config_path))?.unwrap_or_default();
    let database = resolve_database(cli.database.as_deref(), &config);

    match cli.command {
        Commands::Init { force } => {
            let mut written = config.clone();
            written.database = Some(database.display().to_string());
            config::write_config(&config_path, &written, force)?;

            config::ensure_db_dir(&database)?;
            let store = SqliteStore::open(&database)?;
            let edges = store.count_edges()?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "config": config_path.display().to_string(),
                        "database": database.display().to_string(),
                        "edges": edges,
                    }))?
                );
            } else {
                ui::success("Reference tree initialized");
                ui::info("Config", &config_path.display().to_string());
                ui::info("Database", &database.display().to_string());
                ui::summary_row("Existing edges:", &edges.to_string());
            }
        }

        Commands::Stats => {
            let store = open_existing(&database)?;
            let stats = store.stats()?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                ui::header(Icons::STATS, &format!("Reference Tree Statistics ({})", database.display()));
                println!(
                    "{}",
                    ui::stats_table(&[
                        ("Edges", stats.edges.to_string()),
                        ("Referencing entities", stats.referencing_entities.to_string()),
                        ("Referenced entities", stats.referenced_entities.to_string()),
                        ("Fields", stats.fields.to_string()),
                    ])
                );
            }
        }

        Commands::Edges { from, to, field } => {
            if from.is_none() && to.is_none() {
                anyhow::bail!("pass --from and/or --to");
            }

            let filter = edge_filter(from.as_ref(), to.as_ref(), field);
            let store = open_existing(&database)?;
            let edges = store.query_matching(&filter)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&edges)?);
            } else if edges.is_empty() {
                ui::warn("No matching edges");
            } else {
                ui::header(Icons::LINK, &format!("{} edges", edges.len()));
                println!("{}", ui::edges_table(&edges));
            }
        }

        Commands::Purge { entity_type, bundle } => {
            let store = open_existing(&database)?;
            let purged = purge_edges(&store, &entity_type, bundle.as_deref())?;
            report_removed(cli.json, "purged", purged)?;
        }

        Commands::Sever { key } => {
            let store = open_existing(&database)?;
            let severed = sever_edges(&store, &key.entity_type, &key.bundle, key.entity_id)?;
            report_removed(cli.json, "severed", severed)?;
        }
    }

    Ok(())
}

/// --database, then the config file, then the default path
fn resolve_database(flag: Option<&Path>, config: &ReftreeConfig) -> PathBuf {
    flag.map(Path::to_path_buf)
        .or_else(|| config.database.as_ref().map(PathBuf::from))
        .unwrap_or_else(config::default_database_path)
}

fn open_existing(database: &Path) -> anyhow::Result<SqliteStore> {
    if !database.exists() {
        anyhow::bail!(
            "database {} does not exist (run `reftree init` first)",
            database.display()
        );
    }
    Ok(SqliteStore::open(database)?)
}

/// Keys without `@version` match every version of the entity
fn edge_filter(from: Option<&EntityKey>, to: Option<&EntityKey>, field: Option<String>) -> EdgeFilter {
    let mut filter = match from {
        Some(key) if key.version_id != UNVERSIONED => EdgeFilter::referencing(key),
        Some(key) => EdgeFilter::referencing_entity(key),
        None => EdgeFilter::new(),
    };

    if let Some(key) = to {
        if key.version_id != UNVERSIONED {
            filter = filter.referenced(key);
        } else {
            filter.referenced_entity_type = Some(key.entity_type.clone());
            filter.referenced_entity_bundle = Some(key.bundle.clone());
            filter.referenced_entity_id = Some(key.entity_id);
        }
    }

    match field {
        Some(field) => filter.field(field),
        None => filter,
    }
}

fn report_removed(as_json: bool, action: &str, count: usize) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&json!({ action: count }))?);
    } else if count == 0 {
        ui::warn("No edges matched");
    } else {
        ui::success(&format!("{} {} edges", Icons::DEL, count));
        ui::summary_row("Action:", action);
    }
    Ok(())
}
