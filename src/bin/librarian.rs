//! librarian CLI
//!
//! Initializes, updates and searches a document library.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use librarian::index::query::{Query, SearchOptions};
use librarian::index::store::IndexStore;
use librarian::library::Library;
use librarian::sync::{Pipeline, SyncReport};
use librarian::tree::diff::ChangeOperation;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "librarian")]
#[command(about = "Index and search a library of documents")]
#[command(version)]
struct Cli {
    /// Path to the library (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    path: String,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize folder as library
    Init,

    /// Update the index
    Update {
        /// Print pending changes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Purge index
    Purge {
        /// Write an empty snapshot so the next update reindexes everything
        #[arg(long)]
        reset: bool,

        /// Remove a lock left by a run that did not exit cleanly
        #[arg(long)]
        force: bool,
    },

    /// Display library or file information
    Info {
        /// Document path relative to the library root
        name: Option<String>,
    },

    /// Search for documents
    Search {
        #[arg(required = true)]
        query: Vec<String>,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let path = expand_home(&cli.path);

    match cli.command {
        Commands::Init => cmd_init(&path),
        Commands::Update { dry_run } => cmd_update(&path, dry_run).await,
        Commands::Purge { reset, force } => cmd_purge(&path, reset, force),
        Commands::Info { name } => cmd_info(&path, name.as_deref()).await,
        Commands::Search { query, limit } => cmd_search(&path, &query.join(" "), limit).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

/// Expands a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(path),
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    let library = Library::init(path).context("Failed to initialize library")?;
    println!("✓ Initialized library directory {}", library.root.display());
    Ok(())
}

async fn cmd_update(path: &Path, dry_run: bool) -> Result<()> {
    let library = Library::find_root(path)?;
    let index = library.open_index().await?;
    let mut pipeline = Pipeline::new(&library, &index)?;

    if dry_run {
        let ops = pipeline.plan().await?;
        for op in &ops {
            match op {
                ChangeOperation::Move { from, entry } => {
                    println!("  move   {} -> {}", from, entry.relative_path)
                }
                other => println!("  {:<6} {}", other.kind(), other.path()),
            }
        }
        println!("{} pending change(s)", ops.len());
        index.close().await;
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = pipeline.run_with_cancel(&cancel).await;
    index.close().await;

    let report = result.context("Update failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("✓ Library updated");
    println!("  Created:  {}", report.created);
    println!("  Updated:  {}", report.updated);
    println!("  Removed:  {}", report.removed);
    println!("  Moved:    {}", report.moved);
    println!("  Failed:   {}", report.failed);
    for failure in &report.failures {
        println!(
            "    {} {}: {}",
            failure.operation, failure.path, failure.reason
        );
    }
    if !report.unreadable.is_empty() {
        println!("  Unreadable, contents dropped from the index:");
        for path in &report.unreadable {
            println!("    {path}");
        }
    }
}

fn cmd_purge(path: &Path, reset: bool, force: bool) -> Result<()> {
    let library = Library::find_root(path)?;
    let removed = library.purge(reset, force)?;
    for file in &removed {
        println!("  removed {}", file.display());
    }
    println!("✓ Purged library index");
    Ok(())
}

async fn cmd_info(path: &Path, name: Option<&str>) -> Result<()> {
    let library = Library::find_root(path)?;
    let index = library.open_index().await?;

    match name {
        Some(name) => match index.get(name).await? {
            Some(doc) => {
                println!("{}", doc.path);
                println!("  Filename:  {}", doc.filename);
                println!("  Extension: {}", doc.extension);
                println!("  Size:      {} bytes", doc.size);
                println!("  Modified:  {}", doc.last_modified);
                if !doc.hash.is_empty() {
                    println!("  Hash:      {}", doc.hash);
                }
                println!("  Text:      {} bytes", doc.text.len());
            }
            None => println!("{name} is not indexed"),
        },
        None => {
            let info = library.info()?;
            println!("Library {}", info.root.display());
            println!("  Config version: {}", info.config.version);
            println!("  Indexed types:  {}", info.config.types.join(", "));
            match (info.files, info.directories, info.total_size) {
                (Some(files), Some(dirs), Some(size)) => {
                    println!("  Files:          {files}");
                    println!("  Directories:    {dirs}");
                    println!("  Total size:     {size} bytes");
                }
                _ => println!("  Not scanned yet (run `librarian update`)"),
            }
            println!("  Documents:      {}", index.count().await?);
            if info.locked {
                println!("  Locked:         yes");
            }
        }
    }

    index.close().await;
    Ok(())
}

async fn cmd_search(path: &Path, query: &str, limit: u32) -> Result<()> {
    let library = Library::find_root(path)?;
    let index = library.open_index().await?;
    let options = SearchOptions {
        limit: Some(limit),
        ..Default::default()
    };

    let results = Query::new(&index)
        .search_with_options(query, &options)
        .await
        .context("Search failed")?;

    if results.is_empty() {
        println!("No documents match {query:?}");
    }
    for result in &results {
        println!("{}", result.document.path);
        if let Some(snippet) = result.snippet_text.as_deref().filter(|s| !s.is_empty()) {
            println!("    {snippet}");
        }
    }

    index.close().await;
    Ok(())
}
