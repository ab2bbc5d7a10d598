//! Gallery Scanner CLI
//!
//! Scans an image directory through the coordinator and maintains the
//! metadata cache.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use gallery_scanner::{
    MetadataStore, ProgressReporter, RecordFilter, ScanConfig, ScanCoordinator, ScanError,
    ScanReport, SizeClass, SortMode, TaskState,
};

/// Incremental image directory scanner
#[derive(Parser)]
#[command(name = "gallery_scanner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory for images
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Walk subdirectories as well
        #[arg(short = 'r', long)]
        recursive: bool,

        /// Metadata cache file (defaults to the per-user data directory)
        #[arg(short = 'd', long)]
        db: Option<PathBuf>,

        /// JSON config file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Worker threads (overrides the config file)
        #[arg(short = 't', long)]
        threads: Option<usize>,

        /// Ordering of the printed images
        #[arg(long, default_value = "name")]
        sort: SortMode,

        /// Only list images whose file name contains this text
        #[arg(long)]
        search: Option<String>,

        /// Only list images with this extension
        #[arg(long)]
        format: Option<String>,

        /// Only list small (<100 KiB), medium or large (>1 MiB) images
        #[arg(long)]
        size: Option<SizeClass>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Stream batch events to stderr as JSON lines
        #[arg(long)]
        progress: bool,

        /// Include the records themselves in progress lines
        #[arg(long, requires = "progress")]
        progress_items: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "3600")]
        timeout_secs: u64,
    },

    /// Inspect or maintain the metadata cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Metadata cache file (defaults to the per-user data directory)
        #[arg(short = 'd', long, global = true)]
        db: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show the number of cached entries
    Stats,
    /// Remove every cached entry
    Clear,
    /// Remove entries whose file no longer exists
    Prune,
}

fn main() -> ExitCode {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Scan {
            dir,
            recursive,
            db,
            config,
            threads,
            sort,
            search,
            format,
            size,
            json,
            progress,
            progress_items,
            timeout_secs,
        } => {
            let mut filter = RecordFilter::new();
            if let Some(text) = search {
                filter = filter.with_search(&text);
            }
            if let Some(ext) = format {
                filter = filter.with_format(&ext);
            }
            if let Some(class) = size {
                filter = filter.with_size(class);
            }
            let opts = ScanOptions {
                recursive,
                sort,
                filter,
                json,
                progress,
                progress_items,
                timeout: Duration::from_secs(timeout_secs),
            };
            load_config(config.as_deref(), db, threads).and_then(|c| run_scan(&dir, c, opts))
        }
        Commands::Cache { action, db } => run_cache(action, db),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

struct ScanOptions {
    recursive: bool,
    sort: SortMode,
    filter: RecordFilter,
    json: bool,
    progress: bool,
    progress_items: bool,
    timeout: Duration,
}

fn load_config(
    path: Option<&Path>,
    db: Option<PathBuf>,
    threads: Option<usize>,
) -> Result<ScanConfig, ScanError> {
    let mut config = match path {
        Some(path) => ScanConfig::from_json_file(path)?,
        None => ScanConfig::default(),
    };
    if let Some(db) = db {
        config.db_path = Some(db);
    }
    if let Some(threads) = threads {
        config.num_threads = threads;
    }
    config.validate()?;
    Ok(config)
}

fn open_store(db: Option<PathBuf>) -> Result<MetadataStore, ScanError> {
    match db {
        Some(path) => MetadataStore::open(&path),
        None => MetadataStore::open_default(),
    }
}

fn run_scan(dir: &Path, config: ScanConfig, opts: ScanOptions) -> Result<(), ScanError> {
    info!("Directory: {}", dir.display());
    info!("Recursive: {}", opts.recursive);
    info!("Threads: {}", config.num_threads);

    let store = Arc::new(open_store(config.effective_db_path())?);
    let reporter = ProgressReporter::new(opts.progress, opts.progress_items);
    let mut coordinator = ScanCoordinator::new(config, store, reporter)?;

    let scan_id = coordinator.start_scan(dir, opts.recursive);
    if !coordinator.wait_for_current(opts.timeout) {
        coordinator.abort_current();
        return Err(ScanError::io_error(
            Some(dir.to_path_buf()),
            format!("scan did not finish within {}s", opts.timeout.as_secs()),
        ));
    }

    let total_images = coordinator.image_count();
    let mut images = opts.filter.apply(coordinator.records().to_vec());
    opts.sort.sort(&mut images);
    let report = ScanReport {
        scan_id,
        directory: dir.to_string_lossy().to_string(),
        recursive: opts.recursive,
        state: coordinator.last_state().unwrap_or(TaskState::Completed),
        total_images,
        matched_images: images.len(),
        stats: coordinator.last_stats().cloned().unwrap_or_default(),
        images,
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Scan completed:");
        println!("  Images: {}", report.total_images);
        if !opts.filter.is_empty() {
            println!("  Matching filter: {}", report.matched_images);
        }
        println!("  Cache hits: {}", report.stats.cache_hits);
        println!("  Decoded: {}", report.stats.cache_misses);
        println!("  Skipped: {}", report.stats.skipped);
        println!("  Duration: {}ms", report.stats.duration_ms);
        for image in &report.images {
            println!("  {}x{}\t{}", image.width, image.height, image.path);
        }
    }
    Ok(())
}

fn run_cache(action: CacheAction, db: Option<PathBuf>) -> Result<(), ScanError> {
    let store = open_store(db)?;
    match action {
        CacheAction::Stats => {
            if let Some(path) = store.path() {
                println!("Cache file: {}", path.display());
            }
            println!("Entries: {}", store.record_count()?);
        }
        CacheAction::Clear => println!("Removed {} entries", store.clear()?),
        CacheAction::Prune => println!("Pruned {} stale entries", store.prune_missing()?),
    }
    Ok(())
}
