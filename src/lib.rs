//! sharelist - indexer for shared directories
//!
//! Keeps an in-memory tree of every shared file with its BLAKE3 content hash,
//! refreshed periodically from disk, and mirrors the listings advertised by
//! remote peers in the same structure.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod listing;
pub mod logging;
pub mod output;
pub mod scanner;
pub mod shares;
pub mod signal;
pub mod storage;
pub mod updater;

use anyhow::{bail, Context, Result};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cli::{Cli, Commands, IngestArgs, OutputFormat, ScanArgs, WatchArgs};
use config::Config;
use error::ExitCode;
use listing::{DirListingSource, ListingRecord, ListingSource, PeerId};
use output::{JsonOutput, ListingSummary, TextOutput};
use shares::Shares;
use signal::ShutdownHandler;
use updater::{DirectoryUpdater, RemoteDirectoryUpdater};

const HASH_WAIT_SLICE: Duration = Duration::from_millis(200);

/// Run the command selected on the command line.
///
/// # Errors
///
/// Returns an error if configuration is invalid, a share cannot be set up or
/// output cannot be written. Unreadable paths only lower the exit code to
/// [`ExitCode::PartialSuccess`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let config = Config::load(cli.config.as_deref())?;
    let handler = signal::install_handler()?;

    match cli.command {
        Commands::Scan(args) => run_scan(config, args, &handler),
        Commands::Watch(args) => run_watch(config, args, &handler),
        Commands::Ingest(args) => run_ingest(&config, &args),
    }
}

fn run_scan(mut config: Config, args: ScanArgs, handler: &ShutdownHandler) -> Result<ExitCode> {
    let started = Instant::now();
    args.overrides.apply(&mut config);
    config.share_roots = args.roots;
    config.validate()?;

    let shares = Shares::new(&config, handler.get_flag())?;
    let report = shares.tick_all();

    let deadline = started.checked_add(Duration::from_secs(args.hash_timeout));
    let mut hashed = false;
    while !handler.is_shutdown_requested() && deadline.is_none_or(|d| Instant::now() < d) {
        if shares.wait_for_hashes(HASH_WAIT_SLICE) {
            hashed = true;
            break;
        }
    }
    if !hashed && !handler.is_shutdown_requested() {
        log::warn!("Timed out waiting for hashes; the listing is incomplete");
    }

    let stats = shares.cache_stats();
    let interrupted = handler.is_shutdown_requested();
    let exit_code = if interrupted {
        ExitCode::Interrupted
    } else if report.unreadable > 0 || stats.failures > 0 || !hashed {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    };

    let records = shares.export_local_listing();
    let summary = ListingSummary::new(&records, &report, started.elapsed())
        .with_cache_stats(&stats)
        .interrupted(interrupted);
    print_listing(args.output, &records, &summary, exit_code)?;
    Ok(exit_code)
}

fn run_watch(mut config: Config, args: WatchArgs, handler: &ShutdownHandler) -> Result<ExitCode> {
    args.overrides.apply(&mut config);
    if !args.roots.is_empty() {
        config.share_roots = args.roots.clone();
    }
    if args.data_dir.is_some() {
        config.data_dir = args.data_dir.clone();
    }
    config.validate()?;
    if config.share_roots.is_empty() && args.peers.is_empty() {
        bail!("Nothing to watch: no share roots configured and no peers given");
    }

    let data_dir = if args.no_persist {
        None
    } else {
        Some(
            config
                .data_dir()
                .context("No data directory available; pass --data-dir or --no-persist")?,
        )
    };

    let mut shares = Shares::new(&config, handler.get_flag())?;
    if let Some(dir) = &args.listing_dir {
        let source: Arc<dyn ListingSource> = Arc::new(DirListingSource::new(dir.clone()));
        for peer in &args.peers {
            shares.add_remote_peer(PeerId::from(peer.as_str()), Arc::clone(&source))?;
        }
    }
    if let Some(dir) = &data_dir {
        let restored = shares.load(dir)?;
        log::info!("Restored {} snapshots from {}", restored, dir.display());
    }

    shares.start()?;
    log::info!(
        "Watching {} shares and {} peers; press Ctrl+C to stop",
        shares.share_names().len(),
        args.peers.len()
    );

    let publisher = match (&args.publish_as, &args.listing_dir) {
        (Some(id), Some(dir)) => Some((PeerId::from(id.as_str()), DirListingSource::new(dir.clone()))),
        _ => None,
    };
    let interval = config.local_updater_config().scan_interval;
    while !handler.wait_for_shutdown(interval) {
        if let Some((id, source)) = &publisher {
            let records = shares.export_local_listing();
            match source.publish(id, &records) {
                Ok(()) => log::debug!("Published {} records as {}", records.len(), id),
                Err(e) => log::warn!("Failed to publish listing: {:#}", e),
            }
        }
    }

    shares.stop();
    if let Some(dir) = &data_dir {
        shares.save(dir)?;
    }
    Ok(ExitCode::Interrupted)
}

fn run_ingest(config: &Config, args: &IngestArgs) -> Result<ExitCode> {
    let started = Instant::now();
    let peer = PeerId::from(args.peer.as_str());
    let source = Arc::new(DirListingSource::new(args.listing_dir.clone()));
    let updater = RemoteDirectoryUpdater::new(peer.clone(), source, config.remote_interval());

    let report = updater.tick();
    if report.fetch_failed {
        bail!("Could not fetch the listing of peer {peer}");
    }

    let exit_code = if report.malformed > 0 {
        ExitCode::PartialSuccess
    } else {
        ExitCode::Success
    };
    let records = updater.storage().export_listing();
    let summary = ListingSummary::new(&records, &report, started.elapsed());
    print_listing(args.output, &records, &summary, exit_code)?;
    Ok(exit_code)
}

fn print_listing(
    format: OutputFormat,
    records: &[ListingRecord],
    summary: &ListingSummary,
    exit_code: ExitCode,
) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Text => TextOutput::new(records, summary)
            .write_to(&mut out)
            .context("Failed to write listing")?,
        OutputFormat::Json => JsonOutput::new(records, summary, exit_code)
            .write_to(&mut out, true)
            .context("Failed to write listing")?,
    }
    Ok(())
}
