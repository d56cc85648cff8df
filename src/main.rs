//! CLI entry point for the hotel-listing harvester.

use anyhow::Result;
use clap::Parser;
use harvester_core::{AppContext, Config, ShutdownSignal};
use tracing::{debug, info, warn};

mod cli;
mod progress_ui;

use cli::Args;
use progress_ui::spawn_progress_ui;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("harvester starting");

    let mut config = Config::load()?;
    if let Some(data_root) = args.data_root {
        config.images_root = data_root.join("images");
        config.logs_root = data_root.join("logs");
        config.data_root = data_root;
    }
    if let Some(images_root) = args.images_root {
        config.images_root = images_root;
    }
    config.validate()?;

    let ctx = AppContext::bootstrap(config).await?;

    for url in &args.urls {
        let q_id = ctx.queue.enqueue(url, None).await?;
        debug!(url = %url, q_id, "enqueued url");
    }

    let shutdown = ShutdownSignal::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal, finishing in-flight listings");
            ctrl_c_shutdown.cancel();
        }
    });

    let (progress_handle, progress_stop) = spawn_progress_ui(args.progress, ctx.dispatcher.stats());

    if let Some(ticks) = args.ticks {
        run_bounded(&ctx, ticks, shutdown).await;
    } else if args.until_empty {
        run_until_empty(&ctx, shutdown).await;
    } else {
        ctx.dispatcher.run(shutdown).await;
    }

    progress_stop.store(true, std::sync::atomic::Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let snapshot = ctx.dispatcher.stats().snapshot();
    info!(
        dispatched = snapshot.total_dispatched,
        completed = snapshot.total_completed,
        failed = snapshot.total_failed,
        lang_mismatches = snapshot.lang_mismatch_count,
        "harvester stopped"
    );

    Ok(())
}

/// Runs the dispatcher loop directly for scripted/CI use, stopping once
/// nothing is pending and nothing is in flight instead of polling forever.
async fn run_until_empty(ctx: &AppContext, shutdown: ShutdownSignal) {
    let stop_watcher = shutdown.clone();
    let queue = ctx.queue.clone();
    let stats = ctx.dispatcher.stats();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            let pending = queue.count_by_status(harvester_core::ListingStatus::Pending).await.unwrap_or(1);
            let processing = stats.snapshot().currently_processing;
            if pending == 0 && processing == 0 {
                stop_watcher.cancel();
                break;
            }
            if stop_watcher.is_cancelled() {
                break;
            }
        }
    });
    ctx.dispatcher.run(shutdown).await;
}

/// Runs a fixed number of dispatch ticks for scripted/one-shot invocations,
/// then lets in-flight workers finish before returning.
async fn run_bounded(ctx: &AppContext, ticks: u32, shutdown: ShutdownSignal) {
    if ticks == 0 {
        warn!("--ticks 0 requested, dispatcher will stop after its warmup delay");
    }
    let poll_interval = ctx.config.dispatcher_poll_interval;
    let bound_shutdown = shutdown.clone();
    tokio::spawn(async move {
        for _ in 0..ticks {
            if bound_shutdown.is_cancelled() {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
        bound_shutdown.cancel();
    });
    ctx.dispatcher.run(shutdown).await;
}
