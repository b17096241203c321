mod cli;
mod config;
mod output;

use crate::{
    cli::{Args, Commands, OutputFormat},
    config::AppConfig,
    output::{print_entry, print_status},
};
use anyhow::Result;
use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;
use vigil_engine::{
    HttpEngineFactory, ProbeConfig, ProbeOutcome, StreamOrchestrator, create_client,
    probe_endpoint,
};

const CLIENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("application error: {e}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet)?;

    match args.command {
        Commands::Run {
            primary,
            secondary,
            fallback,
            max_retries,
            retry_delay,
            stall_timeout,
            stall_threshold,
            probe_retry_delay,
            stability_window,
            min_probe_fragments,
            duration,
            output,
        } => {
            let mut config = AppConfig::load(args.config.as_deref())?;

            // Flags override the config file field by field.
            if primary.is_some() {
                config.endpoints.primary = primary;
            }
            if secondary.is_some() {
                config.endpoints.secondary = secondary;
            }
            if fallback.is_some() {
                config.endpoints.fallback = fallback;
            }
            let tuning = &mut config.tuning;
            tuning.max_retries = max_retries.or(tuning.max_retries);
            tuning.retry_delay_secs = retry_delay.or(tuning.retry_delay_secs);
            tuning.stall_timeout_secs = stall_timeout.or(tuning.stall_timeout_secs);
            tuning.stall_threshold = stall_threshold.or(tuning.stall_threshold);
            tuning.probe_retry_delay_secs = probe_retry_delay.or(tuning.probe_retry_delay_secs);
            tuning.stability_window_secs = stability_window.or(tuning.stability_window_secs);
            tuning.min_probe_fragments = min_probe_fragments.or(tuning.min_probe_fragments);

            run_stream(config, duration, output).await
        }

        Commands::Check {
            url,
            stability_window,
            min_fragments,
            output,
        } => check_endpoint(url, stability_window, min_fragments, output).await,

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Args::command();
            let bin_name = cmd.get_name().to_string();
            generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
    }
}

async fn run_stream(
    config: AppConfig,
    duration: Option<u64>,
    output: OutputFormat,
) -> Result<()> {
    let failover = config.into_failover_config()?;
    let client = create_client(CLIENT_CONNECT_TIMEOUT)?;
    let factory = Arc::new(HttpEngineFactory::new(client));

    let handle = StreamOrchestrator::spawn(failover, factory);
    let mut journal_rx = handle.journal().subscribe();
    let mut status_rx = handle.watch_status();

    handle.start().await?;

    let deadline = duration.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted, shutting down");
                break;
            }
            _ = sleep_until_opt(deadline), if deadline.is_some() => {
                break;
            }
            entry = journal_rx.recv() => {
                match entry {
                    Ok(entry) => print_entry(&entry, output),
                    Err(RecvError::Lagged(skipped)) => {
                        eprintln!("journal consumer lagged, {skipped} entries dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status_rx.borrow_and_update().clone();
                print_status(&snapshot, output);
            }
        }
    }

    handle.stop().await.ok();
    handle.shutdown().await;
    Ok(())
}

async fn check_endpoint(
    url: Url,
    stability_window: Option<u64>,
    min_fragments: Option<u32>,
    output: OutputFormat,
) -> Result<()> {
    let mut probe = ProbeConfig::default();
    if let Some(secs) = stability_window {
        probe.stability_window = Duration::from_secs(secs);
    }
    if let Some(count) = min_fragments {
        probe.min_fragments = count;
    }

    let client = create_client(CLIENT_CONNECT_TIMEOUT)?;
    let factory = HttpEngineFactory::new(client);
    let outcome = probe_endpoint(&factory, &url, &probe).await;

    let (verdict, detail) = match &outcome {
        ProbeOutcome::Verified { fragments } => ("verified", format!("{fragments} fragments")),
        ProbeOutcome::InsufficientEvidence { fragments } => {
            ("insufficient", format!("{fragments} fragments"))
        }
        ProbeOutcome::Failed { detail } => ("failed", detail.clone()),
    };

    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "url": url.as_str(), "verdict": verdict, "detail": detail })
            );
        }
        OutputFormat::Pretty => {
            println!("{url}: {verdict} ({detail})");
        }
    }

    if matches!(outcome, ProbeOutcome::Verified { .. }) {
        Ok(())
    } else {
        process::exit(1);
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
    Ok(())
}
