//! `msd get`: multi-source download with optional in-order streaming to stdout.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use msd_core::checksum::ExpectedDigest;
use msd_core::config::MsdConfig;
use msd_core::fetch::{CurlFetcher, RangeFetcher, Source};
use msd_core::orchestrator::ProgressStats;
use msd_core::resolver::StaticSources;
use msd_core::{Destination, Downloader, MultiSourceDownloader, VerifyState, VerifyingDownloader};

use crate::cli::GetArgs;

const POLL: Duration = Duration::from_millis(250);
const REPORT_EVERY: Duration = Duration::from_secs(2);

pub async fn run_get(args: GetArgs, cfg: MsdConfig) -> Result<()> {
    tokio::task::spawn_blocking(move || get_blocking(args, cfg)).await?
}

/// Sources from positional URLs then `--peer` entries.
pub(crate) fn collect_sources(args: &GetArgs) -> Vec<Source> {
    args.urls
        .iter()
        .map(Source::http)
        .chain(args.peers.iter().map(Source::peer))
        .collect()
}

/// An existing directory (or no path) means "name the file from the source".
pub(crate) fn destination_for(output: Option<PathBuf>) -> Result<Destination> {
    Ok(match output {
        Some(p) if p.is_dir() => Destination::Dir(p),
        Some(p) => Destination::File(p),
        None => Destination::Dir(std::env::current_dir()?),
    })
}

fn get_blocking(args: GetArgs, cfg: MsdConfig) -> Result<()> {
    let sources = collect_sources(&args);
    if sources.is_empty() {
        bail!("no sources given");
    }
    let digest = args.digest.as_deref().map(ExpectedDigest::parse).transpose()?;

    let mut resolver = StaticSources::new(sources);
    if let Some(size) = args.size {
        resolver = resolver.with_size(size);
    }
    if let Some(d) = digest {
        resolver = resolver.with_digest(d);
    }

    let fetcher: Arc<dyn RangeFetcher> = Arc::new(CurlFetcher::new(cfg.transport.clone().unwrap_or_default()));
    let destination = destination_for(args.output)?;
    let download = MultiSourceDownloader::new(resolver, fetcher, destination, cfg);
    let progress = download.clone();
    let verifier = VerifyingDownloader::new(download, None, args.size);
    verifier.add_listener(Arc::new(|s: &VerifyState| {
        if !matches!(s, VerifyState::Downloading(_)) {
            tracing::info!(state = %s, "state changed");
        }
    }));

    verifier.start();

    if args.stream {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        match verifier.write(&mut out, true) {
            Ok(n) => tracing::debug!(bytes = n, "stream finished"),
            Err(e) => tracing::warn!(error = %e, "stream ended early"),
        }
    }

    let mut last_report = Instant::now();
    let state = loop {
        let state = verifier.state();
        if state.is_terminal() {
            break state;
        }
        if last_report.elapsed() >= REPORT_EVERY {
            eprintln!("{}", format_progress(&progress.progress()));
            last_report = Instant::now();
        }
        thread::sleep(POLL);
    };

    match state {
        VerifyState::Verified => {
            eprintln!("{}", verifier.complete_file().display());
            Ok(())
        }
        other => bail!("download did not complete: {}", other),
    }
}

/// One status line, e.g. `42.0%  1.2 MiB/s  3 sources  eta 10s`.
pub(crate) fn format_progress(p: &ProgressStats) -> String {
    let pct = p
        .fraction()
        .map(|f| format!("{:.1}%", f * 100.0))
        .unwrap_or_else(|| format!("{} B", p.bytes_done));
    let rate = p.bytes_per_sec() / (1024.0 * 1024.0);
    let eta = p
        .eta_secs()
        .map(|s| format!("  eta {:.0}s", s))
        .unwrap_or_default();
    format!("{}  {:.1} MiB/s  {} sources{}", pct, rate, p.active_sources, eta)
}
