//! `msd probe <url>`: HEAD a source and report what it offers.

use anyhow::{Context, Result};
use msd_core::config::TransportConfig;
use msd_core::fetch::{CurlFetcher, RangeFetcher, Source};
use msd_core::naming::derive_final_name;

pub async fn run_probe(url: &str, transport: TransportConfig) -> Result<()> {
    let source = Source::http(url);
    let fetcher = CurlFetcher::new(transport);
    let probe_source = source.clone();
    let info = tokio::task::spawn_blocking(move || fetcher.probe(&probe_source))
        .await?
        .with_context(|| format!("probe {}", url))?;

    let size = info
        .content_length
        .map(|n| n.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("url:           {}", source.uri);
    println!("host:          {}", source.host_key());
    println!("size:          {}", size);
    println!("accept-ranges: {}", if info.accept_ranges { "bytes" } else { "none" });
    println!(
        "file name:     {}",
        derive_final_name(&source.uri, info.content_disposition.as_deref())
    );
    Ok(())
}
