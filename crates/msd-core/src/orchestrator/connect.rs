//! Probe planning and worker admission.

use std::collections::HashMap;

use crate::config::MsdConfig;
use crate::fetch::{HostKey, ProbeInfo, Source};

/// Connections allowed per host for `source`: plain sources share the
/// per-host cap, peers and authenticated sources get one.
fn per_host_cap(source: &Source, config: &MsdConfig) -> usize {
    if source.is_plain() {
        config.max_connections_per_host.max(1)
    } else {
        1
    }
}

/// Expand candidate sources into one entry per probe to issue.
///
/// Sources are visited round-robin so every source gets its first probe
/// before any gets a second. Per-host caps apply across sources on the same
/// host, and the total never exceeds `max_probes`.
pub fn plan_probes(sources: &[Source], config: &MsdConfig) -> Vec<Source> {
    let max_probes = config.max_probes;
    let mut per_host: HashMap<HostKey, usize> = HashMap::new();
    let mut plan = Vec::new();
    let rounds = sources.iter().map(|s| per_host_cap(s, config)).max().unwrap_or(0);

    for round in 0..rounds {
        for source in sources {
            if plan.len() >= max_probes {
                return plan;
            }
            let cap = per_host_cap(source, config);
            if round >= cap {
                continue;
            }
            let used = per_host.entry(source.host_key()).or_insert(0);
            if *used >= cap {
                continue;
            }
            *used += 1;
            plan.push(source.clone());
        }
    }
    plan
}

/// Why a probe success was not turned into a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decline {
    NotRunning,
    SizeUnknown,
    SizeMismatch { expected: u64, reported: u64 },
    NoRangeSupport,
    AllChunksCovered,
    ConnectionCeiling,
    Storage(String),
}

impl std::fmt::Display for Decline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decline::NotRunning => f.write_str("download is not running"),
            Decline::SizeUnknown => f.write_str("source did not report a size"),
            Decline::SizeMismatch { expected, reported } => {
                write!(f, "source reports {reported} bytes, expected {expected}")
            }
            Decline::NoRangeSupport => f.write_str("source does not accept byte ranges"),
            Decline::AllChunksCovered => f.write_str("every chunk already has a worker"),
            Decline::ConnectionCeiling => f.write_str("connection ceiling reached"),
            Decline::Storage(e) => write!(f, "could not create download file: {e}"),
        }
    }
}

/// Check a probe against an existing session of `size` bytes in `num_chunks` chunks.
pub(crate) fn check_probe(info: &ProbeInfo, size: u64, num_chunks: usize) -> Result<(), Decline> {
    if let Some(reported) = info.content_length {
        if reported != size {
            return Err(Decline::SizeMismatch { expected: size, reported });
        }
    }
    if !info.accept_ranges && num_chunks > 1 {
        return Err(Decline::NoRangeSupport);
    }
    Ok(())
}
