//! In-memory `RangeFetcher` with scripted per-source behaviour and seeded jitter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use msd_core::fetch::{ByteSink, FetchError, ProbeInfo, RangeFetcher, Source};
use msd_core::segmenter::ByteRange;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// How one source (by URI) answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Probe and fetch succeed.
    Serve,
    /// Probe fails.
    Unreachable,
    /// Probe reports no range support.
    NoRanges,
    /// Probe reports a different size.
    WrongSize(u64),
    /// Probe succeeds, every fetch answers with the given status.
    HttpError(u32),
    /// Probe succeeds, fetches return one byte short.
    Truncate,
}

pub struct MemoryFetcher {
    body: Arc<Vec<u8>>,
    behaviour: HashMap<String, Behaviour>,
    jitter_ms: u64,
    rng: Mutex<StdRng>,
    fetches: AtomicUsize,
    probes: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            behaviour: HashMap::new(),
            jitter_ms: 0,
            rng: Mutex::new(StdRng::seed_from_u64(7)),
            fetches: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, uri: &str, behaviour: Behaviour) -> Self {
        self.behaviour.insert(uri.to_string(), behaviour);
        self
    }

    /// Sleep a random 0..=`max_ms` per fetch so completions arrive out of order.
    pub fn with_jitter(mut self, max_ms: u64, seed: u64) -> Self {
        self.jitter_ms = max_ms;
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn behaviour(&self, source: &Source) -> Behaviour {
        self.behaviour.get(&source.uri).copied().unwrap_or(Behaviour::Serve)
    }
}

impl RangeFetcher for MemoryFetcher {
    fn probe(&self, source: &Source) -> Result<ProbeInfo, FetchError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let len = self.body.len() as u64;
        let info = |content_length: u64, accept_ranges: bool| -> Result<ProbeInfo, FetchError> {
            Ok(ProbeInfo {
                content_length: Some(content_length),
                accept_ranges,
                content_disposition: None,
            })
        };
        match self.behaviour(source) {
            Behaviour::Unreachable => Err(FetchError::Unreachable(format!("{} refused", source.uri))),
            Behaviour::NoRanges => info(len, false),
            Behaviour::WrongSize(n) => info(n, true),
            _ => info(len, true),
        }
    }

    fn fetch(&self, source: &Source, range: ByteRange, sink: &mut ByteSink<'_>) -> Result<u64, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.jitter_ms > 0 {
            let ms = self.rng.lock().unwrap().random_range(0..=self.jitter_ms);
            std::thread::sleep(Duration::from_millis(ms));
        }
        let mut end = range.max as usize;
        match self.behaviour(source) {
            Behaviour::HttpError(code) => return Err(FetchError::Http(code)),
            Behaviour::Unreachable => return Err(FetchError::NoResponse),
            Behaviour::Truncate => end -= 1,
            _ => {}
        }
        let slice = &self.body[range.min as usize..=end];
        for chunk in slice.chunks(4096) {
            sink(chunk).map_err(FetchError::Storage)?;
        }
        if slice.len() as u64 != range.len() {
            return Err(FetchError::Truncated {
                expected: range.len(),
                received: slice.len() as u64,
            });
        }
        Ok(range.len())
    }
}
