#![allow(dead_code)]

pub mod memory;
pub mod range_server;

use std::sync::{Arc, Mutex};

use msd_core::observer::Listener;

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Listener that records every state it is given.
pub fn recorder<S: Clone + Send + 'static>() -> (Arc<Mutex<Vec<S>>>, Listener<S>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    (seen, Arc::new(move |st: &S| s.lock().unwrap().push(st.clone())))
}

use std::time::{Duration, Instant};

use msd_core::config::{MsdConfig, RetryConfig};
use msd_core::Downloader;

/// Config with short waits so tests finish quickly.
pub fn fast_config() -> MsdConfig {
    MsdConfig {
        drain_timeout_secs: 5,
        wait_slice_millis: 20,
        retry: Some(RetryConfig {
            max_attempts: 3,
            base_delay_secs: 0.01,
            max_delay_secs: 1,
        }),
        ..MsdConfig::default()
    }
}

/// Poll `d` until its state satisfies `done` or `timeout` passes; returns the last state.
pub fn wait_for<D: Downloader>(d: &D, timeout: Duration, done: impl Fn(&D::State) -> bool) -> D::State {
    let deadline = Instant::now() + timeout;
    loop {
        let state = d.state();
        if done(&state) || Instant::now() >= deadline {
            return state;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Distinct-host source URIs.
pub fn mirror_uris(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("http://mirror{i}.test/pool/payload.bin"))
        .collect()
}
