//! Minimal HTTP/1.1 server that answers HEAD and ranged GET for integration tests.
//!
//! Serves one static body at every path. Each `start` call binds its own port,
//! so several servers give distinct hosts for multi-source downloads.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// Answer 206 with a Content-Range shifted one byte from the request.
    pub shift_content_range: bool,
    /// Answer the first N GETs with 503.
    pub fail_first_gets: usize,
    /// Sent as `Content-Disposition` on HEAD.
    pub content_disposition: Option<&'static str>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            advertise_ranges: true,
            shift_content_range: false,
            fail_first_gets: 0,
            content_disposition: None,
        }
    }
}

pub struct RangeServer {
    pub base: String,
    gets: Arc<AtomicUsize>,
}

impl RangeServer {
    /// URL of `name` on this server.
    pub fn url(&self, name: &str) -> String {
        format!("{}{}", self.base, name)
    }

    /// GET requests seen so far.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

pub fn start(body: Arc<Vec<u8>>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Arc<Vec<u8>>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let gets = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&gets);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let counter = Arc::clone(&counter);
            thread::spawn(move || handle(stream, &body, opts, &counter));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{}/", port),
        gets,
    }
}

fn read_head(stream: &mut TcpStream) -> Option<String> {
    let mut head = Vec::new();
    let mut buf = [0u8; 4096];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return None,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
        if head.len() > 64 * 1024 {
            return None;
        }
    }
    String::from_utf8(head).ok()
}

fn handle(mut stream: TcpStream, body: &[u8], opts: RangeServerOptions, gets: &AtomicUsize) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_head(&mut stream) else {
        return;
    };
    let (method, range) = parse_request(&request);
    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges && opts.support_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        let disposition = opts
            .content_disposition
            .map(|d| format!("Content-Disposition: {}\r\n", d))
            .unwrap_or_default();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}{}Connection: close\r\n\r\n",
            total, accept_ranges, disposition
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\n\r\n");
        return;
    }

    let seen = gets.fetch_add(1, Ordering::SeqCst);
    if seen < opts.fail_first_gets {
        let _ = stream.write_all(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }

    let (status, content_range, slice) = match range.filter(|_| opts.support_ranges) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                ("416 Range Not Satisfiable", format!("bytes */{}", total), &body[0..0])
            } else {
                let shift = u64::from(opts.shift_content_range);
                (
                    "206 Partial Content",
                    format!("bytes {}-{}/{}", start + shift, end_incl + shift, total),
                    &body[start as usize..=end_incl as usize],
                )
            }
        }
        None => ("200 OK", format!("bytes 0-{}/{}", total.saturating_sub(1), total), body),
    };
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Range: {}\r\n{}Connection: close\r\n\r\n",
        status,
        slice.len(),
        content_range,
        accept_ranges
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(slice);
}

/// Returns (method, optional (start, end_inclusive) for `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut lines = request.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or("");
    let mut range = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("range") {
            continue;
        }
        let value = value.trim();
        if let Some(bytes) = value.strip_prefix("bytes=") {
            if let Some((a, b)) = bytes.split_once('-') {
                let start = a.trim().parse::<u64>().unwrap_or(0);
                let end = b.trim().parse::<u64>().unwrap_or(u64::MAX);
                range = Some((start, end));
            }
        }
    }
    (method, range)
}
