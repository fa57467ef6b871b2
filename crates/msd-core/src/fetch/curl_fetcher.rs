//! libcurl implementation of the range-fetch boundary.

use std::cell::RefCell;
use std::str;
use std::time::Duration;

use curl::easy::Easy;

use super::parse::{check_range_response, parse_probe_headers};
use super::{ByteSink, FetchError, ProbeInfo, RangeFetcher, Source};
use crate::config::TransportConfig;
use crate::segmenter::ByteRange;

/// `RangeFetcher` over blocking curl Easy handles, one per call.
///
/// Callers run it on worker threads; never call from async code directly.
#[derive(Debug, Clone, Default)]
pub struct CurlFetcher {
    config: TransportConfig,
}

impl CurlFetcher {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    fn easy_for(&self, source: &Source) -> Result<Easy, FetchError> {
        let mut easy = Easy::new();
        easy.url(&source.uri)?;
        easy.follow_location(true)?;
        easy.useragent(concat!("msd/", env!("CARGO_PKG_VERSION")))?;
        easy.connect_timeout(Duration::from_secs(self.config.connect_timeout_secs))?;
        if let Some(creds) = &source.credentials {
            easy.username(&creds.username)?;
            easy.password(&creds.password)?;
        }
        Ok(easy)
    }
}

/// Append one raw header line, dropping the CRLF. A status line begins a new block.
fn collect_header(lines: &mut Vec<String>, data: &[u8]) {
    if let Ok(s) = str::from_utf8(data) {
        let s = s.trim_end();
        if !s.is_empty() {
            lines.push(s.to_string());
        }
    }
}

fn map_curl_error(e: curl::Error) -> FetchError {
    if e.is_couldnt_connect() || e.is_couldnt_resolve_host() || e.is_couldnt_resolve_proxy() {
        FetchError::Unreachable(e.to_string())
    } else if e.is_got_nothing() {
        FetchError::NoResponse
    } else {
        FetchError::Transport(e)
    }
}

impl RangeFetcher for CurlFetcher {
    fn probe(&self, source: &Source) -> Result<ProbeInfo, FetchError> {
        let mut easy = self.easy_for(source)?;
        easy.nobody(true)?;
        easy.timeout(Duration::from_secs(self.config.probe_timeout_secs))?;

        let mut lines: Vec<String> = Vec::new();
        {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                collect_header(&mut lines, data);
                true
            })?;
            transfer.perform().map_err(map_curl_error)?;
        }

        let code = easy.response_code()?;
        if code == 0 {
            return Err(FetchError::NoResponse);
        }
        if !(200..300).contains(&code) {
            return Err(FetchError::Http(code));
        }
        Ok(parse_probe_headers(&lines))
    }

    fn fetch(&self, source: &Source, range: ByteRange, sink: &mut ByteSink<'_>) -> Result<u64, FetchError> {
        let mut easy = self.easy_for(source)?;
        easy.range(&range.curl_range())?;
        // Abort stalled transfers instead of a wall-clock timeout so large ranges on slow links survive.
        easy.low_speed_limit(self.config.low_speed_limit)?;
        easy.low_speed_time(Duration::from_secs(self.config.low_speed_time_secs))?;
        if let Some(cap) = self.config.max_recv_speed {
            easy.max_recv_speed(cap)?;
        }
        if let Some(size) = self.config.buffer_size {
            easy.buffer_size(size)?;
        }

        let expected = range.len();
        let lines: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let mut checked = false;
        let mut received = 0u64;
        let mut failure: Option<FetchError> = None;

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                collect_header(&mut lines.borrow_mut(), data);
                true
            })?;
            transfer.write_function(|data| {
                if !checked {
                    checked = true;
                    if let Err(e) = check_range_response(&lines.borrow(), range) {
                        failure = Some(e);
                        return Ok(0);
                    }
                }
                received += data.len() as u64;
                if received > expected {
                    failure = Some(FetchError::Truncated { expected, received });
                    return Ok(0);
                }
                match sink(data) {
                    Ok(()) => Ok(data.len()),
                    Err(e) => {
                        failure = Some(FetchError::Storage(e));
                        Ok(0)
                    }
                }
            })?;
            transfer.perform()
        };

        // A failure recorded by the callbacks explains the write error curl reports.
        if let Some(e) = failure {
            return Err(e);
        }
        performed.map_err(map_curl_error)?;
        if !checked {
            check_range_response(&lines.borrow(), range)?;
        }
        if received != expected {
            return Err(FetchError::Truncated { expected, received });
        }
        Ok(received)
    }
}
