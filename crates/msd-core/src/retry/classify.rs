//! Map fetch failures onto retry error kinds.

use super::policy::ErrorKind;
use crate::fetch::FetchError;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify a fetch error into an ErrorKind.
pub fn classify(e: &FetchError) -> ErrorKind {
    match e {
        FetchError::NoResponse | FetchError::Unreachable(_) => ErrorKind::Connection,
        FetchError::Http(code) => classify_http_status(*code),
        FetchError::ContentRangeMismatch { .. } | FetchError::Truncated { .. } => ErrorKind::Mismatch,
        FetchError::Storage(_) => ErrorKind::Storage,
        FetchError::Transport(ce) => classify_curl_error(ce),
    }
}
