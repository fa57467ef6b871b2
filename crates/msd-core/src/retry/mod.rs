//! Failure classification and backoff.
//!
//! A worker whose range fails asks this module whether its source is worth
//! another attempt. Transient kinds back off exponentially; persistent kinds
//! (and exhausted attempts) discard the worker.

mod classify;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
