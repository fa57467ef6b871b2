pub mod config;
pub mod logging;

pub mod checksum;
pub mod downloader;
pub mod fetch;
pub mod launch;
pub mod naming;
pub mod observer;
pub mod orchestrator;
pub mod ranker;
pub mod resolver;
pub mod retry;
pub mod segmenter;
pub mod state;
pub mod storage;
pub mod verify;
pub mod worker;

pub use downloader::Downloader;
pub use orchestrator::{Destination, MultiSourceDownloader};
pub use state::{DownloadState, VerifyState};
pub use verify::VerifyingDownloader;
