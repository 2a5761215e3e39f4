pub mod cache;
pub mod common;
pub mod configs;
pub mod sources;

pub use cache::ExpiringCache;
pub use common::errors::{Error, ErrorKind, Result};
pub use sources::youtube::{
    YouTube,
    download::{Download, DownloadEvent, DownloadOptions},
    info::VideoInfo,
};
