pub mod common;
pub mod video_info;
pub mod watch_html;
pub mod watch_json;

use std::sync::Arc;

pub use common::SourceContext;
pub use video_info::VideoInfoSource;
pub use watch_html::WatchHtmlSource;
pub use watch_json::WatchJsonSource;

use super::pipeline::InfoSource;

/// The metadata sources in the order they are tried.
pub fn default_sources(ctx: Arc<SourceContext>) -> Vec<Arc<dyn InfoSource>> {
    vec![
        Arc::new(WatchHtmlSource::new(ctx.clone())),
        Arc::new(WatchJsonSource::new(ctx.clone())),
        Arc::new(VideoInfoSource::new(ctx)),
    ]
}
