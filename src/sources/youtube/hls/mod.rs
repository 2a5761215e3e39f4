pub mod parser;
pub mod resolver;
pub mod streamer;
pub mod types;
pub mod utils;

pub use streamer::HlsStreamer;
