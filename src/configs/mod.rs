pub mod base;
pub mod logging;
pub mod youtube;

pub use base::*;
pub use logging::*;
pub use youtube::*;
