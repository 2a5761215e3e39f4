pub mod youtube;

pub use youtube::YouTube;
