//! Tool settings

pub mod loader;
pub mod schema;

pub use loader::load_settings;
pub use schema::{DrainPolicy, Settings};
