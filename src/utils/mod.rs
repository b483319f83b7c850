pub mod paths;
pub mod system;
