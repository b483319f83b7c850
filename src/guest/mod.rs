//! Guests: location, configuration and disks

pub mod client;
pub mod config;
pub mod disk;
pub mod locator;
pub mod types;

pub use client::{ConfigView, GuestClient};
pub use config::{ConfigValue, DiskValue, GuestConfig, Scalar};
pub use disk::DiskDescriptor;
pub use locator::{GuestInventory, Locator};
pub use types::{validate_vmid, GuestId, GuestKind, GuestLocation};
