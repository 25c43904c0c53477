//! Dataset platform access.
//!
//! [`PlatformClient`] is the HTTP implementation of
//! [`podium_training::DatasetPlatform`] used by the fetch stage.

mod client;

pub use client::{AssetEntry, PlatformClient, PlatformError, ASSET_PAGE_SIZE};
