//! Core types, configuration, and error handling for atlas.
//!
//! This crate provides the shared foundation used by the other atlas crates:
//! - [`AtlasError`]: unified error type using `thiserror`
//! - [`AtlasConfig`]: configuration loaded from `.atlas.toml`
//! - Shared types: [`Tier`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    AtlasConfig, CacheConfig, MapConfig, RankingConfig, WalkConfig, CONTEXT_WINDOW_HEADROOM,
};
pub use error::AtlasError;
pub use types::{OutputFormat, Tier};

/// A convenience `Result` type for atlas operations.
pub type Result<T> = std::result::Result<T, AtlasError>;
