//! Command handlers

pub mod detect;
pub mod formats;
pub mod import;
pub mod list;
pub mod undo;

/// Profile used when `--profile` is not given
pub const DEFAULT_PROFILE: &str = "default";
