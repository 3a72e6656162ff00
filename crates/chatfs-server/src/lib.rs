//! chatfs server library: configuration loading and drive startup.
//!
//! The `chatfs` binary is a thin clap front end over [`app::open_drive`].

pub mod app;
pub mod config;

pub use app::{open_drive, open_store};
pub use config::{ConfigError, DriveConfig, StoreBackend};
