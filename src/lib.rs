#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod paths;
pub mod repo;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the types the binary and tests reach for most often.
pub use crate::config::Config;
pub use crate::daemon::{DaemonState, IpcState, PathKind};
pub use crate::repo::Repo;
