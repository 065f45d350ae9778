pub mod address;
pub mod callout;
pub mod cleaner;
pub mod codec;
pub mod config;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod identifier;
pub mod log_sanitize;
pub mod logging;
pub mod metadata;
pub mod recovery;
pub mod session;
pub mod state;

pub use error::{Error, ErrorKind, Result};
