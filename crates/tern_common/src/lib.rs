//! Shared model for the execution-time coordination layer: ids, rows, the
//! distributed plan tree, the node directory, configuration and errors.

pub mod config;
pub mod datum;
pub mod error;
pub mod node;
pub mod plan;
pub mod redaction;
pub mod types;

pub use config::TernConfig;
pub use error::{TernError, TernResult};
