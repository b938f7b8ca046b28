//! Port traits the CLI and adapters plug into.

pub mod config_port;
pub mod data_port;
pub mod report_port;
