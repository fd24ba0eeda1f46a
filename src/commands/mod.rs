//! Command implementations
//!
//! Each module corresponds to one thing the CLI can do.

pub mod export;

pub use export::{run as export_run, ExportArgs};
