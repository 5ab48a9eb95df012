//! supply-scan command-line front-end: one-shot scans, manual checks and an
//! interactive session.

pub mod config;
pub mod repl;
pub mod runner;

pub use config::resolve_catalog_path;
pub use runner::{build_verifier, scan_feed, verify_artifact, RunOutcome};
