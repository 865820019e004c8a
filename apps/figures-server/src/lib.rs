//! Figures Server Library
//!
//! HTTP service extracting figures and tables from PDFs by driving the
//! pdffigures2 engine as an external process. The server binary is in
//! main.rs, the command-line client in bin/figures_client.rs.
//!
//! # Modules
//!
//! - `engine`: launching pdffigures2 and collecting its output
//! - `extraction`: validation, admission control, batching, normalization
//! - `gate`: per-client rate limiting and correlation IDs
//! - `cleanup`: background removal of stale uploads and output
//! - `routes`: the axum router
//! - `client`: HTTP client used by the CLI

pub mod cleanup;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod extraction;
pub mod gate;
pub mod routes;
pub mod state;

pub use config::Config;
pub use routes::router;
pub use state::AppState;
