// Library surface for the binary and for headless integration tests.
pub mod app_dirs;
pub mod completeness;
pub mod config;
pub mod editor;
pub mod filter;
pub mod gaps;
pub mod orchestrator;
pub mod reconstruct;
pub mod resample;
pub mod session;
pub mod store;
pub mod time_series;
pub mod util;
pub mod workflow;
