pub mod config;
pub mod logging;

pub use config::{LedgerConfig, validate_url};
