// src/lib.rs
pub mod arm;
pub mod cli;
pub mod error;
pub mod http;
pub mod provision;
pub mod retry;
pub mod storage;
pub mod upload;
pub mod vhd;

pub use error::{ProvisionError, Result};
pub use provision::{ProvisionContext, VhdVmParams};

// Re-export tracing for use in other modules
pub use tracing;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
/// Uses RUST_LOG env var for filtering (defaults to info). Logs go to stderr so stdout
/// carries only JSON output.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
