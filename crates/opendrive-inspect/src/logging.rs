//! Logging setup for the command line front end

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Install a `fmt` subscriber filtered by `RUST_LOG`.
///
/// If RUST_LOG is not set, a default is chosen: `debug` for the map library in debug builds
/// or with profiling spans enabled, `info` otherwise.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_err() {
        let default = if cfg!(any(debug_assertions, feature = "profiling")) {
            "info,opendrive_map=debug"
        } else {
            "info"
        };
        // Safety: single-threaded at startup
        unsafe {
            std::env::set_var("RUST_LOG", default);
        }
    }

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(fmt_layer).init();
}
