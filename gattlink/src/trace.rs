//! Tracing infrastructure for gattlink.
//!
//! Enabled by the default `tracing` feature. All trace macros become no-ops
//! when the feature is disabled.

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise the filter is `gattlink=info`, or
/// `gattlink=debug` when `verbose` is set. Output goes to stderr so it never
/// interleaves with the console prompt on stdout.
#[cfg(feature = "tracing")]
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let default_directive = if verbose {
        "gattlink=debug"
    } else {
        "gattlink=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // A subscriber may already be installed (tests call this repeatedly).
    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "tracing"))]
pub const fn init_tracing(_verbose: bool) {}

// When tracing is enabled, re-export macros from the tracing crate.
#[cfg(feature = "tracing")]
pub(crate) use tracing::{debug, error, info, trace, warn};

// When tracing is disabled, provide no-op macro implementations.
#[cfg(not(feature = "tracing"))]
macro_rules! trace_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "tracing"))]
pub(crate) use debug_noop as debug;
#[cfg(not(feature = "tracing"))]
pub(crate) use error_noop as error;
#[cfg(not(feature = "tracing"))]
pub(crate) use info_noop as info;
#[cfg(not(feature = "tracing"))]
pub(crate) use trace_noop as trace;
#[cfg(not(feature = "tracing"))]
pub(crate) use warn_noop as warn;
