//! Tracing (logging)

use crate::cli::CommandLineArgs;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise tracing (logging)
///
/// Applies a filter based on the `RUST_LOG` environment variable, falling back
/// to debug logging for this crate and tower_http when debug mode is on and
/// info logging otherwise.
///
/// # Arguments
///
/// * `args`: Command line arguments.
pub fn init_tracing(args: &CommandLineArgs) {
    let default_filter = if args.debug {
        "freva_rest=debug,tower_http=debug"
    } else {
        "freva_rest=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
