use freva_rest::app;
use freva_rest::app_state::AppState;
use freva_rest::cli;
use freva_rest::error::FrevaRestError;
use freva_rest::metrics;
use freva_rest::server;
use freva_rest::tracing::init_tracing;

use std::sync::Arc;

fn main() {
    let args = cli::parse();
    init_tracing(&args);
    metrics::register_metrics();

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = args.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build().expect("failed to start the async runtime");
    let exit_code = runtime.block_on(run(args));
    std::process::exit(exit_code);
}

async fn run(args: cli::CommandLineArgs) -> i32 {
    let state = match AppState::new(&args).await {
        Ok(state) => Arc::new(state),
        Err(error) => {
            tracing::error!("failed to start: {error}");
            return match error {
                FrevaRestError::InvalidInput(_) | FrevaRestError::Internal(_) => 1,
                FrevaRestError::Unauthenticated(_) | FrevaRestError::Forbidden(_) => 2,
                _ => 3,
            };
        }
    };
    let router = app::router(state);
    server::serve(&args, router).await;
    0
}
