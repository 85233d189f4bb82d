pub mod application;
pub mod domain;
pub mod infrastructure;

use application::bootstrap::bootstrap_workspace;
use application::clock::system_now;
use application::commands::{get_dashboard_view_impl, get_weather_snapshot_impl, DashboardState};
use infrastructure::error::InfraError;
use infrastructure::logging;
use std::path::PathBuf;
use tracing::{error, info};

/// Headless entry point: `ambient-dash [workspace]`. Prints one JSON
/// dashboard view per clock tick until Ctrl-C.
pub fn run() {
    let workspace_root = match std::env::args_os().nth(1) {
        Some(path) => PathBuf::from(path),
        None => std::env::current_dir().expect("failed to resolve current directory"),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build async runtime");

    if let Err(error) = runtime.block_on(serve(workspace_root)) {
        error!(%error, "dashboard stopped with an error");
        eprintln!("ambient-dash: {error}");
        std::process::exit(1);
    }
}

async fn serve(workspace_root: PathBuf) -> Result<(), InfraError> {
    let bootstrap = bootstrap_workspace(&workspace_root)?;
    let _logging = logging::init(&bootstrap.logs_dir, &bootstrap.config.app.log_level)?;

    let state = DashboardState::from_bootstrap(bootstrap, system_now())?;
    state.activate();

    match get_weather_snapshot_impl(&state).await {
        Some(snapshot) => info!(
            place = %snapshot.place,
            temperature = ?snapshot.temperature,
            condition = ?snapshot.condition,
            "weather snapshot"
        ),
        None => info!("no weather snapshot available"),
    }

    let mut ticks = state.subscribe_clock();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = ticks.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = get_dashboard_view_impl(&state);
                println!("{}", serde_json::to_string(&view)?);
            }
            signal = &mut shutdown => {
                signal?;
                break;
            }
        }
    }

    state.shutdown();
    Ok(())
}
