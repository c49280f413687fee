use harbor_cluster::controllers::cluster_controller::{self, State};
use harbor_cluster::util::config::ControllerConfig;
use harbor_cluster::util::telemetry;

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::from_env();
    telemetry::init(config.log_format)?;
    tracing::info!(
        "starting harbor cluster operator with {} concurrent reconciliations",
        config.max_concurrent_reconciliation
    );

    // Initiatilize Kubernetes controller state
    let state = State::default();
    let controller = cluster_controller::run(state.clone(), config);

    // Both runtimes implements graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server::start_server(state));
    controller?;
    server?;
    Ok(())
}
