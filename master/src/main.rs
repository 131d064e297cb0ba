use common::ClusterConfig;
use master::{handlers, monitor, AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,worker=info,tower_http=info")),
        )
        .init();

    let config = ClusterConfig::load()?;
    info!(
        "datos en {}, bloques de {} bytes, replicación {}",
        config.data_dir.display(),
        config.block_size,
        config.replication
    );

    let state = AppState::new(&config)?;

    // router HTTP
    let app = handlers::build_router(state.clone());

    // mantenimiento en segundo plano: fsck + checkpoints
    tokio::spawn(monitor::run(
        state.fs.clone(),
        config.monitor_interval(),
        config.checkpoint_every,
    ));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("master escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
