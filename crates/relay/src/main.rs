//! Realtime relay binary.

mod config;

use config::RelayConfig;
use realtime::server::{AllowListAuthorizer, HelloAuthorizer, RelayServer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .init();

    info!(address = %config.server_address(), "starting realtime relay");

    match config.tenant_allow_list() {
        Some(tenants) => {
            info!(?tenants, "restricting relay to allowed tenants");
            let authorizer = tenants
                .into_iter()
                .fold(AllowListAuthorizer::new(), |auth, tenant| auth.allow(tenant));
            serve(RelayServer::with_authorizer(config.server_config(), authorizer)).await
        }
        None => serve(RelayServer::new(config.server_config())).await,
    }
}

async fn serve<A: HelloAuthorizer + 'static>(server: RelayServer<A>) -> anyhow::Result<()> {
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}
