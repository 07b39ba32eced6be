use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use turnpike::{GatewayConfig, GatewayServer, http};

/// Federated GraphQL gateway over the account, catalog and order services.
///
/// Upstream addresses come from ACCOUNT_SERVICE_URL, CATALOG_SERVICE_URL
/// and ORDER_SERVICE_URL.
#[derive(Debug, Parser)]
#[command(name = "turnpike", version, about)]
struct Args {
    /// Address the HTTP listener binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Directory holding supergraph.yaml and the schema fragments.
    #[arg(long, default_value = "./schemas")]
    schema_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let gateway = match GatewayServer::construct(&config, &args.schema_dir).await {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!(error = %e, "failed to construct gateway");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = http::serve(args.listen, gateway).await {
        error!(error = %e, "server error");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
