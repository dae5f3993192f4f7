//! Switchyard: rendezvous and relay broker for NAT-bound test hardware

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kube::Client;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use switchyard_common::{DEFAULT_CONTROLLER_PORT, DEFAULT_ROUTER_PORT};
use switchyard_controller::ControllerService;
use switchyard_directory::kube::{KubeDirectory, KubeTokenIssuer, KubeTokenReviewer};
use switchyard_router::RouterService;

/// Switchyard - session broker connecting clients to NAT-bound exporters
#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller: rendezvous and capability minting
    Controller {
        /// Address to serve the gRPC service on
        #[arg(long, default_value_t = default_bind(DEFAULT_CONTROLLER_PORT))]
        bind: SocketAddr,

        /// Externally advertised router host:port, handed to both session
        /// ends and baked into capability audiences
        #[arg(long, env = "SWITCHYARD_ROUTER_ENDPOINT")]
        router_endpoint: String,
    },
    /// Run the router: capability-authenticated pairing and forwarding
    Router {
        /// Address to serve the gRPC service on
        #[arg(long, default_value_t = default_bind(DEFAULT_ROUTER_PORT))]
        bind: SocketAddr,

        /// Externally advertised router host:port; must match the
        /// controller's value exactly or audience validation fails
        #[arg(long, env = "SWITCHYARD_ROUTER_ENDPOINT")]
        router_endpoint: String,
    },
}

fn default_bind(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("failed to create kubernetes client")?;

    match cli.command {
        Commands::Controller {
            bind,
            router_endpoint,
        } => {
            info!(%bind, router = %router_endpoint, "Switchyard controller starting");
            let directory = Arc::new(KubeDirectory::new(client.clone()));
            let issuer = Arc::new(KubeTokenIssuer::new(client));
            ControllerService::new(directory, issuer, router_endpoint)
                .serve(bind)
                .await
                .context("controller service failed")?;
        }
        Commands::Router {
            bind,
            router_endpoint,
        } => {
            info!(%bind, router = %router_endpoint, "Switchyard router starting");
            let reviewer = Arc::new(KubeTokenReviewer::new(client));
            RouterService::new(reviewer, router_endpoint)
                .serve(bind)
                .await
                .context("router service failed")?;
        }
    }

    Ok(())
}
