//! cpuplanectl - operator client for the cpuplane daemon.
//!
//! Issues CreatePod/UpdatePod/DeletePod requests against a running daemon,
//! mostly for node bring-up checks and debugging without a kubelet around.

mod client;
mod output;
mod spec;

use anyhow::Result;
use clap::{Parser, Subcommand};
use spec::ContainerSpec;

#[derive(Parser)]
#[command(name = "cpuplanectl", version, about = "CLI for the cpuplane control plane daemon")]
struct Cli {
    /// Daemon gRPC endpoint (can also be set via CPUPLANE_ENDPOINT).
    #[arg(long, env = "CPUPLANE_ENDPOINT", default_value = "http://127.0.0.1:31000")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit a pod and pin its containers.
    CreatePod {
        #[arg(long)]
        pod_id: String,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "default")]
        namespace: String,

        /// Container spec `id,name,cpu_request,cpu_limit[,mem_request,mem_limit]`.
        /// Repeat for each container.
        #[arg(long = "container", required = true)]
        containers: Vec<ContainerSpec>,
    },

    /// Reconcile a pod with a new container list.
    UpdatePod {
        #[arg(long)]
        pod_id: String,

        /// Full desired container list, same format as create-pod.
        #[arg(long = "container", required = true)]
        containers: Vec<ContainerSpec>,
    },

    /// Free all allocations of a pod.
    DeletePod {
        #[arg(long)]
        pod_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut client = client::connect(&cli.endpoint).await?;

    let reply = match cli.command {
        Commands::CreatePod { pod_id, name, namespace, containers } => {
            client::create_pod(&mut client, pod_id, name, namespace, &containers).await?
        }
        Commands::UpdatePod { pod_id, containers } => {
            client::update_pod(&mut client, pod_id, &containers).await?
        }
        Commands::DeletePod { pod_id } => client::delete_pod(&mut client, pod_id).await?,
    };

    output::print_reply(&reply);
    Ok(())
}
