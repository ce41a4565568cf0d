//! # Open Liberty Operator
//!
//! Operator binary: parses the command line, initializes the runtime, optionally waits
//! for manager leadership, then runs the application and trace controllers.

use anyhow::Result;
use clap::Parser;
use open_liberty_operator::constants::{
    DEFAULT_HEALTH_PROBE_BIND_ADDRESS, DEFAULT_METRICS_BIND_ADDRESS, MANAGER_LEASE_NAME,
};
use open_liberty_operator::runtime::{initialize, run_watch_loop, ListenAddresses, ManagerLease};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "open-liberty-operator", version, about = "Open Liberty operator")]
struct Cli {
    /// Address the metrics endpoint binds to
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    metrics_bind_address: SocketAddr,

    /// Address the health probe endpoints bind to
    #[arg(long, env = "HEALTH_PROBE_BIND_ADDRESS", default_value = DEFAULT_HEALTH_PROBE_BIND_ADDRESS)]
    health_probe_bind_address: SocketAddr,

    /// Run the controllers only while holding the manager Lease
    #[arg(long, env = "ENABLE_LEADER_ELECTION", default_value_t = false)]
    enable_leader_election: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let init_result = initialize(ListenAddresses {
        metrics: cli.metrics_bind_address,
        health_probe: cli.health_probe_bind_address,
    })
    .await?;

    let leadership_lost = if cli.enable_leader_election {
        let config = &init_result.reconciler.config;
        let lease = Arc::new(ManagerLease::new(
            init_result.client.clone(),
            MANAGER_LEASE_NAME,
            &config.operator_namespace,
            &config.pod_name,
        ));
        Some(lease.acquire().await)
    } else {
        None
    };

    run_watch_loop(
        init_result.client,
        init_result.reconciler,
        init_result.server_state,
        leadership_lost,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["open-liberty-operator"]);
        assert_eq!(cli.metrics_bind_address.port(), 8080);
        assert_eq!(cli.health_probe_bind_address.port(), 8081);
        assert!(!cli.enable_leader_election);

        let cli = Cli::parse_from([
            "open-liberty-operator",
            "--enable-leader-election",
            "--metrics-bind-address",
            "127.0.0.1:9090",
        ]);
        assert!(cli.enable_leader_election);
        assert_eq!(cli.metrics_bind_address.port(), 9090);
    }
}
