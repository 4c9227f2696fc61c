//! Thin entrypoint: initializes tracing, reads a minimal `<node> <down|up>` argument pair, and
//! calls into the public API. Flag parsing and configuration loading/merging are the excluded
//! external collaborator's job (see crate docs); this binary exists so the crate produces
//! something runnable for integration smoke-testing.

use std::process::ExitCode;

use ceph_node_maintenance::cancel::CancellationToken;
use ceph_node_maintenance::config::Config;
use ceph_node_maintenance::progress::NullProgressSink;
use ceph_node_maintenance::{execute_down_phase, execute_up_phase, DownOptions, UpOptions};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    let mut args = std::env::args().skip(1);
    let (node, phase) = match (args.next(), args.next()) {
        (Some(node), Some(phase)) => (node, phase),
        _ => {
            eprintln!("usage: ceph-node-maintenance <node> <down|up>");
            return ExitCode::FAILURE;
        }
    };

    let client = match kube::Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to connect to Kubernetes cluster");
            return ExitCode::FAILURE;
        }
    };
    let cfg = Config::default();
    let gateway =
        ceph_node_maintenance::gateway::kube_gateway::KubeGateway::with_config(client, &cfg);
    let cancel = CancellationToken::new();
    let mut sink = NullProgressSink;

    let result = match phase.as_str() {
        "down" => execute_down_phase(
            &gateway,
            &cfg,
            &node,
            DownOptions {
                progress: &mut sink,
                cancel,
                explicit_path: None,
            },
        )
        .await
        .map(|_| ()),
        "up" => execute_up_phase(
            &gateway,
            &cfg,
            &node,
            UpOptions {
                progress: &mut sink,
                cancel,
                explicit_path: None,
                max_age: std::time::Duration::ZERO,
                now: None,
            },
        )
        .await
        .map(|_| ()),
        other => {
            eprintln!("unknown phase {other:?}, expected \"down\" or \"up\"");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => {
            info!(node, phase, "maintenance phase complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(node, phase, error = %e, "maintenance phase failed");
            ExitCode::FAILURE
        }
    }
}
