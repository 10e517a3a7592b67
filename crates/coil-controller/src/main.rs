//! coil - IP address management control plane

use clap::Parser;
use coil_common::telemetry::init_logging;
use coil_controller::{commands, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The CRD manifest goes to stdout, logs go to stderr
    init_logging(cli.log_format)?;

    commands::run(cli).await
}
