//! # Runtime Provisioner
//!
//! Controller binary. See the library crate for the reconcilers themselves.

use anyhow::Result;
use clap::Parser;

use runtime_provisioner::config::ControllerArgs;
use runtime_provisioner::runtime::{initialize, run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ControllerArgs::parse();

    let init_result = initialize(&args).await?;

    run_watch_loop(&args, init_result).await
}
