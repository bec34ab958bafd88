//! Landrop CLI - direct device-to-device file transfer over the local
//! network.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the transfer server and become discoverable
//! landrop serve
//!
//! # Find other devices
//! landrop scan
//!
//! # Send a file to one of them
//! landrop send ./document.pdf --to "Office Laptop"
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Scan(args) => commands::scan::run(args).await,
        Command::Send(args) => commands::send::run(args).await,
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,landrop=info,landrop_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
