//! Serve command implementation.
//!
//! Runs the transfer server: advertises this device over mDNS, browses for
//! peers, and serves the upload/download/signaling endpoints until Ctrl-C.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};

use landrop_core::discovery::AdvertiseParams;
use landrop_core::history::{JsonLedger, NullLedger, TransferLedger};
use landrop_core::identity::DeviceIdentity;
use landrop_core::web::AppState;

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = super::load_config();

    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(name) = args.name {
        config.general.device_name = name;
    }
    if let Some(dir) = args.storage_dir {
        config.general.storage_dir = Some(dir);
    }
    if args.localhost {
        config.network.localhost_only = true;
    }

    let identity =
        DeviceIdentity::load_or_create(&config).context("Failed to load device identity")?;

    let ledger: Arc<dyn TransferLedger> = match JsonLedger::load() {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            tracing::warn!("Failed to load transfer history, continuing without it: {e}");
            Arc::new(NullLedger)
        }
    };

    let state = AppState::new(config.clone(), identity.clone(), ledger)
        .await
        .context("Failed to initialize server state")?;

    state
        .directory
        .advertise(AdvertiseParams {
            port: config.network.port,
            device_name: identity.device_name.clone(),
            device_id: identity.device_id.to_string(),
            icon: "laptop".to_string(),
            kind: "DESKTOP".to_string(),
        })
        .await
        .context("Failed to advertise on the network")?;

    state
        .directory
        .start_browsing()
        .await
        .context("Failed to start browsing for devices")?;

    let ip: IpAddr = if config.network.localhost_only {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    let addr = SocketAddr::new(ip, config.network.port);

    println!();
    println!("Landrop v{}", landrop_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Device:    {}", identity.device_name);
    println!("  Id:        {}", identity.device_id);
    println!("  Listening: http://{addr}");
    println!("  Storage:   {}", config.storage_dir().display());
    println!();
    println!("  Press Ctrl-C to stop.");
    println!();

    tokio::select! {
        result = landrop_core::web::serve(state.clone(), addr) => {
            result.context("Transfer server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
        }
    }

    state.directory.shutdown().await;

    Ok(())
}
