//! Send command implementation.
//!
//! Discovers the target device, obtains a pairing code from it, and streams
//! the file to its upload endpoint with live progress output.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use landrop_core::discovery::{DeviceDirectory, PeerDevice};
use landrop_core::identity::DeviceIdentity;
use landrop_core::transfer::{pair_and_send, FileSender, SendProgress, SendState};

use super::{format_size, parse_duration, SendArgs};

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();

    let wait = parse_duration(&args.wait)
        .context("Invalid wait format. Use formats like '5s', '10s', '30s'")?;

    if !args.file.is_file() {
        anyhow::bail!("File not found: {}", args.file.display());
    }

    let identity =
        DeviceIdentity::load_or_create(&config).context("Failed to load device identity")?;

    if !args.json {
        println!();
        print!("  Searching for '{}' ({})...", args.to, args.wait);
        let _ = io::stdout().flush();
    }

    let devices = DeviceDirectory::scan(wait)
        .await
        .context("Failed to scan the network")?;

    let Some(target) = find_target(&devices, &args.to) else {
        if !args.json {
            println!(" not found");
        }
        anyhow::bail!("Device '{}' not found on the network", args.to);
    };

    let host = target
        .address
        .ok_or_else(|| anyhow::anyhow!("Device '{}' has no resolved address", target.device_name))?
        .to_string();

    if !args.json {
        println!(" found at {}:{}", host, target.port);
        println!();
        println!(
            "  Sending {} to {}",
            args.file
                .file_name()
                .map_or_else(|| args.file.display().to_string(), |n| n
                    .to_string_lossy()
                    .to_string()),
            target.device_name
        );
        println!();
    }

    let sender = FileSender::new(config.transfer.chunk_size);

    let progress_handle = if args.json {
        None
    } else {
        Some(tokio::spawn(display_progress(sender.progress())))
    };

    let result = pair_and_send(
        &sender,
        &args.file,
        &host,
        target.port,
        &target.device_id,
        &identity.device_id.to_string(),
    )
    .await;

    if let Some(handle) = progress_handle {
        handle.abort();
        let _ = handle.await;
    }

    let receipt = result.context("Transfer failed")?;

    if args.json {
        let output = serde_json::json!({
            "status": receipt.status,
            "filename": receipt.filename,
            "size": receipt.size,
            "savedAs": receipt.saved_as,
            "downloadUrl": receipt.download_url,
            "device": target.device_name,
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        println!();
        println!(
            "  Sent {} ({}) to {}",
            receipt.filename,
            format_size(receipt.size),
            target.device_name
        );
        println!("  Saved as: {}", receipt.saved_as);
        if !receipt.download_url.is_empty() {
            println!(
                "  Download: http://{}:{}{}",
                host, target.port, receipt.download_url
            );
        }
        println!();
    }

    Ok(())
}

/// Match a scan result by identifier prefix or case-insensitive name.
fn find_target<'a>(devices: &'a [PeerDevice], query: &str) -> Option<&'a PeerDevice> {
    devices
        .iter()
        .find(|d| d.device_id.starts_with(query))
        .or_else(|| {
            devices
                .iter()
                .find(|d| d.device_name.eq_ignore_ascii_case(query))
        })
}

/// Render streaming progress on a single line until the task is aborted.
async fn display_progress(mut rx: watch::Receiver<Option<SendProgress>>) {
    loop {
        let timeout = tokio::time::timeout(Duration::from_secs(1), rx.changed()).await;
        if matches!(timeout, Ok(Err(_))) {
            break;
        }

        let Some(progress) = rx.borrow().clone() else {
            continue;
        };

        if progress.state == SendState::Cancelled {
            println!();
            println!("  Transfer cancelled.");
            break;
        }

        print!(
            "\r  {:>5.1}%  {} / {}    ",
            progress.percent,
            format_size(progress.bytes_sent),
            format_size(progress.total_bytes)
        );
        let _ = io::stdout().flush();

        if progress.bytes_sent >= progress.total_bytes {
            println!();
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str) -> PeerDevice {
        PeerDevice::new(id, name, None, 8080)
    }

    #[test]
    fn test_find_target_by_id_prefix() {
        let devices = vec![peer("abcd-1234", "Laptop"), peer("efgh-5678", "Phone")];
        let found = find_target(&devices, "efgh").expect("match by prefix");
        assert_eq!(found.device_name, "Phone");
    }

    #[test]
    fn test_find_target_by_name_case_insensitive() {
        let devices = vec![peer("abcd-1234", "Laptop"), peer("efgh-5678", "Phone")];
        let found = find_target(&devices, "laptop").expect("match by name");
        assert_eq!(found.device_id, "abcd-1234");
    }

    #[test]
    fn test_find_target_prefers_id_over_name() {
        let devices = vec![peer("phone-01", "Laptop"), peer("efgh-5678", "Phone")];
        let found = find_target(&devices, "phone").expect("match");
        assert_eq!(found.device_name, "Laptop");
    }

    #[test]
    fn test_find_target_missing() {
        let devices = vec![peer("abcd-1234", "Laptop")];
        assert!(find_target(&devices, "tablet").is_none());
    }
}
