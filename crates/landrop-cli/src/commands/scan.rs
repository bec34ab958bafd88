//! Scan command implementation.

use anyhow::{Context, Result};

use landrop_core::discovery::{DeviceDirectory, PeerDevice};

use super::{parse_duration, ScanArgs};

/// Run the scan command.
pub async fn run(args: ScanArgs) -> Result<()> {
    let duration = parse_duration(&args.duration)
        .context("Invalid duration format. Use formats like '5s', '10s', '30s'")?;

    if !args.json {
        println!();
        println!("Scanning for devices ({})...", args.duration);
        println!();
    }

    let devices = DeviceDirectory::scan(duration)
        .await
        .context("Failed to scan the network")?;

    if args.json {
        output_json_devices(&devices);
    } else {
        display_devices(&devices);
    }

    Ok(())
}

/// Output devices as JSON.
fn output_json_devices(devices: &[PeerDevice]) {
    let output = serde_json::json!({ "devices": devices });
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
}

/// Display devices as a text table.
fn display_devices(devices: &[PeerDevice]) {
    println!("Devices on Network:");
    println!("{}", "─".repeat(70));
    println!(
        "  {:18}  {:10}  {:16}  {:6}  {:8}",
        "Name", "Id", "Address", "Port", "Kind"
    );
    println!("{}", "─".repeat(70));

    if devices.is_empty() {
        println!("  (no devices found)");
        println!("{}", "─".repeat(70));
        return;
    }

    for device in devices {
        let address = device
            .address
            .map_or_else(|| "unresolved".to_string(), |a| a.to_string());

        println!(
            "  {:18}  {:10}  {:16}  {:6}  {:8}",
            truncate_string(&device.device_name, 18),
            truncate_string(&device.device_id, 10),
            address,
            device.port,
            device.kind
        );
    }

    println!("{}", "─".repeat(70));
}

/// Truncate a string to fit within a maximum width.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 1).collect();
        format!("{truncated}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_string("this is too long", 10), "this is t…");
    }
}
