//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

pub mod scan;
pub mod send;
pub mod serve;

/// Load configuration with graceful fallback to defaults.
pub fn load_config() -> landrop_core::config::Config {
    landrop_core::config::Config::load().unwrap_or_default()
}

/// Parse a duration like `5s`, `30s`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    let seconds: u64 = trimmed
        .strip_suffix('s')
        .unwrap_or(trimmed)
        .parse()
        .ok()?;
    (seconds > 0).then(|| Duration::from_secs(seconds))
}

/// Format a byte count for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

/// Landrop - direct device-to-device file transfer over the local network
#[derive(Parser)]
#[command(name = "landrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the transfer server and become discoverable
    Serve(ServeArgs),

    /// Scan the network for other devices
    Scan(ScanArgs),

    /// Send a file to a discovered device
    Send(SendArgs),
}

/// Arguments for the serve command.
#[derive(Debug, clap::Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides configuration)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Display name to advertise (overrides configuration)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Directory to store received files in
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Bind to localhost only instead of all interfaces
    #[arg(long)]
    pub localhost: bool,
}

/// Arguments for the scan command.
#[derive(Debug, clap::Args)]
pub struct ScanArgs {
    /// How long to scan (e.g. '5s', '30s')
    #[arg(short, long, default_value = "5s")]
    pub duration: String,

    /// Output machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the send command.
#[derive(Debug, clap::Args)]
pub struct SendArgs {
    /// File to send
    pub file: PathBuf,

    /// Target device name or identifier (prefix is enough)
    #[arg(short, long)]
    pub to: String,

    /// How long to wait for the target to appear (e.g. '5s')
    #[arg(short, long, default_value = "5s")]
    pub wait: String,

    /// Output machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("0s"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
