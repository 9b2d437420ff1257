use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod bridge;
pub mod decode;
pub mod devices;
pub mod doctor;
pub mod listen;
pub mod send;
pub mod services;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a hex-encoded frame into its packets.
    Decode(DecodeArgs),
    /// List the embedded service catalogue.
    Services(ServicesArgs),
    /// Run a bus hub on a Unix socket (other processes join with listen/send).
    Bridge(BridgeArgs),
    /// Join a hub and print routed packets.
    Listen(ListenArgs),
    /// Join a hub, collect announces, and print the device table.
    Devices(DevicesArgs),
    /// Join a hub and send a command to a device.
    Send(SendArgs),
    /// Run self-tests on an in-process loopback bus.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Decode(args) => decode::run(args, format),
        Command::Services(args) => services::run(args, format),
        Command::Bridge(args) => bridge::run(args),
        Command::Listen(args) => listen::run(args, format),
        Command::Devices(args) => devices::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex (whitespace and ':' separators allowed).
    pub hex: String,
    /// Service class used to name registers and decode payloads (hex or decimal).
    #[arg(long)]
    pub class: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServicesArgs {
    /// Filter by name substring.
    pub filter: Option<String>,
    /// Show one service's registers/commands/events (class, hex or decimal).
    #[arg(long)]
    pub class: Option<String>,
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Hub socket path to join.
    pub path: PathBuf,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Device identifier for this monitor node (hex). Random when omitted.
    #[arg(long)]
    pub device_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct DevicesArgs {
    /// Hub socket path to join.
    pub path: PathBuf,
    /// How long to collect announces before printing, in milliseconds.
    #[arg(long, default_value = "1200")]
    pub wait_ms: u64,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Hub socket path to join.
    pub path: PathBuf,
    /// Target device identifier (hex).
    pub target: String,
    /// Target service index.
    #[arg(long, short = 's', default_value = "1")]
    pub service_index: u8,
    /// Command: a code like `0x80`, or `get:0x101` / `set:0x1`.
    #[arg(long, short = 'c')]
    pub command: String,
    /// Raw payload as hex.
    #[arg(long, conflicts_with = "values")]
    pub hex: Option<String>,
    /// Payload values as a JSON array, encoded with --pack.
    #[arg(long, requires = "pack")]
    pub values: Option<String>,
    /// Pack format for --values (e.g. "u32", "u8 u16").
    #[arg(long)]
    pub pack: Option<String>,
    /// Send as a seed-deduplicated reliable command and wait for the ack.
    #[arg(long)]
    pub reliable: bool,
    /// Seed for --reliable (random when omitted).
    #[arg(long)]
    pub seed: Option<u32>,
    /// Wait for a report echoing the command and print it.
    #[arg(long)]
    pub wait: bool,
    /// How long to wait with --wait, in milliseconds.
    #[arg(long, default_value = "2000")]
    pub wait_timeout_ms: u64,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {}

/// Parse a `0x`-prefixed or bare hex/decimal number.
pub fn parse_number(input: &str) -> Option<u64> {
    let input = input.trim();
    if let Some(hex) = input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if input.chars().all(|c| c.is_ascii_digit()) {
        input.parse().ok()
    } else {
        u64::from_str_radix(input, 16).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_parsing_accepts_hex_and_decimal() {
        assert_eq!(parse_number("0x1f4"), Some(500));
        assert_eq!(parse_number("500"), Some(500));
        assert_eq!(parse_number("1f4"), Some(500));
        assert_eq!(parse_number("0b0b0b0b0b0b0b0b"), Some(0x0b0b_0b0b_0b0b_0b0b));
        assert_eq!(parse_number("zz"), None);
    }
}
