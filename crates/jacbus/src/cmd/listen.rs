use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jacbus_bus::{Bus, BusConfig};
use jacbus_transport::UdsWire;

use crate::cmd::{parse_number, ListenArgs};
use crate::exit::{bus_error, transport_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_routed, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let device_id = match &args.device_id {
        Some(text) => parse_number(text)
            .ok_or_else(|| CliError::new(USAGE, format!("invalid device id: {text}")))?,
        None => ephemeral_device_id(),
    };

    let wire = UdsWire::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    let node = Bus::spawn(BusConfig::new(device_id), Box::new(wire))
        .map_err(|err| bus_error("bus start failed", err))?;
    let packets = node.subscribe();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        let _ = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed));
    }

    let mut printed = 0usize;
    while !stop.load(Ordering::Relaxed) {
        match packets.recv_timeout(Duration::from_millis(200)) {
            Ok(packet) => {
                print_routed(&packet, format);
                printed += 1;
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    Ok(SUCCESS)
}

/// Monitor nodes need a unique id but no stable identity.
pub fn ephemeral_device_id() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    nanos ^ (pid << 48) | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_ids_are_nonzero_and_distinct() {
        let a = ephemeral_device_id();
        std::thread::sleep(Duration::from_micros(10));
        let b = ephemeral_device_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
