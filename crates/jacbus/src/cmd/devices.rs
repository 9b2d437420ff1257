use std::time::Duration;

use jacbus_bus::{Bus, BusConfig};
use jacbus_transport::UdsWire;

use crate::cmd::{listen::ephemeral_device_id, DevicesArgs};
use crate::exit::{bus_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_devices, OutputFormat};

/// Join a hub, collect announces for a while, print the device table.
pub fn run(args: DevicesArgs, format: OutputFormat) -> CliResult<i32> {
    let wire = UdsWire::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    let node = Bus::spawn(BusConfig::new(ephemeral_device_id()), Box::new(wire))
        .map_err(|err| bus_error("bus start failed", err))?;

    std::thread::sleep(Duration::from_millis(args.wait_ms));

    let devices = node.devices().map_err(|err| bus_error("snapshot failed", err))?;
    print_devices(&devices, format);
    Ok(SUCCESS)
}
