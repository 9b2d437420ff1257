use std::time::Duration;

use bytes::Bytes;

use jacbus_bus::{Bus, BusConfig};
use jacbus_frame::{Packet, CMD_GET_REGISTER, CMD_REGISTER_MASK, CMD_SET_REGISTER};
use jacbus_spec::{PackFormat, PackValue};
use jacbus_transport::UdsWire;

use crate::cmd::{listen::ephemeral_device_id, parse_number, SendArgs};
use crate::exit::{bus_error, transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{parse_hex, print_routed, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let target = parse_number(&args.target)
        .ok_or_else(|| CliError::new(USAGE, format!("invalid target id: {}", args.target)))?;
    let command = parse_command(&args.command)?;
    let payload = resolve_payload(&args)?;

    let wire = UdsWire::connect(&args.path).map_err(|err| transport_error("connect failed", err))?;
    let node = Bus::spawn(BusConfig::new(ephemeral_device_id()), Box::new(wire))
        .map_err(|err| bus_error("bus start failed", err))?;
    let packets = node.subscribe();

    let packet = Packet::new(args.service_index, command, payload);
    if args.reliable {
        let seed = args.seed.unwrap_or_else(|| ephemeral_device_id() as u32);
        node.send_reliable(target, packet, seed)
            .map_err(|err| bus_error("reliable send failed", err))?;
    } else {
        node.send(target, packet)
            .map_err(|err| bus_error("send failed", err))?;
    }

    if args.wait {
        let deadline = Duration::from_millis(args.wait_timeout_ms);
        let report = wait_for_report(&packets, target, command, deadline)
            .ok_or_else(|| CliError::new(TIMEOUT, "no matching report"))?;
        print_routed(&report, format);
    }
    Ok(SUCCESS)
}

fn parse_command(input: &str) -> CliResult<u16> {
    let (page, code_text) = match input.split_once(':') {
        Some(("get", rest)) => (CMD_GET_REGISTER, rest),
        Some(("set", rest)) => (CMD_SET_REGISTER, rest),
        Some((other, _)) => {
            return Err(CliError::new(USAGE, format!("unknown command form: {other}")))
        }
        None => (0, input),
    };
    let code = parse_number(code_text)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| CliError::new(USAGE, format!("invalid command code: {code_text}")))?;
    if page != 0 && code > CMD_REGISTER_MASK {
        return Err(CliError::new(USAGE, "register number exceeds 12 bits"));
    }
    Ok(page | code)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(hex) = &args.hex {
        return parse_hex(hex)
            .map(Bytes::from)
            .ok_or_else(|| CliError::new(USAGE, "--hex is not valid hex"));
    }
    if let (Some(values), Some(pack)) = (&args.values, &args.pack) {
        let values: Vec<PackValue> = parse_values(values)?;
        let fmt = PackFormat::parse(pack)
            .map_err(|err| CliError::new(USAGE, format!("bad --pack format: {err}")))?;
        let bytes = fmt
            .encode(&values)
            .map_err(|err| CliError::new(USAGE, format!("--values do not fit --pack: {err}")))?;
        return Ok(Bytes::from(bytes));
    }
    Ok(Bytes::new())
}

fn parse_values(input: &str) -> CliResult<Vec<PackValue>> {
    let json: serde_json::Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("--values is not valid JSON: {err}")))?;
    let serde_json::Value::Array(items) = json else {
        return Err(CliError::new(USAGE, "--values must be a JSON array"));
    };
    items.iter().map(json_to_pack).collect()
}

fn json_to_pack(value: &serde_json::Value) -> CliResult<PackValue> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(PackValue::Unsigned(u))
            } else if let Some(i) = n.as_i64() {
                Ok(PackValue::Signed(i))
            } else if let Some(f) = n.as_f64() {
                Ok(PackValue::Float(f))
            } else {
                Err(CliError::new(USAGE, format!("unsupported number: {n}")))
            }
        }
        serde_json::Value::String(s) => Ok(PackValue::String(s.clone())),
        serde_json::Value::Array(items) => Ok(PackValue::Array(
            items
                .iter()
                .map(json_to_pack)
                .collect::<CliResult<Vec<_>>>()?,
        )),
        other => Err(CliError::new(
            USAGE,
            format!("unsupported value in --values: {other}"),
        )),
    }
}

fn wait_for_report(
    packets: &std::sync::mpsc::Receiver<jacbus_bus::RoutedPacket>,
    target: u64,
    command: u16,
    deadline: Duration,
) -> Option<jacbus_bus::RoutedPacket> {
    let start = std::time::Instant::now();
    while start.elapsed() < deadline {
        let remaining = deadline.saturating_sub(start.elapsed());
        match packets.recv_timeout(remaining.min(Duration::from_millis(100))) {
            Ok(packet)
                if !packet.is_command
                    && packet.device_id == target
                    && packet.service_command == command =>
            {
                return Some(packet);
            }
            Ok(_) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return None,
        }
    }
    None
}
