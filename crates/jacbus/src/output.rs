use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use jacbus_bus::{DeviceSnapshot, RoutedPacket};
use jacbus_frame::{CommandKind, Packet};
use jacbus_spec::{register_spec, service_name, PackFormat};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Render a 16-bit service command: page, register name when known.
pub fn describe_command(class: Option<u32>, command: u16) -> String {
    match CommandKind::of(command) {
        CommandKind::Action => format!("action {:#06x}", command),
        CommandKind::GetRegister | CommandKind::SetRegister => {
            let verb = if CommandKind::of(command) == CommandKind::GetRegister {
                "get"
            } else {
                "set"
            };
            let code = command & 0x0fff;
            match class.and_then(|class| register_spec(class, code)) {
                Some(reg) => format!("{verb} {} ({code:#05x})", reg.name),
                None => format!("{verb} register {code:#05x}"),
            }
        }
        CommandKind::Pipe => format!("pipe {:#06x}", command),
        CommandKind::Reserved => format!("reserved {:#06x}", command),
    }
}

/// Decode a register payload with its catalogued pack format, JSON-rendered.
pub fn decode_payload(class: Option<u32>, command: u16, payload: &[u8]) -> Option<String> {
    let code = match CommandKind::of(command) {
        CommandKind::GetRegister | CommandKind::SetRegister => command & 0x0fff,
        _ => return None,
    };
    let reg = register_spec(class?, code)?;
    let values = PackFormat::parse(reg.fmt).ok()?.decode(payload).ok()?;
    serde_json::to_string(&values).ok()
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    if cleaned.len() % 2 != 0 {
        return None;
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&cleaned[i..i + 2], 16).ok())
        .collect()
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    device_id: String,
    service_index: u8,
    service_class: Option<u32>,
    service_name: Option<&'a str>,
    command: u16,
    command_desc: String,
    payload: String,
    decoded: Option<String>,
    direction: &'a str,
}

pub fn print_routed(packet: &RoutedPacket, format: OutputFormat) {
    let name = packet.service_class.and_then(service_name);
    let desc = describe_command(packet.service_class, packet.service_command);
    let decoded = decode_payload(packet.service_class, packet.service_command, &packet.payload);
    let direction = if packet.is_command { "command" } else { "report" };

    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                device_id: format!("{:016x}", packet.device_id),
                service_index: packet.service_index,
                service_class: packet.service_class,
                service_name: name,
                command: packet.service_command,
                command_desc: desc,
                payload: hex(&packet.payload),
                decoded,
                direction,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "IDX", "SERVICE", "COMMAND", "PAYLOAD"])
                .add_row(vec![
                    format!("{:016x}", packet.device_id),
                    packet.service_index.to_string(),
                    name.unwrap_or("?").to_string(),
                    desc,
                    decoded.unwrap_or_else(|| hex(&packet.payload)),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{direction} dev={:016x} idx={} svc={} cmd={} payload={}",
                packet.device_id,
                packet.service_index,
                name.unwrap_or("?"),
                desc,
                decoded.unwrap_or_else(|| hex(&packet.payload)),
            );
        }
    }
}

pub fn print_decoded_frame(
    device_id: u64,
    is_command: bool,
    packets: &[Packet],
    class_hint: Option<u32>,
    format: OutputFormat,
) {
    for packet in packets {
        let routed = RoutedPacket {
            device_id,
            service_index: packet.service_index,
            service_class: class_hint,
            service_command: packet.service_command,
            payload: packet.payload.clone(),
            is_command,
        };
        print_routed(&routed, format);
    }
}

#[derive(Serialize)]
struct DeviceOutput {
    device_id: String,
    restart_counter: u8,
    services: Vec<DeviceServiceOutput>,
    age_ms: u128,
    announces: u64,
}

#[derive(Serialize)]
struct DeviceServiceOutput {
    index: u8,
    class: u32,
    name: Option<&'static str>,
}

pub fn print_devices(devices: &[DeviceSnapshot], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out: Vec<DeviceOutput> = devices
                .iter()
                .map(|device| DeviceOutput {
                    device_id: format!("{:016x}", device.device_id),
                    restart_counter: device.restart_counter,
                    services: device
                        .services
                        .iter()
                        .map(|service| DeviceServiceOutput {
                            index: service.index,
                            class: service.class,
                            name: service_name(service.class),
                        })
                        .collect(),
                    age_ms: device.age.as_millis(),
                    announces: device.announce_count,
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "[]".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "RC", "SERVICES", "AGE", "ANNOUNCES"]);
            for device in devices {
                let services: Vec<String> = device
                    .services
                    .iter()
                    .skip(1)
                    .map(|service| {
                        service_name(service.class)
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("{:#010x}", service.class))
                    })
                    .collect();
                table.add_row(vec![
                    format!("{:016x}", device.device_id),
                    device.restart_counter.to_string(),
                    services.join(", "),
                    format!("{}ms", device.age.as_millis()),
                    device.announce_count.to_string(),
                ]);
            }
            println!("{table}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        assert_eq!(parse_hex("0b adFF").unwrap(), vec![0x0b, 0xad, 0xff]);
        assert_eq!(parse_hex("0b:ad:ff").unwrap(), vec![0x0b, 0xad, 0xff]);
        assert_eq!(hex(&[0x0b, 0xad, 0xff]), "0badff");
        assert!(parse_hex("abc").is_none());
        assert!(parse_hex("zz").is_none());
    }

    #[test]
    fn command_descriptions() {
        assert_eq!(
            describe_command(Some(jacbus_spec::services::SRV_TEMPERATURE), 0x1101),
            "get temperature (0x101)"
        );
        assert_eq!(
            describe_command(None, 0x2001),
            "set register 0x001"
        );
        assert_eq!(describe_command(None, 0x0080), "action 0x0080");
    }

    #[test]
    fn payload_decoding_uses_catalogue_format() {
        // temperature reading i22.10: 21.5 C == 22016 raw
        let raw = 22016i32.to_le_bytes();
        let decoded = decode_payload(
            Some(jacbus_spec::services::SRV_TEMPERATURE),
            0x1101,
            &raw,
        )
        .unwrap();
        assert_eq!(decoded, "[21.5]");
    }
}
