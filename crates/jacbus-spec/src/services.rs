//! The embedded service-class catalogue.
//!
//! A flat, read-only lookup table keyed by 32-bit service class: name plus
//! register/command/event descriptors with their pack formats. Entries are a
//! direct port of the published catalogue data for the services this crate
//! ships; unknown classes simply miss (the bus treats them as opaque).
//!
//! Register lookups fall back to [`SYSTEM_REGISTERS`], the register space
//! shared by all services.

use serde::Serialize;

use crate::consts::SRV_CONTROL;

/// A register descriptor: code, name, payload pack format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegSpec {
    pub code: u16,
    pub name: &'static str,
    pub fmt: &'static str,
}

/// A command descriptor; `fmt` is empty for argument-less commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CmdSpec {
    pub code: u16,
    pub name: &'static str,
    pub fmt: &'static str,
}

/// An event descriptor; `fmt` is empty for payload-less events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventSpec {
    pub code: u16,
    pub name: &'static str,
    pub fmt: &'static str,
}

/// One service class entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceSpec {
    pub class: u32,
    pub name: &'static str,
    pub registers: &'static [RegSpec],
    pub commands: &'static [CmdSpec],
    pub events: &'static [EventSpec],
}

macro_rules! reg {
    ($code:expr, $name:expr, $fmt:expr) => {
        RegSpec {
            code: $code,
            name: $name,
            fmt: $fmt,
        }
    };
}

macro_rules! cmd {
    ($code:expr, $name:expr, $fmt:expr) => {
        CmdSpec {
            code: $code,
            name: $name,
            fmt: $fmt,
        }
    };
}

macro_rules! event {
    ($code:expr, $name:expr, $fmt:expr) => {
        EventSpec {
            code: $code,
            name: $name,
            fmt: $fmt,
        }
    };
}

/// Registers common to all services.
pub const SYSTEM_REGISTERS: &[RegSpec] = &[
    reg!(0x001, "intensity", "u32"),
    reg!(0x002, "value", "i32"),
    reg!(0x003, "streaming_samples", "u8"),
    reg!(0x004, "streaming_interval", "u32"),
    reg!(0x005, "inactive_threshold", "i32"),
    reg!(0x006, "active_threshold", "i32"),
    reg!(0x007, "max_power", "u16"),
    reg!(0x008, "reading_range", "u32"),
    reg!(0x101, "reading", "i32"),
    reg!(0x102, "streaming_preferred_interval", "u32"),
    reg!(0x103, "status_code", "u16 u16"),
    reg!(0x104, "min_reading", "i32"),
    reg!(0x105, "max_reading", "i32"),
    reg!(0x106, "reading_error", "u32"),
    reg!(0x107, "variant", "u8"),
    reg!(0x108, "reading_resolution", "u32"),
    reg!(0x109, "instance_name", "s"),
    reg!(0x110, "min_value", "i32"),
    reg!(0x111, "max_value", "i32"),
];

pub const SRV_ACCELEROMETER: u32 = 0x1f14_0409;
pub const SRV_AIR_PRESSURE: u32 = 0x1e11_7cea;
pub const SRV_BUTTON: u32 = 0x1473_a263;
pub const SRV_BUZZER: u32 = 0x1b57_b1d7;
pub const SRV_DISTANCE: u32 = 0x141a_6b8a;
pub const SRV_GYROSCOPE: u32 = 0x1e1b_06f2;
pub const SRV_HUMIDITY: u32 = 0x16c8_10b8;
pub const SRV_LED: u32 = 0x1609_d4f0;
pub const SRV_LED_STRIP: u32 = 0x126f_00e0;
pub const SRV_LIGHT_LEVEL: u32 = 0x17dc_9a1c;
pub const SRV_LOGGER: u32 = 0x12dc_1fca;
pub const SRV_MOTOR: u32 = 0x1700_4cd8;
pub const SRV_POTENTIOMETER: u32 = 0x1f27_4746;
pub const SRV_POWER: u32 = 0x1fa4_c95a;
pub const SRV_RELAY: u32 = 0x183f_e656;
pub const SRV_ROTARY_ENCODER: u32 = 0x10fa_29c9;
pub const SRV_SERVO: u32 = 0x12fc_9103;
pub const SRV_SOUND_LEVEL: u32 = 0x14ad_1a5d;
pub const SRV_SWITCH: u32 = 0x1ad2_9402;
pub const SRV_TEMPERATURE: u32 = 0x1421_bac7;
pub const SRV_PROTO_TEST: u32 = 0x16c7_466a;

/// The catalogue, sorted by service class for binary search.
pub const SERVICES: &[ServiceSpec] = &[
    ServiceSpec {
        class: SRV_CONTROL,
        name: "control",
        registers: &[
            reg!(0x080, "reset_in", "u32"),
            reg!(0x180, "device_description", "s"),
            reg!(0x181, "product_identifier", "u32"),
            reg!(0x182, "mcu_temperature", "i16"),
            reg!(0x184, "bootloader_product_identifier", "u32"),
            reg!(0x185, "firmware_version", "s"),
            reg!(0x186, "uptime", "u64"),
        ],
        commands: &[
            cmd!(0x00, "services", ""),
            cmd!(0x80, "noop", ""),
            cmd!(0x81, "identify", ""),
            cmd!(0x82, "reset", ""),
            cmd!(0x83, "flood_ping", "u32 u32 u8"),
            cmd!(0x84, "set_status_light", "u8 u8 u8 u8"),
            cmd!(0x85, "proxy", ""),
            cmd!(0x86, "reliable_commands", "u32"),
        ],
        events: &[],
    },
    ServiceSpec {
        class: SRV_ROTARY_ENCODER,
        name: "rotary_encoder",
        registers: &[
            reg!(0x101, "position", "i32"),
            reg!(0x180, "clicks_per_turn", "u16"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_LED_STRIP,
        name: "led_strip",
        registers: &[
            reg!(0x001, "brightness", "u0.8"),
            reg!(0x007, "max_power", "u16"),
            reg!(0x080, "light_type", "u8"),
            reg!(0x081, "num_pixels", "u16"),
            reg!(0x083, "num_columns", "u16"),
            reg!(0x180, "actual_brightness", "u0.8"),
        ],
        commands: &[cmd!(0x81, "run", "b")],
        events: &[],
    },
    ServiceSpec {
        class: SRV_LOGGER,
        name: "logger",
        registers: &[reg!(0x080, "min_priority", "u8")],
        commands: &[
            cmd!(0x80, "debug", "s"),
            cmd!(0x81, "log", "s"),
            cmd!(0x82, "warn", "s"),
            cmd!(0x83, "error", "s"),
        ],
        events: &[],
    },
    ServiceSpec {
        class: SRV_SERVO,
        name: "servo",
        registers: &[
            reg!(0x001, "enabled", "u8"),
            reg!(0x002, "angle", "i16.16"),
            reg!(0x081, "offset", "i16.16"),
            reg!(0x083, "min_pulse", "u16"),
            reg!(0x110, "min_angle", "i16.16"),
            reg!(0x111, "max_angle", "i16.16"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_DISTANCE,
        name: "distance",
        registers: &[
            reg!(0x101, "distance", "u16.16"),
            reg!(0x104, "min_range", "u16.16"),
            reg!(0x105, "max_range", "u16.16"),
            reg!(0x106, "distance_error", "u16.16"),
            reg!(0x107, "variant", "u8"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_TEMPERATURE,
        name: "temperature",
        registers: &[
            reg!(0x101, "temperature", "i22.10"),
            reg!(0x104, "min_temperature", "i22.10"),
            reg!(0x105, "max_temperature", "i22.10"),
            reg!(0x106, "temperature_error", "u22.10"),
            reg!(0x107, "variant", "u8"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_BUTTON,
        name: "button",
        registers: &[
            reg!(0x101, "pressure", "u0.16"),
            reg!(0x180, "analog", "u8"),
            reg!(0x181, "pressed", "u8"),
        ],
        commands: &[],
        events: &[
            event!(0x01, "down", ""),
            event!(0x02, "up", "u32"),
            event!(0x81, "hold", "u32"),
        ],
    },
    ServiceSpec {
        class: SRV_SOUND_LEVEL,
        name: "sound_level",
        registers: &[
            reg!(0x001, "enabled", "u8"),
            reg!(0x005, "quiet_threshold", "u0.16"),
            reg!(0x006, "loud_threshold", "u0.16"),
            reg!(0x101, "sound_level", "u0.16"),
        ],
        commands: &[],
        events: &[event!(0x01, "loud", ""), event!(0x02, "quiet", "")],
    },
    ServiceSpec {
        class: SRV_LED,
        name: "led",
        registers: &[
            reg!(0x001, "brightness", "u0.8"),
            reg!(0x002, "pixels", "b"),
            reg!(0x007, "max_power", "u16"),
            reg!(0x180, "actual_brightness", "u0.8"),
            reg!(0x182, "num_pixels", "u16"),
            reg!(0x183, "num_columns", "u16"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_PROTO_TEST,
        name: "proto_test",
        registers: &[
            reg!(0x081, "rw_bool", "u8"),
            reg!(0x082, "rw_u32", "u32"),
            reg!(0x083, "rw_i32", "i32"),
            reg!(0x084, "rw_string", "s"),
            reg!(0x085, "rw_bytes", "b"),
        ],
        commands: &[cmd!(0x81, "c_bool", "u8"), cmd!(0x82, "c_u32", "u32")],
        events: &[event!(0x81, "e_bool", "u8"), event!(0x82, "e_u32", "u32")],
    },
    ServiceSpec {
        class: SRV_HUMIDITY,
        name: "humidity",
        registers: &[
            reg!(0x101, "humidity", "u22.10"),
            reg!(0x104, "min_humidity", "u22.10"),
            reg!(0x105, "max_humidity", "u22.10"),
            reg!(0x106, "humidity_error", "u22.10"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_MOTOR,
        name: "motor",
        registers: &[
            reg!(0x001, "enabled", "u8"),
            reg!(0x002, "speed", "i1.15"),
            reg!(0x180, "load_torque", "u16.16"),
            reg!(0x181, "load_rotation_speed", "u16.16"),
            reg!(0x182, "reversible", "u8"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_LIGHT_LEVEL,
        name: "light_level",
        registers: &[
            reg!(0x101, "light_level", "u0.16"),
            reg!(0x106, "light_level_error", "u0.16"),
            reg!(0x107, "variant", "u8"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_RELAY,
        name: "relay",
        registers: &[
            reg!(0x001, "active", "u8"),
            reg!(0x107, "variant", "u8"),
            reg!(0x180, "max_switching_current", "u32"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_SWITCH,
        name: "switch",
        registers: &[reg!(0x101, "active", "u8"), reg!(0x107, "variant", "u8")],
        commands: &[],
        events: &[event!(0x01, "on", ""), event!(0x02, "off", "")],
    },
    ServiceSpec {
        class: SRV_BUZZER,
        name: "buzzer",
        registers: &[reg!(0x001, "volume", "u0.8")],
        commands: &[cmd!(0x80, "play_tone", "u16 u16 u16")],
        events: &[],
    },
    ServiceSpec {
        class: SRV_AIR_PRESSURE,
        name: "air_pressure",
        registers: &[
            reg!(0x101, "pressure", "u22.10"),
            reg!(0x106, "pressure_error", "u22.10"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_GYROSCOPE,
        name: "gyroscope",
        registers: &[
            reg!(0x101, "rotation_rates", "i12.20 i12.20 i12.20"),
            reg!(0x106, "rotation_rates_error", "u12.20"),
            reg!(0x008, "max_rate", "u12.20"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_ACCELEROMETER,
        name: "accelerometer",
        registers: &[
            reg!(0x101, "forces", "i12.20 i12.20 i12.20"),
            reg!(0x106, "forces_error", "u12.20"),
            reg!(0x008, "max_force", "u12.20"),
        ],
        commands: &[],
        events: &[
            event!(0x81, "tilt_up", ""),
            event!(0x82, "tilt_down", ""),
            event!(0x83, "tilt_left", ""),
            event!(0x84, "tilt_right", ""),
            event!(0x85, "face_up", ""),
            event!(0x86, "face_down", ""),
            event!(0x87, "freefall", ""),
            event!(0x88, "shake", ""),
        ],
    },
    ServiceSpec {
        class: SRV_POTENTIOMETER,
        name: "potentiometer",
        registers: &[
            reg!(0x101, "position", "u0.16"),
            reg!(0x107, "variant", "u8"),
        ],
        commands: &[],
        events: &[],
    },
    ServiceSpec {
        class: SRV_POWER,
        name: "power",
        registers: &[
            reg!(0x001, "allowed", "u8"),
            reg!(0x007, "max_power", "u16"),
            reg!(0x101, "power_status", "u8"),
            reg!(0x180, "current_draw", "u32"),
            reg!(0x181, "battery_voltage", "u16"),
        ],
        commands: &[cmd!(0x80, "shutdown", "")],
        events: &[event!(0x03, "power_status_changed", "u8")],
    },
];

/// Look up a service class in the catalogue.
pub fn service_spec(class: u32) -> Option<&'static ServiceSpec> {
    SERVICES
        .binary_search_by_key(&class, |spec| spec.class)
        .ok()
        .map(|i| &SERVICES[i])
}

/// Human-readable name for a service class, if catalogued.
pub fn service_name(class: u32) -> Option<&'static str> {
    service_spec(class).map(|spec| spec.name)
}

/// Find the descriptor for a register, falling back to the common system
/// register space when the service does not override it.
pub fn register_spec(class: u32, code: u16) -> Option<&'static RegSpec> {
    if let Some(spec) = service_spec(class) {
        if let Some(reg) = spec.registers.iter().find(|reg| reg.code == code) {
            return Some(reg);
        }
    }
    SYSTEM_REGISTERS.iter().find(|reg| reg.code == code)
}
