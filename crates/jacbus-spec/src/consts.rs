//! Protocol-wide numeric constants: the control service, the common (system)
//! register/command/event space, and the announce flag bits.
//!
//! Values mirror the published service catalogue; they are wire-visible and
//! shared by every compliant node.

use bitflags::bitflags;

/// Interval between `Services` announce broadcasts, in milliseconds.
pub const SYSTEM_ANNOUNCE_INTERVAL_MS: u32 = 0x1f4;

/// Service class of the control service (always service index 0).
pub const SRV_CONTROL: u32 = 0x0;

/// Commands shared by every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SystemCmd {
    /// Enumeration data; the control service broadcasts it periodically.
    Announce = 0x0,
    /// Request sensor calibration.
    Calibrate = 0x2,
    /// Emitted by a server for a command it does not understand; payload is
    /// `"u16 u16"` (the unhandled command and that command packet's crc).
    CommandNotImplemented = 0x3,
    /// Register `N` is fetched by issuing `0x1000 | N`.
    GetRegister = 0x1000,
    /// Register `N` is set by issuing `0x2000 | N`.
    SetRegister = 0x2000,
}

/// Registers shared by every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SystemReg {
    Intensity = 0x1,
    Value = 0x2,
    StreamingSamples = 0x3,
    StreamingInterval = 0x4,
    InactiveThreshold = 0x5,
    ActiveThreshold = 0x6,
    MaxPower = 0x7,
    ReadingRange = 0x8,
    Reading = 0x101,
    StreamingPreferredInterval = 0x102,
    StatusCode = 0x103,
    MinReading = 0x104,
    MaxReading = 0x105,
    ReadingError = 0x106,
    Variant = 0x107,
    ReadingResolution = 0x108,
    InstanceName = 0x109,
    MinValue = 0x110,
    MaxValue = 0x111,
}

/// Events shared by every service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SystemEvent {
    Active = 0x1,
    Inactive = 0x2,
    Change = 0x3,
    StatusCodeChanged = 0x4,
    Neutral = 0x7,
}

/// Values of the `status_code` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SystemStatusCodes {
    Ready = 0x0,
    Initializing = 0x1,
    Calibrating = 0x2,
    Sleeping = 0x3,
    WaitingForInput = 0x4,
    CalibrationNeeded = 0x64,
}

/// Control service commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlCmd {
    /// The announce report; command form induces an immediate report.
    Services = 0x0,
    /// Do nothing; useful for ACK testing.
    Noop = 0x80,
    /// Draw the user's attention to the device.
    Identify = 0x81,
    /// Reset the device.
    Reset = 0x82,
    /// Respond `num_responses` times as fast as possible.
    FloodPing = 0x83,
    /// Status light color transition.
    SetStatusLight = 0x84,
    /// Force client device into proxy mode.
    Proxy = 0x85,
    /// Open a command pipe for exactly-once delivery; payload is a `u32` seed.
    /// Repeated invocations with the same seed are dropped.
    ReliableCommands = 0x86,
}

/// Control service registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlReg {
    /// Reset after the given number of microseconds (watchdog).
    ResetIn = 0x80,
    McuTemperature = 0x182,
    DeviceDescription = 0x180,
    ProductIdentifier = 0x181,
    BootloaderProductIdentifier = 0x184,
    FirmwareVersion = 0x185,
    Uptime = 0x186,
}

bitflags! {
    /// Flag bits of the announce report (low nibble is the restart counter).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AnnounceFlags: u16 {
        const STATUS_LIGHT_MONO = 0x10;
        const STATUS_LIGHT_RGB_NO_FADE = 0x20;
        const STATUS_LIGHT_RGB_FADE = 0x30;
        const SUPPORTS_ACK = 0x100;
        const SUPPORTS_BROADCAST = 0x200;
        const SUPPORTS_FRAMES = 0x400;
        const IS_CLIENT = 0x800;
        const SUPPORTS_RELIABLE_COMMANDS = 0x1000;
    }
}

/// Restart counter mask within the announce flags word.
pub const RESTART_COUNTER_MASK: u16 = 0xf;

/// The restart counter saturates here instead of wrapping.
pub const RESTART_COUNTER_STEADY: u16 = 0xf;

/// Pack format of the `Services` announce report.
pub const ANNOUNCE_FORMAT: &str = "u16 u8 x[1] r: u32";

/// Pack format of the `CommandNotImplemented` report.
pub const COMMAND_NOT_IMPLEMENTED_FORMAT: &str = "u16 u16";

/// Pack format of the `ReliableCommands` command.
pub const RELIABLE_COMMANDS_FORMAT: &str = "u32";

/// Pack format of a command wrapped in a reliable-command pipe chunk.
pub const WRAPPED_COMMAND_FORMAT: &str = "u8 u8 u16 b";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_interval_is_500ms() {
        assert_eq!(SYSTEM_ANNOUNCE_INTERVAL_MS, 500);
    }

    #[test]
    fn register_command_pages() {
        assert_eq!(SystemCmd::GetRegister as u16, 0x1000);
        assert_eq!(SystemCmd::SetRegister as u16, 0x2000);
        assert_eq!(
            SystemCmd::GetRegister as u16 | SystemReg::Reading as u16,
            0x1101
        );
    }

    #[test]
    fn restart_counter_lives_in_low_nibble() {
        let word = 0x1503u16;
        assert_eq!(word & RESTART_COUNTER_MASK, 3);
        let flags = AnnounceFlags::from_bits_truncate(word);
        assert!(flags.contains(AnnounceFlags::SUPPORTS_ACK));
        assert!(flags.contains(AnnounceFlags::SUPPORTS_RELIABLE_COMMANDS));
        assert!(!flags.contains(AnnounceFlags::IS_CLIENT));
    }
}
