use bitflags::bitflags;

bitflags! {
    /// Frame header flags (byte 11 of the wire header).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        /// The payload carries more than one service-addressed sub-record.
        const MULTICOMMAND = 0b0000_0001;
        /// The receiver must acknowledge this frame by CRC.
        const ACK_REQUESTED = 0b0000_0010;
        /// Command (device_id is the target) rather than report
        /// (device_id is the sender).
        const COMMAND = 0b0000_0100;
    }
}

impl FrameFlags {
    /// True for frames travelling toward the addressed device.
    pub fn is_command(self) -> bool {
        self.contains(FrameFlags::COMMAND)
    }

    /// True for frames emitted by the identified device.
    pub fn is_report(self) -> bool {
        !self.is_command()
    }
}
