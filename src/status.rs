//! Port status word decoding.

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// `wPortStatus` bits shared by USB 2.0 and SuperSpeed hubs, plus the
    /// USB 2.0-only ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PortStatus: u16 {
        const CONNECTION = 0x0001;
        const ENABLE = 0x0002;
        const SUSPEND = 0x0004;
        const OVERCURRENT = 0x0008;
        const RESET = 0x0010;
        const POWER = 0x0100;
        const LOW_SPEED = 0x0200;
        const HIGH_SPEED = 0x0400;
        const TEST = 0x0800;
        const INDICATOR = 0x1000;
    }
}

/// SuperSpeed hubs report port power here instead of in `POWER`.
pub const SS_POWER: u16 = 0x0200;

/// Bit layout of the status word, chosen once from the hub's `bcdUSB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLayout {
    /// USB 1.x and 2.0 hubs.
    HighSpeed,
    /// USB 3.x hubs and later.
    SuperSpeed,
}

impl StatusLayout {
    pub fn for_level(level: u8) -> Self {
        if level <= 2 {
            StatusLayout::HighSpeed
        } else {
            StatusLayout::SuperSpeed
        }
    }

    fn power_bit(self) -> PortStatus {
        match self {
            StatusLayout::HighSpeed => PortStatus::POWER,
            StatusLayout::SuperSpeed => PortStatus::from_bits_retain(SS_POWER),
        }
    }

    pub fn is_powered(self, status: PortStatus) -> bool {
        status.contains(self.power_bit())
    }

    /// Labels for every flag set in `status`, in display order.
    pub fn flags(self, status: PortStatus) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self == StatusLayout::HighSpeed {
            let speed_flags = [
                (PortStatus::INDICATOR, "Indicator"),
                (PortStatus::TEST, "Test-Mode"),
                (PortStatus::HIGH_SPEED, "High-Speed"),
                (PortStatus::LOW_SPEED, "Low-Speed"),
            ];
            flags.extend(
                speed_flags
                    .into_iter()
                    .filter(|(bit, _)| status.contains(*bit))
                    .map(|(_, label)| label),
            );
        }
        flags.push(if self.is_powered(status) { "Power-On" } else { "Power-Off" });

        let common = [
            (PortStatus::RESET, "Resetting"),
            (PortStatus::OVERCURRENT, "Overcurrent"),
            (PortStatus::SUSPEND, "Suspended"),
            (PortStatus::ENABLE, "Enabled"),
            (PortStatus::CONNECTION, "Connected"),
        ];
        flags.extend(
            common
                .into_iter()
                .filter(|(bit, _)| status.contains(*bit))
                .map(|(_, label)| label),
        );
        flags
    }
}

/// One decoded status report, printable as a status line.
#[derive(Debug, Clone, Copy)]
pub struct PortReport {
    pub port: u8,
    pub status: PortStatus,
    pub change: u16,
    pub layout: StatusLayout,
}

impl fmt::Display for PortReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port {:2} status: {:04x} ", self.port, self.status.bits())?;
        for flag in self.layout.flags(self.status) {
            write!(f, " {flag}")?;
        }
        Ok(())
    }
}
