//! The hub controller: everything done through the open device once it is
//! known to be a hub.

use std::io::{self, Write};
use std::time::Duration;

use log::{debug, info};

use crate::cli::{DeviceAddress, parse_port_token};
use crate::device::{self, DeviceDescriptor, ResolvedDevice};
use crate::error::{HubError, Result};
use crate::status::{PortReport, PortStatus, StatusLayout};
use crate::usbfs::{
    ControlChannel, ControlSetup, Direction, DriverRequest, REQ_CLEAR_FEATURE, REQ_GET_DESCRIPTOR,
    REQ_GET_STATUS, REQ_SET_FEATURE, Recipient, RequestType, request_type,
};

pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Class-specific descriptor type of a hub descriptor.
pub const HUB_DESCRIPTOR_TYPE: u8 = 0x29;
pub const HUB_DESCRIPTOR_SIZE: usize = 7;
pub const PORT_FEAT_POWER: u16 = 8;

/// The kernel hub driver is always bound to the first interface.
const HUB_INTERFACE: u32 = 0;

const HUB_CLASS_IN: u8 = request_type(Direction::In, RequestType::Class, Recipient::Device);
const PORT_CLASS_IN: u8 = request_type(Direction::In, RequestType::Class, Recipient::Other);
const PORT_CLASS_OUT: u8 = request_type(Direction::Out, RequestType::Class, Recipient::Other);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubDescriptor {
    pub num_ports: u8,
    pub characteristics: u16,
    pub power_on_to_good_ms: u16,
    pub controller_current_ma: u8,
}

impl HubDescriptor {
    fn parse(raw: &[u8]) -> Option<Self> {
        let num_ports = *raw.get(2)?;
        let characteristics = match raw.get(3..5) {
            Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
            _ => 0,
        };
        Some(Self {
            num_ports,
            characteristics,
            power_on_to_good_ms: u16::from(raw.get(5).copied().unwrap_or(0)) * 2,
            controller_current_ma: raw.get(6).copied().unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "on" => Some(PowerState::On),
            "off" => Some(PowerState::Off),
            _ => None,
        }
    }

    fn request(self) -> u8 {
        match self {
            PowerState::On => REQ_SET_FEATURE,
            PowerState::Off => REQ_CLEAR_FEATURE,
        }
    }
}

/// An identified hub and what was learned about it while opening.
#[derive(Debug)]
pub struct HubSession<C> {
    channel: C,
    device: DeviceDescriptor,
    hub: HubDescriptor,
    layout: StatusLayout,
}

impl<C: ControlChannel> HubSession<C> {
    /// Confirm the device is a hub and read its hub descriptor.
    pub fn open(resolved: ResolvedDevice<C>, addr: DeviceAddress) -> Result<Self> {
        let ResolvedDevice {
            mut channel,
            byte_order,
            ..
        } = resolved;
        let device = device::identify_hub(&mut channel, byte_order, addr)?;
        let hub = read_hub_descriptor(&mut channel)?;
        let layout = StatusLayout::for_level(device.protocol_level());
        debug!("status layout {layout:?}");
        Ok(Self {
            channel,
            device,
            hub,
            layout,
        })
    }

    pub fn num_ports(&self) -> u8 {
        self.hub.num_ports
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn layout(&self) -> StatusLayout {
        self.layout
    }

    fn checked_port(&self, port: i64) -> Option<u8> {
        u8::try_from(port)
            .ok()
            .filter(|p| (1..=self.hub.num_ports).contains(p))
    }

    /// GET_STATUS for one port.
    pub fn port_status(&mut self, port: u8) -> io::Result<PortReport> {
        let setup = ControlSetup {
            request_type: PORT_CLASS_IN,
            request: REQ_GET_STATUS,
            value: 0,
            index: u16::from(port),
        };
        let mut buf = [0u8; 4];
        let got = self.channel.control(setup, &mut buf, TRANSFER_TIMEOUT)?;
        if got < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short port status reply ({got} bytes)"),
            ));
        }
        let status = PortStatus::from_bits_retain(u16::from_le_bytes([buf[0], buf[1]]));
        let change = u16::from_le_bytes([buf[2], buf[3]]);
        debug!("port {port} change bits {change:04x}");
        Ok(PortReport {
            port,
            status,
            change,
            layout: self.layout,
        })
    }

    /// Print one status line, or report why it could not be read.
    pub fn print_port_status<O: Write, E: Write>(
        &mut self,
        port: u8,
        out: &mut O,
        err: &mut E,
    ) -> Result<()> {
        let written = match self.port_status(port) {
            Ok(report) => writeln!(out, "{report}"),
            Err(e) => writeln!(err, "Error in ioctl (get port {port} status): {e}"),
        };
        written.map_err(HubError::Output)
    }

    pub fn print_all<O: Write, E: Write>(&mut self, out: &mut O, err: &mut E) -> Result<()> {
        for port in 1..=self.hub.num_ports {
            self.print_port_status(port, out, err)?;
        }
        Ok(())
    }

    /// Ask the kernel to bind its driver to the hub again.
    pub fn bind(&mut self) -> Result<()> {
        self.channel
            .driver_request(HUB_INTERFACE, DriverRequest::Connect)
            .map_err(HubError::Bind)
    }

    /// Unbind the kernel hub driver so it does not undo our port changes.
    /// `ENODATA` means nothing was bound.
    pub fn detach_driver(&mut self) -> Result<()> {
        match self.channel.driver_request(HUB_INTERFACE, DriverRequest::Disconnect) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENODATA) => {
                info!("no driver bound to interface {HUB_INTERFACE}");
                Ok(())
            }
            Err(e) => Err(HubError::Disconnect(e)),
        }
    }

    /// SET_FEATURE or CLEAR_FEATURE(PORT_POWER) on one port.
    pub fn set_port_power(&mut self, port: u8, state: PowerState) -> io::Result<()> {
        info!("port {port}: power {state:?}");
        let setup = ControlSetup {
            request_type: PORT_CLASS_OUT,
            request: state.request(),
            value: PORT_FEAT_POWER,
            index: u16::from(port),
        };
        self.channel.control(setup, &mut [], TRANSFER_TIMEOUT)?;
        Ok(())
    }

    /// Detach the kernel driver, then apply each `(port, on|off)` pair in
    /// order and print the resulting status of every port that changed.
    /// Bad entries and failed transfers are reported and skipped.
    pub fn power_batch<O: Write, E: Write>(
        &mut self,
        pairs: &[(&str, &str)],
        out: &mut O,
        err: &mut E,
    ) -> Result<()> {
        self.detach_driver()?;

        for &(port_token, state_token) in pairs {
            let requested = parse_port_token(port_token);
            let Some(port) = self.checked_port(requested) else {
                writeln!(err, "Invalid port number: {requested}").map_err(HubError::Output)?;
                continue;
            };
            let Some(state) = PowerState::from_token(state_token) else {
                writeln!(err, "Invalid port power level: {state_token}")
                    .map_err(HubError::Output)?;
                continue;
            };
            if let Err(e) = self.set_port_power(port, state) {
                writeln!(err, "Error in ioctl (set/clear port {port} feature): {e}")
                    .map_err(HubError::Output)?;
                continue;
            }
            self.print_port_status(port, out, err)?;
        }
        Ok(())
    }
}

fn read_hub_descriptor<C: ControlChannel>(channel: &mut C) -> Result<HubDescriptor> {
    let setup = ControlSetup {
        request_type: HUB_CLASS_IN,
        request: REQ_GET_DESCRIPTOR,
        value: u16::from(HUB_DESCRIPTOR_TYPE) << 8,
        index: 0,
    };
    let mut raw = [0u8; HUB_DESCRIPTOR_SIZE];
    let got = channel
        .control(setup, &mut raw, TRANSFER_TIMEOUT)
        .map_err(HubError::HubDescriptor)?;
    let hub = HubDescriptor::parse(&raw[..got.min(raw.len())])
        .ok_or(HubError::ShortHubDescriptor(got))?;
    debug!(
        "{} ports, characteristics {:04x}, power good after {} ms, {} mA",
        hub.num_ports, hub.characteristics, hub.power_on_to_good_ms, hub.controller_current_ma
    );
    Ok(hub)
}
