//! Locating the hub's device node and checking that it is a hub.

use std::io;
use std::path::PathBuf;

use log::debug;

use crate::cli::DeviceAddress;
use crate::error::{HubError, Result};
use crate::usbfs::ControlChannel;

pub const DEVICE_DESCRIPTOR_SIZE: usize = 18;
pub const CLASS_HUB: u8 = 0x09;

/// How multi-byte fields read straight from the device node are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// `/dev/bus/usb` hands out descriptors as they came off the wire.
    LittleEndian,
    /// The old `/proc/bus/usb` interface already converted them.
    Native,
}

impl ByteOrder {
    pub fn read_u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
            ByteOrder::Native => u16::from_ne_bytes(bytes),
        }
    }
}

/// Which of the two device node conventions a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Dev,
    Proc,
}

impl NodeKind {
    pub fn byte_order(self) -> ByteOrder {
        match self {
            NodeKind::Dev => ByteOrder::LittleEndian,
            NodeKind::Proc => ByteOrder::Native,
        }
    }

    pub fn path(self, addr: DeviceAddress) -> PathBuf {
        let root = match self {
            NodeKind::Dev => "/dev/bus/usb",
            NodeKind::Proc => "/proc/bus/usb",
        };
        PathBuf::from(format!("{root}/{:03}/{:03}", addr.bus, addr.device))
    }
}

/// A device node that opened, tagged with how to read its descriptor.
#[derive(Debug)]
pub struct ResolvedDevice<C> {
    pub channel: C,
    pub byte_order: ByteOrder,
    pub path: PathBuf,
}

/// Open the hub's node, trying `/dev/bus/usb` first and `/proc/bus/usb`
/// second. `open` is called with each candidate path in turn.
pub fn resolve<C, F>(addr: DeviceAddress, mut open: F) -> Result<ResolvedDevice<C>>
where
    F: FnMut(&std::path::Path) -> io::Result<C>,
{
    let primary = NodeKind::Dev.path(addr);
    let primary_err = match open(&primary) {
        Ok(channel) => return Ok(resolved(channel, NodeKind::Dev, primary)),
        Err(e) => e,
    };
    debug!("{}: {primary_err}, trying the legacy path", primary.display());

    let fallback = NodeKind::Proc.path(addr);
    match open(&fallback) {
        Ok(channel) => Ok(resolved(channel, NodeKind::Proc, fallback)),
        Err(fallback_err) => Err(HubError::Open {
            primary,
            primary_err,
            fallback,
            fallback_err,
        }),
    }
}

fn resolved<C>(channel: C, kind: NodeKind, path: PathBuf) -> ResolvedDevice<C> {
    let byte_order = kind.byte_order();
    debug!("opened {} ({byte_order:?} descriptors)", path.display());
    ResolvedDevice {
        channel,
        byte_order,
        path,
    }
}

/// The device descriptor fields the controller cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub usb_version: u16,
    pub class: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceDescriptor {
    pub fn parse(raw: &[u8; DEVICE_DESCRIPTOR_SIZE], order: ByteOrder) -> Self {
        Self {
            usb_version: order.read_u16([raw[2], raw[3]]),
            class: raw[4],
            vendor_id: order.read_u16([raw[8], raw[9]]),
            product_id: order.read_u16([raw[10], raw[11]]),
        }
    }

    /// Major USB version, the high byte of `bcdUSB`.
    pub fn protocol_level(&self) -> u8 {
        (self.usb_version >> 8) as u8
    }
}

/// Read the device descriptor and make sure the device is a hub.
pub fn identify_hub<C: ControlChannel>(
    channel: &mut C,
    order: ByteOrder,
    addr: DeviceAddress,
) -> Result<DeviceDescriptor> {
    let mut raw = [0u8; DEVICE_DESCRIPTOR_SIZE];
    let got = channel.read_descriptor(&mut raw).map_err(HubError::ReadDescriptor)?;
    if got != DEVICE_DESCRIPTOR_SIZE {
        return Err(HubError::ShortDescriptor {
            got,
            expected: DEVICE_DESCRIPTOR_SIZE,
        });
    }
    let desc = DeviceDescriptor::parse(&raw, order);
    if desc.class != CLASS_HUB {
        return Err(HubError::NotAHub(addr));
    }
    debug!(
        "hub {:04x}:{:04x} bcdUSB {:04x}, protocol level {}",
        desc.vendor_id,
        desc.product_id,
        desc.usb_version,
        desc.protocol_level()
    );
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const ADDR: DeviceAddress = DeviceAddress { bus: 2, device: 5 };

    #[test]
    fn candidate_paths_are_zero_padded() {
        assert_eq!(NodeKind::Dev.path(ADDR), Path::new("/dev/bus/usb/002/005"));
        assert_eq!(NodeKind::Proc.path(ADDR), Path::new("/proc/bus/usb/002/005"));
    }

    #[test]
    fn primary_path_reads_little_endian() {
        let mut tried = Vec::new();
        let dev = resolve(ADDR, |p| {
            tried.push(p.to_path_buf());
            Ok::<_, io::Error>(())
        })
        .unwrap();
        assert_eq!(dev.byte_order, ByteOrder::LittleEndian);
        assert_eq!(tried, vec![PathBuf::from("/dev/bus/usb/002/005")]);
    }

    #[test]
    fn fallback_path_reads_native() {
        let dev = resolve(ADDR, |p| {
            if p.starts_with("/dev") {
                Err(io::Error::from_raw_os_error(libc::ENOENT))
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(dev.byte_order, ByteOrder::Native);
        assert_eq!(dev.path, Path::new("/proc/bus/usb/002/005"));
    }

    #[test]
    fn both_paths_failing_reports_both() {
        let err = resolve(ADDR, |_| Err::<(), _>(io::Error::from_raw_os_error(libc::EACCES)))
            .unwrap_err();
        let text = err.to_string();
        assert!(matches!(err, HubError::Open { .. }));
        assert!(text.contains("/dev/bus/usb/002/005"));
        assert!(text.contains("/proc/bus/usb/002/005"));
    }

    #[test]
    fn byte_order_applies_to_bcd_usb() {
        let mut raw = [0u8; DEVICE_DESCRIPTOR_SIZE];
        raw[2] = 0x00;
        raw[3] = 0x03;
        raw[4] = CLASS_HUB;
        let desc = DeviceDescriptor::parse(&raw, ByteOrder::LittleEndian);
        assert_eq!(desc.usb_version, 0x0300);
        assert_eq!(desc.protocol_level(), 3);

        let native = u16::to_ne_bytes(0x0200);
        raw[2] = native[0];
        raw[3] = native[1];
        let desc = DeviceDescriptor::parse(&raw, ByteOrder::Native);
        assert_eq!(desc.protocol_level(), 2);
    }
}
