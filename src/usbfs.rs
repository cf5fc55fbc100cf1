//! Linux usbfs boundary: the ioctl argument layouts from
//! `linux/usbdevice_fs.h` and a device node that speaks them.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::ptr;
use std::time::Duration;

use log::trace;

pub const REQ_GET_STATUS: u8 = 0x00;
pub const REQ_CLEAR_FEATURE: u8 = 0x01;
pub const REQ_SET_FEATURE: u8 = 0x03;
pub const REQ_GET_DESCRIPTOR: u8 = 0x06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Other,
}

/// Build a `bmRequestType` byte.
pub const fn request_type(direction: Direction, kind: RequestType, recipient: Recipient) -> u8 {
    let dir = match direction {
        Direction::Out => 0x00,
        Direction::In => 0x80,
    };
    let kind = match kind {
        RequestType::Standard => 0x00,
        RequestType::Class => 0x20,
    };
    let recipient = match recipient {
        Recipient::Device => 0x00,
        Recipient::Other => 0x03,
    };
    dir | kind | recipient
}

/// Setup packet of a control transfer. `wLength` is the length of the data
/// buffer handed alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Requests forwarded to the kernel driver bound to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverRequest {
    Disconnect,
    Connect,
}

/// The operations the hub controller needs from an open device.
pub trait ControlChannel {
    /// Read the device descriptor that usbfs serves at the start of the node.
    fn read_descriptor(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Run a control transfer on endpoint 0 and return the number of bytes moved.
    fn control(&mut self, setup: ControlSetup, data: &mut [u8], timeout: Duration)
    -> io::Result<usize>;

    /// Forward a driver connect/disconnect request for `interface`.
    fn driver_request(&mut self, interface: u32, request: DriverRequest) -> io::Result<()>;
}

impl<C: ControlChannel + ?Sized> ControlChannel for &mut C {
    fn read_descriptor(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_descriptor(buf)
    }

    fn control(
        &mut self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> io::Result<usize> {
        (**self).control(setup, data, timeout)
    }

    fn driver_request(&mut self, interface: u32, request: DriverRequest) -> io::Result<()> {
        (**self).driver_request(interface, request)
    }
}

mod sys {
    use nix::{ioctl_readwrite, request_code_none};

    #[repr(C)]
    pub struct UsbfsCtrlTransfer {
        pub request_type: u8,
        pub request: u8,
        pub value: u16,
        pub index: u16,
        pub length: u16,
        pub timeout: u32,
        pub data: *mut libc::c_void,
    }

    #[repr(C)]
    pub struct UsbfsIoctl {
        pub ifno: libc::c_int,
        pub ioctl_code: libc::c_int,
        pub data: *mut libc::c_void,
    }

    ioctl_readwrite!(usbdevfs_control, b'U', 0, UsbfsCtrlTransfer);
    ioctl_readwrite!(usbdevfs_ioctl, b'U', 18, UsbfsIoctl);

    // Carried inside `UsbfsIoctl::ioctl_code`, not issued on their own.
    pub const USBDEVFS_DISCONNECT: libc::c_int = request_code_none!(b'U', 22) as libc::c_int;
    pub const USBDEVFS_CONNECT: libc::c_int = request_code_none!(b'U', 23) as libc::c_int;
}

/// An open usbfs device node.
#[derive(Debug)]
pub struct UsbfsDevice {
    file: File,
}

impl UsbfsDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl ControlChannel for UsbfsDevice {
    fn read_descriptor(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn control(
        &mut self,
        setup: ControlSetup,
        data: &mut [u8],
        timeout: Duration,
    ) -> io::Result<usize> {
        let length = u16::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "control buffer too large"))?;
        let mut ctrl = sys::UsbfsCtrlTransfer {
            request_type: setup.request_type,
            request: setup.request,
            value: setup.value,
            index: setup.index,
            length,
            timeout: u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX),
            data: if data.is_empty() {
                ptr::null_mut()
            } else {
                data.as_mut_ptr().cast()
            },
        };
        trace!("USBDEVFS_CONTROL {setup:?} length={length}");
        // SAFETY: `ctrl` is a live repr(C) struct and its data pointer covers
        // `length` writable bytes for the duration of the call.
        let moved = unsafe { sys::usbdevfs_control(self.file.as_raw_fd(), &mut ctrl) }?;
        Ok(moved as usize)
    }

    fn driver_request(&mut self, interface: u32, request: DriverRequest) -> io::Result<()> {
        let code = match request {
            DriverRequest::Disconnect => sys::USBDEVFS_DISCONNECT,
            DriverRequest::Connect => sys::USBDEVFS_CONNECT,
        };
        let mut arg = sys::UsbfsIoctl {
            ifno: interface as libc::c_int,
            ioctl_code: code,
            data: ptr::null_mut(),
        };
        trace!("USBDEVFS_IOCTL {request:?} interface={interface}");
        // SAFETY: `arg` is a live repr(C) struct; connect/disconnect carry no data.
        unsafe { sys::usbdevfs_ioctl(self.file.as_raw_fd(), &mut arg) }?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_request_types() {
        assert_eq!(request_type(Direction::In, RequestType::Class, Recipient::Device), 0xa0);
        assert_eq!(request_type(Direction::In, RequestType::Class, Recipient::Other), 0xa3);
        assert_eq!(request_type(Direction::Out, RequestType::Class, Recipient::Other), 0x23);
        assert_eq!(request_type(Direction::In, RequestType::Standard, Recipient::Device), 0x80);
    }

    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64"))]
    #[test]
    fn driver_codes_use_generic_ioc_layout() {
        assert_eq!(sys::USBDEVFS_DISCONNECT, 0x5516);
        assert_eq!(sys::USBDEVFS_CONNECT, 0x5517);
    }

    #[cfg(any(
        target_arch = "powerpc",
        target_arch = "powerpc64",
        target_arch = "mips",
        target_arch = "mips64",
        target_arch = "sparc64"
    ))]
    #[test]
    fn driver_codes_carry_the_none_direction_bit() {
        assert_eq!(sys::USBDEVFS_DISCONNECT, 0x2000_5516);
        assert_eq!(sys::USBDEVFS_CONNECT, 0x2000_5517);
    }

    #[cfg(all(target_pointer_width = "64", any(target_arch = "x86_64", target_arch = "aarch64")))]
    #[test]
    fn transfer_request_numbers_match_kernel_headers() {
        use std::mem::size_of;

        assert_eq!(size_of::<sys::UsbfsCtrlTransfer>(), 24);
        assert_eq!(size_of::<sys::UsbfsIoctl>(), 16);
        assert_eq!(
            nix::request_code_readwrite!(b'U', 0, size_of::<sys::UsbfsCtrlTransfer>()) as u32,
            0xc018_5500
        );
        assert_eq!(
            nix::request_code_readwrite!(b'U', 18, size_of::<sys::UsbfsIoctl>()) as u32,
            0xc010_5512
        );
    }
}
