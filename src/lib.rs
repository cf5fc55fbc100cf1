//! Direct control of a USB hub through the Linux usbfs device node.
//!
//! The binary resolves a hub from its `bus:dev` pair, confirms it is a hub,
//! then reports port status, asks the kernel to rebind its driver, or
//! switches port power.

pub mod cli;
pub mod device;
pub mod error;
pub mod hub;
pub mod status;
pub mod usbfs;

pub use error::HubError;
pub use hub::HubSession;
