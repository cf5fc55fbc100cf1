use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cli::DeviceAddress;

/// Failures that end the run with exit status 1.
///
/// Per-port problems are not represented here; they are reported on the
/// error stream and the batch moves on. The underlying system error is the
/// `source` of each variant that has one.
#[derive(Error, Debug)]
pub enum HubError {
    #[error(
        "Unable to open device file {}: {primary_err}\nUnable to open device file {}: {fallback_err}",
        .primary.display(),
        .fallback.display()
    )]
    Open {
        primary: PathBuf,
        primary_err: io::Error,
        fallback: PathBuf,
        fallback_err: io::Error,
    },

    #[error("Error reading device descriptor")]
    ReadDescriptor(#[source] io::Error),

    #[error("Error reading device descriptor: got {got} bytes, expected {expected}")]
    ShortDescriptor { got: usize, expected: usize },

    #[error("Device {0} is not a hub")]
    NotAHub(DeviceAddress),

    #[error("Error in ioctl (read hub descriptor)")]
    HubDescriptor(#[source] io::Error),

    #[error("Error in ioctl (read hub descriptor): short descriptor of {0} bytes")]
    ShortHubDescriptor(usize),

    #[error("Error in ioctl (USBDEVFS_CONNECT)")]
    Bind(#[source] io::Error),

    #[error("Error in ioctl (USBDEVFS_DISCONNECT)")]
    Disconnect(#[source] io::Error),

    #[error("Error writing output")]
    Output(#[source] io::Error),
}

pub type Result<T = ()> = core::result::Result<T, HubError>;
