use thiserror::Error;

/// The finite set of outcome kinds every operation in this crate can return.
///
/// This mirrors the device-side error taxonomy a burner reports back over
/// the vendor protocol: callers that only care about the *kind* of failure
/// (to decide whether to retry, abort, or prompt the user) can match on
/// this without unpacking the richer [`Error`] variant.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperationStatus {
    Ok,
    BadParameter,
    DeviceNotFound,
    OpenFailed,
    TransferFailed,
    Timeout,
    ProtocolViolation,
    Memory,
    Io,
    FileIo,
}

/// The error type returned by every fallible operation in this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    BadParameter(String),

    #[error("no matching USB device found")]
    DeviceNotFound,

    #[error("failed to open USB device: {0}")]
    OpenFailed(String),

    #[error("USB transfer failed: {0}")]
    TransferFailed(String),

    /// A transfer timed out. Carries the byte count the transport managed
    /// to move before the timeout fired, if known — this is what lets the
    /// "timeout but complete" quirk (§4.A, §7) be detected by comparing it
    /// against the requested length.
    #[error("USB transfer timed out ({bytes_transferred} bytes transferred)")]
    Timeout { bytes_transferred: usize },

    #[error("device returned a response that violates the protocol: {0}")]
    ProtocolViolation(String),

    #[error("allocation failure")]
    Memory,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("firmware blob I/O error: {0}")]
    FileIo(String),

    #[error("libusb error: {0}")]
    Usb(#[from] rusb::Error),
}

impl Error {
    /// Projects this error onto the coarse [`OperationStatus`] taxonomy from §7.
    pub fn status(&self) -> OperationStatus {
        match self {
            Error::BadParameter(_) => OperationStatus::BadParameter,
            Error::DeviceNotFound => OperationStatus::DeviceNotFound,
            Error::OpenFailed(_) => OperationStatus::OpenFailed,
            Error::TransferFailed(_) => OperationStatus::TransferFailed,
            Error::Timeout { .. } => OperationStatus::Timeout,
            Error::ProtocolViolation(_) => OperationStatus::ProtocolViolation,
            Error::Memory => OperationStatus::Memory,
            Error::Io(_) => OperationStatus::Io,
            Error::FileIo(_) => OperationStatus::FileIo,
            Error::Usb(e) => usb_error_status(*e),
        }
    }

    /// True for transport errors the retry policy in §4.C should retry on:
    /// timeout, pipe (device stalled the endpoint), or no-device (transient
    /// disappearance during re-enumeration).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Usb(rusb::Error::Timeout)
            | Error::Usb(rusb::Error::Pipe)
            | Error::Usb(rusb::Error::NoDevice) => true,
            _ => false,
        }
    }
}

fn usb_error_status(e: rusb::Error) -> OperationStatus {
    match e {
        rusb::Error::Timeout => OperationStatus::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => OperationStatus::DeviceNotFound,
        rusb::Error::Access | rusb::Error::Busy => OperationStatus::OpenFailed,
        _ => OperationStatus::TransferFailed,
    }
}
