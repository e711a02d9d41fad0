//! Platform-specific packet I/O implementations.

#[cfg(target_os = "linux")]
pub mod linux;

use crate::{Sink, Source};
use hoptrace_core::TraceError;
use std::net::IpAddr;

/// Opens the capture source and send socket appropriate for the current platform.
pub fn open(target: IpAddr) -> Result<(Box<dyn Source>, Box<dyn Sink>), TraceError> {
    #[cfg(target_os = "linux")]
    return linux::open(target);

    #[cfg(not(target_os = "linux"))]
    {
        let _ = target;
        Err(TraceError::DriverNotAvailable)
    }
}
