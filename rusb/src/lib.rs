//! A minimal, dependency-light USB host library.
//!
//! Rather than binding against the C `libusb`, each platform module talks
//! directly to the operating system's native USB facility (`usbfs` on
//! Linux, WinUSB on Windows, IOKit on macOS, WebUSB in the browser). The
//! public surface is the lowest common denominator those backends can all
//! provide: device enumeration, descriptor reads, and control/bulk/interrupt
//! transfers.

mod platform;
pub mod support;

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

/// A list of USB devices, as returned by [`devices`].
pub struct DeviceList {
    devices: Vec<Device>,
}

impl DeviceList {
    /// Returns an iterator over the devices in the list.
    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.devices.iter()
    }

    /// Returns the number of devices in the list.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Returns `true` if the list has no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl IntoIterator for DeviceList {
    type Item = Device;
    type IntoIter = std::vec::IntoIter<Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

/// A USB device discovered on the bus, not yet opened.
pub struct Device {
    pub(crate) inner: platform::Device,
}

impl Device {
    /// Opens the device for I/O.
    pub fn open(&self) -> Result<DeviceHandle, Error> {
        platform::open(self)
    }

    /// Reads the device descriptor.
    pub fn get_device_descriptor(&self) -> Result<DeviceDescriptor, Error> {
        platform::get_device_descriptor(self)
    }
}

/// A handle to an open USB device.
pub struct DeviceHandle {
    pub(crate) inner: platform::DeviceHandle,
}

impl Deref for DeviceHandle {
    type Target = platform::DeviceHandle;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DeviceHandle {
    /// Performs a control transfer, returning the number of bytes
    /// transferred.
    pub fn control_transfer(
        &self,
        request: ControlRequest,
        data: ControlTransferData<'_>,
        timeout: Duration,
    ) -> Result<usize, Error> {
        platform::control_transfer(self, request, data, timeout)
    }

    /// Performs a bulk transfer on `endpoint`, returning the number of bytes
    /// transferred.
    pub fn bulk_transfer(
        &self,
        endpoint: u8,
        buffer: TransferBuffer<'_>,
        timeout: Duration,
    ) -> Result<usize, Error> {
        platform::bulk_transfer(self, endpoint, buffer, timeout)
    }

    /// Performs an interrupt transfer on `endpoint`, returning the number of
    /// bytes transferred.
    pub fn interrupt_transfer(
        &self,
        endpoint: u8,
        buffer: TransferBuffer<'_>,
        timeout: Duration,
    ) -> Result<usize, Error> {
        platform::interrupt_transfer(self, endpoint, buffer, timeout)
    }

    /// Claims `interface` so this process owns the endpoints it exposes.
    pub fn claim_interface(&self, interface: u8) -> Result<(), Error> {
        platform::claim_interface(self, interface)
    }

    /// Releases a previously claimed interface.
    pub fn release_interface(&self, interface: u8) -> Result<(), Error> {
        platform::release_interface(self, interface)
    }

    /// Selects an alternate setting on `interface`.
    pub fn set_interface_alt_setting(&self, interface: u8, alt_setting: u8) -> Result<(), Error> {
        platform::set_interface_alt_setting(self, interface, alt_setting)
    }

    /// Issues a USB port reset on the device.
    pub fn reset_device(&self) -> Result<(), Error> {
        platform::reset_device(self)
    }

    /// Clears a halt/stall condition on `endpoint`.
    pub fn clear_halt(&self, endpoint: u8) -> Result<(), Error> {
        platform::clear_halt(self, endpoint)
    }

    /// Detaches the kernel driver bound to `interface`, if any.
    pub fn detach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        platform::detach_kernel_driver(self, interface)
    }

    /// Re-attaches the kernel driver on `interface`.
    pub fn attach_kernel_driver(&self, interface: u8) -> Result<(), Error> {
        platform::attach_kernel_driver(self, interface)
    }

    /// Reads a string descriptor and lossily converts it to ASCII.
    ///
    /// Follows the usual two-step dance: fetch the supported language IDs
    /// from string descriptor zero, then re-request `index` in the first
    /// language.
    #[cfg(not(all(target_arch = "wasm32", feature = "webusb")))]
    pub fn read_string_descriptor_ascii(&self, index: u8) -> Result<String, Error> {
        const GET_DESCRIPTOR: u8 = 0x06;
        const DESCRIPTOR_TYPE_STRING: u16 = 0x03;

        let mut langids = [0u8; 255];
        let request = ControlRequest {
            request_type: 0x80,
            request: GET_DESCRIPTOR,
            value: DESCRIPTOR_TYPE_STRING << 8,
            index: 0,
        };
        let n = self.control_transfer(
            request,
            ControlTransferData::In(&mut langids),
            Duration::from_millis(1000),
        )?;
        if n < 4 {
            return Err(Error::Unknown);
        }
        let langid = u16::from_le_bytes([langids[2], langids[3]]);

        let mut buf = [0u8; 255];
        let request = ControlRequest {
            request_type: 0x80,
            request: GET_DESCRIPTOR,
            value: (DESCRIPTOR_TYPE_STRING << 8) | index as u16,
            index: langid,
        };
        let n = self.control_transfer(
            request,
            ControlTransferData::In(&mut buf),
            Duration::from_millis(1000),
        )?;
        if n < 2 {
            return Err(Error::Unknown);
        }
        let len = buf[0] as usize;
        let n = n.min(len);
        let utf16: Vec<u16> = buf[2..n]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&utf16))
    }
}

/// The wValue/wIndex/bRequest/bmRequestType of a control transfer, minus the
/// data stage.
#[derive(Debug, Clone, Copy)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Which direction a transfer's data stage moves in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    In,
    Out,
}

/// The data stage of a control transfer.
pub enum ControlTransferData<'a> {
    /// No data stage.
    None,
    /// Device-to-host: `buffer` is filled by the transfer.
    In(&'a mut [u8]),
    /// Host-to-device: `buffer` is sent to the device.
    Out(&'a [u8]),
}

impl<'a> ControlTransferData<'a> {
    pub(crate) fn direction(&self) -> Option<TransferDirection> {
        match self {
            ControlTransferData::None => None,
            ControlTransferData::In(_) => Some(TransferDirection::In),
            ControlTransferData::Out(_) => Some(TransferDirection::Out),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            ControlTransferData::None => 0,
            ControlTransferData::In(buffer) => buffer.len(),
            ControlTransferData::Out(buffer) => buffer.len(),
        }
    }
}

/// The buffer of a bulk or interrupt transfer.
pub enum TransferBuffer<'a> {
    /// Device-to-host: `buffer` is filled by the transfer.
    In(&'a mut [u8]),
    /// Host-to-device: `buffer` is sent to the device.
    Out(&'a [u8]),
}

impl<'a> TransferBuffer<'a> {
    pub(crate) fn direction(&self) -> TransferDirection {
        match self {
            TransferBuffer::In(_) => TransferDirection::In,
            TransferBuffer::Out(_) => TransferDirection::Out,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            TransferBuffer::In(buffer) => buffer.len(),
            TransferBuffer::Out(buffer) => buffer.len(),
        }
    }
}

/// An error from the USB library.
#[derive(Debug)]
pub enum Error {
    /// An OS-level error, the raw `errno`/`GetLastError`/`IOReturn` value.
    Os(i32),
    /// The operation is not supported on this platform or device.
    NotSupported,
    /// An unrecognized or unclassified error.
    Unknown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Os(code) => write!(f, "OS error {}", code),
            Error::NotSupported => write!(f, "operation not supported"),
            Error::Unknown => write!(f, "unknown error"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Error::Os(code),
            None => Error::Unknown,
        }
    }
}

#[cfg(target_os = "windows")]
impl From<windows::core::Error> for Error {
    fn from(err: windows::core::Error) -> Self {
        Error::Os(err.code().0)
    }
}

/// A USB device descriptor, as defined in USB 2.0 section 9.6.1.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DeviceDescriptor {
    pub length: u8,
    pub descriptor_type: u8,
    pub usb_version: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub max_packet_size_0: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_version: u16,
    pub manufacturer_string_index: u8,
    pub product_string_index: u8,
    pub serial_number_string_index: u8,
    pub num_configurations: u8,
}

/// Link speed, reported by backends that expose it. Unused by any backend
/// implemented today; kept so the fallback module has something concrete to
/// hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speed {
    Unknown,
    Low,
    Full,
    High,
    Super,
}

/// Placeholder for a USB configuration descriptor. No backend parses one
/// today; DFU devices expose everything the programmer needs through the
/// device descriptor and a single, fixed interface.
#[derive(Debug, Clone)]
pub struct ConfigurationDescriptor {
    pub configuration_value: u8,
    pub num_interfaces: u8,
}

/// Enumerates all USB devices visible to this process.
pub fn devices() -> Result<DeviceList, Error> {
    platform::devices()
}
