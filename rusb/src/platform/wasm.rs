#![cfg(all(target_arch = "wasm32", feature = "webusb"))]

//! WebUSB-specific USB backend implementation.

use crate::{
    ControlRequest, ControlTransferData, Device, DeviceDescriptor, DeviceList, Error,
    TransferBuffer,
};
use wasm_bindgen_futures::JsFuture;

/// The WebUSB-specific device structure.
pub struct WasmDevice(pub web_sys::UsbDevice);

/// The WebUSB-specific device handle.
pub struct WasmDeviceHandle {
    pub device: web_sys::UsbDevice,
}

pub fn devices() -> Result<DeviceList, Error> {
    // Implementation to enumerate devices using WebUSB will go here.
    Ok(DeviceList {
        devices: Vec::new(),
    })
}

pub async fn open(device: &Device) -> Result<crate::DeviceHandle, Error> {
    let device = &device.inner.0;
    JsFuture::from(device.open()).await.unwrap();
    Ok(crate::DeviceHandle {
        inner: WasmDeviceHandle {
            device: device.clone(),
        },
    })
}

pub fn get_device_descriptor(_device: &Device) -> Result<DeviceDescriptor, Error> {
    unimplemented!()
}

// WebUSB's transfer methods are all Promise-returning, which doesn't fit
// this crate's synchronous DeviceHandle contract. TODO: thread these
// through wasm_bindgen_futures once callers can await them.
pub fn control_transfer(
    _handle: &crate::DeviceHandle,
    _request: ControlRequest,
    _data: ControlTransferData<'_>,
    _timeout: std::time::Duration,
) -> Result<usize, Error> {
    Err(Error::NotSupported)
}

pub fn bulk_transfer(
    _handle: &crate::DeviceHandle,
    _endpoint: u8,
    _buffer: TransferBuffer<'_>,
    _timeout: std::time::Duration,
) -> Result<usize, Error> {
    Err(Error::NotSupported)
}

pub fn interrupt_transfer(
    _handle: &crate::DeviceHandle,
    _endpoint: u8,
    _buffer: TransferBuffer<'_>,
    _timeout: std::time::Duration,
) -> Result<usize, Error> {
    Err(Error::NotSupported)
}

pub fn claim_interface(_handle: &crate::DeviceHandle, _interface: u8) -> Result<(), Error> {
    Err(Error::NotSupported)
}

pub fn release_interface(_handle: &crate::DeviceHandle, _interface: u8) -> Result<(), Error> {
    Err(Error::NotSupported)
}

pub fn set_interface_alt_setting(
    _handle: &crate::DeviceHandle,
    _interface: u8,
    _alt_setting: u8,
) -> Result<(), Error> {
    Err(Error::NotSupported)
}

pub fn reset_device(_handle: &crate::DeviceHandle) -> Result<(), Error> {
    Err(Error::NotSupported)
}

pub fn clear_halt(_handle: &crate::DeviceHandle, _endpoint: u8) -> Result<(), Error> {
    Err(Error::NotSupported)
}

pub fn detach_kernel_driver(_handle: &crate::DeviceHandle, _interface: u8) -> Result<(), Error> {
    Err(Error::NotSupported)
}

pub fn attach_kernel_driver(_handle: &crate::DeviceHandle, _interface: u8) -> Result<(), Error> {
    Err(Error::NotSupported)
}