//! DFU 1.0 control-transfer wrappers and state-machine normalization.
//!
//! Every raw `DFU_*` request goes through [`DfuDevice`]; no other module in
//! this crate issues a control transfer directly.

use std::time::Duration;

use log::{debug, trace};
use rusb::{ControlRequest, ControlTransferData, DeviceHandle};

use crate::error::{Error, Result};
use crate::target::DeviceClass;

use super::status::{DfuState, DfuStatusRecord};

const DFU_DETACH: u8 = 0;
const DFU_DNLOAD: u8 = 1;
const DFU_UPLOAD: u8 = 2;
const DFU_GETSTATUS: u8 = 3;
const DFU_CLRSTATUS: u8 = 4;
const DFU_GETSTATE: u8 = 5;
const DFU_ABORT: u8 = 6;

const USB_TYPE_CLASS_INTERFACE_OUT: u8 = 0x21;
const USB_TYPE_CLASS_INTERFACE_IN: u8 = 0xA1;

/// All six DFU class requests use this timeout (§4.2): erasing and flashing
/// can legitimately take several seconds.
const DFU_TIMEOUT: Duration = Duration::from_secs(10);

/// The data-transfer surface the vendor protocol modules (`atmel`, `stm32`)
/// and [`DfuDevice::make_idle`] drive a device through. Implemented by
/// [`DfuDevice`] for real hardware and by a fake in this module's tests, so
/// the state-machine and command-framing logic can be exercised without a
/// USB device.
pub trait DfuTransport {
    fn download(&mut self, data: &[u8]) -> Result<usize>;
    fn upload(&mut self, buffer: &mut [u8]) -> Result<usize>;
    fn get_status(&self) -> Result<DfuStatusRecord>;
    fn clear_status(&self) -> Result<()>;
    fn abort(&self) -> Result<()>;
    fn transaction_counter(&self) -> u16;
    fn set_transaction_counter(&mut self, value: u16);
}

impl DfuTransport for DfuDevice {
    fn download(&mut self, data: &[u8]) -> Result<usize> {
        DfuDevice::download(self, data)
    }

    fn upload(&mut self, buffer: &mut [u8]) -> Result<usize> {
        DfuDevice::upload(self, buffer)
    }

    fn get_status(&self) -> Result<DfuStatusRecord> {
        DfuDevice::get_status(self)
    }

    fn clear_status(&self) -> Result<()> {
        DfuDevice::clear_status(self)
    }

    fn abort(&self) -> Result<()> {
        DfuDevice::abort(self)
    }

    fn transaction_counter(&self) -> u16 {
        DfuDevice::transaction_counter(self)
    }

    fn set_transaction_counter(&mut self, value: u16) {
        DfuDevice::set_transaction_counter(self, value)
    }
}

/// An opened, interface-claimed DFU device together with the mutable state a
/// session needs: the transaction counter and the vendor dialect tag.
pub struct DfuDevice {
    handle: DeviceHandle,
    interface: u8,
    class: DeviceClass,
    transaction_counter: u16,
}

impl DfuDevice {
    pub(crate) fn new(handle: DeviceHandle, interface: u8, class: DeviceClass) -> Self {
        DfuDevice {
            handle,
            interface,
            class,
            transaction_counter: 0,
        }
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn transaction_counter(&self) -> u16 {
        self.transaction_counter
    }

    /// Resets the transaction counter, used by the STM32 protocol between
    /// non-contiguous address segments (§4.5).
    pub fn set_transaction_counter(&mut self, value: u16) {
        self.transaction_counter = value;
    }

    /// DFU_DETACH (DFU spec 1.0 §5.1).
    pub fn detach(&self, timeout_ms: u16) -> Result<()> {
        trace!("DFU_DETACH timeout={timeout_ms}ms");
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_OUT,
            request: DFU_DETACH,
            value: timeout_ms,
            index: self.interface as u16,
        };
        self.handle
            .control_transfer(request, ControlTransferData::None, DFU_TIMEOUT)?;
        Ok(())
    }

    /// DFU_DNLOAD (DFU spec 1.0 §6.1.1). Increments the transaction counter.
    pub fn download(&mut self, data: &[u8]) -> Result<usize> {
        trace!(
            "DFU_DNLOAD wValue={} len={}",
            self.transaction_counter,
            data.len()
        );
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_OUT,
            request: DFU_DNLOAD,
            value: self.transaction_counter,
            index: self.interface as u16,
        };
        let n = self
            .handle
            .control_transfer(request, ControlTransferData::Out(data), DFU_TIMEOUT)?;
        self.transaction_counter = self.transaction_counter.wrapping_add(1);
        Ok(n)
    }

    /// DFU_UPLOAD (DFU spec 1.0 §6.2). Increments the transaction counter.
    pub fn upload(&mut self, buffer: &mut [u8]) -> Result<usize> {
        trace!(
            "DFU_UPLOAD wValue={} len={}",
            self.transaction_counter,
            buffer.len()
        );
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_IN,
            request: DFU_UPLOAD,
            value: self.transaction_counter,
            index: self.interface as u16,
        };
        let n =
            self.handle
                .control_transfer(request, ControlTransferData::In(buffer), DFU_TIMEOUT)?;
        self.transaction_counter = self.transaction_counter.wrapping_add(1);
        Ok(n)
    }

    /// DFU_GETSTATUS (DFU spec 1.0 §6.1.2).
    pub fn get_status(&self) -> Result<DfuStatusRecord> {
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_IN,
            request: DFU_GETSTATUS,
            value: 0,
            index: self.interface as u16,
        };
        let mut buf = [0u8; 6];
        let n = self
            .handle
            .control_transfer(request, ControlTransferData::In(&mut buf), DFU_TIMEOUT)?;
        if n != 6 {
            return Err(Error::Flash(format!(
                "DFU_GETSTATUS returned {n} bytes, expected 6"
            )));
        }
        let status = DfuStatusRecord::from_wire(&buf)
            .map_err(|code| Error::Flash(format!("device reported unrecognized code {code:?}")))?;
        trace!(
            "DFU_GETSTATUS -> status={:?} state={:?} poll_timeout={}ms",
            status.status,
            status.state,
            status.poll_timeout
        );
        Ok(status)
    }

    /// DFU_CLRSTATUS (DFU spec 1.0 §6.1.3).
    pub fn clear_status(&self) -> Result<()> {
        trace!("DFU_CLRSTATUS");
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_OUT,
            request: DFU_CLRSTATUS,
            value: 0,
            index: self.interface as u16,
        };
        self.handle
            .control_transfer(request, ControlTransferData::None, DFU_TIMEOUT)?;
        Ok(())
    }

    /// DFU_GETSTATE (DFU spec 1.0 §6.1.5).
    pub fn get_state(&self) -> Result<DfuState> {
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_IN,
            request: DFU_GETSTATE,
            value: 0,
            index: self.interface as u16,
        };
        let mut buf = [0u8; 1];
        self.handle
            .control_transfer(request, ControlTransferData::In(&mut buf), DFU_TIMEOUT)?;
        DfuState::try_from(buf[0])
            .map_err(|_| Error::Flash(format!("unrecognized DFU state 0x{:02x}", buf[0])))
    }

    /// DFU_ABORT (DFU spec 1.0 §6.1.4).
    pub fn abort(&self) -> Result<()> {
        trace!("DFU_ABORT");
        let request = ControlRequest {
            request_type: USB_TYPE_CLASS_INTERFACE_OUT,
            request: DFU_ABORT,
            value: 0,
            index: self.interface as u16,
        };
        self.handle
            .control_transfer(request, ControlTransferData::None, DFU_TIMEOUT)?;
        Ok(())
    }

    /// Drives the device's DFU state machine back to `dfuIDLE`/`OK` from any
    /// legal starting state, per §4.2. Up to four attempts; a device left in
    /// `appIDLE`, `appDETACH`, or `dfuMANIFEST-WAIT-RESET` cannot be
    /// recovered without re-enumeration and is reported as a hard failure.
    pub fn make_idle(&mut self) -> Result<()> {
        drive_to_idle(self)
    }

    /// Releases the claimed interface. Called on every exit path of
    /// [`crate::usb_session::open_session`], success or failure.
    pub fn release(&self) -> Result<()> {
        self.handle.release_interface(self.interface)?;
        Ok(())
    }

    pub fn interface(&self) -> u8 {
        self.interface
    }
}

/// The production `make_idle` algorithm, generic over [`DfuTransport`] so it
/// can be driven by a fake in tests as well as by [`DfuDevice`] against real
/// hardware.
fn drive_to_idle<T: DfuTransport>(dev: &mut T) -> Result<()> {
    let mut last = None;
    for attempt in 0..4 {
        let status = match dev.get_status() {
            Ok(status) => status,
            Err(_) => {
                let _ = dev.clear_status();
                continue;
            }
        };
        last = Some(status);

        use DfuState::*;
        match status.state {
            dfuIDLE if status.status == super::status::DfuStatus::OK => {
                debug!("make_idle: reached dfuIDLE/OK after {} attempt(s)", attempt + 1);
                return Ok(());
            }
            dfuIDLE => {
                let _ = dev.clear_status();
            }
            dfuDNLOAD_SYNC | dfuDNLOAD_IDLE | dfuMANIFEST_SYNC | dfuUPLOAD_IDLE | dfuDNBUSY
            | dfuMANIFEST => {
                let _ = dev.abort();
            }
            dfuERROR => {
                let _ = dev.clear_status();
            }
            appIDLE | appDETACH | dfuMANIFEST_WAIT_RESET => {
                return Err(Error::NotIdle {
                    attempts: attempt + 1,
                    state: status.state,
                    status: status.status,
                });
            }
        }
    }

    let (state, status) = last
        .map(|s| (s.state, s.status))
        .unwrap_or((DfuState::dfuERROR, super::status::DfuStatus::errUNKNOWN));
    Err(Error::NotIdle {
        attempts: 4,
        state,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::super::status::DfuStatus;
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    /// A queue-backed fake transport driving the real [`drive_to_idle`]
    /// algorithm without any USB device: `get_status` pops the next
    /// programmed state, `clear_status`/`abort` just tally how often they
    /// were called.
    struct FakeTransport {
        states: RefCell<VecDeque<(DfuState, DfuStatus)>>,
        aborts: Cell<u32>,
        clears: Cell<u32>,
    }

    impl FakeTransport {
        fn new(states: Vec<(DfuState, DfuStatus)>) -> Self {
            FakeTransport {
                states: RefCell::new(states.into_iter().collect()),
                aborts: Cell::new(0),
                clears: Cell::new(0),
            }
        }
    }

    impl DfuTransport for FakeTransport {
        fn download(&mut self, _data: &[u8]) -> Result<usize> {
            unreachable!("make_idle never downloads")
        }

        fn upload(&mut self, _buffer: &mut [u8]) -> Result<usize> {
            unreachable!("make_idle never uploads")
        }

        fn get_status(&self) -> Result<DfuStatusRecord> {
            let (state, status) = self
                .states
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| Error::Flash("fake transport exhausted".into()))?;
            Ok(DfuStatusRecord {
                status,
                poll_timeout: 0,
                state,
                string_index: 0,
            })
        }

        fn clear_status(&self) -> Result<()> {
            self.clears.set(self.clears.get() + 1);
            Ok(())
        }

        fn abort(&self) -> Result<()> {
            self.aborts.set(self.aborts.get() + 1);
            Ok(())
        }

        fn transaction_counter(&self) -> u16 {
            0
        }

        fn set_transaction_counter(&mut self, _value: u16) {}
    }

    #[test]
    fn make_idle_already_idle_is_one_attempt() {
        let mut fake = FakeTransport::new(vec![(DfuState::dfuIDLE, DfuStatus::OK)]);
        assert!(drive_to_idle(&mut fake).is_ok());
        assert_eq!(fake.aborts.get(), 0);
        assert_eq!(fake.clears.get(), 0);
    }

    #[test]
    fn make_idle_aborts_from_download_busy() {
        let mut fake = FakeTransport::new(vec![
            (DfuState::dfuDNBUSY, DfuStatus::OK),
            (DfuState::dfuIDLE, DfuStatus::OK),
        ]);
        assert!(drive_to_idle(&mut fake).is_ok());
        assert_eq!(fake.aborts.get(), 1);
    }

    #[test]
    fn make_idle_fails_from_app_idle() {
        let mut fake = FakeTransport::new(vec![(DfuState::appIDLE, DfuStatus::OK)]);
        assert!(drive_to_idle(&mut fake).is_err());
    }

    #[test]
    fn make_idle_clears_error_state() {
        let mut fake = FakeTransport::new(vec![
            (DfuState::dfuERROR, DfuStatus::errVERIFY),
            (DfuState::dfuIDLE, DfuStatus::OK),
        ]);
        assert!(drive_to_idle(&mut fake).is_ok());
        assert_eq!(fake.clears.get(), 1);
    }
}
