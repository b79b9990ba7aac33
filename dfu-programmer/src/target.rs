//! Supported target boards: the vendor dialect each one speaks and the
//! memory geometry flash/erase/validate need to agree with.

use crate::error::{Error, Result};

/// Which vendor protocol dialect a device's bootloader speaks, layered on
/// top of the common DFU 1.0 transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    /// Atmel 8051-family bootloader (AT89C51SND1C and siblings).
    Atmel8051,
    /// Atmel AVR/AVR32 bootloader (AT90USB and siblings).
    AtmelAvr,
    /// STMicroelectronics STM32 DfuSe bootloader.
    Stm32,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Atmel8051 => "8051",
            DeviceClass::AtmelAvr => "AVR",
            DeviceClass::Stm32 => "AVR32", // DfuSe reuses the AVR32 user-page convention (§9).
        }
    }
}

/// A board `dfu-programmer` knows how to talk to, keyed by name on the
/// command line.
#[derive(Clone, Debug)]
pub struct Target {
    pub name: &'static str,
    pub class: DeviceClass,
    pub chip_id: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub memory_size: u32,
    pub flash_page_size: u16,
    /// Send `DFU_ABORT` once immediately after opening the interface, before
    /// any other request. Some Atmel AVR bootloaders otherwise leave the
    /// device wedged in `dfuDNBUSY`.
    pub initial_abort: bool,
    /// Only claim the interface whose `bInterfaceClass` is `0xFE`
    /// (Application Specific, DFU). Devices that expose DFU on interface 0
    /// of their sole configuration don't need this and may not even report
    /// the DFU class correctly.
    pub honor_interfaceclass: bool,
}

/// Fixed vendor/product ID for every known STM32 DfuSe bootloader target.
const STM32_VENDOR_ID: u16 = 0x0483;
const STM32_PRODUCT_ID: u16 = 0xDF11;

static TARGETS: &[Target] = &[
    Target {
        name: "at89c51snd1c",
        class: DeviceClass::Atmel8051,
        chip_id: 0x2FFF,
        vendor_id: 0x03eb,
        product_id: 0x2FFF,
        memory_size: 0x10000,
        flash_page_size: 128,
        initial_abort: false,
        honor_interfaceclass: true,
    },
    Target {
        name: "at89c5130",
        class: DeviceClass::Atmel8051,
        chip_id: 0x2FFD,
        vendor_id: 0x03eb,
        product_id: 0x2FFD,
        memory_size: 0x4000,
        flash_page_size: 128,
        initial_abort: false,
        honor_interfaceclass: true,
    },
    Target {
        name: "at89c5131",
        class: DeviceClass::Atmel8051,
        chip_id: 0x2FFD,
        vendor_id: 0x03eb,
        product_id: 0x2FFD,
        memory_size: 0x8000,
        flash_page_size: 128,
        initial_abort: false,
        honor_interfaceclass: true,
    },
    Target {
        name: "at89c5132",
        class: DeviceClass::Atmel8051,
        chip_id: 0x2FFF,
        vendor_id: 0x03eb,
        product_id: 0x2FFF,
        memory_size: 0x10000,
        flash_page_size: 128,
        initial_abort: false,
        honor_interfaceclass: true,
    },
    // NOTE: memory_size here is the clearly-documented low 64KB window, not
    // the chip's full flash (128KB on the 1286/1287), since writing past it
    // requires a BOOTSZ0/BOOTSZ1-dependent bank switch this crate doesn't
    // implement. See arguments.c's original REVISIT comment.
    Target {
        name: "at90usb1287",
        class: DeviceClass::AtmelAvr,
        chip_id: 0x2FFB,
        vendor_id: 0x03eb,
        product_id: 0x2FFB,
        memory_size: 64 * 1024,
        flash_page_size: 128,
        initial_abort: true,
        honor_interfaceclass: false,
    },
    Target {
        name: "at90usb1286",
        class: DeviceClass::AtmelAvr,
        chip_id: 0x2FFB,
        vendor_id: 0x03eb,
        product_id: 0x2FFB,
        memory_size: 64 * 1024,
        flash_page_size: 128,
        initial_abort: true,
        honor_interfaceclass: false,
    },
    Target {
        name: "at90usb647",
        class: DeviceClass::AtmelAvr,
        chip_id: 0x2FFB,
        vendor_id: 0x03eb,
        product_id: 0x2FFB,
        memory_size: 64 * 1024 - 8 * 1024,
        flash_page_size: 128,
        initial_abort: true,
        honor_interfaceclass: false,
    },
    Target {
        name: "at90usb646",
        class: DeviceClass::AtmelAvr,
        chip_id: 0x2FFB,
        vendor_id: 0x03eb,
        product_id: 0x2FFB,
        memory_size: 64 * 1024 - 8 * 1024,
        flash_page_size: 128,
        initial_abort: true,
        honor_interfaceclass: false,
    },
    // Supplemented target: the original distribution predates ST's DfuSe
    // bootloader, which this crate also drives, per the DfuSe bootloader's
    // own address-pointer/erase/write command set.
    Target {
        name: "stm32",
        class: DeviceClass::Stm32,
        chip_id: 0,
        vendor_id: STM32_VENDOR_ID,
        product_id: STM32_PRODUCT_ID,
        memory_size: 1024 * 1024,
        flash_page_size: 2048,
        initial_abort: false,
        honor_interfaceclass: false,
    },
];

/// Looks a target board up by its command-line name, case-insensitively.
pub fn lookup(name: &str) -> Result<&'static Target> {
    TARGETS
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::Argument(format!("unrecognized target '{name}'")))
}

/// Every known target name, in table order, for usage text.
pub fn names() -> impl Iterator<Item = &'static str> {
    TARGETS.iter().map(|t| t.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_target_case_insensitively() {
        let t = lookup("AT90USB1287").unwrap();
        assert_eq!(t.name, "at90usb1287");
        assert_eq!(t.class, DeviceClass::AtmelAvr);
        assert!(t.initial_abort);
    }

    #[test]
    fn rejects_unknown_target() {
        assert!(lookup("not-a-real-chip").is_err());
    }

    #[test]
    fn at89c5131_memory_size_is_32k() {
        let t = lookup("at89c5131").unwrap();
        assert_eq!(t.memory_size, 0x8000);
        assert_eq!(t.class, DeviceClass::Atmel8051);
    }

    #[test]
    fn stm32_target_present() {
        let t = lookup("stm32").unwrap();
        assert_eq!(t.vendor_id, 0x0483);
        assert_eq!(t.product_id, 0xDF11);
    }
}
