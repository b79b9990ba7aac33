//! Top-level command execution: the CLI grammar's verbs, dispatched by
//! device class to the Atmel or STM32 driver underneath.

use std::io::{self, Read, Write};
use std::path::Path;

use log::info;

use crate::atmel;
use crate::dfu::DfuDevice;
use crate::error::{Error, Result};
use crate::hex;
use crate::stm32;
use crate::target::{DeviceClass, Target};
use crate::usb_session;

/// Which of the five configurable Atmel properties `configure` touches.
#[derive(Copy, Clone, Debug)]
pub enum ConfigureProperty {
    Bsb,
    Sbv,
    Ssb,
    Eb,
    Hsb,
}

/// Which of the twelve Atmel device-info fields `get` reports, per
/// `get_map` in the original CLI.
#[derive(Copy, Clone, Debug)]
pub enum GetField {
    BootloaderVersion,
    Id1,
    Id2,
    Bsb,
    Sbv,
    Ssb,
    Eb,
    Manufacturer,
    Family,
    ProductName,
    ProductRevision,
    Hsb,
}

/// Reads a file, or stdin when `path` is the literal string `STDIN`.
fn read_input(path: &str) -> Result<String> {
    if path == "STDIN" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(Path::new(path))?)
    }
}

/// `dfu-programmer <target> erase [--suppress-validation] [--read-unprotect]`.
pub fn execute_erase(target: &Target, suppress_validation: bool, read_unprotect: bool) -> Result<()> {
    let mut dfu = open(target)?;
    let result = (|| -> Result<()> {
        match target.class {
            DeviceClass::Atmel8051 | DeviceClass::AtmelAvr => {
                atmel::erase(&mut dfu, atmel::EraseMode::All)?;
                if !suppress_validation {
                    info!("blank-checking");
                    atmel::blank_check(&mut dfu, 0, target.memory_size - 1)?;
                }
                Ok(())
            }
            DeviceClass::Stm32 => {
                if read_unprotect {
                    stm32::read_unprotect(&mut dfu)
                } else {
                    stm32::mass_erase(&mut dfu)
                }
            }
        }
    })();
    close(dfu);
    result
}

/// `dfu-programmer <target> flash [--suppress-validation] [--force] <file>`.
pub fn execute_flash(
    target: &Target,
    file: &str,
    suppress_validation: bool,
    force: bool,
) -> Result<()> {
    let text = read_input(file)?;
    let user_size = match target.class {
        DeviceClass::AtmelAvr => 512, // AT90USB user-signature row
        _ => 0,
    };
    let addr_offset = match target.class {
        DeviceClass::Stm32 => stm32::STM32_FLASH_OFFSET,
        _ => 0,
    };
    let parsed = hex::parse(
        &text,
        target.memory_size as usize,
        target.flash_page_size as usize,
        user_size,
        addr_offset,
    )?;
    let mut program = parsed.program;

    let mut dfu = open(target)?;
    let result = (|| -> Result<()> {
        match target.class {
            DeviceClass::Atmel8051 | DeviceClass::AtmelAvr => {
                hex::image::flash_prep_buffer(&mut program)?;
                atmel::flash(&mut dfu, &program, force)?;
                if !suppress_validation {
                    info!("validating");
                    let readback = atmel::dump(
                        &mut dfu,
                        target.memory_size as usize,
                        target.flash_page_size as usize,
                    )?;
                    let soft = hex::image::validate_buffer(&readback, &program)?;
                    if soft > 0 {
                        eprintln!("{soft} byte(s) outside the written range did not validate");
                    }
                }
            }
            DeviceClass::Stm32 => {
                stm32::flash_write(&mut dfu, &mut program, force)?;
                if !suppress_validation {
                    info!("validating");
                    let readback = stm32::dump(
                        &mut dfu,
                        target.memory_size as usize,
                        target.flash_page_size as usize,
                    )?;
                    let soft = hex::image::validate_buffer(&readback, &program)?;
                    if soft > 0 {
                        eprintln!("{soft} byte(s) outside the written range did not validate");
                    }
                }
            }
        }
        Ok(())
    })();
    close(dfu);

    if let Some(end) = program.info.data_end {
        let used = end as u64 + 1;
        let pct = used as f64 * 100.0 / target.memory_size as f64;
        println!("{used} bytes used ({pct:.2}%)");
    }

    result
}

/// `dfu-programmer <target> dump [--force]`, writing a full Intel HEX
/// image of the device's flash to stdout.
pub fn execute_dump(target: &Target, force_full: bool) -> Result<()> {
    let mut dfu = open(target)?;
    let result = match target.class {
        DeviceClass::Atmel8051 | DeviceClass::AtmelAvr => atmel::dump(
            &mut dfu,
            target.memory_size as usize,
            target.flash_page_size as usize,
        ),
        DeviceClass::Stm32 => stm32::dump(
            &mut dfu,
            target.memory_size as usize,
            target.flash_page_size as usize,
        ),
    };
    close(dfu);

    let buin = result?;
    let mut bout = hex::BufferOut::new(buin.data.len(), buin.info.page_size);
    for (addr, &byte) in buin.data.iter().enumerate() {
        bout.assign(addr as u32, byte)?;
    }
    let text = hex::image::serialize(&bout, force_full);
    io::stdout().write_all(text.as_bytes())?;
    Ok(())
}

/// `dfu-programmer <target> start [--address <addr>]`, triggering the
/// bootloader to jump into the application.
pub fn execute_start_app(target: &Target) -> Result<()> {
    let mut dfu = open(target)?;
    let result = match target.class {
        DeviceClass::Atmel8051 | DeviceClass::AtmelAvr => atmel::start_app(&mut dfu),
        DeviceClass::Stm32 => stm32::launch(&mut dfu),
    };
    close(dfu);
    result
}

/// `dfu-programmer <target> configure <property> <value>`. Restricted to
/// the 8051 family, matching the original CLI — AVR parts don't expose a
/// configuration byte this way.
pub fn execute_configure(
    target: &Target,
    property: ConfigureProperty,
    value: u16,
    _suppress_validation: bool,
) -> Result<()> {
    if target.class != DeviceClass::Atmel8051 {
        return Err(Error::Argument(
            "target doesn't support configure operation".into(),
        ));
    }
    if value > 255 {
        return Err(Error::Argument(
            "value to configure must be in range 0-255".into(),
        ));
    }
    let prop = match property {
        ConfigureProperty::Bsb => atmel::ConfigProperty::Bsb,
        ConfigureProperty::Sbv => atmel::ConfigProperty::Sbv,
        ConfigureProperty::Ssb => atmel::ConfigProperty::Ssb,
        ConfigureProperty::Eb => atmel::ConfigProperty::Eb,
        ConfigureProperty::Hsb => atmel::ConfigProperty::Hsb,
    };

    let mut dfu = open(target)?;
    let result = atmel::set_config(&mut dfu, prop, value as u8)
        .map_err(|_| Error::Flash("configuration set failed".into()));
    close(dfu);
    result
}

/// `dfu-programmer <target> get <field>`. Atmel only; prints
/// `<label>: 0x<hex> (<dec>)` or reports the field unavailable.
pub fn execute_get(target: &Target, field: GetField) -> Result<()> {
    if !matches!(target.class, DeviceClass::Atmel8051 | DeviceClass::AtmelAvr) {
        return Err(Error::Argument(
            "target doesn't support get operation".into(),
        ));
    }

    let mut dfu = open(target)?;
    let info = atmel::read_device_info(&mut dfu);
    close(dfu);
    let info = info?;

    let (label, value) = match field {
        GetField::BootloaderVersion => ("Bootloader Version", info.bootloader_version),
        GetField::Id1 => ("Device Boot ID 1", info.boot_id1),
        GetField::Id2 => ("Device Boot ID 2", info.boot_id2),
        GetField::Bsb => ("Boot Status Byte", info.bsb),
        GetField::Sbv => ("Software Boot Vector", info.sbv),
        GetField::Ssb => ("Software Security Byte", info.ssb),
        GetField::Eb => ("Extra Byte", info.eb),
        GetField::Manufacturer => ("Manufacturer Code", info.manufacturer_code),
        GetField::Family => ("Family Code", info.family_code),
        GetField::ProductName => ("Product Name", info.product_name),
        GetField::ProductRevision => ("Product Revision", info.product_revision),
        GetField::Hsb => ("Hardware Security Byte", info.hsb),
    };

    match value {
        Some(byte) => println!("{label}: {byte:#04x} ({byte})"),
        None => println!("{label}: the requested device info is unavailable"),
    }
    Ok(())
}

/// `dfu-programmer <target> version`, printing the crate's own version.
pub fn execute_version() {
    println!("dfu-programmer {}", env!("CARGO_PKG_VERSION"));
}

fn open(target: &Target) -> Result<DfuDevice> {
    usb_session::open_session(target)
}

fn close(dfu: DfuDevice) {
    if let Err(err) = usb_session::close_session(&dfu) {
        log::warn!("teardown error ignored: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target;

    #[test]
    fn configure_rejects_out_of_range_value() {
        let t = target::lookup("at89c51snd1c").unwrap();
        let err = execute_configure(t, ConfigureProperty::Bsb, 256, false).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn configure_rejects_stm32_target() {
        let t = target::lookup("stm32").unwrap();
        let err = execute_configure(t, ConfigureProperty::Bsb, 1, false).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn get_rejects_stm32_target() {
        let t = target::lookup("stm32").unwrap();
        let err = execute_get(t, GetField::BootloaderVersion).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn configure_hsb_rejects_non_8051_target() {
        let t = target::lookup("at90usb1287").unwrap();
        let err = execute_configure(t, ConfigureProperty::Hsb, 1, false).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }
}
