//! The STMicroelectronics DfuSe vendor dialect: an address-pointer register
//! plus raw block transfer, instead of Atmel's self-addressed frames.

use log::{debug, trace};

use crate::dfu::status::DfuStatus;
use crate::dfu::DfuTransport;
use crate::error::{Error, Result};
use crate::hex::image::{BufferIn, BufferOut, Cell};

/// Where flash starts in the STM32's address space; `set_address_pointer`
/// calls always add an offset into this region.
pub const STM32_FLASH_OFFSET: u32 = 0x0800_0000;
/// Largest payload a single block read/write frame may carry.
pub const STM32_MAX_TRANSFER_SIZE: u32 = 0x0800; // 2048
/// Blocks never cross this boundary; it is also the granularity of the
/// smallest flash sectors.
pub const STM32_MIN_SECTOR_BOUND: u32 = 0x4000; // 16384

const SET_ADDR_PTR: u8 = 0x21;
const ERASE_CMD: u8 = 0x41;
const READ_UNPROTECT: u8 = 0x92;
const GET_CMD: u8 = 0x00;

/// The fixed sector layout of the reference STM32F10x DfuSe bootloader,
/// used only for diagnostics (`get` reports which sector an address falls
/// in); the erase/write driver itself only needs `STM32_MIN_SECTOR_BOUND`.
pub const SECTOR_ADDRESSES: [u32; 15] = [
    0x0800_0000, // sector 0, 16 KiB
    0x0800_4000, // sector 1, 16 KiB
    0x0800_8000, // sector 2, 16 KiB
    0x0800_C000, // sector 3, 16 KiB
    0x0801_0000, // sector 4, 64 KiB
    0x0802_0000, // sector 5, 128 KiB
    0x0804_0000, // sector 6, 128 KiB
    0x0806_0000, // sector 7, 128 KiB
    0x0808_0000, // sector 8, 128 KiB
    0x080A_0000, // sector 9, 128 KiB
    0x080C_0000, // sector 10, 128 KiB
    0x080E_0000, // sector 11, 128 KiB
    0x1FFF_0000, // system memory, 30 KiB
    0x1FFF_7800, // OTP area, 528 bytes
    0x1FFF_C000, // option bytes, 16 bytes
];

fn expect_ok(status: DfuStatus) -> Result<()> {
    if status == DfuStatus::OK {
        Ok(())
    } else {
        Err(Error::UnexpectedStatus { status })
    }
}

/// Sends the two-`GETSTATUS` "trigger, then confirm" pattern every STM32
/// command shares after its `DFU_DNLOAD`.
fn confirm_command(dfu: &impl DfuTransport) -> Result<()> {
    let trigger = dfu.get_status()?;
    expect_ok(trigger.status)?;
    let confirm = dfu.get_status()?;
    expect_ok(confirm.status)
}

/// Sets the address pointer register, §4.5. Resets the transaction counter
/// to 0 first, since `SET_ADDR_PTR` must be wValue 0.
pub fn set_address_pointer(dfu: &mut impl DfuTransport, address: u32) -> Result<()> {
    trace!("set_address_pointer({address:#010x})");
    dfu.set_transaction_counter(0);
    let frame = [
        SET_ADDR_PTR,
        address as u8,
        (address >> 8) as u8,
        (address >> 16) as u8,
        (address >> 24) as u8,
    ];
    dfu.download(&frame)?;
    confirm_command(dfu)
}

/// Writes up to [`STM32_MAX_TRANSFER_SIZE`] bytes at the current address
/// pointer position.
pub fn write_block(dfu: &mut impl DfuTransport, payload: &[u8]) -> Result<()> {
    if payload.is_empty() || payload.len() as u32 > STM32_MAX_TRANSFER_SIZE {
        return Err(Error::Flash(format!(
            "block write of {} bytes exceeds max transfer size {STM32_MAX_TRANSFER_SIZE}",
            payload.len()
        )));
    }
    dfu.download(payload)?;
    confirm_command(dfu)
}

/// Reads up to [`STM32_MAX_TRANSFER_SIZE`] bytes from the current address
/// pointer position. A device that reports `errVENDOR` after the upload is
/// read-protected.
pub fn read_block(dfu: &mut impl DfuTransport, buffer: &mut [u8]) -> Result<()> {
    if buffer.len() as u32 > STM32_MAX_TRANSFER_SIZE {
        return Err(Error::Flash(format!(
            "block read of {} bytes exceeds max transfer size {STM32_MAX_TRANSFER_SIZE}",
            buffer.len()
        )));
    }
    let pre = dfu.get_status()?;
    expect_ok(pre.status)?;

    match dfu.upload(buffer) {
        Ok(_) => Ok(()),
        Err(err) => {
            if let Ok(status) = dfu.get_status() {
                if status.status == DfuStatus::errVENDOR {
                    let _ = dfu.clear_status();
                    return Err(Error::ReadProtected);
                }
            }
            let _ = dfu.clear_status();
            Err(err)
        }
    }
}

fn erase_command(dfu: &mut impl DfuTransport, frame: &[u8]) -> Result<()> {
    dfu.set_transaction_counter(0);
    dfu.download(frame)?;
    confirm_command(dfu)
}

/// Mass-erases the entire flash array.
pub fn mass_erase(dfu: &mut impl DfuTransport) -> Result<()> {
    erase_command(dfu, &[ERASE_CMD])
}

/// Erases the single page containing `address`.
pub fn page_erase(dfu: &mut impl DfuTransport, address: u32) -> Result<()> {
    let frame = [
        ERASE_CMD,
        address as u8,
        (address >> 8) as u8,
        (address >> 16) as u8,
        (address >> 24) as u8,
    ];
    erase_command(dfu, &frame)
}

/// Clears the device's read-protection, which also mass-erases flash on
/// real hardware. Surfaced only via `erase --read-unprotect`, never
/// implicitly.
pub fn read_unprotect(dfu: &mut impl DfuTransport) -> Result<()> {
    erase_command(dfu, &[READ_UNPROTECT])
}

/// Returns the vendor command bytes the bootloader advertises support for.
/// Informational only; never required for correctness.
pub fn get_commands(dfu: &mut impl DfuTransport) -> Result<Vec<u8>> {
    dfu.set_transaction_counter(0);
    let pre = dfu.get_status()?;
    expect_ok(pre.status)?;
    let mut buf = [0u8; 80];
    let n = dfu.upload(&mut buf)?;
    let _ = GET_CMD;
    Ok(buf[..n].to_vec())
}

/// Sets the address pointer to the flash base and triggers the bootloader
/// to jump to the application, detaching from the bus.
pub fn launch(dfu: &mut impl DfuTransport) -> Result<()> {
    set_address_pointer(dfu, STM32_FLASH_OFFSET)?;
    dfu.set_transaction_counter(0);
    dfu.download(&[])?;
    let trigger = dfu.get_status()?;
    expect_ok(trigger.status)
}

/// Finds the next address at or after `from` (up to and including `limit`)
/// holding an assigned byte.
fn next_assigned(bout: &BufferOut, from: u32, limit: u32) -> u32 {
    let mut addr = from;
    while addr <= limit && !bout.data[addr as usize].is_assigned() {
        addr += 1;
    }
    addr
}

/// Flash-preps and writes `bout` to the device, per §4.5's flash write
/// driver. `force` is accepted for symmetry with the Atmel driver but has
/// no effect here: the STM32 write path never erases implicitly, and
/// `erase` is always a separate, explicit command.
pub fn flash_write(dfu: &mut impl DfuTransport, bout: &mut BufferOut, _force: bool) -> Result<()> {
    crate::hex::image::flash_prep_buffer(bout)?;

    let Some(data_start) = bout.info.data_start else {
        return Err(Error::Flash("no valid data".into()));
    };
    let data_end = bout.info.data_end.unwrap();

    debug!("flashing {data_start:#x}..={data_end:#x}");

    let mut block_start = data_start;
    let mut reset_flag = true;
    let mut address_offset = 0u32;

    while block_start <= data_end {
        if reset_flag {
            address_offset = block_start;
            set_address_pointer(dfu, STM32_FLASH_OFFSET + address_offset)?;
            dfu.set_transaction_counter(2);
            reset_flag = false;
        }

        let sector = block_start / STM32_MIN_SECTOR_BOUND;
        let mut buffer = Vec::new();
        let mut addr = block_start;
        while addr <= data_end {
            let xfer_size = addr - block_start + 1;
            let Cell::Assigned(byte) = bout.data[addr as usize] else {
                break;
            };
            if xfer_size > STM32_MAX_TRANSFER_SIZE || addr / STM32_MIN_SECTOR_BOUND != sector {
                break;
            }
            buffer.push(byte);
            addr += 1;
        }

        if buffer.is_empty() {
            block_start = next_assigned(bout, block_start + 1, data_end);
            reset_flag = true;
            continue;
        }

        let block_end = block_start + buffer.len() as u32 - 1;
        if buffer.len() as u32 != STM32_MAX_TRANSFER_SIZE {
            reset_flag = true;
        }

        trace!("writing block {block_start:#x}..={block_end:#x}");
        write_block(dfu, &buffer)?;

        let next = next_assigned(bout, block_end + 1, data_end);
        let implied = address_offset + STM32_MAX_TRANSFER_SIZE * (u32::from(dfu.transaction_counter()) - 2);
        if !reset_flag && next != implied {
            reset_flag = true;
        }
        block_start = next;
    }

    Ok(())
}

/// Reads `[data_start, data_end]` of `buin` from the device, per §4.5's
/// symmetric read driver.
pub fn flash_read(dfu: &mut impl DfuTransport, buin: &mut BufferIn) -> Result<()> {
    let Some(data_start) = buin.info.data_start else {
        return Ok(());
    };
    let data_end = buin.info.data_end.unwrap();

    let mut block_start = data_start;
    let mut reset_flag = true;
    let mut address_offset = 0u32;

    while block_start <= data_end {
        if reset_flag {
            address_offset = block_start;
            set_address_pointer(dfu, STM32_FLASH_OFFSET + address_offset)?;
            dfu.set_transaction_counter(2);
            reset_flag = false;
        }

        let sector = block_start / STM32_MIN_SECTOR_BOUND;
        let mut block_end = (block_start + STM32_MAX_TRANSFER_SIZE - 1).min(data_end);
        if block_end / STM32_MIN_SECTOR_BOUND != sector {
            block_end = STM32_MIN_SECTOR_BOUND * (sector + 1) - 1;
        }
        let xfer_size = block_end - block_start + 1;
        if xfer_size != STM32_MAX_TRANSFER_SIZE {
            reset_flag = true;
        }

        read_block(
            dfu,
            &mut buin.data[block_start as usize..=block_end as usize],
        )?;

        let next = block_end + 1;
        let implied = address_offset + STM32_MAX_TRANSFER_SIZE * (u32::from(dfu.transaction_counter()) - 2);
        if !reset_flag && next != implied {
            reset_flag = true;
        }
        block_start = next;
    }

    Ok(())
}

/// Reads the whole addressable region into a freshly allocated buffer.
pub fn dump(dfu: &mut impl DfuTransport, total_size: usize, page_size: usize) -> Result<BufferIn> {
    let mut buin = BufferIn::new(total_size, page_size);
    buin.info.data_start = Some(0);
    buin.info.data_end = Some(total_size.saturating_sub(1) as u32);
    flash_read(dfu, &mut buin)?;
    Ok(buin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_address_ptr_frame_is_little_endian() {
        let address = 0x0800_1234u32;
        let frame = [
            SET_ADDR_PTR,
            address as u8,
            (address >> 8) as u8,
            (address >> 16) as u8,
            (address >> 24) as u8,
        ];
        assert_eq!(frame, [0x21, 0x34, 0x12, 0x00, 0x08]);
    }

    #[test]
    fn mass_erase_is_single_byte() {
        // Mirrors the canonical one-byte form, not the two-byte
        // `{0x41, 0x00}` some DfuSe tool implementations send.
        let frame = [ERASE_CMD];
        assert_eq!(frame, [0x41]);
    }

    #[test]
    fn page_erase_frame_layout() {
        let address = 0x0801_0000u32;
        let frame = [
            ERASE_CMD,
            address as u8,
            (address >> 8) as u8,
            (address >> 16) as u8,
            (address >> 24) as u8,
        ];
        assert_eq!(frame, [0x41, 0x00, 0x00, 0x01, 0x08]);
    }

    #[test]
    fn sector_table_starts_at_flash_offset() {
        assert_eq!(SECTOR_ADDRESSES[0], STM32_FLASH_OFFSET);
        assert_eq!(SECTOR_ADDRESSES.len(), 15);
    }

    #[test]
    fn next_assigned_skips_unassigned_gap() {
        let mut bout = BufferOut::new(64, 32);
        bout.assign(10, 0xAA).unwrap();
        assert_eq!(next_assigned(&bout, 0, 63), 10);
        assert_eq!(next_assigned(&bout, 11, 63), 64); // none found within limit
    }
}
