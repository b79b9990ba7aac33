//! The Atmel 8051/AVR vendor dialect layered on top of plain DFU 1.0.
//!
//! Every operation here is a `DFU_DNLOAD` of a short command frame, usually
//! followed by a `DFU_GETSTATUS` the caller inspects before moving on.

use log::{debug, trace};

use crate::dfu::status::DfuStatus;
use crate::dfu::DfuTransport;
use crate::error::{Error, Result};
use crate::hex::image::{BufferIn, BufferOut, Cell};

/// Flash reads are chunked to this many bytes per `DFU_UPLOAD`.
pub const ATMEL_MAX_TRANSFER_SIZE: usize = 1024;
/// Flash writes are chunked to this many bytes of payload per frame (plus
/// the 0x30-byte command prefix, for a 3120-byte `DFU_DNLOAD`).
pub const ATMEL_MAX_FLASH_SIZE: usize = 3072;

const ERASE_BLOCK_0: u8 = 0x00;
const ERASE_BLOCK_1: u8 = 0x20;
const ERASE_BLOCK_2: u8 = 0x40;
const ERASE_BLOCK_3: u8 = 0x80;
const ERASE_ALL: u8 = 0xFF;

/// Which banks an erase targets, DFU bootloader command set.
#[derive(Copy, Clone, Debug)]
pub enum EraseMode {
    Block0,
    Block1,
    Block2,
    Block3,
    All,
}

impl EraseMode {
    fn wire_value(self) -> u8 {
        match self {
            EraseMode::Block0 => ERASE_BLOCK_0,
            EraseMode::Block1 => ERASE_BLOCK_1,
            EraseMode::Block2 => ERASE_BLOCK_2,
            EraseMode::Block3 => ERASE_BLOCK_3,
            EraseMode::All => ERASE_ALL,
        }
    }
}

/// The five configurable properties `configure`/`get` can touch.
#[derive(Copy, Clone, Debug)]
pub enum ConfigProperty {
    Bsb,
    Sbv,
    Ssb,
    Eb,
    Hsb,
}

impl ConfigProperty {
    fn selector(self) -> u8 {
        match self {
            ConfigProperty::Bsb => 0,
            ConfigProperty::Sbv => 1,
            ConfigProperty::Ssb => 2,
            ConfigProperty::Eb => 3,
            ConfigProperty::Hsb => 4,
        }
    }
}

/// The twelve-field device-info record read via the Atmel read-command
/// frame. Each field is `None` when its read returned a value outside
/// `0..=255`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceInfo {
    pub bootloader_version: Option<u8>,
    pub boot_id1: Option<u8>,
    pub boot_id2: Option<u8>,
    pub bsb: Option<u8>,
    pub sbv: Option<u8>,
    pub ssb: Option<u8>,
    pub eb: Option<u8>,
    pub manufacturer_code: Option<u8>,
    pub family_code: Option<u8>,
    pub product_name: Option<u8>,
    pub product_revision: Option<u8>,
    pub hsb: Option<u8>,
}

/// The twelve `(selector, sub-selector)` pairs, in the order the twelve
/// `DeviceInfo` fields are filled.
const CONFIG_SELECTORS: [(u8, u8); 12] = [
    (0x00, 0x00),
    (0x00, 0x01),
    (0x00, 0x02),
    (0x01, 0x00),
    (0x01, 0x01),
    (0x01, 0x05),
    (0x01, 0x06),
    (0x01, 0x30),
    (0x01, 0x31),
    (0x01, 0x60),
    (0x01, 0x61),
    (0x02, 0x00),
];

fn send_command(dfu: &mut impl DfuTransport, frame: &[u8]) -> Result<DfuStatus> {
    dfu.download(frame)?;
    let status = dfu.get_status()?;
    Ok(status.status)
}

fn expect_ok(status: DfuStatus) -> Result<()> {
    if status == DfuStatus::OK {
        Ok(())
    } else {
        Err(Error::UnexpectedStatus { status })
    }
}

/// Issues the Atmel "read command" frame (`05 sel0 sel1`) and returns the
/// single byte the device reports via `DFU_UPLOAD`.
pub fn read_command(dfu: &mut impl DfuTransport, sel0: u8, sel1: u8) -> Result<u8> {
    dfu.download(&[0x05, sel0, sel1])?;
    let mut buf = [0u8; 1];
    dfu.upload(&mut buf)?;
    Ok(buf[0])
}

/// Reads the twelve-field device-info record, per §4.4. An individual
/// read reporting a value outside `0..=255` marks that field unavailable
/// without aborting the rest of the sequence.
pub fn read_device_info(dfu: &mut impl DfuTransport) -> Result<DeviceInfo> {
    let mut values = [None; 12];
    for (i, &(sel0, sel1)) in CONFIG_SELECTORS.iter().enumerate() {
        match read_command(dfu, sel0, sel1) {
            Ok(byte) => values[i] = Some(byte),
            Err(_) => values[i] = None,
        }
    }
    Ok(DeviceInfo {
        bootloader_version: values[0],
        boot_id1: values[1],
        boot_id2: values[2],
        bsb: values[3],
        sbv: values[4],
        ssb: values[5],
        eb: values[6],
        manufacturer_code: values[7],
        family_code: values[8],
        product_name: values[9],
        product_revision: values[10],
        hsb: values[11],
    })
}

/// Reads `start..=end` of flash, chunking at [`ATMEL_MAX_TRANSFER_SIZE`].
pub fn read_flash(dfu: &mut impl DfuTransport, start: u32, end: u32, out: &mut [u8]) -> Result<()> {
    let total = (end - start + 1) as usize;
    if out.len() < total {
        return Err(Error::Flash(format!(
            "output buffer ({} bytes) too small for read of {total} bytes",
            out.len()
        )));
    }

    let mut offset = 0usize;
    let mut addr = start;
    while addr <= end {
        let remaining = (end - addr + 1) as usize;
        let chunk_len = remaining.min(ATMEL_MAX_TRANSFER_SIZE);
        let chunk_end = addr + chunk_len as u32 - 1;

        dfu.download(&frame_read_or_blank_check(0x00, addr, chunk_end))?;
        dfu.upload(&mut out[offset..offset + chunk_len])?;

        offset += chunk_len;
        addr = chunk_end + 1;
    }
    Ok(())
}

/// Reads the whole addressable region described by `program`, storing it in
/// a freshly allocated [`BufferIn`] — the image `dump` writes to stdout.
pub fn dump(dfu: &mut impl DfuTransport, total_size: usize, page_size: usize) -> Result<BufferIn> {
    let mut buin = BufferIn::new(total_size, page_size);
    if total_size > 0 {
        read_flash(dfu, 0, total_size as u32 - 1, &mut buin.data)?;
    }
    Ok(buin)
}

/// Blank-checks `start..=end`. On success the device reports `OK`; a
/// non-blank region comes back as `errCHECK_ERASED`.
pub fn blank_check(dfu: &mut impl DfuTransport, start: u32, end: u32) -> Result<()> {
    dfu.download(&frame_read_or_blank_check(0x01, start, end))?;
    let status = poll_after_command(dfu)?;
    expect_ok(status)
}

fn frame_read_or_blank_check(sub: u8, start: u32, end: u32) -> [u8; 6] {
    [
        0x03,
        sub,
        (start >> 8) as u8,
        start as u8,
        (end >> 8) as u8,
        end as u8,
    ]
}

/// Erases the given bank (or everything). Polls `DFU_GETSTATUS` up to ten
/// times waiting for the erase to complete, per §4.4.
pub fn erase(dfu: &mut impl DfuTransport, mode: EraseMode) -> Result<()> {
    dfu.download(&[0x04, 0x00, mode.wire_value()])?;
    let status = poll_after_command(dfu)?;
    expect_ok(status)
}

/// Polls `DFU_GETSTATUS` up to ten times, returning the first status
/// received (the Atmel erase/blank-check wait discipline, §4.4). No sleep
/// is inserted between polls.
fn poll_after_command(dfu: &impl DfuTransport) -> Result<DfuStatus> {
    let mut last = Err(Error::Flash("no status received".into()));
    for attempt in 0..10 {
        match dfu.get_status() {
            Ok(record) => {
                trace!("poll attempt {attempt}: status={:?}", record.status);
                return Ok(record.status);
            }
            Err(e) => last = Err(e),
        }
    }
    last
}

/// Sets one of BSB/SBV/SSB/EB/HSB to `value`.
pub fn set_config(dfu: &mut impl DfuTransport, property: ConfigProperty, value: u8) -> Result<()> {
    let frame = match property {
        ConfigProperty::Hsb => [0x04, 0x02, 0x00, value],
        other => [0x04, 0x01, other.selector(), value],
    };
    let status = send_command(dfu, &frame)?;
    expect_ok(status)
}

/// Issues the vendor reset command (`04 03 00`).
pub fn reset(dfu: &mut impl DfuTransport) -> Result<()> {
    let status = send_command(dfu, &[0x04, 0x03, 0x00])?;
    expect_ok(status)
}

/// Tells the bootloader to jump to the application (`04 03 01 00 00`
/// followed by a zero-length `DFU_DNLOAD`).
pub fn start_app(dfu: &mut impl DfuTransport) -> Result<()> {
    dfu.download(&[0x04, 0x03, 0x01, 0x00, 0x00])?;
    dfu.download(&[])?;
    Ok(())
}

/// Writes a prepared (flash-prepped) image to flash, chunking at
/// [`ATMEL_MAX_FLASH_SIZE`] bytes of payload. `force` erases every touched
/// page even if it has no assigned bytes.
pub fn flash(dfu: &mut impl DfuTransport, bout: &BufferOut, force: bool) -> Result<()> {
    let Some(data_start) = bout.info.data_start else {
        return Err(Error::Flash("no valid data".into()));
    };
    let data_end = bout.info.data_end.unwrap();

    debug!("flashing {data_start:#x}..={data_end:#x}");

    let page_size = bout.info.page_size.max(1);
    let mut addr = (data_start / page_size as u32) * page_size as u32;
    while addr <= data_end {
        let page_end = (addr + page_size as u32 - 1).min(bout.data.len() as u32 - 1);
        let page = &bout.data[addr as usize..=page_end as usize];
        let touched = page.iter().any(Cell::is_assigned);
        if touched || force {
            write_chunked(dfu, addr, page)?;
        }
        addr = page_end + 1;
    }
    Ok(())
}

fn write_chunked(dfu: &mut impl DfuTransport, start: u32, page: &[Cell]) -> Result<()> {
    for (chunk_index, chunk) in page.chunks(ATMEL_MAX_FLASH_SIZE).enumerate() {
        let chunk_start = start + (chunk_index * ATMEL_MAX_FLASH_SIZE) as u32;
        let chunk_end = chunk_start + chunk.len() as u32 - 1;

        let mut frame = vec![0u8; chunk.len() + 0x30];
        frame[0] = 0x01;
        frame[1] = 0x00;
        frame[2] = (chunk_start >> 8) as u8;
        frame[3] = chunk_start as u8;
        frame[4] = (chunk_end >> 8) as u8;
        frame[5] = chunk_end as u8;
        for (i, cell) in chunk.iter().enumerate() {
            let byte = match cell {
                Cell::Assigned(b) => *b,
                Cell::Unassigned => 0xff,
            };
            frame[0x20 + i] = byte;
        }

        let status = send_command(dfu, &frame)?;
        expect_ok(status)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_mode_wire_values() {
        assert_eq!(EraseMode::Block0.wire_value(), 0x00);
        assert_eq!(EraseMode::Block1.wire_value(), 0x20);
        assert_eq!(EraseMode::Block2.wire_value(), 0x40);
        assert_eq!(EraseMode::Block3.wire_value(), 0x80);
        assert_eq!(EraseMode::All.wire_value(), 0xFF);
    }

    #[test]
    fn read_frame_encodes_big_endian_address() {
        let frame = frame_read_or_blank_check(0x00, 0x0100, 0x01ff);
        assert_eq!(frame, [0x03, 0x00, 0x01, 0x00, 0x01, 0xff]);
    }

    #[test]
    fn config_selectors_cover_twelve_fields() {
        assert_eq!(CONFIG_SELECTORS.len(), 12);
        assert_eq!(CONFIG_SELECTORS[0], (0x00, 0x00));
        assert_eq!(CONFIG_SELECTORS[11], (0x02, 0x00));
    }

    /// A transport that panics if touched, for exercising the error paths
    /// `flash()` takes before issuing any command.
    struct NullTransport;

    impl DfuTransport for NullTransport {
        fn download(&mut self, _data: &[u8]) -> Result<usize> {
            unreachable!("flash() must reject the image before downloading anything")
        }

        fn upload(&mut self, _buffer: &mut [u8]) -> Result<usize> {
            unreachable!("flash() never uploads")
        }

        fn get_status(&self) -> Result<crate::dfu::DfuStatusRecord> {
            unreachable!("flash() never polls status before the data check")
        }

        fn clear_status(&self) -> Result<()> {
            unreachable!("flash() never clears status before the data check")
        }

        fn abort(&self) -> Result<()> {
            unreachable!("flash() never aborts before the data check")
        }

        fn transaction_counter(&self) -> u16 {
            0
        }

        fn set_transaction_counter(&mut self, _value: u16) {}
    }

    #[test]
    fn flash_rejects_image_with_no_data() {
        let bout = BufferOut::new(256, 128);
        let err = flash(&mut NullTransport, &bout, false).unwrap_err();
        assert!(matches!(err, Error::Flash(msg) if msg == "no valid data"));
    }
}
