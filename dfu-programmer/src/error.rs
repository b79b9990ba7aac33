//! Top-level error taxonomy. Every fallible operation in this crate
//! eventually lands in one of these variants; `main` renders the `Display`
//! impl to stderr and exits non-zero.

use crate::dfu::status::{DfuState, DfuStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Argument(String),

    #[error("no device found for target (vendor={vendor_id:#06x}, product={product_id:#06x})")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("could not reach dfuIDLE after {attempts} attempts (last state {state:?}, status {status:?})")]
    NotIdle {
        attempts: u32,
        state: DfuState,
        status: DfuStatus,
    },

    #[error("device reported status {status:?} (expected OK)")]
    UnexpectedStatus { status: DfuStatus },

    #[error("flash operation failed: {0}")]
    Flash(String),

    #[error("device is read-protected")]
    ReadProtected,

    #[error("Intel HEX parse error: {0}")]
    HexParse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
