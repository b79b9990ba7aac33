//! The vendor-neutral DFU 1.0 layer: wire status/state decoding and the
//! control-transfer transport built on top of it.

pub mod status;
pub mod transport;

pub use status::{DfuState, DfuStatus, DfuStatusRecord};
pub use transport::{DfuDevice, DfuTransport};
