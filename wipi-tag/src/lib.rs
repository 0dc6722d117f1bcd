//! wi-pi tag library
//!
//! The reader abstraction the kiosk writes NFC tags through.
//!
//! This crate provides:
//! - [`TagChannel`]: open / poll / read / write / close, implemented once per
//!   reader chip and transport
//! - `Pn532Uart`: NXP PN532 on a serial port (feature `serial`, on by default)
//! - [`SimulatedReader`]: an in-memory reader for tests and hardware-less kiosks
//!
//! # Note
//! Every operation here blocks. The kiosk keeps them on tokio's blocking pool.

pub mod channel;
pub mod pn532;
pub mod simulated;

pub use channel::{HardwareError, Result, TagChannel, TagId};
#[cfg(feature = "serial")]
pub use pn532::Pn532Uart;
pub use simulated::{SimulatedField, SimulatedReader};
