//! wi-pi kiosk
//!
//! Hands Wi-Fi credentials to guests two ways at once: a QR code on screen
//! and an NFC tag written for every phone that taps the reader.
//!
//! - [`coordinator`]: turns one submission into a stored network, a QR image
//!   and a running tag writer
//! - [`writer`]: the tag writing state machine, on its own tokio task
//! - [`config`]: `config.json` and reader selection
//! - [`store`], [`qr`], [`scanner`]: persistence, rendering and discovery

pub mod config;
pub mod coordinator;
pub mod qr;
pub mod scanner;
pub mod store;
pub mod writer;

pub use config::{KioskConfig, Transport, wipi_home};
pub use coordinator::{Coordinator, KioskStatus, Submission};
pub use qr::{QrCodeRenderer, QrFormat, QrImage, QrRenderer};
pub use store::{CredentialStore, NetworkStore, StoredNetwork};
pub use writer::{WriteStateMachine, WriterOptions, WriterReport, WriterStatus};
