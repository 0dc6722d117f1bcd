//! Provisioning coordinator
//!
//! One submission fans out to three consumers: the store remembers it, the
//! QR renderer draws it and the tag writer starts writing it. The coordinator
//! encodes once and hands the same payload to all of them.

use std::sync::{Mutex, MutexGuard};

use log::*;
use tokio::sync::watch;
use wipi_proto::{Credentials, EncodingError, ProvisioningPayload};

use crate::qr::{QrImage, QrRenderer};
use crate::store::{NetworkStore, StoreError, StoredNetwork};
use crate::writer::{WriteStateMachine, WriterReport};

/// Outcome of one accepted submission
#[derive(Debug, Clone)]
pub struct Submission {
    pub network_name: String,
    pub payload: ProvisioningPayload,
    /// `None` when the payload could not be drawn; the tag is still written
    pub qr: Option<QrImage>,
    pub persisted: bool,
    /// `false` when no reader is configured or the writer has stopped
    pub writing_tags: bool,
}

/// What the kiosk shows right now
#[derive(Debug, Clone)]
pub struct KioskStatus {
    pub submission: Option<Submission>,
    /// `None` when the kiosk runs without a reader
    pub writer: Option<WriterReport>,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored network is not usable: {0}")]
    Encoding(#[from] EncodingError),
}

pub struct Coordinator {
    store: Box<dyn NetworkStore>,
    renderer: Box<dyn QrRenderer>,
    /// `None` runs the kiosk QR only
    writer: Option<WriteStateMachine>,
    current: Mutex<Option<Submission>>,
}

impl Coordinator {
    pub fn new(
        store: Box<dyn NetworkStore>,
        renderer: Box<dyn QrRenderer>,
        writer: Option<WriteStateMachine>,
    ) -> Self {
        Self {
            store,
            renderer,
            writer,
            current: Mutex::new(None),
        }
    }

    fn current_slot(&self) -> MutexGuard<'_, Option<Submission>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Accept credentials from the operator
    ///
    /// Invalid credentials are rejected before anything is persisted, drawn
    /// or written. A store failure is logged and does not hold up the hand-off.
    pub fn submit(&self, credentials: Credentials) -> Result<Submission, EncodingError> {
        self.dispatch(&credentials, true)
    }

    /// Re-submit the last stored network, without storing it again
    pub fn restore(&self) -> Result<Option<Submission>, RestoreError> {
        let Some(stored) = self.store.load()? else {
            return Ok(None);
        };
        info!("restoring network {:?}", stored.wifi_name);
        Ok(Some(self.dispatch(&stored.credentials(), false)?))
    }

    fn dispatch(&self, credentials: &Credentials, persist: bool) -> Result<Submission, EncodingError> {
        let payload = wipi_proto::encode(credentials)?;

        let persisted = persist && match self.store.save(&StoredNetwork::from(credentials)) {
            Ok(()) => true,
            Err(e) => {
                error!("failed to remember network: {e}");
                false
            }
        };

        let qr = match self.renderer.render(payload.as_str()) {
            Ok(image) => Some(image),
            Err(e) => {
                error!("failed to draw QR code: {e}");
                None
            }
        };

        let writing_tags = match &self.writer {
            Some(writer) => match writer.start(payload.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("not writing tags: {e}");
                    false
                }
            },
            None => false,
        };

        info!("provisioning network {:?}", credentials.network_name);
        let submission = Submission {
            network_name: credentials.network_name.clone(),
            payload,
            qr,
            persisted,
            writing_tags,
        };
        *self.current_slot() = Some(submission.clone());
        Ok(submission)
    }

    /// Most recent accepted submission
    pub fn current(&self) -> Option<Submission> {
        self.current_slot().clone()
    }

    pub fn status(&self) -> KioskStatus {
        KioskStatus {
            submission: self.current(),
            writer: self.writer_report(),
        }
    }

    pub fn writer_report(&self) -> Option<WriterReport> {
        self.writer.as_ref().map(WriteStateMachine::report)
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<WriterReport>> {
        self.writer.as_ref().map(WriteStateMachine::subscribe)
    }

    /// Stop the tag writer and release the reader
    pub async fn shutdown(&self) {
        if let Some(writer) = &self.writer {
            writer.stop().await;
        }
    }
}
