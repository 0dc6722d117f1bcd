//! NFC tag writer state machine
//!
//! ```text
//! Idle --start--> WaitingForTag --tag--> Writing --ok--> Succeeded --settle--> WaitingForTag
//!                                               \--err--> Failed --backoff--> WaitingForTag
//! any --stop--> Stopped
//! ```
//!
//! The loop runs on one tokio task, started by the first [`WriteStateMachine::start`].
//! Reader calls block, so each one runs on the blocking pool with the channel
//! moved into the closure and handed back; the loop is the channel's only owner
//! and closes it before exiting.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use log::*;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use wipi_proto::ProvisioningPayload;
use wipi_tag::{TagChannel, TagId};

/// Observable state of the writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStatus {
    Idle,
    WaitingForTag,
    Writing,
    Succeeded,
    Failed(String),
    Stopped,
}

impl fmt::Display for WriterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriterStatus::Idle => f.write_str("idle"),
            WriterStatus::WaitingForTag => f.write_str("waiting for tag"),
            WriterStatus::Writing => f.write_str("writing tag"),
            WriterStatus::Succeeded => f.write_str("tag written"),
            WriterStatus::Failed(reason) => write!(f, "retrying ({reason})"),
            WriterStatus::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    NoTagDetected,
    WriteFailed(String),
    /// the payload was superseded while the write was in flight
    Cancelled,
}

/// One poll cycle
#[derive(Debug, Clone)]
pub struct TagWriteAttempt {
    pub sequence: u64,
    pub started_at: SystemTime,
    pub tag: Option<TagId>,
    pub outcome: AttemptOutcome,
}

/// Snapshot published after every transition
#[derive(Debug, Clone)]
pub struct WriterReport {
    pub status: WriterStatus,
    pub last_attempt: Option<TagWriteAttempt>,
    pub last_error: Option<String>,
    pub successes: u64,
    pub failures: u64,
}

impl Default for WriterReport {
    fn default() -> Self {
        Self {
            status: WriterStatus::Idle,
            last_attempt: None,
            last_error: None,
            successes: 0,
            failures: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    /// Upper bound of one blocking poll, and so of stop latency
    pub poll_timeout: Duration,
    /// Pause after a successful write so a tag left on the reader is not rewritten at once
    pub settle_delay: Duration,
    /// Pause after a failure before polling again
    pub backoff_delay: Duration,
    /// Read the record back after writing it
    pub verify_writes: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            backoff_delay: Duration::from_secs(1),
            verify_writes: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("tag writer has been stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
enum Directive {
    Idle,
    Write {
        generation: u64,
        payload: ProvisioningPayload,
    },
    Stop,
}

struct Slot {
    /// handed to the loop on first start
    channel: Option<Box<dyn TagChannel>>,
    task: Option<JoinHandle<()>>,
    generation: u64,
    stopped: bool,
}

pub struct WriteStateMachine {
    slot: Mutex<Slot>,
    directive: watch::Sender<Directive>,
    report: Arc<watch::Sender<WriterReport>>,
    options: WriterOptions,
    runtime: tokio::runtime::Handle,
}

impl WriteStateMachine {
    /// Take ownership of `channel`; nothing touches the hardware until [`start`](Self::start)
    ///
    /// # Panics
    /// When called outside a tokio runtime.
    pub fn new(channel: Box<dyn TagChannel>, options: WriterOptions) -> Self {
        let (directive, _) = watch::channel(Directive::Idle);
        let (report, _) = watch::channel(WriterReport::default());
        Self {
            slot: Mutex::new(Slot {
                channel: Some(channel),
                task: None,
                generation: 0,
                stopped: false,
            }),
            directive,
            report: Arc::new(report),
            options,
            runtime: tokio::runtime::Handle::current(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `payload` the one written to every tag from now on
    ///
    /// A write already in flight for an earlier payload finishes, but its
    /// outcome is discarded.
    pub fn start(&self, payload: ProvisioningPayload) -> Result<(), WriterError> {
        let mut slot = self.slot();
        if slot.stopped {
            return Err(WriterError::Stopped);
        }

        slot.generation += 1;
        let generation = slot.generation;
        self.directive.send_replace(Directive::Write { generation, payload });
        self.report.send_if_modified(|report| match report.status {
            WriterStatus::Writing | WriterStatus::WaitingForTag | WriterStatus::Stopped => false,
            _ => {
                report.status = WriterStatus::WaitingForTag;
                true
            }
        });

        if slot.task.is_none() {
            if let Some(channel) = slot.channel.take() {
                let worker = Worker {
                    channel: Some(channel),
                    directive: self.directive.subscribe(),
                    report: self.report.clone(),
                    options: self.options.clone(),
                    sequence: 0,
                };
                slot.task = Some(self.runtime.spawn(worker.run()));
            }
        }
        debug!("tag writer now on payload generation {generation}");
        Ok(())
    }

    /// Stop the loop and release the reader; later calls are no-ops
    pub async fn stop(&self) {
        let (task, channel) = {
            let mut slot = self.slot();
            if slot.stopped {
                return;
            }
            slot.stopped = true;
            (slot.task.take(), slot.channel.take())
        };
        self.directive.send_replace(Directive::Stop);

        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("tag writer task failed: {e}");
            }
        }
        // never started: the reader was never opened, but release it all the same
        if let Some(mut channel) = channel {
            if let Err(e) = channel.close() {
                warn!("failed to close {}: {e}", channel.describe());
            }
        }

        self.report.send_if_modified(|report| {
            if report.status == WriterStatus::Stopped {
                return false;
            }
            report.status = WriterStatus::Stopped;
            true
        });
    }

    pub fn status(&self) -> WriterStatus {
        self.report.borrow().status.clone()
    }

    pub fn report(&self) -> WriterReport {
        self.report.borrow().clone()
    }

    /// Receiver notified on every status change and completed write attempt
    pub fn subscribe(&self) -> watch::Receiver<WriterReport> {
        self.report.subscribe()
    }
}

/// State owned by the writer task
struct Worker {
    channel: Option<Box<dyn TagChannel>>,
    directive: watch::Receiver<Directive>,
    report: Arc<watch::Sender<WriterReport>>,
    options: WriterOptions,
    sequence: u64,
}

impl Worker {
    async fn run(mut self) {
        let description = match &self.channel {
            Some(channel) => channel.describe(),
            None => return,
        };
        info!("tag writer started on {description}");
        let mut opened = false;

        loop {
            // the machine was dropped without stop
            if self.directive.has_changed().is_err() {
                break;
            }
            let writing = match &*self.directive.borrow_and_update() {
                Directive::Stop => break,
                Directive::Idle => false,
                Directive::Write { .. } => true,
            };
            if !writing {
                if self.directive.changed().await.is_err() {
                    break;
                }
                continue;
            }

            if !opened {
                match self.with_reader(|channel| channel.open()).await {
                    None => break,
                    Some(Ok(())) => {
                        info!("opened {description}");
                        opened = true;
                    }
                    Some(Err(e)) => {
                        self.fail(SystemTime::now(), None, format!("reader unavailable: {e}"));
                        if !self.pause(self.options.backoff_delay).await {
                            break;
                        }
                        self.set_status(WriterStatus::WaitingForTag);
                        continue;
                    }
                }
            }

            self.sequence += 1;
            let started_at = SystemTime::now();
            let timeout = self.options.poll_timeout;
            let polled = match self.with_reader(move |channel| channel.poll_for_tag(timeout)).await {
                Some(polled) => polled,
                None => break,
            };
            let tag = match polled {
                Ok(Some(tag)) => tag,
                Ok(None) => {
                    self.record(TagWriteAttempt {
                        sequence: self.sequence,
                        started_at,
                        tag: None,
                        outcome: AttemptOutcome::NoTagDetected,
                    });
                    continue;
                }
                Err(e) => {
                    self.fail(started_at, None, format!("poll failed: {e}"));
                    if !self.pause(self.options.backoff_delay).await {
                        break;
                    }
                    self.set_status(WriterStatus::WaitingForTag);
                    continue;
                }
            };

            // a newer payload may have arrived while we were polling: write that one
            let live = match &*self.directive.borrow_and_update() {
                Directive::Write { generation, payload } => Some((*generation, payload.clone())),
                _ => None,
            };
            // stop arrived mid-poll, the loop head handles it
            let Some((generation, payload)) = live else {
                continue;
            };
            debug!("tag {tag} detected, writing payload generation {generation}");

            self.set_status(WriterStatus::Writing);
            let record = wipi_proto::to_tag_record(&payload);
            let verify = self.options.verify_writes;
            let written = match self
                .with_reader(move |channel| write_and_verify(channel, &record, verify))
                .await
            {
                Some(written) => written,
                None => break,
            };

            if !self.is_live(generation) {
                info!("discarding write to {tag}: payload was superseded");
                self.record(TagWriteAttempt {
                    sequence: self.sequence,
                    started_at,
                    tag: Some(tag),
                    outcome: AttemptOutcome::Cancelled,
                });
                self.set_status(WriterStatus::WaitingForTag);
                continue;
            }

            match written {
                Ok(()) => {
                    info!("wrote Wi-Fi credentials to tag {tag}");
                    self.set_status(WriterStatus::Succeeded);
                    self.record(TagWriteAttempt {
                        sequence: self.sequence,
                        started_at,
                        tag: Some(tag),
                        outcome: AttemptOutcome::Success,
                    });
                    if !self.pause(self.options.settle_delay).await {
                        break;
                    }
                }
                Err(reason) => {
                    self.fail(started_at, Some(tag), reason);
                    if !self.pause(self.options.backoff_delay).await {
                        break;
                    }
                }
            }
            self.set_status(WriterStatus::WaitingForTag);
        }

        if let Some(Err(e)) = self.with_reader(|channel| channel.close()).await {
            warn!("failed to close {description}: {e}");
        }
        self.set_status(WriterStatus::Stopped);
        info!("tag writer stopped");
    }

    /// Run a blocking reader call; `None` if the call panicked and the channel is gone
    async fn with_reader<T, F>(&mut self, op: F) -> Option<T>
    where
        F: FnOnce(&mut dyn TagChannel) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut channel = self.channel.take()?;
        let joined = tokio::task::spawn_blocking(move || {
            let out = op(channel.as_mut());
            (channel, out)
        })
        .await;

        match joined {
            Ok((channel, out)) => {
                self.channel = Some(channel);
                Some(out)
            }
            Err(e) => {
                error!("reader call panicked: {e}");
                self.report.send_modify(|report| {
                    report.last_error = Some(format!("reader call panicked: {e}"));
                });
                None
            }
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        matches!(
            &*self.directive.borrow(),
            Directive::Write { generation: live, .. } if *live == generation
        )
    }

    /// Sleep unless a new payload or stop arrives first; `false` when the machine is gone
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            changed = self.directive.changed() => changed.is_ok(),
        }
    }

    fn set_status(&self, status: WriterStatus) {
        self.report.send_if_modified(|report| {
            if report.status == status {
                return false;
            }
            report.status = status;
            true
        });
    }

    fn fail(&self, started_at: SystemTime, tag: Option<TagId>, reason: String) {
        warn!("tag write failed: {reason}");
        self.set_status(WriterStatus::Failed(reason.clone()));
        self.record(TagWriteAttempt {
            sequence: self.sequence,
            started_at,
            tag,
            outcome: AttemptOutcome::WriteFailed(reason),
        });
    }

    fn record(&self, attempt: TagWriteAttempt) {
        self.report.send_if_modified(|report| {
            let notify = match &attempt.outcome {
                AttemptOutcome::Success => {
                    report.successes += 1;
                    true
                }
                AttemptOutcome::WriteFailed(reason) => {
                    report.failures += 1;
                    report.last_error = Some(reason.clone());
                    true
                }
                AttemptOutcome::Cancelled => true,
                // every idle poll ends here, keep it quiet
                AttemptOutcome::NoTagDetected => false,
            };
            report.last_attempt = Some(attempt);
            notify
        });
    }
}

fn write_and_verify(channel: &mut dyn TagChannel, record: &[u8], verify: bool) -> Result<(), String> {
    channel.write_record(record).map_err(|e| e.to_string())?;
    if verify {
        let read = channel
            .read_record()
            .map_err(|e| format!("verification read failed: {e}"))?;
        if read != record {
            return Err("verification mismatch".to_string());
        }
    }
    Ok(())
}
