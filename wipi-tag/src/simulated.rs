//! In-memory reader
//!
//! Stands in for hardware in tests and on kiosks without a reader. The
//! [`SimulatedField`] handle controls what the reader "sees": tags can be
//! placed, removed or tapped once, and failures can be injected.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::*;
use rand::RngCore;

use crate::{HardwareError, Result, TagChannel, TagId};

struct SimTag {
    id: TagId,
    memory: Vec<u8>,
    /// removed from the field once a write completed
    one_shot: bool,
    written: bool,
}

#[derive(Default)]
struct FieldState {
    tag: Option<SimTag>,
    open: bool,
    fail_open: Option<String>,
    fail_writes: Option<String>,
    corrupt_reads: bool,
    write_delay: Duration,
    opens: usize,
    closes: usize,
    polls: usize,
    writes: Vec<(TagId, Vec<u8>)>,
}

/// Handle to the simulated RF field, cheap to clone
#[derive(Clone, Default)]
pub struct SimulatedField {
    state: Arc<Mutex<FieldState>>,
    changed: Arc<Condvar>,
}

impl SimulatedField {
    fn lock(&self) -> MutexGuard<'_, FieldState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn present(&self, tag: SimTag) {
        self.lock().tag = Some(tag);
        self.changed.notify_all();
    }

    /// Put a blank tag in the field until [`remove`](Self::remove) is called
    pub fn place(&self, id: &[u8]) {
        self.present(SimTag {
            id: TagId::new(id),
            memory: Vec::new(),
            one_shot: false,
            written: false,
        });
    }

    /// Present a fresh tag with a random UID that leaves after one write
    pub fn tap(&self) -> TagId {
        let mut uid = [0u8; 7];
        rand::thread_rng().fill_bytes(&mut uid);
        // NXP manufacturer code
        uid[0] = 0x04;
        let id = TagId::new(&uid);
        self.present(SimTag {
            id: id.clone(),
            memory: Vec::new(),
            one_shot: true,
            written: false,
        });
        id
    }

    pub fn remove(&self) {
        self.lock().tag = None;
    }

    /// Make every write fail with `reason`, or succeed again with `None`
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.lock().fail_writes = reason.map(str::to_string);
    }

    /// Make `open` fail with `reason`, or succeed again with `None`
    pub fn fail_open(&self, reason: Option<&str>) {
        self.lock().fail_open = reason.map(str::to_string);
    }

    /// Return a damaged record from reads, as a tag pulled away mid-write would
    pub fn corrupt_reads(&self, corrupt: bool) {
        self.lock().corrupt_reads = corrupt;
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.lock().write_delay = delay;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn poll_count(&self) -> usize {
        self.lock().polls
    }

    /// Every record written so far, oldest first
    pub fn written(&self) -> Vec<(TagId, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Current content of the tag in the field
    pub fn tag_memory(&self) -> Option<Vec<u8>> {
        self.lock().tag.as_ref().map(|tag| tag.memory.clone())
    }
}

/// Reader backed by a [`SimulatedField`]
pub struct SimulatedReader {
    field: SimulatedField,
}

impl SimulatedReader {
    pub fn new() -> Self {
        Self::with_field(SimulatedField::default())
    }

    pub fn with_field(field: SimulatedField) -> Self {
        Self { field }
    }

    pub fn field(&self) -> SimulatedField {
        self.field.clone()
    }
}

impl Default for SimulatedReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TagChannel for SimulatedReader {
    fn describe(&self) -> String {
        "simulated reader".to_string()
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.field.lock();
        if let Some(reason) = &state.fail_open {
            return Err(HardwareError::Open {
                device: "simulated".to_string(),
                reason: reason.clone(),
            });
        }
        if !state.open {
            state.open = true;
            state.opens += 1;
        }
        Ok(())
    }

    fn poll_for_tag(&mut self, timeout: Duration) -> Result<Option<TagId>> {
        let mut state = self.field.lock();
        if !state.open {
            return Err(HardwareError::NotOpen);
        }
        state.polls += 1;

        // a tapped tag leaves the field after it has been written
        if state.tag.as_ref().is_some_and(|tag| tag.one_shot && tag.written) {
            state.tag = None;
        }

        let (state, _) = self
            .field
            .changed
            .wait_timeout_while(state, timeout, |state| state.tag.is_none())
            .unwrap_or_else(|e| e.into_inner());
        Ok(state.tag.as_ref().map(|tag| tag.id.clone()))
    }

    fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let delay = {
            let state = self.field.lock();
            if !state.open {
                return Err(HardwareError::NotOpen);
            }
            state.write_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.field.lock();
        if let Some(reason) = &state.fail_writes {
            return Err(HardwareError::Simulated(reason.clone()));
        }
        let Some(tag) = state.tag.as_mut() else {
            return Err(HardwareError::TagLost);
        };
        tag.memory = record.to_vec();
        tag.written = true;
        let id = tag.id.clone();
        debug!("simulated write of {} bytes to {id}", record.len());
        state.writes.push((id, record.to_vec()));
        Ok(())
    }

    fn read_record(&mut self) -> Result<Vec<u8>> {
        let state = self.field.lock();
        if !state.open {
            return Err(HardwareError::NotOpen);
        }
        let tag = state.tag.as_ref().ok_or(HardwareError::TagLost)?;
        if tag.memory.is_empty() {
            return Err(wipi_proto::type2::TlvError::NoNdefMessage.into());
        }
        let mut memory = tag.memory.clone();
        if state.corrupt_reads {
            let half = memory.len() / 2;
            memory.truncate(half);
        }
        Ok(memory)
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.field.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn poll_sees_placed_tag() {
        let mut reader = SimulatedReader::new();
        let field = reader.field();
        reader.open().unwrap();

        assert_eq!(reader.poll_for_tag(SHORT).unwrap(), None);
        field.place(&[1, 2, 3, 4]);
        assert_eq!(reader.poll_for_tag(SHORT).unwrap(), Some(TagId::new(&[1, 2, 3, 4])));

        reader.write_record(b"hello").unwrap();
        assert_eq!(reader.read_record().unwrap(), b"hello");
        assert_eq!(field.tag_memory().unwrap(), b"hello");

        field.remove();
        assert_eq!(reader.poll_for_tag(SHORT).unwrap(), None);
        assert!(matches!(reader.write_record(b"x"), Err(HardwareError::TagLost)));
    }

    #[test]
    fn tapped_tag_leaves_after_write() {
        let mut reader = SimulatedReader::new();
        let field = reader.field();
        reader.open().unwrap();

        let id = field.tap();
        assert_eq!(id.as_bytes()[0], 0x04);
        assert_eq!(reader.poll_for_tag(SHORT).unwrap(), Some(id.clone()));
        // still there until written
        assert_eq!(reader.poll_for_tag(SHORT).unwrap(), Some(id));
        reader.write_record(b"payload").unwrap();
        assert_eq!(reader.poll_for_tag(SHORT).unwrap(), None);
        assert_eq!(field.written().len(), 1);
    }

    #[test]
    fn poll_wakes_when_tag_arrives() {
        let mut reader = SimulatedReader::new();
        let field = reader.field();
        reader.open().unwrap();

        let placer = field.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            placer.place(&[9, 9, 9, 9]);
        });
        let found = reader.poll_for_tag(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(found, Some(TagId::new(&[9, 9, 9, 9])));
    }

    #[test]
    fn injected_failures() {
        let mut reader = SimulatedReader::new();
        let field = reader.field();

        field.fail_open(Some("no such device"));
        assert!(matches!(reader.open(), Err(HardwareError::Open { .. })));
        assert!(matches!(reader.poll_for_tag(SHORT), Err(HardwareError::NotOpen)));
        field.fail_open(None);
        reader.open().unwrap();

        field.place(&[1, 1, 1, 1]);
        field.fail_writes(Some("write NAK"));
        let err = reader.write_record(b"x").unwrap_err();
        assert_eq!(err.to_string(), "write NAK");
        assert!(field.written().is_empty());
    }

    #[test]
    fn open_and_close_are_idempotent() {
        let mut reader = SimulatedReader::new();
        let field = reader.field();

        reader.close().unwrap();
        assert_eq!(field.close_count(), 0);

        reader.open().unwrap();
        reader.open().unwrap();
        assert_eq!(field.open_count(), 1);

        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(field.close_count(), 1);
        assert!(!field.is_open());
    }
}
