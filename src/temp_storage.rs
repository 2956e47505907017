//! Scoped temporary storage for intermediate edge lists.
//!
//! The driver owns one [`TempStorage`]; stages borrow slots from it. A slot
//! is write-once-then-read-only: the first read seals it against further
//! writes. Slot files live in the system temp directory and are removed
//! when the registry drops, on success and on abort alike.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::error::{PrepareError, Result};

pub type SlotId = usize;

struct Slot {
    file: File,
    write_mode: bool,
    bytes_written: u64,
}

/// Registry of temp-file slots. Concurrent access to a single slot is
/// serialized by its mutex.
pub struct TempStorage {
    slots: Vec<Mutex<Slot>>,
}

impl TempStorage {
    pub fn new() -> TempStorage {
        TempStorage { slots: Vec::new() }
    }

    /// Creates a new slot backed by an unnamed file in the system temp
    /// directory and returns its id.
    pub fn allocate_slot(&mut self) -> Result<SlotId> {
        let file = tempfile::tempfile()?;
        self.slots.push(Mutex::new(Slot {
            file,
            write_mode: true,
            bytes_written: 0,
        }));
        Ok(self.slots.len() - 1)
    }

    pub fn write_to_slot(&self, slot_id: SlotId, data: &[u8]) -> Result<()> {
        let mut slot = self.lock(slot_id)?;
        if !slot.write_mode {
            return Err(PrepareError::InternalInvariant(format!(
                "slot {slot_id}: write after first read"
            )));
        }
        slot.file.write_all(data)?;
        slot.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Reads exactly `buf.len()` bytes. The first read rewinds the slot and
    /// seals it against writes.
    pub fn read_from_slot(&self, slot_id: SlotId, buf: &mut [u8]) -> Result<()> {
        let mut slot = self.lock(slot_id)?;
        if slot.write_mode {
            slot.write_mode = false;
            slot.file.flush()?;
            slot.file.seek(SeekFrom::Start(0))?;
        }
        slot.file.read_exact(buf)?;
        Ok(())
    }

    pub fn slot_len(&self, slot_id: SlotId) -> Result<u64> {
        Ok(self.lock(slot_id)?.bytes_written)
    }

    fn lock(&self, slot_id: SlotId) -> Result<std::sync::MutexGuard<'_, Slot>> {
        self.slots
            .get(slot_id)
            .ok_or_else(|| PrepareError::InternalInvariant(format!("unknown temp slot {slot_id}")))?
            .lock()
            .map_err(|_| PrepareError::InternalInvariant(format!("temp slot {slot_id} poisoned")))
    }
}

impl Default for TempStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrip() {
        let mut storage = TempStorage::new();
        let slot = storage.allocate_slot().unwrap();
        storage.write_to_slot(slot, b"hello ").unwrap();
        storage.write_to_slot(slot, b"world").unwrap();
        assert_eq!(storage.slot_len(slot).unwrap(), 11);

        let mut buf = [0u8; 11];
        storage.read_from_slot(slot, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_seals_the_slot() {
        let mut storage = TempStorage::new();
        let slot = storage.allocate_slot().unwrap();
        storage.write_to_slot(slot, b"abcd").unwrap();

        let mut buf = [0u8; 4];
        storage.read_from_slot(slot, &mut buf).unwrap();
        assert!(storage.write_to_slot(slot, b"more").is_err());
    }

    #[test]
    fn slots_are_independent() {
        let mut storage = TempStorage::new();
        let a = storage.allocate_slot().unwrap();
        let b = storage.allocate_slot().unwrap();
        storage.write_to_slot(a, b"aa").unwrap();
        storage.write_to_slot(b, b"bbbb").unwrap();
        assert_eq!(storage.slot_len(a).unwrap(), 2);
        assert_eq!(storage.slot_len(b).unwrap(), 4);
    }
}
