//! Generation-checked processor handles
//!
//! A handle is an index into a process-wide table plus the generation of the
//! slot it was issued for, packed into a pointer-sized token that is never
//! dereferenced. Releasing a slot bumps its generation, so stale copies of a
//! handle are recognized instead of aliasing whatever reuses the slot.
//!
//! A processor is checked out of its slot while a call runs on it. The table
//! lock is held only for the checkout and the check-in.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ComputeError;
use crate::pipeline::FluxProcessor;

/// Opaque processor handle as seen from C
#[repr(C)]
pub struct FluxProcessorHandle {
    _private: [u8; 0],
}

const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;

enum Slot {
    Vacant,
    Ready(Box<FluxProcessor>),
    Busy,
}

struct Entry {
    generation: usize,
    slot: Slot,
}

struct HandleTable {
    entries: Vec<Entry>,
    free: Vec<usize>,
}

static TABLE: Mutex<HandleTable> = Mutex::new(HandleTable::new());

fn table() -> MutexGuard<'static, HandleTable> {
    TABLE.lock().unwrap_or_else(PoisonError::into_inner)
}

fn encode(index: usize, generation: usize) -> usize {
    (generation << INDEX_BITS) | (index + 1)
}

fn decode(token: usize) -> Option<(usize, usize)> {
    let index = (token & INDEX_MASK).checked_sub(1)?;
    Some((index, token >> INDEX_BITS))
}

impl HandleTable {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, processor: Box<FluxProcessor>) -> Result<usize, ComputeError> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.entries.len();
                if index + 1 > INDEX_MASK {
                    return Err(ComputeError::AllocationFailure(
                        "processor table is full".to_string(),
                    ));
                }
                self.entries.push(Entry {
                    generation: 0,
                    slot: Slot::Vacant,
                });
                index
            }
        };
        let entry = &mut self.entries[index];
        entry.slot = Slot::Ready(processor);
        Ok(encode(index, entry.generation))
    }

    fn entry_mut(&mut self, token: usize) -> Result<&mut Entry, ComputeError> {
        let stale = || ComputeError::InvalidHandle(format!("{token:#x} is unknown or released"));
        let (index, generation) = decode(token).ok_or_else(stale)?;
        match self.entries.get_mut(index) {
            Some(entry) if entry.generation == generation => Ok(entry),
            _ => Err(stale()),
        }
    }

    fn checkout(&mut self, token: usize) -> Result<Box<FluxProcessor>, ComputeError> {
        let entry = self.entry_mut(token)?;
        match std::mem::replace(&mut entry.slot, Slot::Busy) {
            Slot::Ready(processor) => Ok(processor),
            other => {
                let busy = matches!(other, Slot::Busy);
                entry.slot = other;
                Err(if busy {
                    ComputeError::InvalidHandle(format!("{token:#x} is in use by another call"))
                } else {
                    ComputeError::InvalidHandle(format!("{token:#x} is unknown or released"))
                })
            }
        }
    }

    fn checkin(&mut self, token: usize, processor: Box<FluxProcessor>) {
        if let Ok(entry) = self.entry_mut(token) {
            entry.slot = Slot::Ready(processor);
        }
    }

    fn remove(&mut self, token: usize) -> Result<Box<FluxProcessor>, ComputeError> {
        let processor = self.checkout(token)?;
        let (index, _) = decode(token).ok_or_else(|| {
            ComputeError::InvalidHandle(format!("{token:#x} is unknown or released"))
        })?;
        let entry = &mut self.entries[index];
        entry.slot = Slot::Vacant;
        entry.generation = (entry.generation + 1) & INDEX_MASK;
        self.free.push(index);
        Ok(processor)
    }

    fn live(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !matches!(e.slot, Slot::Vacant))
            .count()
    }
}

/// Register a processor and issue its handle
pub(crate) fn register(processor: FluxProcessor) -> Result<*mut FluxProcessorHandle, ComputeError> {
    let token = table().insert(Box::new(processor))?;
    Ok(token as *mut FluxProcessorHandle)
}

/// Run `f` with exclusive access to the processor behind `handle`
pub(crate) fn with_processor<T>(
    handle: *mut FluxProcessorHandle,
    f: impl FnOnce(&mut FluxProcessor) -> Result<T, ComputeError>,
) -> Result<T, ComputeError> {
    if handle.is_null() {
        return Err(ComputeError::InvalidHandle("null processor handle".to_string()));
    }
    let token = handle as usize;
    let mut processor = table().checkout(token)?;
    let result = f(&mut processor);
    table().checkin(token, processor);
    result
}

/// Destroy the processor behind `handle`; null is accepted and ignored
pub(crate) fn release(handle: *mut FluxProcessorHandle) -> Result<(), ComputeError> {
    if handle.is_null() {
        return Ok(());
    }
    let processor = table().remove(handle as usize)?;
    drop(processor);
    Ok(())
}

/// Processors created and not yet released
pub fn live_handle_count() -> usize {
    table().live()
}
