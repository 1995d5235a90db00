//! Chain dispatch map: the per-hook `BPF_MAP_TYPE_PROG_ARRAY`
//! (`aya::maps::ProgramArray`) that backs tail-call dispatch between chain
//! slots. A thin wrapper around the handful of calls `compile_hook`/
//! `remove_hook`/`patch_hook` need, kept in one place the same way
//! [`crate::compiler::Toolchain`] isolates the clang invocation and
//! [`crate::attach::HookAttacher`] isolates the kernel attach call.

use std::os::fd::{BorrowedFd, RawFd};

use aya::maps::{MapData, ProgramArray};

use crate::errors::{DeChainyError, Result};

pub struct DispatchMap {
    inner: ProgramArray<MapData>,
}

impl DispatchMap {
    pub fn new(inner: ProgramArray<MapData>) -> Self {
        DispatchMap { inner }
    }

    /// Points `dispatch_map[slot_id]` at `fd`, the program that slot's
    /// predecessor should tail-call into next.
    pub fn set(&mut self, slot_id: u32, fd: RawFd) -> Result<()> {
        // SAFETY: `fd` is a program fd owned by the `Program`/`SlotProgram`
        // the caller is installing; it outlives this call.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.inner
            .set(slot_id, &borrowed, 0)
            .map_err(|e| DeChainyError::Error(format!("dispatch map write at slot {slot_id} failed: {e}")))
    }

    /// Clears `dispatch_map[slot_id]` so a tail call into it falls through
    /// instead of reaching a now-removed program.
    pub fn clear(&mut self, slot_id: u32) -> Result<()> {
        self.inner
            .clear_index(&slot_id)
            .map_err(|e| DeChainyError::Error(format!("dispatch map clear at slot {slot_id} failed: {e}")))
    }
}
