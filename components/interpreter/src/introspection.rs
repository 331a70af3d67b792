//! Read-only queries over frame records for debuggers and tracebacks.

use core_types::{ObjectId, ObjectLifetime};
use memory_manager::ObjectHeap;

use crate::code::{executable_kind, with_code, ExecutableKind, CODE_UNIT_SIZE};
use crate::frame::FrameRecord;
use crate::thread_state::{FrameHandle, ThreadState};

impl FrameRecord {
    /// New reference to the executable this record runs.
    ///
    /// # Panics
    ///
    /// Panics if the executable was already released.
    pub fn executable_unit<L>(&self, rt: &L) -> ObjectId
    where
        L: ObjectLifetime + ?Sized,
    {
        match self.executable().to_owned_new(rt) {
            Some(code) => code,
            None => panic!("frame record has no executable"),
        }
    }

    /// Byte offset of the instruction being executed.
    pub fn last_instruction_offset(&self) -> usize {
        debug_assert!(!self.is_cleared(), "introspecting a cleared frame");
        self.instr_offset() * CODE_UNIT_SIZE
    }

    /// Source line of the instruction being executed, when known.
    pub fn source_line(&self, heap: &ObjectHeap) -> Option<u32> {
        let code = self.executable().as_borrowed()?;
        let offset = self.last_instruction_offset();
        with_code(heap, code, |unit| unit.addr_to_line(offset)).flatten()
    }

    /// Kind of callable in the executable slot.
    pub fn executable_kind(&self, heap: &ObjectHeap) -> ExecutableKind {
        match self.executable().as_borrowed() {
            Some(executable) => executable_kind(heap, executable),
            None => ExecutableKind::Skip,
        }
    }
}

impl ThreadState {
    /// New reference to the executable of the frame behind `handle`.
    pub fn executable_unit(&self, handle: FrameHandle) -> ObjectId {
        self.frame(handle).executable_unit(&**self.heap())
    }

    /// Byte offset of the instruction the frame behind `handle` is executing.
    pub fn last_instruction_offset(&self, handle: FrameHandle) -> usize {
        self.frame(handle).last_instruction_offset()
    }

    /// Source line the frame behind `handle` is executing.
    pub fn source_line(&self, handle: FrameHandle) -> Option<u32> {
        self.frame(handle).source_line(self.heap())
    }

    /// Frames from the current one outward that introspection can see.
    pub fn visible_frames(&self) -> Vec<FrameHandle> {
        let mut frames = Vec::new();
        let mut cursor = self.first_complete(self.current_frame());
        while let Some(handle) = cursor {
            frames.push(handle);
            cursor = self.first_complete(self.frame(handle).previous());
        }
        frames
    }
}
