//! Code units and executable classification
//!
//! A code unit describes what a frame needs to know about the code it runs:
//! how many slots to reserve, where the entry prologue ends, and how byte
//! offsets map to source lines. Code units live on the heap as payloads of
//! `ObjectKind::Code` objects.

use core_types::{ObjectId, ObjectLifetime, RuntimeResult};
use memory_manager::{HeapPayload, ObjectHeap, ObjectKind};

/// Size in bytes of one instruction unit.
pub const CODE_UNIT_SIZE: usize = 2;

/// One row of a line table: byte offsets `[start, end)` map to `line`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// First byte offset covered
    pub start: usize,
    /// One past the last byte offset covered
    pub end: usize,
    /// Source line, or `None` for synthetic instructions
    pub line: Option<u32>,
}

/// Static description of an executable code unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    /// Qualified name, for diagnostics
    pub name: String,
    /// Number of local, cell and free variable slots
    pub nlocalsplus: usize,
    /// Maximum evaluation stack depth
    pub stacksize: usize,
    /// Index of the first instruction after the entry prologue
    pub prologue_end: usize,
    /// Offset-to-line mapping
    pub line_table: Vec<LineEntry>,
}

impl CodeUnit {
    /// Creates a code unit with no prologue and no line information.
    pub fn new(name: impl Into<String>, nlocalsplus: usize, stacksize: usize) -> Self {
        CodeUnit {
            name: name.into(),
            nlocalsplus,
            stacksize,
            prologue_end: 0,
            line_table: Vec::new(),
        }
    }

    /// Sets the index of the first instruction after the entry prologue.
    pub fn with_prologue(mut self, prologue_end: usize) -> Self {
        self.prologue_end = prologue_end;
        self
    }

    /// Appends a line table row covering instructions `[first, last]`.
    pub fn with_line(mut self, first: usize, last: usize, line: u32) -> Self {
        self.line_table.push(LineEntry {
            start: first * CODE_UNIT_SIZE,
            end: (last + 1) * CODE_UNIT_SIZE,
            line: Some(line),
        });
        self
    }

    /// Total slots a frame running this code needs.
    pub fn slot_capacity(&self) -> usize {
        self.nlocalsplus + self.stacksize
    }

    /// Maps a byte offset to its source line.
    pub fn addr_to_line(&self, offset: usize) -> Option<u32> {
        self.line_table
            .iter()
            .find(|entry| entry.start <= offset && offset < entry.end)
            .and_then(|entry| entry.line)
    }

    /// Stores this code unit on the heap; the caller owns the returned reference.
    pub fn into_object(self, heap: &ObjectHeap) -> RuntimeResult<ObjectId> {
        heap.alloc_with_payload(ObjectKind::Code, Box::new(self))
    }
}

impl HeapPayload for CodeUnit {
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Payload of a function object: the code it runs.
#[derive(Debug)]
pub struct FunctionObject {
    code: ObjectId,
}

impl FunctionObject {
    /// Code unit this function executes.
    pub fn code(&self) -> ObjectId {
        self.code
    }
}

impl HeapPayload for FunctionObject {
    fn traverse(
        &self,
        visit: &mut dyn FnMut(ObjectId) -> memory_manager::VisitResult,
    ) -> memory_manager::VisitResult {
        visit(self.code)
    }

    fn dealloc(self: Box<Self>, heap: &ObjectHeap) -> RuntimeResult<()> {
        heap.decref(self.code)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Creates a function object running `code`; takes a new reference to `code`.
pub fn new_function(heap: &ObjectHeap, code: ObjectId) -> RuntimeResult<ObjectId> {
    heap.incref(code);
    match heap.alloc_with_payload(ObjectKind::Function, Box::new(FunctionObject { code })) {
        Ok(func) => Ok(func),
        Err(err) => {
            heap.decref(code)?;
            Err(err)
        }
    }
}

/// Code unit run by `function`, borrowed.
pub fn function_code(heap: &ObjectHeap, function: ObjectId) -> Option<ObjectId> {
    heap.with_payload(function, |f: &mut FunctionObject| f.code())
}

/// Runs `f` on the code unit stored in `code`.
pub fn with_code<R>(heap: &ObjectHeap, code: ObjectId, f: impl FnOnce(&CodeUnit) -> R) -> Option<R> {
    heap.with_payload(code, |unit: &mut CodeUnit| f(unit))
}

/// What kind of callable an executable slot holds, for external profilers
/// and debuggers walking frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    /// Not an executable; frames with this kind are skipped
    Skip,
    /// Code unit of a language-level function
    Function,
    /// Natively implemented function
    BuiltinFunction,
    /// Method descriptor of a native type
    MethodDescriptor,
}

/// Classifies the object held in a frame's executable slot.
pub fn executable_kind(heap: &ObjectHeap, executable: ObjectId) -> ExecutableKind {
    match heap.kind(executable) {
        ObjectKind::Code => ExecutableKind::Function,
        ObjectKind::BuiltinFunction => ExecutableKind::BuiltinFunction,
        ObjectKind::MethodDescriptor => ExecutableKind::MethodDescriptor,
        _ => ExecutableKind::Skip,
    }
}
