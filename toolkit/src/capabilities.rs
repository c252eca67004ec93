//! Object-safe traits the agent is written against.
//!
//! A concrete backend implements all of them on one type; the agent holds it
//! as `Arc<dyn Toolkit>`. Names mirror what the surface does, not any one
//! vendor's API.

use std::sync::Arc;

use shared::errors::{HookError, MemoryError, ScanError};
use shared::events::AgentEvent;

use crate::pattern::BytePattern;
use crate::types::{
    Arch, CpuContext, ExportInfo, ImportInfo, Instruction, MemoryRange, ModuleInfo, Protection,
    ScanMatch, SymbolDetails, SymbolInfo, ThreadInfo,
};
use crate::Address;

/// Static facts about the target process and its address space.
pub trait ProcessView {
    fn arch(&self) -> Arch;
    fn platform(&self) -> String;
    fn pid(&self) -> u32;
    fn pointer_size(&self) -> usize;
    fn page_size(&self) -> usize;
    fn modules(&self) -> Vec<ModuleInfo>;
    /// Ranges whose protection covers `min`.
    fn ranges(&self, min: Protection) -> Vec<MemoryRange>;
    fn range_containing(&self, addr: Address) -> Option<MemoryRange>;
    fn module_containing(&self, addr: Address) -> Option<ModuleInfo>;
}

/// Raw memory access. Reads and writes may transiently fail if a range is
/// unmapped underneath the agent; callers handle that as data, not a panic.
pub trait MemoryAccess {
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError>;
    fn write_bytes(&self, addr: Address, bytes: &[u8]) -> Result<(), MemoryError>;
    fn protect(&self, addr: Address, size: u64, prot: Protection) -> Result<(), MemoryError>;
    /// Synchronous pattern scan over one range.
    fn scan_range(
        &self,
        base: Address,
        size: u64,
        pattern: &BytePattern,
    ) -> Result<Vec<ScanMatch>, ScanError>;
}

/// Module-scoped symbol enumeration plus the debug-symbol service.
pub trait SymbolSource {
    fn exports(&self, module: &str) -> Vec<ExportInfo>;
    fn imports(&self, module: &str) -> Vec<ImportInfo>;
    fn symbols(&self, module: &str) -> Vec<SymbolInfo>;
    fn resolve_export(&self, module: &str, symbol: &str) -> Option<Address>;
    fn find_by_name(&self, name: &str) -> Option<SymbolDetails>;
    /// Always returns a record; fields are `None` when nothing resolves.
    fn find_by_address(&self, addr: Address) -> SymbolDetails;
}

pub trait InstructionDecoder {
    /// Decode one instruction, or `None` when the bytes do not decode.
    fn decode(&self, addr: Address) -> Option<Instruction>;
}

pub trait ThreadAccess {
    fn threads(&self) -> Vec<ThreadInfo>;
    /// Return addresses walked from a captured cpu-context.
    fn backtrace(&self, context: &CpuContext) -> Vec<Address>;
    /// Best-effort name for an address, for annotating backtraces.
    fn symbolicate(&self, addr: Address) -> Option<String>;
}

/// One side of an intercepted call. The handler sees indexable argument
/// slots on entry and a replaceable return value on exit.
pub trait Invocation {
    fn arg(&self, index: usize) -> Result<Address, MemoryError>;
    fn set_arg(&mut self, index: usize, value: Address) -> Result<(), MemoryError>;
    fn retval(&self) -> Result<Address, MemoryError>;
    fn set_retval(&mut self, value: Address) -> Result<(), MemoryError>;
    fn thread_id(&self) -> u32;
    /// Reentrancy counter maintained by the backend.
    fn depth(&self) -> u32;
    fn context(&self) -> CpuContext;
}

/// Callbacks fired around an instrumented call. Handlers run in the context
/// of an arbitrary target thread: they must be short, must not block, and
/// must treat all errors locally.
pub trait InvocationHandler: Send + Sync {
    fn on_enter(&self, inv: &mut dyn Invocation);
    fn on_leave(&self, inv: &mut dyn Invocation);
}

/// A detachable installed listener. Listeners are one-shot: once detached
/// they cannot be resumed, only recreated.
pub trait Listener: Send + Sync {
    fn detach(&self);
}

pub trait Interceptor {
    fn attach(
        &self,
        addr: Address,
        handler: Arc<dyn InvocationHandler>,
    ) -> Result<Box<dyn Listener>, HookError>;
}

/// A managed-runtime language bridge (e.g. a VM's class catalogue).
pub trait RuntimeBridge {
    fn classes(&self) -> Vec<String>;
    fn methods(&self, class: &str) -> Vec<String>;
}

/// Capability probe for optional per-runtime bridges.
pub trait BridgeProbe {
    fn bridge(&self, runtime: &str) -> Option<&dyn RuntimeBridge>;
}

/// Asynchronous host-bound transport. Best-effort delivery; the agent never
/// blocks awaiting acknowledgement.
pub trait EventSink: Send + Sync {
    fn post(&self, event: AgentEvent);
}

/// The full capability surface a backend must provide.
pub trait Toolkit:
    ProcessView
    + MemoryAccess
    + SymbolSource
    + InstructionDecoder
    + ThreadAccess
    + Interceptor
    + BridgeProbe
    + Send
    + Sync
{
}

impl<T> Toolkit for T where
    T: ProcessView
        + MemoryAccess
        + SymbolSource
        + InstructionDecoder
        + ThreadAccess
        + Interceptor
        + BridgeProbe
        + Send
        + Sync
{
}
