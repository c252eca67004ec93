//! Abstract capability surface of the dynamic-instrumentation toolkit.
//!
//! The agent core never talks to a concrete instrumentation backend; it is
//! written entirely against the traits in [`capabilities`]. A real injection
//! build provides an implementation over the embedder's primitives, and the
//! feature-gated [`testkit`] module provides a deterministic in-memory one.

mod address;
pub mod capabilities;
mod pattern;
mod types;

#[cfg(feature = "testkit")]
pub mod testkit;

/// One-stop import for callers that go through `dyn Toolkit`: method
/// resolution needs every capability trait in scope, not just the
/// supertrait.
pub mod prelude {
    pub use crate::capabilities::{
        BridgeProbe, EventSink, InstructionDecoder, Interceptor, MemoryAccess, ProcessView,
        SymbolSource, ThreadAccess, Toolkit,
    };
}

pub use address::Address;
pub use capabilities::{
    BridgeProbe, EventSink, InstructionDecoder, Interceptor, Invocation, InvocationHandler,
    Listener, MemoryAccess, ProcessView, RuntimeBridge, SymbolSource, ThreadAccess, Toolkit,
};
pub use pattern::BytePattern;
pub use types::{
    Arch, CpuContext, ExportInfo, ImportInfo, Instruction, MemoryRange, ModuleInfo, Protection,
    ScanMatch, SymbolDetails, SymbolInfo, SymbolKind, ThreadInfo,
};
