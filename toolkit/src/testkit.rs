//! Deterministic in-memory backend for tests.
//!
//! Builds a fake process image out of plain vectors: mapped pages, modules,
//! export tables, a table-driven instruction decoder and an interceptor whose
//! invocations are fired manually from the test body. No target process is
//! involved anywhere.
//!
//! Builder methods take `&mut self` and are meant to run before the toolkit
//! is wrapped in an `Arc`; runtime entry points (`poke`, `invoke`) take
//! `&self` so they stay callable afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shared::errors::{HookError, MemoryError, ScanError};
use shared::events::AgentEvent;

use crate::capabilities::{
    BridgeProbe, EventSink, InstructionDecoder, Interceptor, Invocation, InvocationHandler,
    Listener, MemoryAccess, ProcessView, RuntimeBridge, SymbolSource, ThreadAccess,
};
use crate::pattern::BytePattern;
use crate::types::{
    Arch, CpuContext, ExportInfo, ImportInfo, Instruction, MemoryRange, ModuleInfo, Protection,
    ScanMatch, SymbolDetails, SymbolInfo, SymbolKind, ThreadInfo,
};
use crate::Address;

struct FakePage {
    base: u64,
    data: Vec<u8>,
    prot: Protection,
    file: Option<String>,
}

impl FakePage {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.data.len() as u64
    }
}

/// A per-runtime class catalogue, keyed off `FakeToolkit::add_bridge`.
pub struct FakeBridge {
    classes: Vec<String>,
    methods: HashMap<String, Vec<String>>,
}

impl RuntimeBridge for FakeBridge {
    fn classes(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn methods(&self, class: &str) -> Vec<String> {
        self.methods.get(class).cloned().unwrap_or_default()
    }
}

struct InstalledHook {
    addr: u64,
    active: Arc<AtomicBool>,
    handler: Arc<dyn InvocationHandler>,
}

struct FakeListener {
    active: Arc<AtomicBool>,
}

impl Listener for FakeListener {
    fn detach(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Mutable view of one fake intercepted call.
pub struct FakeInvocation {
    args: Vec<Address>,
    retval: Address,
    thread_id: u32,
    depth: u32,
    context: CpuContext,
}

impl Invocation for FakeInvocation {
    fn arg(&self, index: usize) -> Result<Address, MemoryError> {
        self.args
            .get(index)
            .copied()
            .ok_or(MemoryError::BadSlot { index })
    }

    fn set_arg(&mut self, index: usize, value: Address) -> Result<(), MemoryError> {
        match self.args.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(MemoryError::BadSlot { index }),
        }
    }

    fn retval(&self) -> Result<Address, MemoryError> {
        Ok(self.retval)
    }

    fn set_retval(&mut self, value: Address) -> Result<(), MemoryError> {
        self.retval = value;
        Ok(())
    }

    fn thread_id(&self) -> u32 {
        self.thread_id
    }

    fn depth(&self) -> u32 {
        self.depth
    }

    fn context(&self) -> CpuContext {
        self.context.clone()
    }
}

/// Final argument slots and return value after all handlers ran.
pub struct InvocationOutcome {
    pub args: Vec<Address>,
    pub retval: Address,
}

pub struct FakeToolkit {
    arch: Arch,
    platform: String,
    pid: u32,
    pointer_size: usize,
    page_size: usize,
    pages: Mutex<Vec<FakePage>>,
    modules: Vec<ModuleInfo>,
    exports: HashMap<String, Vec<ExportInfo>>,
    imports: HashMap<String, Vec<ImportInfo>>,
    symbols: HashMap<String, Vec<SymbolInfo>>,
    named: Vec<SymbolDetails>,
    instructions: HashMap<u64, Instruction>,
    threads: Vec<ThreadInfo>,
    frames: Vec<Address>,
    symbolications: HashMap<u64, String>,
    bridges: HashMap<String, FakeBridge>,
    hooks: Mutex<Vec<InstalledHook>>,
}

impl FakeToolkit {
    pub fn new(arch: Arch) -> Self {
        let pointer_size = match arch {
            Arch::X64 | Arch::Arm64 => 8,
            Arch::Ia32 | Arch::Arm => 4,
        };
        FakeToolkit {
            arch,
            platform: "linux".to_string(),
            pid: 4242,
            pointer_size,
            page_size: 4096,
            pages: Mutex::new(Vec::new()),
            modules: Vec::new(),
            exports: HashMap::new(),
            imports: HashMap::new(),
            symbols: HashMap::new(),
            named: Vec::new(),
            instructions: HashMap::new(),
            threads: Vec::new(),
            frames: Vec::new(),
            symbolications: HashMap::new(),
            bridges: HashMap::new(),
            hooks: Mutex::new(Vec::new()),
        }
    }

    // ── Image construction ──────────────────────────────────────────────

    pub fn map_range(&mut self, base: u64, data: Vec<u8>, prot: &str, file: Option<&str>) {
        self.pages.lock().unwrap().push(FakePage {
            base,
            data,
            prot: prot.parse().expect("testkit protection literal"),
            file: file.map(str::to_string),
        });
    }

    pub fn add_module(&mut self, name: &str, base: u64, size: u64, path: &str) {
        self.modules.push(ModuleInfo {
            name: name.to_string(),
            base: Address::new(base),
            size,
            path: path.to_string(),
        });
    }

    pub fn add_export(&mut self, module: &str, kind: SymbolKind, name: &str, addr: u64) {
        self.exports
            .entry(module.to_string())
            .or_default()
            .push(ExportInfo {
                kind,
                name: name.to_string(),
                address: Address::new(addr),
            });
    }

    pub fn add_import(&mut self, module: &str, name: &str, from: Option<&str>, addr: Option<u64>) {
        self.imports
            .entry(module.to_string())
            .or_default()
            .push(ImportInfo {
                kind: SymbolKind::Function,
                name: name.to_string(),
                module: from.map(str::to_string),
                address: addr.map(Address::new),
            });
    }

    pub fn add_symbol(&mut self, module: &str, name: &str, addr: u64, global: bool) {
        self.symbols
            .entry(module.to_string())
            .or_default()
            .push(SymbolInfo {
                name: name.to_string(),
                address: Address::new(addr),
                kind: None,
                global,
            });
    }

    pub fn add_named_symbol(&mut self, details: SymbolDetails) {
        self.named.push(details);
    }

    /// Register a decodable instruction with the natural fall-through.
    pub fn add_instruction(&mut self, addr: u64, size: u32, mnemonic: &str, op_str: &str) {
        self.add_instruction_with_next(addr, size, mnemonic, op_str, addr + size as u64);
    }

    /// Register a decodable instruction with an explicit `next` pointer,
    /// e.g. a jump that lands back on itself.
    pub fn add_instruction_with_next(
        &mut self,
        addr: u64,
        size: u32,
        mnemonic: &str,
        op_str: &str,
        next: u64,
    ) {
        self.instructions.insert(
            addr,
            Instruction {
                address: Address::new(addr),
                next: Address::new(next),
                size,
                mnemonic: mnemonic.to_string(),
                op_str: op_str.to_string(),
                groups: Vec::new(),
                regs_read: Vec::new(),
                regs_written: Vec::new(),
            },
        );
    }

    pub fn add_thread(&mut self, id: u32, state: &str, pc: u64, sp: u64) {
        self.threads.push(ThreadInfo {
            id,
            state: state.to_string(),
            context: CpuContext {
                pc: Address::new(pc),
                sp: Address::new(sp),
                regs: BTreeMap::new(),
            },
        });
    }

    /// Canned return-address chain handed out by `backtrace`.
    pub fn set_frames(&mut self, frames: Vec<u64>) {
        self.frames = frames.into_iter().map(Address::new).collect();
    }

    pub fn add_symbolication(&mut self, addr: u64, name: &str) {
        self.symbolications.insert(addr, name.to_string());
    }

    pub fn add_bridge(
        &mut self,
        runtime: &str,
        classes: Vec<String>,
        methods: HashMap<String, Vec<String>>,
    ) {
        self.bridges
            .insert(runtime.to_string(), FakeBridge { classes, methods });
    }

    // ── Runtime entry points (usable through the Arc) ───────────────────

    /// Direct write into the image, ignoring protections. This is the
    /// test's stand-in for the target process mutating its own memory.
    pub fn poke(&self, addr: u64, bytes: &[u8]) {
        let mut pages = self.pages.lock().unwrap();
        for page in pages.iter_mut() {
            if page.contains(addr) {
                let off = (addr - page.base) as usize;
                let end = (off + bytes.len()).min(page.data.len());
                page.data[off..end].copy_from_slice(&bytes[..end - off]);
                return;
            }
        }
        panic!("poke outside any mapped range: {addr:#x}");
    }

    /// Direct read, ignoring protections.
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let pages = self.pages.lock().unwrap();
        for page in pages.iter() {
            if page.contains(addr) {
                let off = (addr - page.base) as usize;
                let end = (off + len).min(page.data.len());
                return page.data[off..end].to_vec();
            }
        }
        panic!("peek outside any mapped range: {addr:#x}");
    }

    pub fn protection_at(&self, addr: u64) -> Option<Protection> {
        let pages = self.pages.lock().unwrap();
        pages.iter().find(|p| p.contains(addr)).map(|p| p.prot)
    }

    /// Number of still-attached listeners at `addr`.
    pub fn listener_count(&self, addr: u64) -> usize {
        self.hooks
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.addr == addr && h.active.load(Ordering::SeqCst))
            .count()
    }

    /// Simulate the target calling the function at `addr`: fires the enter
    /// side of every attached listener, then the leave side, in attach
    /// order, and reports the possibly rewritten slots.
    pub fn invoke(&self, addr: u64, args: &[u64], retval: u64) -> InvocationOutcome {
        self.invoke_on_thread(1, 0, addr, args, retval)
    }

    pub fn invoke_on_thread(
        &self,
        thread_id: u32,
        depth: u32,
        addr: u64,
        args: &[u64],
        retval: u64,
    ) -> InvocationOutcome {
        let handlers: Vec<Arc<dyn InvocationHandler>> = self
            .hooks
            .lock()
            .unwrap()
            .iter()
            .filter(|h| h.addr == addr && h.active.load(Ordering::SeqCst))
            .map(|h| Arc::clone(&h.handler))
            .collect();

        let context = self
            .threads
            .iter()
            .find(|t| t.id == thread_id)
            .map(|t| t.context.clone())
            .unwrap_or(CpuContext {
                pc: Address::new(addr),
                sp: Address::NULL,
                regs: BTreeMap::new(),
            });

        let mut inv = FakeInvocation {
            args: args.iter().copied().map(Address::new).collect(),
            retval: Address::new(retval),
            thread_id,
            depth,
            context,
        };
        for h in &handlers {
            h.on_enter(&mut inv);
        }
        for h in &handlers {
            h.on_leave(&mut inv);
        }
        InvocationOutcome {
            args: inv.args,
            retval: inv.retval,
        }
    }
}

impl ProcessView for FakeToolkit {
    fn arch(&self) -> Arch {
        self.arch
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.clone()
    }

    fn ranges(&self, min: Protection) -> Vec<MemoryRange> {
        let pages = self.pages.lock().unwrap();
        pages
            .iter()
            .filter(|p| p.prot.covers(min))
            .map(|p| MemoryRange {
                base: Address::new(p.base),
                size: p.data.len() as u64,
                protection: p.prot,
                file: p.file.clone(),
            })
            .collect()
    }

    fn range_containing(&self, addr: Address) -> Option<MemoryRange> {
        let pages = self.pages.lock().unwrap();
        pages.iter().find(|p| p.contains(addr.get())).map(|p| MemoryRange {
            base: Address::new(p.base),
            size: p.data.len() as u64,
            protection: p.prot,
            file: p.file.clone(),
        })
    }

    fn module_containing(&self, addr: Address) -> Option<ModuleInfo> {
        let a = addr.get();
        self.modules
            .iter()
            .find(|m| a >= m.base.get() && a - m.base.get() < m.size)
            .cloned()
    }
}

impl MemoryAccess for FakeToolkit {
    fn read_bytes(&self, addr: Address, len: usize) -> Result<Vec<u8>, MemoryError> {
        let a = addr.get();
        let pages = self.pages.lock().unwrap();
        let page = pages
            .iter()
            .find(|p| p.contains(a))
            .ok_or(MemoryError::Unreadable { address: a, len })?;
        if !page.prot.read {
            return Err(MemoryError::Unreadable { address: a, len });
        }
        let off = (a - page.base) as usize;
        if off + len > page.data.len() {
            return Err(MemoryError::Unreadable { address: a, len });
        }
        Ok(page.data[off..off + len].to_vec())
    }

    fn write_bytes(&self, addr: Address, bytes: &[u8]) -> Result<(), MemoryError> {
        let a = addr.get();
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .iter_mut()
            .find(|p| p.contains(a))
            .ok_or(MemoryError::Unwritable { address: a, len: bytes.len() })?;
        if !page.prot.write {
            return Err(MemoryError::Unwritable { address: a, len: bytes.len() });
        }
        let off = (a - page.base) as usize;
        if off + bytes.len() > page.data.len() {
            return Err(MemoryError::Unwritable { address: a, len: bytes.len() });
        }
        page.data[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn protect(&self, addr: Address, size: u64, prot: Protection) -> Result<(), MemoryError> {
        // Page-granular, like the real thing.
        let _ = size;
        let a = addr.get();
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .iter_mut()
            .find(|p| p.contains(a))
            .ok_or(MemoryError::NoRange { address: a })?;
        page.prot = prot;
        Ok(())
    }

    fn scan_range(
        &self,
        base: Address,
        size: u64,
        pattern: &BytePattern,
    ) -> Result<Vec<ScanMatch>, ScanError> {
        let pages = self.pages.lock().unwrap();
        let page = pages
            .iter()
            .find(|p| p.contains(base.get()))
            .ok_or(ScanError::RangeFault { address: base.get() })?;
        if !page.prot.read {
            return Err(ScanError::RangeFault { address: base.get() });
        }
        let off = (base.get() - page.base) as usize;
        let end = page.data.len().min(off + size as usize);
        Ok(pattern.find_all(&page.data[off..end], base))
    }
}

impl SymbolSource for FakeToolkit {
    fn exports(&self, module: &str) -> Vec<ExportInfo> {
        self.exports.get(module).cloned().unwrap_or_default()
    }

    fn imports(&self, module: &str) -> Vec<ImportInfo> {
        self.imports.get(module).cloned().unwrap_or_default()
    }

    fn symbols(&self, module: &str) -> Vec<SymbolInfo> {
        self.symbols.get(module).cloned().unwrap_or_default()
    }

    fn resolve_export(&self, module: &str, symbol: &str) -> Option<Address> {
        self.exports
            .get(module)?
            .iter()
            .find(|e| e.name == symbol)
            .map(|e| e.address)
    }

    fn find_by_name(&self, name: &str) -> Option<SymbolDetails> {
        self.named
            .iter()
            .find(|d| d.name.as_deref() == Some(name))
            .cloned()
    }

    fn find_by_address(&self, addr: Address) -> SymbolDetails {
        self.named
            .iter()
            .find(|d| d.address == addr)
            .cloned()
            .unwrap_or_else(|| SymbolDetails::unresolved(addr))
    }
}

impl InstructionDecoder for FakeToolkit {
    fn decode(&self, addr: Address) -> Option<Instruction> {
        self.instructions.get(&addr.get()).cloned()
    }
}

impl ThreadAccess for FakeToolkit {
    fn threads(&self) -> Vec<ThreadInfo> {
        self.threads.clone()
    }

    fn backtrace(&self, _context: &CpuContext) -> Vec<Address> {
        self.frames.clone()
    }

    fn symbolicate(&self, addr: Address) -> Option<String> {
        self.symbolications.get(&addr.get()).cloned()
    }
}

impl Interceptor for FakeToolkit {
    fn attach(
        &self,
        addr: Address,
        handler: Arc<dyn InvocationHandler>,
    ) -> Result<Box<dyn Listener>, HookError> {
        let active = Arc::new(AtomicBool::new(true));
        self.hooks.lock().unwrap().push(InstalledHook {
            addr: addr.get(),
            active: Arc::clone(&active),
            handler,
        });
        Ok(Box::new(FakeListener { active }))
    }
}

impl BridgeProbe for FakeToolkit {
    fn bridge(&self, runtime: &str) -> Option<&dyn RuntimeBridge> {
        self.bridges.get(runtime).map(|b| b as &dyn RuntimeBridge)
    }
}

/// Event sink that stores everything it is handed, for assertions.
#[derive(Default)]
pub struct CollectSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl CollectSink {
    pub fn new() -> Arc<CollectSink> {
        Arc::new(CollectSink::default())
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Drain and return everything posted so far.
    pub fn take(&self) -> Vec<AgentEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for CollectSink {
    fn post(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }
}
