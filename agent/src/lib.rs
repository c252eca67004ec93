//! In-process instrumentation agent.
//!
//! Injected into a target process alongside an instrumentation backend and
//! driven entirely by a remote host: every observable action is either an
//! inbound RPC call answered through [`Agent::dispatch`], or an interceptor
//! callback that pushes an event through the backend's send primitive.
//! Nothing persists across injections and nothing touches disk except the
//! optional log file.
//!
//! State lives in two tables: the hook table and the scan session. RPC
//! handlers run to completion on the embedder's event loop; interceptor
//! callbacks run on arbitrary target threads but only ever touch their own
//! hook's runtime, never these tables.

pub mod config;
mod disasm;
mod dispatcher;
mod filter;
mod hooks;
mod logger;
mod memory;
mod patch;
mod process;
mod scanner;
mod symbols;

use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use serde_json::{Value, json};
use shared::errors::ConfigError;
use toolkit::capabilities::{EventSink, Toolkit};
use toolkit::prelude::ProcessView as _;

pub use config::AgentConfig;

use hooks::HookTable;
use scanner::ScanSession;

pub struct Agent {
    toolkit: Arc<dyn Toolkit>,
    sink: Arc<dyn EventSink>,
    config: AgentConfig,
    hooks: Mutex<HookTable>,
    scan: Mutex<ScanSession>,
}

impl Agent {
    pub fn new(toolkit: Arc<dyn Toolkit>, sink: Arc<dyn EventSink>, config: AgentConfig) -> Self {
        Agent {
            toolkit,
            sink,
            config,
            hooks: Mutex::new(HookTable::default()),
            scan: Mutex::new(ScanSession::default()),
        }
    }
}

static INSTALLED: OnceCell<Agent> = OnceCell::new();
static LOGGER: OnceCell<flexi_logger::LoggerHandle> = OnceCell::new();

/// Park the process-wide agent. The embedder calls this once, right after
/// injection, with its backend and transport; a second call fails.
pub fn install(toolkit: Arc<dyn Toolkit>, sink: Arc<dyn EventSink>) -> Result<&'static Agent, ConfigError> {
    let config = AgentConfig::load_or_default();
    let pid = toolkit.pid();

    // Keep the logger handle alive for the life of the injection. Logging
    // is best-effort: a sandboxed target may not allow the log file.
    if let Ok(handle) = logger::init_logger(&config.log.spec, pid) {
        let _ = LOGGER.set(handle);
    }

    let agent = Agent::new(toolkit, sink, config);
    INSTALLED.set(agent).map_err(|_| ConfigError::AlreadyInstalled)?;
    let agent = INSTALLED.get().expect("just installed");
    log::info!("agent installed in pid {pid}");
    Ok(agent)
}

pub fn installed() -> Option<&'static Agent> {
    INSTALLED.get()
}

/// Global dispatch convenience for transport glue that has no place to keep
/// the agent reference.
pub fn dispatch(method: &str, params: &[Value]) -> Value {
    match INSTALLED.get() {
        Some(agent) => agent.dispatch(method, params),
        None => json!({ "success": false, "error": "agent not installed" }),
    }
}
