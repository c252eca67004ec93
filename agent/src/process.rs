//! Process environment, thread enumeration and backtraces.

use serde_json::{Value, json};
use shared::constants::DEFAULT_STACK_SLOTS;
use shared::errors::AgentError;
use toolkit::prelude::*;
use toolkit::{Address, CpuContext};

use crate::Agent;
use crate::dispatcher::{opt_arg, u64_arg, usize_arg_or};
use crate::filter;

impl Agent {
    pub(crate) fn get_env(&self) -> Result<Value, AgentError> {
        let tk = &self.toolkit;
        Ok(json!({
            "arch": tk.arch().as_str(),
            "platform": tk.platform(),
            "pointerSize": tk.pointer_size(),
            "pageSize": tk.page_size(),
            "pid": tk.pid(),
        }))
    }

    pub(crate) fn get_process_info(&self) -> Result<Value, AgentError> {
        let tk = &self.toolkit;
        let modules = tk.modules();
        let main_module = modules
            .first()
            .and_then(|m| serde_json::to_value(m).ok())
            .unwrap_or(Value::Null);
        Ok(json!({
            "pid": tk.pid(),
            "arch": tk.arch().as_str(),
            "platform": tk.platform(),
            "pointerSize": tk.pointer_size(),
            "pageSize": tk.page_size(),
            "moduleCount": modules.len(),
            "threadCount": tk.threads().len(),
            "mainModule": main_module,
        }))
    }

    pub(crate) fn list_threads(&self, params: &[Value]) -> Result<Value, AgentError> {
        let records = self
            .toolkit
            .threads()
            .into_iter()
            .map(|t| json!({ "id": t.id, "state": t.state }))
            .collect();
        Ok(Value::Array(filter::apply(records, opt_arg(params, 0))))
    }

    fn thread_context(&self, id: u32) -> Option<CpuContext> {
        self.toolkit
            .threads()
            .into_iter()
            .find(|t| t.id == id)
            .map(|t| t.context)
    }

    pub(crate) fn get_thread_context(&self, params: &[Value]) -> Result<Value, AgentError> {
        let id = u64_arg(params, 0)? as u32;
        Ok(match self.thread_context(id) {
            Some(ctx) => serde_json::to_value(ctx).unwrap_or(Value::Null),
            None => Value::Null,
        })
    }

    /// Pointer-sized slots walked up from the thread's stack pointer,
    /// stopping at the first fault.
    pub(crate) fn read_stack(&self, params: &[Value]) -> Result<Value, AgentError> {
        let id = u64_arg(params, 0)? as u32;
        let count = usize_arg_or(params, 1, DEFAULT_STACK_SLOTS);
        let Some(ctx) = self.thread_context(id) else {
            return Ok(Value::Null);
        };

        let width = self.toolkit.pointer_size();
        let mut slots = Vec::new();
        for i in 0..count {
            let Some(slot) = ctx.sp.checked_add((i * width) as u64) else {
                break;
            };
            let Ok(bytes) = self.toolkit.read_bytes(slot, width) else {
                break;
            };
            let value = match width {
                4 => u32::from_ne_bytes(bytes.try_into().unwrap_or_default()) as u64,
                _ => u64::from_ne_bytes(bytes.try_into().unwrap_or_default()),
            };
            slots.push(Value::String(Address::new(value).to_string()));
        }
        Ok(Value::Array(slots))
    }

    /// Walk a live thread's captured context. Raw context pointers are not
    /// accepted here: a host cannot hand over a structured cpu-context by
    /// address, so an unknown thread id resolves to `null`.
    pub(crate) fn backtrace(&self, params: &[Value]) -> Result<Value, AgentError> {
        let id = u64_arg(params, 0)? as u32;
        let Some(ctx) = self.thread_context(id) else {
            return Ok(Value::Null);
        };

        let frames: Vec<Value> = self
            .toolkit
            .backtrace(&ctx)
            .into_iter()
            .map(|addr| {
                let symbol = self.toolkit.symbolicate(addr);
                match symbol {
                    Some(name) => json!({ "address": addr.to_string(), "symbol": name }),
                    None => json!({ "address": addr.to_string() }),
                }
            })
            .collect();
        Ok(Value::Array(frames))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use toolkit::Arch;
    use toolkit::testkit::{CollectSink, FakeToolkit};

    use crate::{Agent, AgentConfig};

    fn sample_agent() -> Agent {
        let mut fake = FakeToolkit::new(Arch::X64);
        fake.add_module("app", 0x1000, 0x1000, "/bin/app");
        fake.map_range(0x7000, vec![0u8; 64], "rw-", None);
        fake.add_thread(7, "running", 0x1234, 0x7000);
        fake.set_frames(vec![0x1234, 0x1500]);
        fake.add_symbolication(0x1500, "main");
        Agent::new(Arc::new(fake), CollectSink::new(), AgentConfig::default())
    }

    #[test]
    fn env_and_process_info() {
        let agent = sample_agent();
        let env = agent.dispatch("get_env", &[]);
        assert_eq!(env["arch"], "x64");
        assert_eq!(env["pointerSize"], 8);

        let info = agent.dispatch("get_process_info", &[]);
        assert_eq!(info["moduleCount"], 1);
        assert_eq!(info["threadCount"], 1);
        assert_eq!(info["mainModule"]["name"], "app");
    }

    #[test]
    fn stack_reads_stop_at_the_first_fault() {
        let agent = sample_agent();
        // 64 mapped bytes hold exactly 8 pointer slots.
        let out = agent.dispatch("read_stack", &[json!(7), json!(32)]);
        assert_eq!(out.as_array().unwrap().len(), 8);

        assert_eq!(agent.dispatch("read_stack", &[json!(99)]), json!(null));
    }

    #[test]
    fn backtrace_symbolicates_what_it_can() {
        let agent = sample_agent();
        let frames = agent.dispatch("backtrace", &[json!(7)]);
        let frames = frames.as_array().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], json!({ "address": "0x1234" }));
        assert_eq!(frames[1], json!({ "address": "0x1500", "symbol": "main" }));

        // Raw context pointers are rejected as unknown thread ids.
        assert_eq!(agent.dispatch("backtrace", &[json!("0xdeadbeef")]), json!(null));
    }
}
