//! The callback side of a hook.
//!
//! Runs in the context of an arbitrary target thread: no blocking, no
//! calls back into RPC handlers, every error handled locally. Rewrite
//! failures are swallowed so the instrumented call is never corrupted by
//! bad rewrite data.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use shared::events::{FrameRecord, HookEnterEvent, HookLeaveEvent};
use toolkit::Address;
use toolkit::capabilities::{EventSink, Invocation, InvocationHandler, Toolkit};
use toolkit::prelude::*;

use super::HookConfig;

/// Per-invocation key: the backend serialises callback entry, so the
/// (thread, depth) pair uniquely names one in-flight call.
type InvocationKey = (u32, u32);

pub(super) struct HookRuntime {
    id: String,
    target: Address,
    config: HookConfig,
    toolkit: Arc<dyn Toolkit>,
    sink: Arc<dyn EventSink>,
    /// Arguments stringified on entry, replayed on the matching exit.
    scratch: Mutex<FxHashMap<InvocationKey, Vec<String>>>,
}

impl HookRuntime {
    pub(super) fn new(
        id: String,
        target: Address,
        config: HookConfig,
        toolkit: Arc<dyn Toolkit>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        HookRuntime {
            id,
            target,
            config,
            toolkit,
            sink,
            scratch: Mutex::new(FxHashMap::default()),
        }
    }

    /// Exactly `argCount` slots; a slot that cannot be sampled becomes the
    /// literal `"(error)"` so the array length stays fixed.
    fn stringify_args(&self, inv: &dyn Invocation) -> Vec<String> {
        (0..self.config.arg_count)
            .map(|i| match inv.arg(i) {
                Ok(value) => value.to_string(),
                Err(_) => "(error)".to_string(),
            })
            .collect()
    }

    fn capture_backtrace(&self, inv: &dyn Invocation) -> Vec<FrameRecord> {
        let context = inv.context();
        self.toolkit
            .backtrace(&context)
            .into_iter()
            .map(|addr| FrameRecord {
                address: addr.to_string(),
                symbol: self.toolkit.symbolicate(addr),
            })
            .collect()
    }
}

impl InvocationHandler for HookRuntime {
    fn on_enter(&self, inv: &mut dyn Invocation) {
        let args = self.config.log_args.then(|| self.stringify_args(inv));

        if self.config.on_enter {
            let backtrace = self.config.backtrace.then(|| self.capture_backtrace(inv));
            self.sink.post(
                HookEnterEvent {
                    id: self.id.clone(),
                    address: self.target.to_string(),
                    thread_id: inv.thread_id(),
                    depth: inv.depth(),
                    args: args.clone(),
                    backtrace,
                }
                .into(),
            );
        }

        if let Some(rewrites) = &self.config.modify_args {
            for (index, rewrite) in rewrites.iter().enumerate() {
                if let Some(value) = rewrite {
                    // One bad slot must not stop the remaining rewrites.
                    if inv.set_arg(index, *value).is_err() {
                        log::debug!("{}: arg {index} rewrite failed", self.id);
                    }
                }
            }
        }

        if let Some(args) = args {
            let key = (inv.thread_id(), inv.depth());
            self.scratch.lock().unwrap().insert(key, args);
        }
    }

    fn on_leave(&self, inv: &mut dyn Invocation) {
        let key = (inv.thread_id(), inv.depth());
        let args = self.scratch.lock().unwrap().remove(&key);

        if self.config.on_leave {
            let retval = self.config.log_retval.then(|| match inv.retval() {
                Ok(value) => value.to_string(),
                Err(_) => "(error)".to_string(),
            });
            self.sink.post(
                HookLeaveEvent {
                    id: self.id.clone(),
                    address: self.target.to_string(),
                    thread_id: inv.thread_id(),
                    retval,
                    args,
                }
                .into(),
            );
        }

        if let Some(value) = self.config.modify_retval {
            if inv.set_retval(value).is_err() {
                log::debug!("{}: retval rewrite failed", self.id);
            }
        }
    }
}
