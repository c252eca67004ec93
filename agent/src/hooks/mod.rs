//! Hook lifecycle manager.
//!
//! Owns the process-wide hook table. Listener objects handed out by the
//! interceptor backend are one-shot: a detached listener cannot be resumed,
//! so `hook_enable` re-runs the attach path and the hook reappears under a
//! fresh id. Ids are monotonic and never recycled within one injection.

mod runtime;

use std::sync::Arc;

use serde_json::{Value, json};
use shared::errors::{AgentError, HookError};
use toolkit::prelude::*;
use toolkit::{Address, Listener};

use crate::Agent;
use crate::dispatcher::{addr_arg, coerce_addr, opt_arg, str_arg};
use runtime::HookRuntime;

/// Per-hook behaviour, immutable after creation.
#[derive(Debug, Clone)]
pub(crate) struct HookConfig {
    pub on_enter: bool,
    pub on_leave: bool,
    pub log_args: bool,
    pub log_retval: bool,
    pub arg_count: usize,
    pub modify_args: Option<Vec<Option<Address>>>,
    pub modify_retval: Option<Address>,
    pub backtrace: bool,
}

impl HookConfig {
    fn with_defaults(arg_count: usize) -> Self {
        HookConfig {
            on_enter: true,
            on_leave: false,
            log_args: false,
            log_retval: false,
            arg_count,
            modify_args: None,
            modify_retval: None,
            backtrace: false,
        }
    }

    fn from_value(raw: Option<&Value>, default_arg_count: usize) -> Result<Self, HookError> {
        let mut cfg = HookConfig::with_defaults(default_arg_count);
        let Some(obj) = raw else {
            return Ok(cfg);
        };
        let obj = obj.as_object().ok_or_else(|| HookError::BadConfig {
            message: "config must be an object".into(),
        })?;

        let flag = |key: &str, default: bool| -> Result<bool, HookError> {
            match obj.get(key) {
                None | Some(Value::Null) => Ok(default),
                Some(Value::Bool(b)) => Ok(*b),
                Some(other) => Err(HookError::BadConfig {
                    message: format!("{key} must be a boolean, got {other}"),
                }),
            }
        };
        cfg.on_enter = flag("onEnter", cfg.on_enter)?;
        cfg.on_leave = flag("onLeave", cfg.on_leave)?;
        cfg.log_args = flag("logArgs", cfg.log_args)?;
        cfg.log_retval = flag("logRetval", cfg.log_retval)?;
        cfg.backtrace = flag("backtrace", cfg.backtrace)?;

        if let Some(v) = obj.get("argCount").filter(|v| !v.is_null()) {
            cfg.arg_count = v.as_u64().ok_or_else(|| HookError::BadConfig {
                message: "argCount must be an unsigned integer".into(),
            })? as usize;
        }
        if let Some(v) = obj.get("modifyArgs").filter(|v| !v.is_null()) {
            let entries = v.as_array().ok_or_else(|| HookError::BadConfig {
                message: "modifyArgs must be an array".into(),
            })?;
            let mut rewrites = Vec::with_capacity(entries.len());
            for entry in entries {
                if entry.is_null() {
                    rewrites.push(None);
                } else {
                    let addr = coerce_addr(entry).ok_or_else(|| HookError::BadConfig {
                        message: format!("modifyArgs entry is not an address: {entry}"),
                    })?;
                    rewrites.push(Some(addr));
                }
            }
            cfg.modify_args = Some(rewrites);
        }
        if let Some(v) = obj.get("modifyRetval").filter(|v| !v.is_null()) {
            cfg.modify_retval = Some(coerce_addr(v).ok_or_else(|| HookError::BadConfig {
                message: format!("modifyRetval is not an address: {v}"),
            })?);
        }
        Ok(cfg)
    }
}

struct HookEntry {
    id: String,
    target: Address,
    enabled: bool,
    config: HookConfig,
    /// Live while enabled; `None` means detached and silent.
    listener: Option<Box<dyn Listener>>,
}

#[derive(Default)]
pub(crate) struct HookTable {
    entries: Vec<HookEntry>,
    next_id: u64,
}

impl HookTable {
    fn allocate_id(&mut self) -> String {
        let id = format!("hook_{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn position(&self, id: &str) -> Result<usize, HookError> {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .ok_or(HookError::NotFound)
    }
}

impl Agent {
    /// Install a hook and return its id. Attach order inside the table is
    /// creation order, which is what `hook_list` reports.
    pub(crate) fn hook_attach(&self, params: &[Value]) -> Result<Value, AgentError> {
        let target = addr_arg(params, 0)?;
        let config =
            HookConfig::from_value(opt_arg(params, 1), self.config.hooks.default_arg_count)?;

        let mut table = self.hooks.lock().unwrap();
        let envelope = self.attach_locked(&mut table, target, config)?;
        Ok(envelope)
    }

    /// The shared attach path used by both `hook_attach` and `hook_enable`.
    fn attach_locked(
        &self,
        table: &mut HookTable,
        target: Address,
        config: HookConfig,
    ) -> Result<Value, AgentError> {
        let executable = self
            .toolkit
            .range_containing(target)
            .is_some_and(|r| r.protection.execute);
        if !executable {
            return Err(HookError::InvalidTarget.into());
        }

        let id = table.allocate_id();
        let runtime = Arc::new(HookRuntime::new(
            id.clone(),
            target,
            config.clone(),
            Arc::clone(&self.toolkit),
            Arc::clone(&self.sink),
        ));
        let listener = self.toolkit.attach(target, runtime)?;
        table.entries.push(HookEntry {
            id: id.clone(),
            target,
            enabled: true,
            config,
            listener: Some(listener),
        });
        log::info!("installed {id} at {target}");
        Ok(json!({ "success": true, "id": id, "address": target.to_string() }))
    }

    pub(crate) fn hook_detach(&self, params: &[Value]) -> Result<Value, AgentError> {
        let id = str_arg(params, 0)?;
        let mut table = self.hooks.lock().unwrap();
        let pos = table.position(id)?;
        let entry = table.entries.remove(pos);
        if let Some(listener) = entry.listener {
            listener.detach();
        }
        log::info!("detached {id}");
        Ok(json!({ "success": true, "id": id }))
    }

    /// Detach the listener but keep the record. After this returns no
    /// callback may fire for the hook. Idempotent.
    pub(crate) fn hook_disable(&self, params: &[Value]) -> Result<Value, AgentError> {
        let id = str_arg(params, 0)?;
        let mut table = self.hooks.lock().unwrap();
        let pos = table.position(id)?;
        let entry = &mut table.entries[pos];
        if !entry.enabled {
            return Ok(json!({ "success": true, "id": id, "message": "Already disabled" }));
        }
        if let Some(listener) = entry.listener.take() {
            listener.detach();
        }
        entry.enabled = false;
        Ok(json!({ "success": true, "id": id }))
    }

    /// Re-arm a disabled hook. The backend cannot resume a detached
    /// listener, so this creates a successor under a fresh id and removes
    /// the old record; the envelope carries `newId`.
    pub(crate) fn hook_enable(&self, params: &[Value]) -> Result<Value, AgentError> {
        let id = str_arg(params, 0)?;
        let mut table = self.hooks.lock().unwrap();
        let pos = table.position(id)?;
        if table.entries[pos].enabled {
            return Ok(json!({ "success": true, "id": id, "message": "Already enabled" }));
        }
        let target = table.entries[pos].target;
        let config = table.entries[pos].config.clone();
        // Attach the successor first so a failed re-attach leaves the
        // disabled record in place.
        let envelope = self.attach_locked(&mut table, target, config)?;
        table.entries.remove(pos);
        Ok(json!({
            "success": true,
            "newId": envelope["id"],
            "address": envelope["address"],
        }))
    }

    pub(crate) fn hook_clear_all(&self) -> Result<Value, AgentError> {
        let mut table = self.hooks.lock().unwrap();
        let cleared = table.entries.len();
        for entry in table.entries.drain(..) {
            // Detach errors are ignored; the table must reset regardless.
            if let Some(listener) = entry.listener {
                listener.detach();
            }
        }
        table.next_id = 0;
        log::info!("cleared {cleared} hooks");
        Ok(json!({ "success": true, "cleared": cleared }))
    }

    pub(crate) fn hook_list(&self) -> Result<Value, AgentError> {
        let table = self.hooks.lock().unwrap();
        let rows: Vec<Value> = table
            .entries
            .iter()
            .map(|e| {
                json!({
                    "id": e.id,
                    "target": e.target.to_string(),
                    "enabled": e.enabled,
                    "onEnter": e.config.on_enter,
                    "onLeave": e.config.on_leave,
                    "logArgs": e.config.log_args,
                    "logRetval": e.config.log_retval,
                    "argCount": e.config.arg_count,
                    "backtrace": e.config.backtrace,
                })
            })
            .collect();
        Ok(Value::Array(rows))
    }
}
