//! Module, range and symbol enumeration.
//!
//! Every endpoint projects backend records into homogeneous JSON arrays and
//! then applies the optional wire-form filter. Missing modules and missing
//! symbols are data (`[]` / `null`), never errors.

use serde::Serialize;
use serde_json::{Value, json};
use shared::errors::AgentError;
use toolkit::prelude::*;
use toolkit::{Protection, SymbolKind};

use crate::Agent;
use crate::dispatcher::{addr_arg, opt_arg, str_arg};
use crate::filter;

/// Serialise a homogeneous record list for the wire.
fn records<T: Serialize>(items: Vec<T>) -> Vec<Value> {
    items
        .into_iter()
        .filter_map(|i| serde_json::to_value(i).ok())
        .collect()
}

impl Agent {
    pub(crate) fn list_modules(&self, params: &[Value]) -> Result<Value, AgentError> {
        let out = filter::apply(records(self.toolkit.modules()), opt_arg(params, 0));
        Ok(Value::Array(out))
    }

    /// Ranges whose protection covers the requested mask (default `r--`).
    pub(crate) fn list_ranges(&self, params: &[Value]) -> Result<Value, AgentError> {
        let mask: Protection = match opt_arg(params, 0).and_then(|v| v.as_str()) {
            Some(s) => s.parse().map_err(AgentError::Memory)?,
            None => shared::constants::DEFAULT_SCAN_PROTECTION.parse().unwrap(),
        };
        let out = filter::apply(records(self.toolkit.ranges(mask)), opt_arg(params, 1));
        Ok(Value::Array(out))
    }

    /// Address-space ranges intersected with the module containing `addr`.
    pub(crate) fn list_ranges_by_module(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let Some(module) = self.toolkit.module_containing(addr) else {
            return Ok(Value::Array(Vec::new()));
        };
        let start = module.base.get();
        let end = start.saturating_add(module.size);

        let all = self.toolkit.ranges(Protection::default());
        let within: Vec<_> = all
            .into_iter()
            .filter(|r| r.base.get() < end && r.end() > start)
            .collect();
        let out = filter::apply(records(within), opt_arg(params, 1));
        Ok(Value::Array(out))
    }

    pub(crate) fn list_exports(&self, params: &[Value]) -> Result<Value, AgentError> {
        let module = str_arg(params, 0)?;
        let out = filter::apply(records(self.toolkit.exports(module)), opt_arg(params, 1));
        Ok(Value::Array(out))
    }

    pub(crate) fn list_imports(&self, params: &[Value]) -> Result<Value, AgentError> {
        let module = str_arg(params, 0)?;
        let out = filter::apply(records(self.toolkit.imports(module)), opt_arg(params, 1));
        Ok(Value::Array(out))
    }

    pub(crate) fn list_symbols(&self, params: &[Value]) -> Result<Value, AgentError> {
        let module = str_arg(params, 0)?;
        let out = filter::apply(records(self.toolkit.symbols(module)), opt_arg(params, 1));
        Ok(Value::Array(out))
    }

    /// Projection of the export table to function entries.
    pub(crate) fn list_functions(&self, params: &[Value]) -> Result<Value, AgentError> {
        self.exports_of_kind(params, SymbolKind::Function)
    }

    /// Projection of the export table to variable entries.
    pub(crate) fn list_variables(&self, params: &[Value]) -> Result<Value, AgentError> {
        self.exports_of_kind(params, SymbolKind::Variable)
    }

    fn exports_of_kind(&self, params: &[Value], kind: SymbolKind) -> Result<Value, AgentError> {
        let module = str_arg(params, 0)?;
        let picked: Vec<_> = self
            .toolkit
            .exports(module)
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect();
        let out = filter::apply(records(picked), opt_arg(params, 1));
        Ok(Value::Array(out))
    }

    pub(crate) fn find_symbol(&self, params: &[Value]) -> Result<Value, AgentError> {
        let name = str_arg(params, 0)?;
        Ok(match self.toolkit.find_by_name(name) {
            Some(details) => serde_json::to_value(details).unwrap_or(Value::Null),
            None => Value::Null,
        })
    }

    /// Unlike `find_symbol` this always produces a record; unresolved
    /// fields are null.
    pub(crate) fn find_symbol_by_address(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let details = self.toolkit.find_by_address(addr);
        Ok(serde_json::to_value(details).unwrap_or(Value::Null))
    }

    pub(crate) fn resolve_export(&self, params: &[Value]) -> Result<Value, AgentError> {
        let module = str_arg(params, 0)?;
        let export = str_arg(params, 1)?;
        Ok(match self.toolkit.resolve_export(module, export) {
            Some(addr) => Value::String(addr.to_string()),
            None => Value::Null,
        })
    }

    // ── Managed-runtime bridges ─────────────────────────────────────────

    pub(crate) fn list_bridge_classes(&self, runtime: &str) -> Result<Value, AgentError> {
        Ok(match self.toolkit.bridge(runtime) {
            Some(bridge) => json!(bridge.classes()),
            None => json!([]),
        })
    }

    pub(crate) fn list_bridge_methods(
        &self,
        runtime: &str,
        params: &[Value],
    ) -> Result<Value, AgentError> {
        let Some(bridge) = self.toolkit.bridge(runtime) else {
            return Ok(json!([]));
        };
        let class = str_arg(params, 0)?;
        Ok(json!(bridge.methods(class)))
    }
}
