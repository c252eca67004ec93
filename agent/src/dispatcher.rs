//! Flat name → handler routing plus argument coercion.
//!
//! Every handler is total from the host's point of view: exceptions never
//! cross the RPC boundary. Queries and enumerations flatten failures to
//! `null` (or an empty array), mutating operations to a
//! `{success:false, error}` envelope. Partial results from scans and
//! enumerations are preferred over hard failures throughout.

use serde_json::{Value, json};
use shared::errors::AgentError;
use toolkit::Address;

use crate::Agent;

/// Flatten a query result; faults are data, not errors.
pub(crate) fn query(result: Result<Value, AgentError>) -> Value {
    match result {
        Ok(v) => v,
        Err(e) => {
            log::debug!("query failed: {e}");
            Value::Null
        }
    }
}

/// Flatten a mutating result into the status envelope.
pub(crate) fn mutate(result: Result<Value, AgentError>) -> Value {
    match result {
        Ok(v) => v,
        Err(e) => {
            log::debug!("mutation failed: {e}");
            json!({ "success": false, "error": e.to_string() })
        }
    }
}

// ── Argument coercion ───────────────────────────────────────────────────

static NULL: Value = Value::Null;

pub(crate) fn arg<'a>(params: &'a [Value], index: usize) -> &'a Value {
    params.get(index).unwrap_or(&NULL)
}

/// Present-and-non-null optional parameter.
pub(crate) fn opt_arg<'a>(params: &'a [Value], index: usize) -> Option<&'a Value> {
    params.get(index).filter(|v| !v.is_null())
}

/// Addresses arrive as decimal or `0x` hex strings, or as plain numbers.
pub(crate) fn addr_arg(params: &[Value], index: usize) -> Result<Address, AgentError> {
    coerce_addr(arg(params, index))
        .ok_or_else(|| AgentError::Argument(format!("parameter {index} is not an address")))
}

pub(crate) fn coerce_addr(v: &Value) -> Option<Address> {
    match v {
        Value::String(s) => Address::parse(s).ok(),
        Value::Number(n) => n.as_u64().map(Address::new),
        _ => None,
    }
}

pub(crate) fn str_arg<'a>(params: &'a [Value], index: usize) -> Result<&'a str, AgentError> {
    arg(params, index)
        .as_str()
        .ok_or_else(|| AgentError::Argument(format!("parameter {index} is not a string")))
}

pub(crate) fn u64_arg(params: &[Value], index: usize) -> Result<u64, AgentError> {
    coerce_u64(arg(params, index))
        .ok_or_else(|| AgentError::Argument(format!("parameter {index} is not an unsigned integer")))
}

pub(crate) fn coerce_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

pub(crate) fn usize_arg_or(params: &[Value], index: usize, default: usize) -> usize {
    opt_arg(params, index)
        .and_then(coerce_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

/// An array of byte values (0..=255).
pub(crate) fn bytes_arg(params: &[Value], index: usize) -> Result<Vec<u8>, AgentError> {
    let bad = || AgentError::Argument(format!("parameter {index} is not a byte array"));
    let items = arg(params, index).as_array().ok_or_else(bad)?;
    items
        .iter()
        .map(|v| match v.as_u64() {
            Some(b) if b <= 0xff => Ok(b as u8),
            _ => Err(bad()),
        })
        .collect()
}

impl Agent {
    /// Route one inbound RPC call. This is the single entry point the host
    /// transport feeds; the return value is always JSON-serialisable.
    pub fn dispatch(&self, method: &str, params: &[Value]) -> Value {
        match method {
            // Environment
            "get_env" => query(self.get_env()),
            "get_process_info" => query(self.get_process_info()),

            // Typed readers
            "reader_byte" => query(self.reader_byte(params)),
            "reader_ubyte" => query(self.reader_ubyte(params)),
            "reader_short" => query(self.reader_short(params)),
            "reader_ushort" => query(self.reader_ushort(params)),
            "reader_int" => query(self.reader_int(params)),
            "reader_uint" => query(self.reader_uint(params)),
            "reader_long" => query(self.reader_long(params)),
            "reader_ulong" => query(self.reader_ulong(params)),
            "reader_float" => query(self.reader_float(params)),
            "reader_double" => query(self.reader_double(params)),
            "reader_string" => query(self.reader_string(params)),
            "reader_bytes" => query(self.reader_bytes(params)),
            "reader_pointer" => query(self.reader_pointer(params)),

            // Typed writers: failures surface as `null`, not envelopes.
            "writer_byte" => query(self.writer_byte(params)),
            "writer_ubyte" => query(self.writer_ubyte(params)),
            "writer_short" => query(self.writer_short(params)),
            "writer_ushort" => query(self.writer_ushort(params)),
            "writer_int" => query(self.writer_int(params)),
            "writer_uint" => query(self.writer_uint(params)),
            "writer_long" => query(self.writer_long(params)),
            "writer_ulong" => query(self.writer_ulong(params)),
            "writer_float" => query(self.writer_float(params)),
            "writer_double" => query(self.writer_double(params)),
            "writer_string" => query(self.writer_string(params)),
            "writer_bytes" => query(self.writer_bytes(params)),
            "writer_pointer" => query(self.writer_pointer(params)),

            // Memory protection
            "check_read_protection" => query(self.check_read_protection(params)),
            "check_write_protection" => query(self.check_write_protection(params)),
            "get_memory_protection" => query(self.get_memory_protection(params)),
            "set_memory_protection" => mutate(self.set_memory_protection(params)),

            // Disassembly
            "instruction" => query(self.instruction(params)),
            "disassemble" => query(self.disassemble(params)),
            "disassemble_function" => query(self.disassemble_function(params)),

            // Enumeration
            "list_modules" => query(self.list_modules(params)),
            "list_ranges" => query(self.list_ranges(params)),
            "list_ranges_by_module" => query(self.list_ranges_by_module(params)),
            "list_exports" => query(self.list_exports(params)),
            "list_imports" => query(self.list_imports(params)),
            "list_symbols" => query(self.list_symbols(params)),
            "list_functions" => query(self.list_functions(params)),
            "list_variables" => query(self.list_variables(params)),
            "find_symbol" => query(self.find_symbol(params)),
            "find_symbol_by_address" => query(self.find_symbol_by_address(params)),
            "resolve_export" => query(self.resolve_export(params)),

            // Threads
            "list_threads" => query(self.list_threads(params)),
            "get_thread_context" => query(self.get_thread_context(params)),
            "read_stack" => query(self.read_stack(params)),
            "backtrace" => query(self.backtrace(params)),

            // Hooks
            "hook_attach" => mutate(self.hook_attach(params)),
            "hook_detach" => mutate(self.hook_detach(params)),
            "hook_list" => query(self.hook_list()),
            "hook_enable" => mutate(self.hook_enable(params)),
            "hook_disable" => mutate(self.hook_disable(params)),
            "hook_clear_all" => mutate(self.hook_clear_all()),

            // Scanner
            "scan_pattern" => mutate(self.scan_pattern(params)),
            "scan_value" => mutate(self.scan_value(params)),
            "scan_string" => mutate(self.scan_string(params)),
            "scan_next" => mutate(self.scan_next(params)),
            "scan_changed" => mutate(self.scan_changed(params)),
            "scan_unchanged" => mutate(self.scan_unchanged(params)),
            "scan_snapshot" => mutate(self.scan_snapshot(params)),
            "get_scan_results" => mutate(self.get_scan_results(params)),
            "get_scan_result_values" => mutate(self.get_scan_result_values(params)),
            "clear_scan" => mutate(self.clear_scan()),

            // Patch engine
            "patch_bytes" => mutate(self.patch_bytes(params)),
            "nop_instructions" => mutate(self.nop_instructions(params)),
            "restore_bytes" => mutate(self.restore_bytes(params)),

            // Per-runtime language bridges are probed by name so new
            // runtimes need no dispatcher change; absent capability means
            // an empty array, never an error.
            other => {
                if let Some(rt) = bridge_runtime(other, "_classes") {
                    query(self.list_bridge_classes(rt))
                } else if let Some(rt) = bridge_runtime(other, "_methods") {
                    query(self.list_bridge_methods(rt, params))
                } else {
                    mutate(Err(AgentError::UnknownMethod(other.to_string())))
                }
            }
        }
    }
}

fn bridge_runtime<'a>(method: &'a str, suffix: &str) -> Option<&'a str> {
    method
        .strip_prefix("list_")?
        .strip_suffix(suffix)
        .filter(|rt| !rt.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_addresses_from_both_wire_forms() {
        let params = vec![json!("0x1000"), json!(4096), json!("4096")];
        assert_eq!(addr_arg(&params, 0).unwrap(), Address::new(0x1000));
        assert_eq!(addr_arg(&params, 1).unwrap(), Address::new(4096));
        assert_eq!(addr_arg(&params, 2).unwrap(), Address::new(4096));
        assert!(addr_arg(&params, 3).is_err());
    }

    #[test]
    fn byte_arrays_reject_out_of_range_entries() {
        assert_eq!(bytes_arg(&[json!([0, 144, 255])], 0).unwrap(), vec![0, 144, 255]);
        assert!(bytes_arg(&[json!([256])], 0).is_err());
        assert!(bytes_arg(&[json!("90")], 0).is_err());
    }

    #[test]
    fn bridge_method_names_parse() {
        assert_eq!(bridge_runtime("list_java_classes", "_classes"), Some("java"));
        assert_eq!(bridge_runtime("list_objc_methods", "_methods"), Some("objc"));
        assert_eq!(bridge_runtime("list_classes", "_classes"), None);
        assert_eq!(bridge_runtime("hook_attach", "_classes"), None);
    }
}
