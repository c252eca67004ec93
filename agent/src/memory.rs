//! Typed memory readers and writers, plus protection queries.
//!
//! Numeric layout follows the target architecture: every scalar goes
//! through `to_ne_bytes`/`from_ne_bytes`, never a fixed endianness.
//! 64-bit values travel as decimal strings and pointers as hex strings so
//! they survive the host's JSON number range.

use serde_json::{Value, json};
use shared::errors::{AgentError, MemoryError};
use toolkit::Address;
use toolkit::prelude::*;

use crate::Agent;
use crate::dispatcher::{addr_arg, arg, bytes_arg, coerce_u64, opt_arg, str_arg, u64_arg};

fn i64_arg(params: &[Value], index: usize) -> Result<i64, AgentError> {
    let v = arg(params, index);
    let parsed = match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok().map(|u| u as i64)
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    };
    parsed.ok_or_else(|| AgentError::Argument(format!("parameter {index} is not an integer")))
}

fn f64_arg(params: &[Value], index: usize) -> Result<f64, AgentError> {
    let v = arg(params, index);
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| AgentError::Argument(format!("parameter {index} is not a number")))
}

fn out_of_range(index: usize) -> AgentError {
    AgentError::Argument(format!("parameter {index} is out of range for the target type"))
}

impl Agent {
    fn read_fixed<const N: usize>(&self, params: &[Value]) -> Result<[u8; N], AgentError> {
        let addr = addr_arg(params, 0)?;
        let bytes = self.toolkit.read_bytes(addr, N)?;
        bytes.try_into().map_err(|_| {
            AgentError::Memory(MemoryError::Unreadable { address: addr.get(), len: N })
        })
    }

    fn write_all(&self, params: &[Value], bytes: &[u8]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        self.toolkit.write_bytes(addr, bytes)?;
        Ok(Value::Bool(true))
    }

    // ── Readers ─────────────────────────────────────────────────────────

    pub(crate) fn reader_byte(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(i8::from_ne_bytes(self.read_fixed::<1>(params)?)))
    }

    pub(crate) fn reader_ubyte(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(u8::from_ne_bytes(self.read_fixed::<1>(params)?)))
    }

    pub(crate) fn reader_short(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(i16::from_ne_bytes(self.read_fixed::<2>(params)?)))
    }

    pub(crate) fn reader_ushort(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(u16::from_ne_bytes(self.read_fixed::<2>(params)?)))
    }

    pub(crate) fn reader_int(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(i32::from_ne_bytes(self.read_fixed::<4>(params)?)))
    }

    pub(crate) fn reader_uint(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(u32::from_ne_bytes(self.read_fixed::<4>(params)?)))
    }

    pub(crate) fn reader_long(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = i64::from_ne_bytes(self.read_fixed::<8>(params)?);
        Ok(Value::String(v.to_string()))
    }

    pub(crate) fn reader_ulong(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = u64::from_ne_bytes(self.read_fixed::<8>(params)?);
        Ok(Value::String(v.to_string()))
    }

    pub(crate) fn reader_float(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(f32::from_ne_bytes(self.read_fixed::<4>(params)?)))
    }

    pub(crate) fn reader_double(&self, params: &[Value]) -> Result<Value, AgentError> {
        Ok(json!(f64::from_ne_bytes(self.read_fixed::<8>(params)?)))
    }

    /// C string, capped at the configured byte ceiling (overridable per
    /// call) and clamped to the enclosing range so a string near the end
    /// of a mapping does not fault the whole read.
    pub(crate) fn reader_string(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let cap = opt_arg(params, 1)
            .and_then(coerce_u64)
            .map(|v| v as usize)
            .unwrap_or(self.config.memory.string_cap);

        let range = self
            .toolkit
            .range_containing(addr)
            .ok_or(MemoryError::NoRange { address: addr.get() })?;
        let available = (range.end() - addr.get()) as usize;
        let bytes = self.toolkit.read_bytes(addr, cap.min(available))?;
        let terminated = match bytes.iter().position(|&b| b == 0) {
            Some(nul) => &bytes[..nul],
            None => &bytes[..],
        };
        Ok(Value::String(String::from_utf8_lossy(terminated).into_owned()))
    }

    pub(crate) fn reader_bytes(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let len = u64_arg(params, 1)? as usize;
        let bytes = self.toolkit.read_bytes(addr, len)?;
        Ok(json!(bytes))
    }

    pub(crate) fn reader_pointer(&self, params: &[Value]) -> Result<Value, AgentError> {
        let value = match self.toolkit.pointer_size() {
            4 => u32::from_ne_bytes(self.read_fixed::<4>(params)?) as u64,
            _ => u64::from_ne_bytes(self.read_fixed::<8>(params)?),
        };
        Ok(Value::String(Address::new(value).to_string()))
    }

    // ── Writers ─────────────────────────────────────────────────────────

    pub(crate) fn writer_byte(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = i8::try_from(i64_arg(params, 1)?).map_err(|_| out_of_range(1))?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_ubyte(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = u8::try_from(u64_arg(params, 1)?).map_err(|_| out_of_range(1))?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_short(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = i16::try_from(i64_arg(params, 1)?).map_err(|_| out_of_range(1))?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_ushort(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = u16::try_from(u64_arg(params, 1)?).map_err(|_| out_of_range(1))?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_int(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = i32::try_from(i64_arg(params, 1)?).map_err(|_| out_of_range(1))?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_uint(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = u32::try_from(u64_arg(params, 1)?).map_err(|_| out_of_range(1))?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_long(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = i64_arg(params, 1)?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_ulong(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = u64_arg(params, 1)?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_float(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = f64_arg(params, 1)? as f32;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_double(&self, params: &[Value]) -> Result<Value, AgentError> {
        let v = f64_arg(params, 1)?;
        self.write_all(params, &v.to_ne_bytes())
    }

    pub(crate) fn writer_string(&self, params: &[Value]) -> Result<Value, AgentError> {
        let text = str_arg(params, 1)?;
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.write_all(params, &bytes)
    }

    pub(crate) fn writer_bytes(&self, params: &[Value]) -> Result<Value, AgentError> {
        let bytes = bytes_arg(params, 1)?;
        self.write_all(params, &bytes)
    }

    pub(crate) fn writer_pointer(&self, params: &[Value]) -> Result<Value, AgentError> {
        let value = addr_arg(params, 1)?;
        match self.toolkit.pointer_size() {
            4 => {
                let v = u32::try_from(value.get()).map_err(|_| out_of_range(1))?;
                self.write_all(params, &v.to_ne_bytes())
            }
            _ => self.write_all(params, &value.get().to_ne_bytes()),
        }
    }

    // ── Protection ──────────────────────────────────────────────────────

    pub(crate) fn check_read_protection(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let readable = self
            .toolkit
            .range_containing(addr)
            .is_some_and(|r| r.protection.read);
        Ok(Value::Bool(readable))
    }

    pub(crate) fn check_write_protection(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let writable = self
            .toolkit
            .range_containing(addr)
            .is_some_and(|r| r.protection.write);
        Ok(Value::Bool(writable))
    }

    pub(crate) fn get_memory_protection(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        Ok(match self.toolkit.range_containing(addr) {
            Some(r) => Value::String(r.protection.to_string()),
            None => Value::Null,
        })
    }

    pub(crate) fn set_memory_protection(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let size = u64_arg(params, 1)?;
        let prot = str_arg(params, 2)?
            .parse::<toolkit::Protection>()
            .map_err(AgentError::Memory)?;
        self.toolkit.protect(addr, size, prot)?;
        Ok(json!({
            "success": true,
            "address": addr.to_string(),
            "size": size,
            "protection": prot.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use toolkit::Arch;
    use toolkit::testkit::{CollectSink, FakeToolkit};

    use crate::{Agent, AgentConfig};

    fn agent_with_rw_page() -> (Agent, Arc<FakeToolkit>) {
        let mut fake = FakeToolkit::new(Arch::X64);
        fake.map_range(0x1000, vec![0u8; 0x100], "rw-", None);
        let fake = Arc::new(fake);
        let agent = Agent::new(fake.clone(), CollectSink::new(), AgentConfig::default());
        (agent, fake)
    }

    #[test]
    fn scalar_round_trip_through_dispatch() {
        let (agent, _) = agent_with_rw_page();
        assert_eq!(
            agent.dispatch("writer_int", &[json!("0x1000"), json!(-7)]),
            json!(true)
        );
        assert_eq!(agent.dispatch("reader_int", &[json!("0x1000")]), json!(-7));
        // The same four bytes reread unsigned.
        assert_eq!(
            agent.dispatch("reader_uint", &[json!("0x1000")]),
            json!(u32::MAX - 6)
        );
    }

    #[test]
    fn longs_travel_as_decimal_strings() {
        let (agent, _) = agent_with_rw_page();
        agent.dispatch("writer_ulong", &[json!("0x1010"), json!("18446744073709551615")]);
        assert_eq!(
            agent.dispatch("reader_ulong", &[json!("0x1010")]),
            json!("18446744073709551615")
        );
        assert_eq!(
            agent.dispatch("reader_long", &[json!("0x1010")]),
            json!("-1")
        );
    }

    #[test]
    fn pointers_travel_as_hex_strings() {
        let (agent, _) = agent_with_rw_page();
        agent.dispatch("writer_pointer", &[json!("0x1020"), json!("0xdeadbeef")]);
        assert_eq!(
            agent.dispatch("reader_pointer", &[json!("0x1020")]),
            json!("0xdeadbeef")
        );
    }

    #[test]
    fn string_reads_stop_at_nul_and_clamp_to_range_end() {
        let (agent, fake) = agent_with_rw_page();
        fake.poke(0x1030, b"hello\0world");
        assert_eq!(
            agent.dispatch("reader_string", &[json!("0x1030")]),
            json!("hello")
        );
        // Unterminated string 8 bytes before the end of the mapping: the
        // read clamps instead of faulting.
        fake.poke(0x10f8, b"abcdefgh");
        assert_eq!(
            agent.dispatch("reader_string", &[json!("0x10f8")]),
            json!("abcdefgh")
        );
    }

    #[test]
    fn faulting_reads_and_writes_become_null() {
        let (agent, _) = agent_with_rw_page();
        assert_eq!(agent.dispatch("reader_int", &[json!("0x9000")]), json!(null));
        assert_eq!(
            agent.dispatch("writer_int", &[json!("0x9000"), json!(1)]),
            json!(null)
        );
        // Out-of-range value for the target type, same policy.
        assert_eq!(
            agent.dispatch("writer_byte", &[json!("0x1000"), json!(4000)]),
            json!(null)
        );
    }

    #[test]
    fn protection_queries() {
        let (agent, fake) = agent_with_rw_page();
        assert_eq!(
            agent.dispatch("check_read_protection", &[json!("0x1000")]),
            json!(true)
        );
        assert_eq!(
            agent.dispatch("get_memory_protection", &[json!("0x1000")]),
            json!("rw-")
        );
        assert_eq!(
            agent.dispatch("get_memory_protection", &[json!("0x9000")]),
            json!(null)
        );

        let resp = agent.dispatch(
            "set_memory_protection",
            &[json!("0x1000"), json!(0x100), json!("r--")],
        );
        assert_eq!(resp["success"], json!(true));
        assert_eq!(fake.protection_at(0x1000).unwrap().to_string(), "r--");
        assert_eq!(
            agent.dispatch("check_write_protection", &[json!("0x1000")]),
            json!(false)
        );
    }
}
