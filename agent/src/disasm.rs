//! Linear-sweep disassembly walker.
//!
//! Deliberately not a control-flow walk: branches are never followed, and
//! `disassemble_function` is a linear sweep bounded by a return-class
//! instruction, a revisited address, or the instruction ceiling.

use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::{Value, json};
use shared::constants::{DEFAULT_DISASM_COUNT, FUNCTION_WALK_CEILING};
use shared::errors::AgentError;
use toolkit::prelude::*;
use toolkit::{Arch, Instruction};

use crate::Agent;
use crate::dispatcher::{addr_arg, usize_arg_or};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstructionRecord {
    address: String,
    next: String,
    size: u32,
    mnemonic: String,
    op_str: String,
    bytes: Vec<u8>,
    groups: Vec<String>,
    regs_read: Vec<String>,
    regs_written: Vec<String>,
}

/// Return-class test, architecture-dependent. On ARM this only recognises
/// `bx lr`; other return idioms (`pop {.., pc}`) are not treated as
/// boundaries.
fn is_return(arch: Arch, insn: &Instruction) -> bool {
    match arch {
        Arch::X64 | Arch::Ia32 => matches!(insn.mnemonic.as_str(), "ret" | "retq" | "retn"),
        Arch::Arm => insn.mnemonic == "bx" && insn.op_str.trim() == "lr",
        Arch::Arm64 => insn.mnemonic == "ret",
    }
}

impl Agent {
    fn record(&self, insn: Instruction) -> InstructionRecord {
        // Raw bytes are best-effort: a faulted read yields an empty array
        // but the instruction is still emitted.
        let bytes = self
            .toolkit
            .read_bytes(insn.address, insn.size as usize)
            .unwrap_or_default();
        InstructionRecord {
            address: insn.address.to_string(),
            next: insn.next.to_string(),
            size: insn.size,
            mnemonic: insn.mnemonic,
            op_str: insn.op_str,
            bytes,
            groups: insn.groups,
            regs_read: insn.regs_read,
            regs_written: insn.regs_written,
        }
    }

    pub(crate) fn instruction(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        Ok(match self.toolkit.decode(addr) {
            Some(insn) => json!(self.record(insn)),
            None => Value::Null,
        })
    }

    pub(crate) fn disassemble(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let count = usize_arg_or(params, 1, DEFAULT_DISASM_COUNT);

        let mut out = Vec::with_capacity(count.min(64));
        let mut cursor = addr;
        for _ in 0..count {
            let Some(insn) = self.toolkit.decode(cursor) else {
                break;
            };
            cursor = insn.next;
            out.push(self.record(insn));
        }
        Ok(json!(out))
    }

    pub(crate) fn disassemble_function(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let max = usize_arg_or(params, 1, FUNCTION_WALK_CEILING);
        let arch = self.toolkit.arch();

        let mut out = Vec::new();
        let mut visited = FxHashSet::default();
        let mut cursor = addr;
        for _ in 0..max {
            // A revisited address means a tight self-loop, not a longer
            // function body.
            if !visited.insert(cursor) {
                break;
            }
            let Some(insn) = self.toolkit.decode(cursor) else {
                break;
            };
            cursor = insn.next;
            let stop = is_return(arch, &insn);
            out.push(self.record(insn));
            if stop {
                break;
            }
        }
        Ok(json!(out))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use toolkit::Arch;
    use toolkit::testkit::{CollectSink, FakeToolkit};

    use crate::{Agent, AgentConfig};

    /// push rbp; mov rbp, rsp; nop; ret; then unrelated bytes.
    fn x64_function() -> FakeToolkit {
        let mut fake = FakeToolkit::new(Arch::X64);
        fake.map_range(
            0x1000,
            vec![0x55, 0x48, 0x89, 0xe5, 0x90, 0xc3, 0xcc, 0xcc],
            "r-x",
            None,
        );
        fake.add_instruction(0x1000, 1, "push", "rbp");
        fake.add_instruction(0x1001, 3, "mov", "rbp, rsp");
        fake.add_instruction(0x1004, 1, "nop", "");
        fake.add_instruction(0x1005, 1, "ret", "");
        fake.add_instruction(0x1006, 1, "int3", "");
        fake
    }

    fn agent(fake: FakeToolkit) -> Agent {
        Agent::new(Arc::new(fake), CollectSink::new(), AgentConfig::default())
    }

    #[test]
    fn single_instruction_with_bytes() {
        let agent = agent(x64_function());
        let insn = agent.dispatch("instruction", &[json!("0x1001")]);
        assert_eq!(insn["mnemonic"], "mov");
        assert_eq!(insn["opStr"], "rbp, rsp");
        assert_eq!(insn["bytes"], json!([0x48, 0x89, 0xe5]));
        assert_eq!(insn["next"], "0x1004");

        assert_eq!(agent.dispatch("instruction", &[json!("0x2000")]), json!(null));
    }

    #[test]
    fn sweep_is_contiguous_and_bounded() {
        let agent = agent(x64_function());
        let out = agent.dispatch("disassemble", &[json!("0x1000"), json!(3)]);
        let insns = out.as_array().unwrap();
        assert_eq!(insns.len(), 3);
        for pair in insns.windows(2) {
            let end = u64::from_str_radix(
                pair[0]["address"].as_str().unwrap().trim_start_matches("0x"),
                16,
            )
            .unwrap()
                + pair[0]["size"].as_u64().unwrap();
            let next = u64::from_str_radix(
                pair[1]["address"].as_str().unwrap().trim_start_matches("0x"),
                16,
            )
            .unwrap();
            assert_eq!(end, next);
        }
    }

    #[test]
    fn sweep_stops_at_decode_failure() {
        let agent = agent(x64_function());
        // 0x1007 is mapped but not decodable.
        let out = agent.dispatch("disassemble", &[json!("0x1004"), json!(20)]);
        assert_eq!(out.as_array().unwrap().len(), 3); // nop, ret, int3
    }

    #[test]
    fn function_walk_stops_at_return() {
        let agent = agent(x64_function());
        let out = agent.dispatch("disassemble_function", &[json!("0x1000")]);
        let insns = out.as_array().unwrap();
        assert_eq!(insns.len(), 4);
        assert_eq!(insns.last().unwrap()["mnemonic"], "ret");
    }

    #[test]
    fn function_walk_breaks_self_loops() {
        let mut fake = FakeToolkit::new(Arch::X64);
        fake.map_range(0x2000, vec![0xeb, 0xfe], "r-x", None);
        // jmp to itself: next points back at the same address.
        fake.add_instruction_with_next(0x2000, 2, "jmp", "0x2000", 0x2000);
        let agent = agent(fake);
        let out = agent.dispatch("disassemble_function", &[json!("0x2000")]);
        assert_eq!(out.as_array().unwrap().len(), 1);
    }

    #[test]
    fn arm_return_heuristic_is_bx_lr() {
        let mut fake = FakeToolkit::new(Arch::Arm);
        fake.map_range(0x3000, vec![0u8; 8], "r-x", None);
        fake.add_instruction(0x3000, 4, "mov", "r0, #0");
        fake.add_instruction(0x3004, 4, "bx", "lr");
        let agent = agent(fake);
        let out = agent.dispatch("disassemble_function", &[json!("0x3000")]);
        let insns = out.as_array().unwrap();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns.last().unwrap()["mnemonic"], "bx");
    }
}
