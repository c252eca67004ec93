//! Safe code-patch engine.
//!
//! Writes go through a scoped writable window: if the target range is not
//! writable, protection is raised to exactly "what was there, plus write"
//! for the patched bytes and restored when the scope ends, error paths
//! included. Executable memory is never elevated to `rwx` unless it was
//! executable to begin with.

use serde_json::{Value, json};
use shared::errors::{AgentError, MemoryError, PatchError};
use toolkit::capabilities::Toolkit;
use toolkit::prelude::*;
use toolkit::{Address, Arch, MemoryRange, Protection};

use crate::Agent;
use crate::dispatcher::{addr_arg, bytes_arg, usize_arg_or};

/// RAII guard over a temporarily writable span.
struct WritableWindow<'a> {
    toolkit: &'a dyn Toolkit,
    addr: Address,
    size: u64,
    /// Original protection to reinstate, `None` when nothing was raised.
    restore: Option<Protection>,
}

impl<'a> WritableWindow<'a> {
    fn open(
        toolkit: &'a dyn Toolkit,
        addr: Address,
        size: u64,
        range: &MemoryRange,
    ) -> Result<Self, MemoryError> {
        let restore = if range.protection.write {
            None
        } else {
            let raised = range.protection.with_write();
            toolkit.protect(addr, size, raised)?;
            Some(range.protection)
        };
        Ok(WritableWindow { toolkit, addr, size, restore })
    }
}

impl Drop for WritableWindow<'_> {
    fn drop(&mut self) {
        if let Some(original) = self.restore {
            if self.toolkit.protect(self.addr, self.size, original).is_err() {
                log::warn!("failed to restore protection at {}", self.addr);
            }
        }
    }
}

/// Architecture-appropriate NOP encoding. The ARM variants are whole
/// little-endian instruction words and must land at their natural
/// alignment.
fn nop_encoding(arch: Arch) -> &'static [u8] {
    match arch {
        Arch::X64 | Arch::Ia32 => &[0x90],
        Arch::Arm => &[0x00, 0xf0, 0x20, 0xe3],
        Arch::Arm64 => &[0x1f, 0x20, 0x03, 0xd5],
    }
}

impl Agent {
    /// Stash-original, write, restore-protection. Both `patch_bytes` and
    /// `restore_bytes` land here; `restore_bytes` is just a patch whose
    /// payload is the stashed original.
    fn apply_patch(&self, addr: Address, bytes: &[u8]) -> Result<Value, AgentError> {
        if bytes.is_empty() {
            return Err(PatchError::Empty.into());
        }
        let range = self
            .toolkit
            .range_containing(addr)
            .ok_or(PatchError::NoRange { address: addr.get() })?;

        let original = self.toolkit.read_bytes(addr, bytes.len())?;
        {
            let _window =
                WritableWindow::open(self.toolkit.as_ref(), addr, bytes.len() as u64, &range)
                    .map_err(AgentError::Memory)?;
            self.toolkit.write_bytes(addr, bytes)?;
        }
        log::info!("patched {} bytes at {addr}", bytes.len());
        Ok(json!({
            "success": true,
            "address": addr.to_string(),
            "original": original,
            "patched": bytes,
        }))
    }

    pub(crate) fn patch_bytes(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let bytes = bytes_arg(params, 1)?;
        self.apply_patch(addr, &bytes)
    }

    /// Neutralise `count` whole instructions in place with a NOP sled that
    /// fills exactly their summed size.
    pub(crate) fn nop_instructions(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let count = usize_arg_or(params, 1, 1);

        let mut total: u64 = 0;
        let mut cursor = addr;
        for _ in 0..count {
            let insn = self
                .toolkit
                .decode(cursor)
                .ok_or(PatchError::Undecodable { address: cursor.get() })?;
            total += insn.size as u64;
            cursor = insn.next;
        }

        let nop = nop_encoding(self.toolkit.arch());
        if total % nop.len() as u64 != 0 {
            return Err(PatchError::UnevenSled { size: total, width: nop.len() }.into());
        }
        let sled = nop.repeat((total / nop.len() as u64) as usize);
        self.apply_patch(addr, &sled)
    }

    pub(crate) fn restore_bytes(&self, params: &[Value]) -> Result<Value, AgentError> {
        let addr = addr_arg(params, 0)?;
        let original = bytes_arg(params, 1)?;
        self.apply_patch(addr, &original)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use toolkit::Arch;
    use toolkit::testkit::{CollectSink, FakeToolkit};

    use crate::{Agent, AgentConfig};

    fn patch_agent(arch: Arch) -> (Agent, Arc<FakeToolkit>) {
        let mut fake = FakeToolkit::new(arch);
        fake.map_range(0x1000, vec![0x55, 0x89, 0xe5, 0xc3, 0x00, 0x00, 0x00, 0x00], "r-x", None);
        let fake = Arc::new(fake);
        let agent = Agent::new(fake.clone(), CollectSink::new(), AgentConfig::default());
        (agent, fake)
    }

    #[test]
    fn patch_returns_original_and_patched_bytes() {
        let (agent, fake) = patch_agent(Arch::X64);
        let resp = agent.dispatch("patch_bytes", &[json!("0x1000"), json!([0x90, 0x90, 0x90])]);
        assert_eq!(resp["success"], json!(true));
        assert_eq!(resp["original"], json!([0x55, 0x89, 0xe5]));
        assert_eq!(resp["patched"], json!([0x90, 0x90, 0x90]));
        assert_eq!(fake.peek(0x1000, 3), vec![0x90, 0x90, 0x90]);
    }

    #[test]
    fn protection_is_restored_after_the_write() {
        let (agent, fake) = patch_agent(Arch::X64);
        agent.dispatch("patch_bytes", &[json!("0x1000"), json!([0x90])]);
        // r-x before, raised to rwx only transiently, r-x afterwards.
        assert_eq!(fake.protection_at(0x1000).unwrap().to_string(), "r-x");
    }

    #[test]
    fn round_trip_restores_the_pre_patch_bytes() {
        let (agent, fake) = patch_agent(Arch::X64);
        let resp = agent.dispatch("patch_bytes", &[json!("0x1000"), json!([0x90, 0x90, 0x90])]);
        let original = resp["original"].clone();
        let resp = agent.dispatch("restore_bytes", &[json!("0x1000"), original]);
        assert_eq!(resp["success"], json!(true));
        assert_eq!(fake.peek(0x1000, 3), vec![0x55, 0x89, 0xe5]);
        assert_eq!(fake.protection_at(0x1000).unwrap().to_string(), "r-x");
    }

    #[test]
    fn unmapped_and_empty_patches_fail() {
        let (agent, _) = patch_agent(Arch::X64);
        let resp = agent.dispatch("patch_bytes", &[json!("0x9000"), json!([0x90])]);
        assert_eq!(resp["success"], json!(false));
        let resp = agent.dispatch("patch_bytes", &[json!("0x1000"), json!([])]);
        assert_eq!(resp["success"], json!(false));
    }

    #[test]
    fn nop_sled_covers_whole_instructions_on_x64() {
        let mut fresh = FakeToolkit::new(Arch::X64);
        fresh.map_range(0x1000, vec![0x55, 0x89, 0xe5, 0xc3], "r-x", None);
        fresh.add_instruction(0x1000, 1, "push", "rbp");
        fresh.add_instruction(0x1001, 2, "mov", "ebp, esp");
        let fresh = Arc::new(fresh);
        let agent = Agent::new(fresh.clone(), CollectSink::new(), AgentConfig::default());

        let resp = agent.dispatch("nop_instructions", &[json!("0x1000"), json!(2)]);
        assert_eq!(resp["success"], json!(true));
        assert_eq!(fresh.peek(0x1000, 3), vec![0x90, 0x90, 0x90]);
        // The ret that follows is untouched.
        assert_eq!(fresh.peek(0x1003, 1), vec![0xc3]);
    }

    #[test]
    fn nop_on_undecodable_address_fails() {
        let (agent, _) = patch_agent(Arch::X64);
        let resp = agent.dispatch("nop_instructions", &[json!("0x1000")]);
        assert_eq!(resp["success"], json!(false));
    }

    #[test]
    fn arm64_nops_are_little_endian_words() {
        let mut fake = FakeToolkit::new(Arch::Arm64);
        fake.map_range(0x4000, vec![0u8; 16], "r-x", None);
        fake.add_instruction(0x4000, 4, "mov", "x0, #1");
        fake.add_instruction(0x4004, 4, "add", "x0, x0, #2");
        let fake = Arc::new(fake);
        let agent = Agent::new(fake.clone(), CollectSink::new(), AgentConfig::default());

        let resp = agent.dispatch("nop_instructions", &[json!("0x4000"), json!(2)]);
        assert_eq!(resp["success"], json!(true));
        assert_eq!(
            fake.peek(0x4000, 8),
            vec![0x1f, 0x20, 0x03, 0xd5, 0x1f, 0x20, 0x03, 0xd5]
        );
    }
}
