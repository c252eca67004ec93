//! Host-bound event envelope.
//!
//! Events are pushed asynchronously through the toolkit's send primitive and
//! must survive a JSON round-trip on the host side, so every numeric value
//! that might exceed 53-bit integer precision travels as a hex string.

use serde::Serialize;

/// One symbolicated frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameRecord {
    /// Hex form of the frame's return address.
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

/// Payload emitted on each instrumented function entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookEnterEvent {
    pub id: String,
    /// Hex form of the hooked address.
    pub address: String,
    pub thread_id: u32,
    /// Reentrancy counter supplied by the interceptor backend.
    pub depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<Vec<FrameRecord>>,
}

/// Payload emitted on each instrumented function return.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookLeaveEvent {
    pub id: String,
    pub address: String,
    pub thread_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retval: Option<String>,
    /// Arguments sampled on entry, replayed here so the host can pair
    /// call and return without keeping its own scratch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
}

/// Top-level envelope. The `type` tag is what the host switches on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    HookEnter(HookEnterEvent),
    HookLeave(HookLeaveEvent),
}

// Helpers to wrap child payloads into the top-level envelope. Producers can
// call `.into()` without importing the enum at each call site.
impl From<HookEnterEvent> for AgentEvent {
    #[inline]
    fn from(e: HookEnterEvent) -> Self {
        AgentEvent::HookEnter(e)
    }
}

impl From<HookLeaveEvent> for AgentEvent {
    #[inline]
    fn from(e: HookLeaveEvent) -> Self {
        AgentEvent::HookLeave(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_event_wire_shape() {
        let ev: AgentEvent = HookEnterEvent {
            id: "hook_0".into(),
            address: "0x1000".into(),
            thread_id: 7,
            depth: 0,
            args: Some(vec!["0xdead".into(), "0xbeef".into()]),
            backtrace: None,
        }
        .into();

        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "hook_enter");
        assert_eq!(v["id"], "hook_0");
        assert_eq!(v["threadId"], 7);
        assert_eq!(v["depth"], 0);
        assert_eq!(v["args"][1], "0xbeef");
        assert!(v.get("backtrace").is_none());
    }

    #[test]
    fn leave_event_omits_optionals() {
        let ev: AgentEvent = HookLeaveEvent {
            id: "hook_3".into(),
            address: "0x2000".into(),
            thread_id: 1,
            retval: None,
            args: None,
        }
        .into();

        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "hook_leave");
        assert!(v.get("retval").is_none());
        assert!(v.get("args").is_none());
    }
}
