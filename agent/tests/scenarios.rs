//! End-to-end scenarios driven through the RPC dispatcher against the
//! in-memory backend, the way the host would drive a live injection.

use std::sync::Arc;

use serde_json::json;
use toolkit::testkit::{CollectSink, FakeToolkit};
use toolkit::Arch;

use agent::{Agent, AgentConfig};

fn agent_over(fake: FakeToolkit) -> (Agent, Arc<FakeToolkit>, Arc<CollectSink>) {
    let fake = Arc::new(fake);
    let sink = CollectSink::new();
    let agent = Agent::new(fake.clone(), sink.clone(), AgentConfig::default());
    (agent, fake, sink)
}

#[test]
fn filtered_module_listing() {
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.add_module("libfoo", 0x1000, 0x1000, "/lib/libfoo.so");
    fake.add_module("libbar", 0x2000, 0x1000, "/lib/libbar.so");
    fake.add_module("libbaz", 0x3000, 0x1000, "/lib/libbaz.so");
    let (agent, _, _) = agent_over(fake);

    let out = agent.dispatch("list_modules", &[json!([["name", ":", "foo"]])]);
    let records = out.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], "libfoo");
}

#[test]
fn or_filter_unions_clauses() {
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.add_module("a", 0x1000, 0x1000, "/a");
    fake.add_module("b", 0x2000, 0x1000, "/b");
    fake.add_module("c", 0x3000, 0x1000, "/c");
    let (agent, _, _) = agent_over(fake);

    let out = agent.dispatch(
        "list_modules",
        &[json!([["name", "=", "a"], "or", ["name", "=", "c"]])],
    );
    let names: Vec<&str> = out
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"a"));
    assert!(names.contains(&"c"));
}

#[test]
fn patch_restore_round_trip_preserves_bytes_and_protection() {
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.map_range(0x1000, vec![0x55, 0x89, 0xe5, 0xc3], "r-x", None);
    let (agent, fake, _) = agent_over(fake);

    let patched = agent.dispatch("patch_bytes", &[json!("0x1000"), json!([0x90, 0x90, 0x90])]);
    assert_eq!(patched["success"], json!(true));
    assert_eq!(patched["original"], json!([0x55, 0x89, 0xe5]));
    assert_eq!(patched["patched"], json!([0x90, 0x90, 0x90]));

    let restored = agent.dispatch("restore_bytes", &[json!("0x1000"), patched["original"].clone()]);
    assert_eq!(restored["success"], json!(true));

    assert_eq!(
        agent.dispatch("reader_bytes", &[json!("0x1000"), json!(3)]),
        json!([0x55, 0x89, 0xe5])
    );
    assert_eq!(
        agent.dispatch("get_memory_protection", &[json!("0x1000")]),
        json!("r-x")
    );
}

#[test]
fn arm64_nop_sled_is_exactly_two_words() {
    let mut fake = FakeToolkit::new(Arch::Arm64);
    fake.map_range(0x4000, vec![0u8; 32], "r-x", None);
    fake.add_instruction(0x4000, 4, "mov", "x0, #1");
    fake.add_instruction(0x4004, 4, "ret", "");
    let (agent, fake, _) = agent_over(fake);

    let resp = agent.dispatch("nop_instructions", &[json!("0x4000"), json!(2)]);
    assert_eq!(resp["success"], json!(true));
    assert_eq!(
        fake.peek(0x4000, 8),
        vec![0x1f, 0x20, 0x03, 0xd5, 0x1f, 0x20, 0x03, 0xd5]
    );
    // Nothing past the sled is touched.
    assert_eq!(fake.peek(0x4008, 4), vec![0, 0, 0, 0]);
}

#[test]
fn progressive_scan_narrows_to_the_surviving_address() {
    let mut data = vec![0u8; 0x100];
    data[0x10..0x14].copy_from_slice(&42i32.to_ne_bytes()); // A
    data[0x20..0x24].copy_from_slice(&42i32.to_ne_bytes()); // B
    data[0x30..0x34].copy_from_slice(&7i32.to_ne_bytes()); // C
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.map_range(0x1000, data, "rw-", None);
    let (agent, fake, _) = agent_over(fake);

    let initial = agent.dispatch("scan_value", &[json!("int32"), json!("42")]);
    assert!(initial["count"].as_u64().unwrap() >= 2);
    let addrs: Vec<&str> = initial["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["address"].as_str().unwrap())
        .collect();
    assert!(addrs.contains(&"0x1010"));
    assert!(addrs.contains(&"0x1020"));

    fake.poke(0x1010, &100i32.to_ne_bytes());
    let refined = agent.dispatch("scan_next", &[json!("int32"), json!("42"), json!("eq")]);
    assert_eq!(refined["count"], 1);
    assert_eq!(refined["results"][0]["address"], "0x1020");
}

#[test]
fn hook_entry_event_shape() {
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.map_range(0x7000, vec![0x90; 16], "r-x", None);
    let (agent, fake, sink) = agent_over(fake);

    let resp = agent.dispatch(
        "hook_attach",
        &[json!("0x7000"), json!({"logArgs": true, "argCount": 2})],
    );
    assert_eq!(resp["success"], json!(true));
    assert_eq!(resp["id"], "hook_0");

    fake.invoke(0x7000, &[0xdead, 0xbeef], 0);

    let events = sink.take();
    assert_eq!(events.len(), 1);
    let wire = serde_json::to_value(&events[0]).unwrap();
    assert_eq!(wire["type"], "hook_enter");
    assert_eq!(wire["id"], "hook_0");
    assert_eq!(wire["address"], "0x7000");
    assert_eq!(wire["depth"], 0);
    assert!(wire["threadId"].is_u64());
    assert_eq!(wire["args"], json!(["0xdead", "0xbeef"]));
    assert!(wire.get("backtrace").is_none());
}

#[test]
fn hook_backtrace_is_symbolicated() {
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.map_range(0x7000, vec![0x90; 16], "r-x", None);
    fake.set_frames(vec![0x7000, 0x8800]);
    fake.add_symbolication(0x8800, "caller");
    let (agent, fake, sink) = agent_over(fake);

    agent.dispatch("hook_attach", &[json!("0x7000"), json!({"backtrace": true})]);
    fake.invoke(0x7000, &[], 0);

    let wire = serde_json::to_value(&sink.take()[0]).unwrap();
    let frames = wire["backtrace"].as_array().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], json!({ "address": "0x7000" }));
    assert_eq!(frames[1], json!({ "address": "0x8800", "symbol": "caller" }));
}

#[test]
fn enter_and_leave_are_ordered_within_one_invocation() {
    let mut fake = FakeToolkit::new(Arch::X64);
    fake.map_range(0x7000, vec![0x90; 16], "r-x", None);
    let (agent, fake, sink) = agent_over(fake);

    agent.dispatch(
        "hook_attach",
        &[json!("0x7000"), json!({"onLeave": true, "logRetval": true})],
    );
    fake.invoke(0x7000, &[], 0x5a);

    let events = sink.take();
    assert_eq!(events.len(), 2);
    let first = serde_json::to_value(&events[0]).unwrap();
    let second = serde_json::to_value(&events[1]).unwrap();
    assert_eq!(first["type"], "hook_enter");
    assert_eq!(second["type"], "hook_leave");
    assert_eq!(second["retval"], "0x5a");
}

#[test]
fn unknown_methods_fail_closed() {
    let fake = FakeToolkit::new(Arch::X64);
    let (agent, _, _) = agent_over(fake);
    let resp = agent.dispatch("explode", &[]);
    assert_eq!(resp["success"], json!(false));
}
