//! Progressive memory scanner.
//!
//! Two phases: an initial pattern/value scan over the address space, then
//! refinements that re-read live memory at each prior result and discard
//! entries that stopped matching or stopped being readable. One session
//! per agent; every producer replaces the result set wholesale.

mod values;

use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use shared::constants::DEFAULT_SCAN_PAGE;
use shared::errors::{AgentError, ScanError};
use toolkit::prelude::*;
use toolkit::{Address, BytePattern, Protection};

use crate::Agent;
use crate::dispatcher::{arg, coerce_addr, coerce_u64, opt_arg, str_arg, usize_arg_or};
use values::{Comparison, TypedValue, ValueType};

#[derive(Debug, Clone)]
pub(crate) struct ScanHit {
    address: Address,
    size: usize,
    pattern: String,
}

/// Snapshot of typed values at the moment of `scan_snapshot`. Single
/// generation: re-snapshotting replaces it wholesale.
struct Snapshot {
    originals: FxHashMap<Address, TypedValue>,
}

#[derive(Default)]
pub(crate) struct ScanSession {
    results: Vec<ScanHit>,
    value_type: Option<ValueType>,
    snapshot: Option<Snapshot>,
}

impl ScanSession {
    fn response(&self, cap: usize) -> Value {
        let shown: Vec<Value> = self.results.iter().take(cap).map(hit_record).collect();
        json!({ "count": self.results.len(), "results": shown })
    }
}

fn hit_record(hit: &ScanHit) -> Value {
    json!({
        "address": hit.address.to_string(),
        "size": hit.size,
        "pattern": hit.pattern,
    })
}

/// Where an initial scan looks.
enum RangeSpec {
    Mask(Protection),
    Explicit { base: Address, size: u64 },
}

impl RangeSpec {
    fn parse(raw: Option<&Value>) -> Result<RangeSpec, AgentError> {
        let Some(raw) = raw else {
            return Ok(RangeSpec::Mask(
                shared::constants::DEFAULT_SCAN_PROTECTION.parse().unwrap(),
            ));
        };
        match raw {
            Value::String(mask) => Ok(RangeSpec::Mask(
                mask.parse::<Protection>().map_err(AgentError::Memory)?,
            )),
            Value::Object(obj) => {
                let base = obj
                    .get("base")
                    .and_then(coerce_addr)
                    .ok_or_else(|| AgentError::Argument("range spec needs a base address".into()))?;
                let size = obj
                    .get("size")
                    .and_then(coerce_u64)
                    .ok_or_else(|| AgentError::Argument("range spec needs a size".into()))?;
                Ok(RangeSpec::Explicit { base, size })
            }
            other => Err(AgentError::Argument(format!(
                "range spec must be a protection mask or {{base, size}}, got {other}"
            ))),
        }
    }
}

impl Agent {
    fn result_cap(&self) -> usize {
        self.config.scanner.result_cap
    }

    /// Shared initial-scan path. Ranges that fault are skipped silently;
    /// partial results beat a hard failure here.
    fn run_initial_scan(
        &self,
        pattern_text: &str,
        spec: RangeSpec,
        ty: Option<ValueType>,
    ) -> Result<Value, AgentError> {
        let pattern = BytePattern::parse(pattern_text)?;

        let targets: Vec<(Address, u64)> = match spec {
            RangeSpec::Explicit { base, size } => vec![(base, size)],
            RangeSpec::Mask(mask) => self
                .toolkit
                .ranges(mask)
                .into_iter()
                .map(|r| (r.base, r.size))
                .collect(),
        };

        let mut hits = Vec::new();
        for (base, size) in targets {
            match self.toolkit.scan_range(base, size, &pattern) {
                Ok(matches) => hits.extend(matches.into_iter().map(|m| ScanHit {
                    address: m.address,
                    size: m.size,
                    pattern: pattern_text.to_string(),
                })),
                Err(e) => log::debug!("skipping range at {base}: {e}"),
            }
        }
        log::info!("initial scan matched {} locations", hits.len());

        let mut session = self.scan.lock().unwrap();
        session.results = hits;
        session.value_type = ty;
        session.snapshot = None;
        Ok(session.response(self.result_cap()))
    }

    pub(crate) fn scan_pattern(&self, params: &[Value]) -> Result<Value, AgentError> {
        let pattern = str_arg(params, 0)?;
        let spec = RangeSpec::parse(opt_arg(params, 1))?;
        self.run_initial_scan(pattern, spec, None)
    }

    pub(crate) fn scan_value(&self, params: &[Value]) -> Result<Value, AgentError> {
        let ty = ValueType::parse(str_arg(params, 0)?)?;
        let bytes = ty.encode(arg(params, 1))?;
        let spec = RangeSpec::parse(opt_arg(params, 2))?;
        self.run_initial_scan(&hex::encode(&bytes), spec, Some(ty))
    }

    /// Shorthand for `scan_value("string", ...)`.
    pub(crate) fn scan_string(&self, params: &[Value]) -> Result<Value, AgentError> {
        let text = str_arg(params, 0)?;
        let bytes = ValueType::Utf8.encode(&Value::String(text.to_string()))?;
        let spec = RangeSpec::parse(opt_arg(params, 1))?;
        self.run_initial_scan(&hex::encode(&bytes), spec, Some(ValueType::Utf8))
    }

    /// Keep only results whose live value compares true against `value`.
    pub(crate) fn scan_next(&self, params: &[Value]) -> Result<Value, AgentError> {
        let ty = ValueType::parse(str_arg(params, 0)?)?;
        let target = ty.parse_target(arg(params, 1))?;
        let cmp = Comparison::parse(str_arg(params, 2)?)?;

        let mut session = self.scan.lock().unwrap();
        let before = session.results.len();
        session.results.retain(|hit| {
            match ty.read(self.toolkit.as_ref(), hit.address, hit.size) {
                Ok(current) => current.compare(&target, cmp),
                Err(_) => false, // unreadable entries are dropped
            }
        });
        session.value_type = Some(ty);
        log::info!(
            "scan_next {ty} {cmp}: {} -> {} results",
            before,
            session.results.len()
        );
        Ok(session.response(self.result_cap()))
    }

    /// Record the current typed value at every result as the baseline for
    /// `scan_changed` / `scan_unchanged`. Replaces any prior snapshot.
    pub(crate) fn scan_snapshot(&self, params: &[Value]) -> Result<Value, AgentError> {
        let ty = ValueType::parse(str_arg(params, 0)?)?;
        let mut session = self.scan.lock().unwrap();

        let mut originals = FxHashMap::default();
        for hit in &session.results {
            if let Ok(value) = ty.read(self.toolkit.as_ref(), hit.address, hit.size) {
                originals.insert(hit.address, value);
            }
        }
        log::info!("snapshot captured {} values", originals.len());
        session.snapshot = Some(Snapshot { originals });
        session.value_type = Some(ty);
        Ok(session.response(self.result_cap()))
    }

    pub(crate) fn scan_changed(&self, params: &[Value]) -> Result<Value, AgentError> {
        self.refine_against_snapshot(params, true)
    }

    pub(crate) fn scan_unchanged(&self, params: &[Value]) -> Result<Value, AgentError> {
        self.refine_against_snapshot(params, false)
    }

    fn refine_against_snapshot(
        &self,
        params: &[Value],
        keep_changed: bool,
    ) -> Result<Value, AgentError> {
        let ty = ValueType::parse(str_arg(params, 0)?)?;
        let mut session = self.scan.lock().unwrap();
        if session.snapshot.is_none() {
            return Err(ScanError::NoSnapshot.into());
        }

        let results = std::mem::take(&mut session.results);
        let snapshot = session.snapshot.as_ref().unwrap();
        let kept: Vec<ScanHit> = results
            .into_iter()
            .filter(|hit| {
                // Entries without a snapshot baseline are dropped, as are
                // entries that can no longer be read.
                let Some(original) = snapshot.originals.get(&hit.address) else {
                    return false;
                };
                match ty.read(self.toolkit.as_ref(), hit.address, hit.size) {
                    Ok(current) => current.approx_eq(original) != keep_changed,
                    Err(_) => false,
                }
            })
            .collect();
        session.results = kept;
        session.value_type = Some(ty);
        Ok(session.response(self.result_cap()))
    }

    pub(crate) fn get_scan_results(&self, params: &[Value]) -> Result<Value, AgentError> {
        let offset = usize_arg_or(params, 0, 0);
        let limit = usize_arg_or(params, 1, DEFAULT_SCAN_PAGE);
        let session = self.scan.lock().unwrap();
        let page: Vec<Value> = session
            .results
            .iter()
            .skip(offset)
            .take(limit)
            .map(hit_record)
            .collect();
        Ok(json!({
            "count": session.results.len(),
            "offset": offset,
            "valueType": session.value_type.map(|t| t.to_string()),
            "results": page,
        }))
    }

    /// Page with a live typed re-read at every address; entries that fail
    /// to read report a `null` value inline instead of vanishing.
    pub(crate) fn get_scan_result_values(&self, params: &[Value]) -> Result<Value, AgentError> {
        let ty = ValueType::parse(str_arg(params, 0)?)?;
        let offset = usize_arg_or(params, 1, 0);
        let limit = usize_arg_or(params, 2, DEFAULT_SCAN_PAGE);
        let session = self.scan.lock().unwrap();

        let page: Vec<Value> = session
            .results
            .iter()
            .skip(offset)
            .take(limit)
            .map(|hit| {
                let value = match ty.read(self.toolkit.as_ref(), hit.address, hit.size) {
                    Ok(v) => Value::String(v.display()),
                    Err(_) => Value::Null,
                };
                json!({
                    "address": hit.address.to_string(),
                    "size": hit.size,
                    "value": value,
                })
            })
            .collect();
        Ok(json!({ "count": session.results.len(), "offset": offset, "results": page }))
    }

    pub(crate) fn clear_scan(&self) -> Result<Value, AgentError> {
        let mut session = self.scan.lock().unwrap();
        *session = ScanSession::default();
        Ok(json!({ "success": true }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use toolkit::Arch;
    use toolkit::testkit::{CollectSink, FakeToolkit};

    use crate::{Agent, AgentConfig};

    /// Three i32 slots at 0x1000/0x1004/0x1008 holding 42, 42, 7.
    fn scan_agent() -> (Agent, Arc<FakeToolkit>) {
        let mut data = vec![0u8; 0x100];
        data[0..4].copy_from_slice(&42i32.to_ne_bytes());
        data[4..8].copy_from_slice(&42i32.to_ne_bytes());
        data[8..12].copy_from_slice(&7i32.to_ne_bytes());
        let mut fake = FakeToolkit::new(Arch::X64);
        fake.map_range(0x1000, data, "rw-", None);
        let fake = Arc::new(fake);
        let agent = Agent::new(fake.clone(), CollectSink::new(), AgentConfig::default());
        (agent, fake)
    }

    fn addresses(resp: &serde_json::Value) -> Vec<&str> {
        resp["results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["address"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn value_scan_finds_typed_matches() {
        let (agent, _) = scan_agent();
        let resp = agent.dispatch("scan_value", &[json!("int32"), json!(42)]);
        assert!(resp["count"].as_u64().unwrap() >= 2);
        let addrs = addresses(&resp);
        assert!(addrs.contains(&"0x1000"));
        assert!(addrs.contains(&"0x1004"));
    }

    #[test]
    fn refinement_shrinks_monotonically() {
        let (agent, fake) = scan_agent();
        let initial = agent.dispatch("scan_value", &[json!("int32"), json!(42)]);
        let before = initial["count"].as_u64().unwrap();

        fake.poke(0x1000, &100i32.to_ne_bytes());
        let refined = agent.dispatch("scan_next", &[json!("int32"), json!(42), json!("eq")]);
        let after = refined["count"].as_u64().unwrap();
        assert!(after <= before);
        assert_eq!(addresses(&refined), vec!["0x1004"]);
    }

    #[test]
    fn snapshot_partitions_changed_and_unchanged() {
        let (agent, fake) = scan_agent();
        agent.dispatch("scan_value", &[json!("int32"), json!(42)]);
        agent.dispatch("scan_snapshot", &[json!("int32")]);

        fake.poke(0x1004, &55i32.to_ne_bytes());
        let changed = agent.dispatch("scan_changed", &[json!("int32")]);
        assert_eq!(addresses(&changed), vec!["0x1004"]);

        // The surviving set no longer contains the unchanged address; a
        // fresh scan rebuilds the partition's other side.
        agent.dispatch("scan_value", &[json!("int32"), json!(42)]);
        agent.dispatch("scan_snapshot", &[json!("int32")]);
        fake.poke(0x1000, &56i32.to_ne_bytes());
        let unchanged = agent.dispatch("scan_unchanged", &[json!("int32")]);
        assert!(!addresses(&unchanged).contains(&"0x1000"));
    }

    #[test]
    fn changed_without_snapshot_is_caller_misuse() {
        let (agent, _) = scan_agent();
        agent.dispatch("scan_value", &[json!("int32"), json!(42)]);
        let resp = agent.dispatch("scan_changed", &[json!("int32")]);
        assert_eq!(resp["success"], json!(false));
    }

    #[test]
    fn string_scan_and_live_values() {
        let (agent, fake) = scan_agent();
        fake.poke(0x1040, b"secret\0");
        let resp = agent.dispatch("scan_string", &[json!("secret")]);
        assert_eq!(resp["count"], 1);

        let values = agent.dispatch("get_scan_result_values", &[json!("string")]);
        assert_eq!(values["results"][0]["value"], "secret");
    }

    #[test]
    fn results_are_paged() {
        let (agent, _) = scan_agent();
        // Every zero byte matches: plenty of results to page through.
        let resp = agent.dispatch("scan_pattern", &[json!("00")]);
        let total = resp["count"].as_u64().unwrap();
        assert!(total > 4);

        let page = agent.dispatch("get_scan_results", &[json!(2), json!(3)]);
        assert_eq!(page["count"].as_u64().unwrap(), total);
        assert_eq!(page["offset"], 2);
        assert_eq!(page["results"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn responses_cap_results_but_report_the_true_count() {
        let mut data = vec![0xccu8; 2048];
        data[2047] = 0;
        let mut fake = FakeToolkit::new(Arch::X64);
        fake.map_range(0x1000, data, "r--", None);
        let agent = Agent::new(Arc::new(fake), CollectSink::new(), AgentConfig::default());

        let resp = agent.dispatch("scan_pattern", &[json!("cc")]);
        assert_eq!(resp["count"], 2047);
        assert_eq!(resp["results"].as_array().unwrap().len(), 1000);
    }

    #[test]
    fn clear_scan_drops_everything() {
        let (agent, _) = scan_agent();
        agent.dispatch("scan_value", &[json!("int32"), json!(42)]);
        let resp = agent.dispatch("clear_scan", &[]);
        assert_eq!(resp["success"], json!(true));
        let page = agent.dispatch("get_scan_results", &[]);
        assert_eq!(page["count"], 0);
    }

    #[test]
    fn explicit_range_spec_narrows_the_scan() {
        let (agent, _) = scan_agent();
        let resp = agent.dispatch(
            "scan_value",
            &[json!("int32"), json!(42), json!({"base": "0x1004", "size": 8})],
        );
        assert_eq!(addresses(&resp), vec!["0x1004"]);
    }

    #[test]
    fn bad_type_is_an_error_envelope() {
        let (agent, _) = scan_agent();
        let resp = agent.dispatch("scan_value", &[json!("quad"), json!(1)]);
        assert_eq!(resp["success"], json!(false));
        assert!(resp["error"].as_str().unwrap().contains("quad"));
    }
}
