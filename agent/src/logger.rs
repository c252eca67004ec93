//! File logging for an injected agent.
//!
//! Several targets may be instrumented at once, so each injection writes
//! its own file keyed by the target pid, and every line repeats that pid
//! so host-side collection of multiple logs stays attributable. The thread
//! name is part of the line because records come from two very different
//! places: the RPC event loop, and interceptor callbacks running on
//! arbitrary target threads.

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use flexi_logger::{DeferredNow, FileSpec, Logger, LoggerHandle, WriteMode};
use log::Record;

/// Pid of the process this agent was injected into, stamped into every
/// line. The format callback is a plain fn and cannot capture it.
static TARGET_PID: AtomicU32 = AtomicU32::new(0);

/// Start the per-injection file logger. Buffered writes keep hook
/// callbacks from blocking on the log file.
pub fn init_logger(spec: &str, pid: u32) -> Result<LoggerHandle, Box<dyn std::error::Error>> {
    TARGET_PID.store(pid, Ordering::Relaxed);
    let handle = Logger::try_with_str(spec)?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .basename("agent")
                .discriminant(pid.to_string())
                .suppress_timestamp(),
        )
        .append()
        .write_mode(WriteMode::BufferAndFlush)
        .format(line_format)
        .start()?;
    Ok(handle)
}

fn line_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(
        w,
        "{} {:<5} [pid {}] [{}] {}: {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        TARGET_PID.load(Ordering::Relaxed),
        thread::current().name().unwrap_or("target-thread"),
        record.module_path().unwrap_or("agent"),
        record.args()
    )
}
