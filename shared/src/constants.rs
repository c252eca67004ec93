/// Hard cap on the `results` array returned by any scan response.
/// This is a transport-size guard, not a semantic limit; the full set
/// stays paged behind `get_scan_results`.
pub const SCAN_RESULT_CAP: usize = 1000;

/// Default byte ceiling for C-string reads.
pub const DEFAULT_STRING_CAP: usize = 256;

/// Default number of argument slots sampled by a hook.
pub const DEFAULT_ARG_COUNT: usize = 4;

/// Default instruction count for a linear disassembly sweep.
pub const DEFAULT_DISASM_COUNT: usize = 20;

/// Ceiling on instructions emitted by a function-bounded sweep.
pub const FUNCTION_WALK_CEILING: usize = 500;

/// Protection mask applied when an initial scan gives no range spec.
pub const DEFAULT_SCAN_PROTECTION: &str = "r--";

/// Default number of pointer-sized slots returned by `read_stack`.
pub const DEFAULT_STACK_SLOTS: usize = 32;

/// Default page size for `get_scan_results` / `get_scan_result_values`.
pub const DEFAULT_SCAN_PAGE: usize = 100;

/// Tolerance for float/double equality during scan refinement.
pub const FLOAT_SCAN_EPSILON: f64 = 1e-4;
