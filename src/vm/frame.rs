//! Call frame bookkeeping (spec §4.8).

/// One entry on the VM's call stack, pushed by `CALL` and popped by `RET`.
///
/// `bottom_address` is computed *before* the call: `stack_top - arg_size -
/// ret_size`. For a plain function the result cells sit right there, at
/// `bottom_address + 0`; a method call has `self` pushed ahead of them by
/// the caller, so its result cells start at `bottom_address +
/// result_offset` instead. `RET` copies them down to the frame's bottom
/// before truncating, since `self` must not survive the call.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    pub result_size: i64,
    pub result_offset: i64,
    pub params_size: i64,
    pub return_address: i64,
    pub bottom_address: i64,
    pub scope_level: i32,
}

/// Outcome of a `run()` call: either the program ran to `EXIT`, or it was
/// suspended for a reason the caller can resume from (spec §4.8's run
/// control — step limits and breakpoints are not errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Finished,
    StepLimitReached,
    BreakpointHit { pc: usize },
    /// Returned only by `step()`: one source step ran (possibly an entire
    /// call, under `RunOptions::skip_calls`) and the VM is still running.
    Stepped,
}
