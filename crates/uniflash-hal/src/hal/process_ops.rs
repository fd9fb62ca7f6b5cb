//! External command runner.
//!
//! Helper programs (archive extraction for boot workarounds) go through the HAL so the
//! pipeline can be exercised without spawning real processes.

use crate::HalResult;
use std::time::Duration;

pub trait ProcessOps {
    /// Run `program` with `args` and return its stdout. A non-zero exit is an error.
    fn command_stdout(&self, program: &str, args: &[String], timeout: Duration)
        -> HalResult<Vec<u8>>;
}
