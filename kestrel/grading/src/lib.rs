//! Test tooling for the kestrel project crates.
//!
//! The attribute macros re-exported here wrap a `#[test]` function:
//!
//! - `#[stdin(b"..")]` hooks the console of the test thread. Console reads
//!   consume the given bytes and console writes are captured. Threads spawned
//!   afterwards inherit the hook.
//! - `#[assert_output(b"..")]` runs the test and compares the captured output
//!   with the given bytes. Requires `#[stdin]`.
//! - `#[assert_exit_code(n)]` runs the test body on a fresh kernel thread and
//!   asserts that it exits with `n`.
//!
//! ```rust,ignore
//! #[test]
//! #[stdin(b"")]
//! #[assert_output(b"hello")]
//! fn hello() {
//!     run_program("hello");
//! }
//! ```
extern crate grading_derive;

pub use grading_derive::*;

/// Captured console output of the current thread, ending the hook.
///
/// Returns `None` if the console was not hooked.
pub fn take_output() -> Option<String> {
    kestrel::thread::with_current(|th| th.finish_hook())
}
