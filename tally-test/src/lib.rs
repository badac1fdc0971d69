//! Helpers for testing the tally crates.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with `tally_log` will show up for test
//!    failures or when run with `--nocapture`.
//!  - Background workers deliver asynchronously. Use [`wait_until`] instead of fixed sleeps when
//!    asserting on their output.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     tally_test::setup();
//!
//!     tally_log::debug!("hello, world!");
//! }
//! ```

use std::thread;
use std::time::{Duration, Instant};

/// Setup the test environment.
///
///  - Initializes logs: The logger captures logs from the workspace crates at TRACE level.
pub fn setup() {
    tally_log::init_test!();
}

/// Polls `condition` until it returns `true` or `timeout` elapses.
///
/// Returns the last result of `condition`.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return condition();
        }
        thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_wait_until_succeeds() {
        let calls = AtomicUsize::new(0);
        let done = wait_until(Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::Relaxed) >= 3
        });
        assert!(done);
    }

    #[test]
    fn test_wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(20), || false));
    }
}
