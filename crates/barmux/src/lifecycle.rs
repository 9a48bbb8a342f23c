use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tokio::sync::broadcast;

/// Clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Failure while setting up: bad configuration, unusable socket, broken stdout.
pub const EXIT_SETUP: i32 = 2;
/// Unrecoverable failure after the bar was already running.
pub const EXIT_RUNTIME: i32 = 3;

static APPLICATION_EXIT_SENDER: Lazy<broadcast::Sender<()>> = Lazy::new(|| broadcast::channel(2).0);

static EXIT_CODE: AtomicI32 = AtomicI32::new(EXIT_OK);

/// Notify all listeners of the application lifecycle that the application should exit.
pub fn send_exit() -> Result<()> {
    (*APPLICATION_EXIT_SENDER).send(()).context("Failed to send exit lifecycle event")?;
    Ok(())
}

/// Subscribe to the exit event. Broadcast receivers only see events sent
/// after they subscribe, so long-running consumers must take their
/// subscription up front and hold on to it.
pub fn subscribe_exit() -> broadcast::Receiver<()> {
    (*APPLICATION_EXIT_SENDER).subscribe()
}

/// Record the process exit code. The first non-zero code wins; later
/// failures during teardown must not mask the original one.
pub fn set_exit_code(code: i32) {
    let _ = EXIT_CODE.compare_exchange(EXIT_OK, code, Ordering::SeqCst, Ordering::SeqCst);
}

pub fn exit_code() -> i32 {
    EXIT_CODE.load(Ordering::SeqCst)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_failure_code_wins() {
        // the cell is process-global, so exercise the transition in one test
        assert_eq!(exit_code(), EXIT_OK);
        set_exit_code(EXIT_RUNTIME);
        assert_eq!(exit_code(), EXIT_RUNTIME);
        set_exit_code(EXIT_SETUP);
        assert_eq!(exit_code(), EXIT_RUNTIME);
    }
}
