use std::time::Duration;

use chrono::Timelike;

#[macro_export]
macro_rules! print_result_err {
    ($context:expr, $result:expr $(,)?) => {{
        if let Err(err) = $result {
            log::error!("[{}:{}] Error {}: {:?}", ::std::file!(), ::std::line!(), $context, err);
        }
    }};
}

/// Select in a loop, breaking once an application termination event
/// (see [`crate::lifecycle`]) is received. The exit subscription is taken
/// once, before the first iteration; an exit sent while the loop body runs
/// stays buffered instead of being missed.
#[macro_export]
macro_rules! loop_select_exiting {
    ($($content:tt)*) => {
        let mut exit_recv = $crate::lifecycle::subscribe_exit();
        loop {
            tokio::select! {
                _ = exit_recv.recv() => {
                    break;
                }
                $($content)*
            }
        }
    };
}

/// Run a command from the configuration in the background, logging failures.
pub fn run_command(cmd: String) {
    tokio::spawn(async move {
        log::debug!("Running command: {}", cmd);
        match tokio::process::Command::new("/bin/sh").arg("-c").arg(&cmd).status().await {
            Ok(status) if !status.success() => log::warn!("Command {:?} exited with {}", cmd, status),
            Err(err) => log::error!("Failed to run command {:?}: {}", cmd, err),
            Ok(_) => {}
        }
    });
}

/// Whether a strftime-style format renders seconds, i.e. whether a display
/// of it goes stale every second rather than every minute.
pub fn format_has_seconds(format: &str) -> bool {
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        // skip padding/width modifiers like %-S or %0S
        let mut token = chars.next();
        while matches!(token, Some('-' | '_' | '0' | '^' | '#')) {
            token = chars.next();
        }
        match token {
            Some('S' | 'T' | 'X' | 'r' | 's' | 'c' | '+') => return true,
            _ => {}
        }
    }
    false
}

/// Time until the next whole second or whole minute after `now`.
/// The result is never zero, so callers can sleep on it without spinning.
pub fn duration_to_next_tick<Tz: chrono::TimeZone>(now: &chrono::DateTime<Tz>, per_second: bool) -> Duration {
    let subsec = Duration::from_nanos(now.timestamp_subsec_nanos() as u64);
    if per_second {
        Duration::from_secs(1).saturating_sub(subsec).max(Duration::from_millis(1))
    } else {
        let into_minute = Duration::from_secs(now.second() as u64) + subsec;
        Duration::from_secs(60).saturating_sub(into_minute).max(Duration::from_millis(1))
    }
}
