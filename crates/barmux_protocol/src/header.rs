use serde::{Deserialize, Serialize};

/// The signal i3bar should send to suspend the status process. barmux asks
/// for SIGTSTP instead of the default SIGSTOP so it can keep running and
/// pause its workers itself.
pub const STOP_SIGNAL_TSTP: i32 = 20;

/// The handshake object written as the very first line of an i3bar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version: u32,
    #[serde(default)]
    pub click_events: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<i32>,
}

impl Header {
    pub fn new(click_events: bool, stop_signal: i32) -> Self {
        Header { version: 1, click_events, stop_signal: Some(stop_signal) }
    }
}

impl Default for Header {
    fn default() -> Self {
        Header::new(true, STOP_SIGNAL_TSTP)
    }
}
