use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

impl NotifyLevel {
    fn urgency(self) -> &'static str {
        match self {
            NotifyLevel::Info => "low",
            NotifyLevel::Warning => "normal",
            NotifyLevel::Error => "critical",
        }
    }
}

/// Sends desktop notifications through an external command, typically
/// `notify-send`. Repeating the same notification within the rate window
/// is a no-op, so a module failing in a tight loop nags the user once.
pub struct Notifier {
    command: String,
    window: Duration,
    started: Instant,
    seen: HashSet<(u64, u64)>,
}

impl Notifier {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

    pub fn new(command: String) -> Self {
        Notifier { command, window: Self::DEFAULT_WINDOW, started: Instant::now(), seen: HashSet::new() }
    }

    pub fn notify(&mut self, level: NotifyLevel, module: &str, message: &str) {
        if !self.should_send(level, module, message, Instant::now()) {
            log::debug!("Suppressing repeated notification from {}: {}", module, message);
            return;
        }
        log::info!("Notifying user about {}: {}", module, message);
        let command = self.command.clone();
        let body = if module.is_empty() { message.to_string() } else { format!("{}: {}", module, message) };
        let urgency = level.urgency();
        tokio::spawn(async move {
            let result = tokio::process::Command::new(&command)
                .args(["-u", urgency, "barmux", &body])
                .status()
                .await;
            match result {
                Ok(status) if !status.success() => {
                    log::warn!("Notifier {:?} exited with {}", command, status);
                }
                Err(err) => log::warn!("Failed to run notifier {:?}: {}", command, err),
                Ok(_) => {}
            }
        });
    }

    /// Deduplication key: the message hash together with the current rate
    /// window, so the same text goes through again once the window rolls.
    fn should_send(&mut self, level: NotifyLevel, module: &str, message: &str, now: Instant) -> bool {
        let window_ms = self.window.as_millis().max(1) as u64;
        let bucket = now.duration_since(self.started).as_millis() as u64 / window_ms;

        let mut hasher = DefaultHasher::new();
        (level, module, message).hash(&mut hasher);
        let digest = hasher.finish();

        self.seen.retain(|(seen_bucket, _)| seen_bucket + 1 >= bucket);
        self.seen.insert((bucket, digest))
    }
}
